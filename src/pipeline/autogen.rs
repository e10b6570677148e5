//! Answer submission and the one-shot supplemental generation round.
//!
//! A round fires at most once per course: the `has_auto_gen_triggered` flag is claimed
//! atomically before any work starts and handed back if the round fails.

use serde::Serialize;
use uuid::Uuid;

use super::units::CONTEXT_SAMPLE_GAMES;
use super::{titles, CourseRound, Pipeline, RoundOutcome};
use crate::error::{PipelineError, Result};
use crate::models::{
    Course, CourseStatus, GeneratedGame, GeneratedUnit, SubmitAnswerReq, Unit, UnitProgress, UnitStatus,
};
use crate::notify::CourseEvent;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoGenStatus {
    NotTriggered,
    #[serde(rename_all = "camelCase")]
    Completed { units_added: usize, games_added: usize },
    Failed { error: String },
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub correct: bool,
    pub progress: Option<UnitProgress>,
    /// Completed games over total games in the course, as a percentage.
    pub course_progress: f64,
    pub auto_generation: AutoGenStatus,
}

pub fn aggregate_progress(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (completed as f64 * 100.0 / total as f64).min(100.0)
}

impl Pipeline {
    /// Check an answer, record progress when it is correct and evaluate the trigger.
    ///
    /// A failed supplemental round is reported in the outcome; the answer itself still counts.
    #[tracing::instrument(skip_all, fields(%game_id, player = %req.player_id))]
    pub async fn submit_answer(&self, game_id: Uuid, req: SubmitAnswerReq) -> Result<AnswerOutcome> {
        if req.player_id.trim().is_empty() {
            return Err(PipelineError::validation("playerId is required"));
        }
        let (game, course_id) = self
            .store
            .get_game(game_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("game {game_id}")))?;

        let correct = game.content.is_correct(&req.answer);
        let progress = if correct {
            let unit_total = self.store.list_games(game.unit_id).await?.len() as i32;
            Some(
                self.store
                    .record_progress(&req.player_id, game.unit_id, unit_total)
                    .await?,
            )
        } else {
            self.store.get_progress(&req.player_id, game.unit_id).await?
        };

        let course = self
            .store
            .get_course(course_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("course {course_id}")))?;
        let completed = self.store.completed_games(course_id, &req.player_id).await?;
        let course_progress = aggregate_progress(completed, course.total_games as i64);

        let auto_generation = if correct {
            match self.maybe_auto_generate(&course, course_progress).await {
                Ok(Some(outcome)) => AutoGenStatus::Completed {
                    units_added: outcome.units_ready,
                    games_added: outcome.games_inserted,
                },
                Ok(None) => AutoGenStatus::NotTriggered,
                Err(e) => AutoGenStatus::Failed { error: e.to_string() },
            }
        } else {
            AutoGenStatus::NotTriggered
        };

        Ok(AnswerOutcome {
            correct,
            progress,
            course_progress,
            auto_generation,
        })
    }

    /// Fire the supplemental round when the course is eligible and `progress` has reached
    /// its threshold. `Ok(None)` means nothing fired (not eligible, or another caller won).
    pub async fn maybe_auto_generate(&self, course: &Course, progress: f64) -> Result<Option<RoundOutcome>> {
        if !course.auto_gen_enabled
            || course.has_auto_gen_triggered
            || course.status != CourseStatus::Ready
            || progress < course.auto_gen_threshold as f64
        {
            return Ok(None);
        }
        if !self.store.try_claim_auto_gen(course.id).await? {
            tracing::debug!(course_id = %course.id, "auto-generation already claimed");
            return Ok(None);
        }
        tracing::info!(course_id = %course.id, progress, "auto-generation triggered");

        match self.run_additional_round(course).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                tracing::warn!(course_id = %course.id, error = %e, "auto-generation failed");
                if let Err(release) = self.store.release_auto_gen(course.id).await {
                    tracing::error!(course_id = %course.id, error = %release, "failed to release auto-generation claim");
                }
                Err(PipelineError::AutoGeneration(Box::new(e)))
            }
        }
    }

    async fn run_additional_round(&self, course: &Course) -> Result<RoundOutcome> {
        let unit_count = self.settings.additional_units;
        let resources = self.store.list_resources(course.id).await?;
        let material = self.prepare_material(resources).await;

        let course_units = self.store.list_units(course.id).await?;
        let existing: Vec<String> = course_units.iter().map(|u| u.title.clone()).collect();
        let context = self.earlier_units(&course_units).await?;
        let outlines = titles::generate_unit_outlines(&self.client, &material, unit_count, &existing).await?;

        let start = self
            .store
            .max_order_index(course.id)
            .await?
            .map_or(0, |max| max + 1);
        let units = self.insert_shells(course.id, start, &outlines).await?;
        let unit_ids: Vec<Uuid> = units.iter().map(|u| u.id).collect();

        let round = CourseRound {
            course_id: course.id,
            metadata: titles::CourseMetadata {
                title: course.title.clone(),
                description: course.description.clone(),
            },
            material,
            units,
            games_per_unit: course.games_per_unit.max(1) as usize,
            strategy: self.settings.strategy,
            context,
        };
        let outcome = self.generate_games(&round).await;

        if outcome.games_inserted == 0 {
            self.store.delete_units(course.id, &unit_ids).await?;
            return Err(PipelineError::validation("supplemental round produced no games"));
        }
        self.notifier
            .publish(course.id, CourseEvent::GenerationComplete { course_id: course.id });
        Ok(outcome)
    }

    /// Ready units with a couple of their games, in course order.
    async fn earlier_units(&self, course_units: &[Unit]) -> Result<Vec<GeneratedUnit>> {
        let mut context = Vec::new();
        for unit in course_units.iter().filter(|u| u.status == UnitStatus::Ready) {
            let games = self.store.list_games(unit.id).await?;
            context.push(GeneratedUnit {
                title: unit.title.clone(),
                games: games
                    .into_iter()
                    .take(CONTEXT_SAMPLE_GAMES)
                    .map(|g| GeneratedGame {
                        title: g.title,
                        difficulty_level: g.difficulty_level,
                        content: g.content,
                    })
                    .collect(),
            });
        }
        Ok(context)
    }
}

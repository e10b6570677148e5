//! Course generation pipeline.
//!
//! Creation runs in two halves. [`Pipeline::start_course`] does everything the caller waits
//! for: screening, persistence of the submission, budgeting, Phase 1 and the unit shells.
//! [`Pipeline::complete_course`] runs Phase 2 afterwards, usually on a spawned task, and
//! settles the course into `ready` or `error`.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use uuid::Uuid;

use crate::budget::optimize_resources;
use crate::error::{PipelineError, Result};
use crate::generation::{GenerationClient, Material};
use crate::models::{
    Course, CourseStatus, CreateCourseReq, GeneratedUnit, NewCourse, Resource, ResourceKind, Strategy, Unit,
};
use crate::notify::{CourseEvent, Notifier};
use crate::safety::ContentScreen;
use crate::store::{retry_once, CourseStore};

pub mod autogen;
pub mod batches;
pub mod titles;
pub mod units;

use batches::{create_unit_batches, place_units, UnitBatch};
use titles::CourseMetadata;
use units::{UnitRequestContext, UnitSpec};

pub use autogen::{AnswerOutcome, AutoGenStatus};

pub const MAX_GAMES_PER_UNIT: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub resource_char_budget: usize,
    pub games_per_unit: usize,
    pub batch_size: usize,
    pub strategy: Strategy,
    pub additional_units: usize,
    pub max_units: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            resource_char_budget: 30_000,
            games_per_unit: 4,
            batch_size: 3,
            strategy: Strategy::Parallel,
            additional_units: 3,
            max_units: 20,
        }
    }
}

/// Everything Phase 2 needs once the unit shells exist.
#[derive(Debug, Clone)]
pub struct CourseRound {
    pub course_id: Uuid,
    pub metadata: CourseMetadata,
    pub material: Material,
    /// Shells in narrative order.
    pub units: Vec<Unit>,
    pub games_per_unit: usize,
    pub strategy: Strategy,
    /// Units already in the course, oldest first. Sequential generation treats them as
    /// earlier units; empty for a new course.
    pub context: Vec<GeneratedUnit>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    pub units_ready: usize,
    pub units_failed: usize,
    pub games_inserted: usize,
}

pub struct Pipeline {
    store: Arc<dyn CourseStore>,
    client: GenerationClient,
    notifier: Arc<dyn Notifier>,
    screen: Arc<dyn ContentScreen>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn CourseStore>,
        client: GenerationClient,
        notifier: Arc<dyn Notifier>,
        screen: Arc<dyn ContentScreen>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            client,
            notifier,
            screen,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn CourseStore> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Validate, persist and outline a new course. On any failure after the course row exists
    /// the row is deleted again, so a failed creation never leaves a partial course behind.
    #[tracing::instrument(skip_all, fields(owner = %owner_id, units = req.unit_count))]
    pub async fn start_course(&self, owner_id: &str, req: CreateCourseReq) -> Result<(Course, CourseRound)> {
        let games_per_unit = req.games_per_unit.unwrap_or(self.settings.games_per_unit);
        self.validate_request(&req, games_per_unit)?;
        self.screen.screen(&req.resources)?;

        let mut resources = req.resources;
        resources.sort_by_key(|r| r.order_index);
        for (i, r) in resources.iter_mut().enumerate() {
            r.order_index = i as i32;
        }

        let new_course = NewCourse {
            owner_id: owner_id.to_string(),
            auto_gen_enabled: req.auto_gen_enabled,
            auto_gen_threshold: req.auto_gen_threshold,
            games_per_unit: games_per_unit as i32,
        };
        let course = retry_once("create course", || {
            self.store.create_course(new_course.clone(), &resources)
        })
        .await?;
        tracing::info!(course_id = %course.id, "course created");

        let strategy = req.strategy.unwrap_or(self.settings.strategy);
        match self
            .outline_course(course.id, resources, req.unit_count, games_per_unit, strategy)
            .await
        {
            Ok(round) => {
                let course = self
                    .store
                    .get_course(course.id)
                    .await?
                    .ok_or_else(|| PipelineError::NotFound(format!("course {}", course.id)))?;
                Ok((course, round))
            }
            Err(e) => {
                tracing::warn!(course_id = %course.id, error = %e, "course creation failed, removing course");
                if let Err(del) = self.store.delete_course(course.id).await {
                    tracing::error!(course_id = %course.id, error = %del, "failed to remove course");
                }
                Err(e)
            }
        }
    }

    fn validate_request(&self, req: &CreateCourseReq, games_per_unit: usize) -> Result<()> {
        if req.resources.is_empty() {
            return Err(PipelineError::validation("at least one resource is required"));
        }
        if req.unit_count == 0 || req.unit_count > self.settings.max_units {
            return Err(PipelineError::validation(format!(
                "unitCount must be between 1 and {}",
                self.settings.max_units
            )));
        }
        if games_per_unit == 0 || games_per_unit > MAX_GAMES_PER_UNIT {
            return Err(PipelineError::validation(format!(
                "gamesPerUnit must be between 1 and {MAX_GAMES_PER_UNIT}"
            )));
        }
        if !(0..=100).contains(&req.auto_gen_threshold) {
            return Err(PipelineError::validation("autoGenThreshold must be between 0 and 100"));
        }
        for r in &req.resources {
            let has_text = r.content.as_deref().is_some_and(|c| !c.trim().is_empty());
            let has_url = r.file_url.as_deref().is_some_and(|u| !u.trim().is_empty());
            let usable = match r.kind {
                ResourceKind::Text => has_text,
                ResourceKind::Image => has_url,
                ResourceKind::File => has_text || has_url,
            };
            if !usable {
                return Err(PipelineError::validation(format!(
                    "{} resource at position {} has no usable content",
                    r.kind.as_str(),
                    r.order_index
                )));
            }
        }
        Ok(())
    }

    async fn transition(&self, course_id: Uuid, from: CourseStatus, to: CourseStatus) -> Result<()> {
        if self.store.transition_status(course_id, from, to).await? {
            tracing::debug!(%course_id, from = from.as_str(), to = to.as_str(), "course status");
            Ok(())
        } else {
            Err(PipelineError::validation(format!(
                "course {course_id} is not in status {}",
                from.as_str()
            )))
        }
    }

    /// Budget the resources into request material.
    async fn prepare_material(&self, resources: Vec<Resource>) -> Material {
        let budgeted = optimize_resources(resources, self.settings.resource_char_budget, |content, target| {
            self.client.summarize(content, target)
        })
        .await;
        Material::from_resources(&budgeted)
    }

    async fn outline_course(
        &self,
        course_id: Uuid,
        resources: Vec<Resource>,
        unit_count: usize,
        games_per_unit: usize,
        strategy: Strategy,
    ) -> Result<CourseRound> {
        self.transition(course_id, CourseStatus::Draft, CourseStatus::Generating)
            .await?;
        let material = self.prepare_material(resources).await;

        let outlines = titles::generate_unit_outlines(&self.client, &material, unit_count, &[]).await?;
        let unit_titles: Vec<String> = outlines.iter().map(|o| o.title.clone()).collect();
        let metadata = titles::generate_course_metadata(&self.client, &unit_titles[0], &unit_titles).await?;
        self.store
            .update_course_metadata(course_id, &metadata.title, &metadata.description)
            .await?;
        self.notifier.publish(
            course_id,
            CourseEvent::CourseMetadataUpdated {
                title: metadata.title.clone(),
                description: metadata.description.clone(),
            },
        );

        self.transition(course_id, CourseStatus::Generating, CourseStatus::GeneratingUnits)
            .await?;
        let units = self.insert_shells(course_id, 0, &outlines).await?;
        self.transition(course_id, CourseStatus::GeneratingUnits, CourseStatus::GeneratingGames)
            .await?;

        Ok(CourseRound {
            course_id,
            metadata,
            material,
            units,
            games_per_unit,
            strategy,
            context: Vec::new(),
        })
    }

    async fn insert_shells(
        &self,
        course_id: Uuid,
        start_index: i32,
        outlines: &[crate::models::UnitOutline],
    ) -> Result<Vec<Unit>> {
        let units = self.store.insert_units(course_id, start_index, outlines).await?;
        if units.len() != outlines.len() {
            return Err(PipelineError::Persistence(format!(
                "requested {} unit rows, inserted {}",
                outlines.len(),
                units.len()
            )));
        }
        for u in &units {
            self.notifier.publish(
                course_id,
                CourseEvent::UnitCreated {
                    unit_id: u.id,
                    title: u.title.clone(),
                    index: u.order_index,
                },
            );
        }
        self.notifier
            .publish(course_id, CourseEvent::UnitsComplete { unit_count: units.len() });
        Ok(units)
    }

    /// Phase 2 for an initial round; settles the course status.
    #[tracing::instrument(skip_all, fields(course_id = %round.course_id))]
    pub async fn complete_course(&self, round: CourseRound) -> Result<RoundOutcome> {
        let course_id = round.course_id;
        let outcome = self.generate_games(&round).await;
        tracing::info!(
            ready = outcome.units_ready,
            failed = outcome.units_failed,
            games = outcome.games_inserted,
            "game generation finished"
        );

        if outcome.games_inserted == 0 {
            self.transition(course_id, CourseStatus::GeneratingGames, CourseStatus::Error)
                .await?;
            let error = "no games could be generated".to_string();
            self.notifier.publish(
                course_id,
                CourseEvent::GenerationFailed {
                    course_id,
                    error: error.clone(),
                },
            );
            return Err(PipelineError::Validation(error));
        }

        self.transition(course_id, CourseStatus::GeneratingGames, CourseStatus::Ready)
            .await?;
        self.notifier
            .publish(course_id, CourseEvent::GenerationComplete { course_id });
        Ok(outcome)
    }

    /// Generate and persist games for every unit in the round. Never fails as a whole:
    /// each unit ends up `ready` or `error`.
    pub(crate) async fn generate_games(&self, round: &CourseRound) -> RoundOutcome {
        match round.strategy {
            Strategy::Sequential => self.generate_sequential(round).await,
            Strategy::Parallel => self.generate_parallel(round).await,
        }
    }

    fn unit_specs(round: &CourseRound) -> Vec<UnitSpec> {
        round
            .units
            .iter()
            .enumerate()
            .map(|(i, u)| UnitSpec {
                index: i + 1,
                title: u.title.clone(),
                description: u.description.clone(),
            })
            .collect()
    }

    async fn generate_sequential(&self, round: &CourseRound) -> RoundOutcome {
        let ctx = UnitRequestContext {
            course: &round.metadata,
            material: &round.material,
            games_per_unit: round.games_per_unit,
        };
        let mut outcome = RoundOutcome::default();
        let mut previous: Vec<GeneratedUnit> = round.context.clone();

        for (unit, spec) in round.units.iter().zip(Self::unit_specs(round)) {
            match units::generate_unit(&self.client, &ctx, &spec, &previous).await {
                Ok(generated) => {
                    if self.persist_unit(round, unit, &generated, &mut outcome).await {
                        previous.push(generated);
                    }
                }
                Err(e) => self.fail_unit(round, unit, &e, &mut outcome).await,
            }
        }
        outcome
    }

    async fn generate_parallel(&self, round: &CourseRound) -> RoundOutcome {
        let ctx = UnitRequestContext {
            course: &round.metadata,
            material: &round.material,
            games_per_unit: round.games_per_unit,
        };
        let specs = Self::unit_specs(round);
        let unit_count = specs.len();

        let mut calls = FuturesUnordered::new();
        for indices in create_unit_batches(unit_count, self.settings.batch_size) {
            let batch_specs: Vec<UnitSpec> = indices.iter().map(|&i| specs[i - 1].clone()).collect();
            let ctx = &ctx;
            calls.push(async move {
                let res = units::generate_batch(&self.client, ctx, &batch_specs).await;
                (indices, res)
            });
        }

        let mut batches: Vec<UnitBatch> = Vec::new();
        let mut errors: Vec<Option<String>> = vec![None; unit_count];
        while let Some((indices, res)) = calls.next().await {
            match res {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    tracing::warn!(course_id = %round.course_id, ?indices, error = %e, "batch failed");
                    for i in indices {
                        errors[i - 1] = Some(e.to_string());
                    }
                }
            }
        }

        let slots = match place_units(unit_count, batches) {
            Ok(slots) => slots,
            Err(e) => {
                tracing::error!(course_id = %round.course_id, error = %e, "reassembly failed");
                errors.iter_mut().for_each(|slot| *slot = Some(e.to_string()));
                vec![None; unit_count]
            }
        };

        let mut outcome = RoundOutcome::default();
        for ((unit, slot), error) in round.units.iter().zip(slots).zip(errors) {
            match slot {
                Some(generated) => {
                    self.persist_unit(round, unit, &generated, &mut outcome).await;
                }
                None => {
                    let cause = PipelineError::Validation(
                        error.unwrap_or_else(|| "unit missing from batch results".into()),
                    );
                    self.fail_unit(round, unit, &cause, &mut outcome).await;
                }
            }
        }
        outcome
    }

    fn progress_percent(round: &CourseRound, outcome: &RoundOutcome) -> u8 {
        let done = outcome.units_ready + outcome.units_failed;
        let total = round.units.len().max(1);
        ((done * 100) / total).min(100) as u8
    }

    async fn persist_unit(
        &self,
        round: &CourseRound,
        unit: &Unit,
        generated: &GeneratedUnit,
        outcome: &mut RoundOutcome,
    ) -> bool {
        match self
            .store
            .insert_unit_games(round.course_id, unit.id, &generated.games)
            .await
        {
            Ok(games) => {
                outcome.units_ready += 1;
                outcome.games_inserted += games.len();
                self.notifier.publish(
                    round.course_id,
                    CourseEvent::UnitGamesComplete {
                        unit_id: unit.id,
                        game_count: games.len(),
                        progress: Self::progress_percent(round, outcome),
                    },
                );
                true
            }
            Err(e) => {
                self.fail_unit(round, unit, &e, outcome).await;
                false
            }
        }
    }

    async fn fail_unit(&self, round: &CourseRound, unit: &Unit, cause: &PipelineError, outcome: &mut RoundOutcome) {
        tracing::warn!(course_id = %round.course_id, unit_id = %unit.id, error = %cause, "unit failed");
        outcome.units_failed += 1;
        if let Err(e) = self.store.mark_unit_failed(unit.id).await {
            tracing::error!(unit_id = %unit.id, error = %e, "failed to mark unit as failed");
        }
        self.notifier.publish(
            round.course_id,
            CourseEvent::UnitFailed {
                unit_id: unit.id,
                index: unit.order_index,
                error: cause.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::FnService;
    use crate::generation::GenerationRequest;
    use crate::notify::testing::RecordingNotifier;
    use crate::safety::BlocklistScreen;
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn quiz(title: &str) -> Value {
        json!({
            "title": title, "gameType": "quiz", "difficultyLevel": "easy",
            "content": { "question": "q", "correctAnswer": "a" }
        })
    }

    fn respond(req: &GenerationRequest) -> Result<Value> {
        match req.schema.name {
            "unit_titles" => Ok(json!({ "titles": ["Intro", "Deeper"], "descriptions": ["a", "b"] })),
            "course_metadata" => Ok(json!({ "title": "Course", "description": "About." })),
            "unit_games" => Ok(json!({ "games": [quiz("g1"), quiz("g2")] })),
            "unit_batch" => Ok(json!({ "units": [
                { "unitIndex": 1, "games": [quiz("a1"), quiz("a2")] },
                { "unitIndex": 2, "games": [quiz("b1"), quiz("b2")] }
            ] })),
            other => Err(PipelineError::Generation(format!("unexpected {other}"))),
        }
    }

    fn pipeline_with(
        service: FnService,
        notifier: Arc<RecordingNotifier>,
        settings: PipelineSettings,
    ) -> (Pipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let client = GenerationClient::new(Arc::new(service), "m", "v");
        let p = Pipeline::new(store.clone(), client, notifier, Arc::new(BlocklistScreen::default()), settings);
        (p, store)
    }

    fn pipeline(service: FnService, notifier: Arc<RecordingNotifier>) -> (Pipeline, Arc<MemoryStore>) {
        let settings = PipelineSettings {
            games_per_unit: 2,
            ..Default::default()
        };
        pipeline_with(service, notifier, settings)
    }

    fn request(strategy: Strategy) -> CreateCourseReq {
        CreateCourseReq {
            resources: vec![Resource::text("Photosynthesis turns light into sugar.", 0)],
            unit_count: 2,
            games_per_unit: None,
            strategy: Some(strategy),
            auto_gen_enabled: false,
            auto_gen_threshold: 80,
        }
    }

    #[tokio::test]
    async fn sequential_round_reaches_ready() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (p, store) = pipeline(FnService::new(respond), notifier.clone());
        let (course, round) = p.start_course("owner", request(Strategy::Sequential)).await.unwrap();
        assert_eq!(course.status, CourseStatus::GeneratingGames);
        assert_eq!(course.title, "Course");

        let outcome = p.complete_course(round).await.unwrap();
        assert_eq!(outcome.games_inserted, 4);
        let course = store.get_course(course.id).await.unwrap().unwrap();
        assert_eq!(course.status, CourseStatus::Ready);
        assert_eq!(course.total_games, 4);
        assert_eq!(
            notifier.names(),
            vec![
                "course_metadata_updated",
                "unit_created",
                "unit_created",
                "units_complete",
                "unit_games_complete",
                "unit_games_complete",
                "generation_complete"
            ]
        );
    }

    #[tokio::test]
    async fn invalid_requests_never_touch_the_store() {
        let (p, store) = pipeline(FnService::new(respond), Arc::new(RecordingNotifier::default()));
        let mut req = request(Strategy::Parallel);
        req.unit_count = 0;
        assert!(matches!(p.start_course("o", req).await, Err(PipelineError::Validation(_))));

        let mut req = request(Strategy::Parallel);
        req.resources = vec![Resource::image("", 0)];
        assert!(p.start_course("o", req).await.is_err());
        assert_eq!(store.course_count(), 0);
    }

    #[tokio::test]
    async fn failed_batch_marks_only_its_units_failed() {
        let service = FnService::new(|req| match req.schema.name {
            "unit_batch" if req.prompt.contains("unitIndex 1") => Err(PipelineError::Generation("boom".into())),
            "unit_batch" => Ok(json!({ "units": [{ "unitIndex": 2, "games": [quiz("b1"), quiz("b2")] }] })),
            _ => respond(req),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = PipelineSettings {
            games_per_unit: 2,
            batch_size: 1,
            ..Default::default()
        };
        let (p, store) = pipeline_with(service, notifier.clone(), settings);
        let (course, round) = p.start_course("o", request(Strategy::Parallel)).await.unwrap();

        let outcome = p.complete_course(round).await.unwrap();
        assert_eq!(outcome, RoundOutcome { units_ready: 1, units_failed: 1, games_inserted: 2 });

        let course = store.get_course(course.id).await.unwrap().unwrap();
        assert_eq!(course.status, CourseStatus::Ready);
        assert_eq!(course.total_games, 2);
        let units = store.list_units(course.id).await.unwrap();
        assert_eq!(units[0].status, crate::models::UnitStatus::Error);
        assert_eq!(units[1].status, crate::models::UnitStatus::Ready);
        assert!(notifier.names().contains(&"unit_failed"));
    }

    #[tokio::test]
    async fn zero_games_settles_the_course_in_error() {
        let service = FnService::new(|req| match req.schema.name {
            "unit_batch" => Ok(json!({ "units": [] })),
            _ => respond(req),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let (p, store) = pipeline(service, notifier.clone());
        let (course, round) = p.start_course("o", request(Strategy::Parallel)).await.unwrap();

        assert!(p.complete_course(round).await.is_err());
        let course = store.get_course(course.id).await.unwrap().unwrap();
        assert_eq!(course.status, CourseStatus::Error);
        assert_eq!(notifier.names().last(), Some(&"generation_failed"));
    }
}

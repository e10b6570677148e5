//! Phase 2: exercises for a single unit (with prior-unit context) or for a batch of units.

use std::collections::HashSet;

use crate::cleanup::clean_game_title;
use crate::error::{PipelineError, Result};
use crate::games::{self, Difficulty, GameType};
use crate::generation::schema::{self, BatchResponse, RawGame, UnitGamesResponse};
use crate::generation::{GenerationClient, Material};
use crate::models::{GeneratedGame, GeneratedUnit};
use crate::pipeline::batches::UnitBatch;
use crate::pipeline::titles::CourseMetadata;

/// How many games of each earlier unit are shown as context.
pub(crate) const CONTEXT_SAMPLE_GAMES: usize = 2;

const GAMES_SYSTEM: &str = "You write short interactive exercises for a course unit. Each \
exercise is one of: multiple_choice, quiz, fill_blank, matching. Mix the types, keep every \
exercise answerable from the material, and raise difficulty gradually.";

/// A unit to generate; `index` is 1-based within the round.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    pub index: usize,
    pub title: String,
    pub description: String,
}

/// Shared inputs for every Phase-2 call of a round.
#[derive(Debug, Clone)]
pub struct UnitRequestContext<'a> {
    pub course: &'a CourseMetadata,
    pub material: &'a Material,
    pub games_per_unit: usize,
}

fn type_list() -> String {
    games::kinds()
        .iter()
        .map(|k| k.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_rules(games_per_unit: usize) -> String {
    format!(
        "Return exactly {games_per_unit} games per unit. Allowed gameType values: {}. \
         For fill_blank, mark each blank in the text with ___ and list one answer per blank in order. \
         For multiple_choice, correctAnswer is the zero-based index of the right option. \
         For matching, pair every left item with exactly one right item. \
         Game titles must not mention unit numbers.",
        type_list()
    )
}

fn course_header(ctx: &UnitRequestContext<'_>) -> String {
    format!(
        "Course: {}\nAbout: {}",
        ctx.course.title, ctx.course.description
    )
}

fn append_material(prompt: &mut String, material: &Material) {
    if !material.text.is_empty() {
        prompt.push_str("\n\nMaterial:\n");
        prompt.push_str(&material.text);
    }
}

fn describe_game(game: &GeneratedGame) -> String {
    format!(
        "{} [{}]: {}",
        game.title,
        game.content.game_type().as_str(),
        game.content.payload()
    )
}

/// Sequential prompt: titles and sample games of every earlier unit for continuity.
fn unit_prompt(ctx: &UnitRequestContext<'_>, spec: &UnitSpec, previous: &[GeneratedUnit]) -> String {
    let mut prompt = course_header(ctx);
    if !previous.is_empty() {
        prompt.push_str("\n\nEarlier units (do not repeat their exercises):");
        for (i, u) in previous.iter().enumerate() {
            prompt.push_str(&format!("\n{}. {}", i + 1, u.title));
            for g in u.games.iter().take(CONTEXT_SAMPLE_GAMES) {
                prompt.push_str("\n   - ");
                prompt.push_str(&describe_game(g));
            }
        }
    }
    prompt.push_str(&format!(
        "\n\nWrite the exercises for unit {}: \"{}\" - {}\n{}",
        spec.index,
        spec.title,
        spec.description,
        format_rules(ctx.games_per_unit)
    ));
    append_material(&mut prompt, ctx.material);
    prompt
}

fn batch_prompt(ctx: &UnitRequestContext<'_>, specs: &[UnitSpec]) -> String {
    let mut prompt = course_header(ctx);
    prompt.push_str("\n\nWrite the exercises for each of these units. Use the given unitIndex values:");
    for s in specs {
        prompt.push_str(&format!("\n- unitIndex {}: \"{}\" - {}", s.index, s.title, s.description));
    }
    prompt.push('\n');
    prompt.push_str(&format_rules(ctx.games_per_unit));
    append_material(&mut prompt, ctx.material);
    prompt
}

/// Type dispatch, shape validation and title cleanup for one raw game.
pub fn validate_game(raw: RawGame) -> Result<GeneratedGame> {
    let game_type = GameType::parse(&raw.game_type)
        .ok_or_else(|| PipelineError::validation(format!("unknown game type {:?}", raw.game_type)))?;
    let difficulty_level = Difficulty::parse(&raw.difficulty_level).ok_or_else(|| {
        PipelineError::validation(format!("unknown difficulty {:?}", raw.difficulty_level))
    })?;
    let content = games::kind_for(game_type)
        .parse(raw.content)
        .map_err(|e| PipelineError::validation(format!("{}: {e}", game_type.as_str())))?;
    let title = clean_game_title(&raw.title);
    if title.is_empty() {
        return Err(PipelineError::validation(format!(
            "game title {:?} is empty after cleanup",
            raw.title
        )));
    }
    Ok(GeneratedGame {
        title,
        difficulty_level,
        content,
    })
}

/// Validate one unit's worth of games: exact count, every game well-formed.
pub fn validate_unit_games(title: &str, raw: Vec<RawGame>, games_per_unit: usize) -> Result<GeneratedUnit> {
    if raw.len() != games_per_unit {
        return Err(PipelineError::validation(format!(
            "unit {title:?}: expected {games_per_unit} games, got {}",
            raw.len()
        )));
    }
    let games = raw
        .into_iter()
        .map(validate_game)
        .collect::<Result<Vec<_>>>()
        .map_err(|e| PipelineError::validation(format!("unit {title:?}: {e}")))?;
    Ok(GeneratedUnit {
        title: title.to_string(),
        games,
    })
}

pub async fn generate_unit(
    client: &GenerationClient,
    ctx: &UnitRequestContext<'_>,
    spec: &UnitSpec,
    previous: &[GeneratedUnit],
) -> Result<GeneratedUnit> {
    let request = client.build_request(
        GAMES_SYSTEM,
        unit_prompt(ctx, spec, previous),
        Some(ctx.material),
        schema::unit_games_schema(),
    );
    let resp: UnitGamesResponse = client.generate(request).await?;
    validate_unit_games(&spec.title, resp.games, ctx.games_per_unit)
}

/// Check that a batch response covers exactly the requested indices, then validate each unit.
pub fn batch_from_response(specs: &[UnitSpec], resp: BatchResponse, games_per_unit: usize) -> Result<UnitBatch> {
    let wanted: HashSet<usize> = specs.iter().map(|s| s.index).collect();
    let mut seen = HashSet::new();
    for u in &resp.units {
        if !wanted.contains(&u.unit_index) {
            return Err(PipelineError::validation(format!(
                "batch returned unexpected unit index {}",
                u.unit_index
            )));
        }
        if !seen.insert(u.unit_index) {
            return Err(PipelineError::validation(format!(
                "batch returned unit index {} twice",
                u.unit_index
            )));
        }
    }
    if seen.len() != wanted.len() {
        let mut missing: Vec<usize> = wanted.difference(&seen).copied().collect();
        missing.sort_unstable();
        return Err(PipelineError::validation(format!("batch is missing unit indices {missing:?}")));
    }

    let mut batch = UnitBatch {
        unit_indices: Vec::with_capacity(specs.len()),
        units: Vec::with_capacity(specs.len()),
    };
    for u in resp.units {
        let Some(spec) = specs.iter().find(|s| s.index == u.unit_index) else {
            continue;
        };
        batch.units.push(validate_unit_games(&spec.title, u.games, games_per_unit)?);
        batch.unit_indices.push(u.unit_index);
    }
    Ok(batch)
}

pub async fn generate_batch(
    client: &GenerationClient,
    ctx: &UnitRequestContext<'_>,
    specs: &[UnitSpec],
) -> Result<UnitBatch> {
    let request = client.build_request(
        GAMES_SYSTEM,
        batch_prompt(ctx, specs),
        Some(ctx.material),
        schema::batch_schema(),
    );
    let resp: BatchResponse = client.generate(request).await?;
    batch_from_response(specs, resp, ctx.games_per_unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::schema::BatchUnit;
    use crate::generation::testing::FnService;
    use serde_json::json;
    use std::sync::Arc;

    fn raw_quiz(title: &str) -> RawGame {
        RawGame {
            title: title.into(),
            game_type: "quiz".into(),
            difficulty_level: "easy".into(),
            content: json!({ "question": "What is 2+2?", "correctAnswer": "4" }),
        }
    }

    fn specs(indices: &[usize]) -> Vec<UnitSpec> {
        indices
            .iter()
            .map(|&i| UnitSpec {
                index: i,
                title: format!("T{i}"),
                description: "d".into(),
            })
            .collect()
    }

    #[test]
    fn game_titles_are_cleaned() {
        let g = validate_game(raw_quiz("Unit 3 Game 1: Sums (Easy)")).unwrap();
        assert_eq!(g.title, "Sums");
    }

    #[test]
    fn capitalized_type_names_are_accepted() {
        let raw = RawGame {
            game_type: "Quiz".into(),
            difficulty_level: "Medium".into(),
            ..raw_quiz("Sums")
        };
        let g = validate_game(raw).unwrap();
        assert_eq!(g.content.game_type(), GameType::Quiz);
        assert_eq!(g.difficulty_level, Difficulty::Medium);
    }

    #[test]
    fn wrong_game_count_fails_the_unit() {
        let err = validate_unit_games("T", vec![raw_quiz("a")], 2).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn malformed_content_fails_the_unit() {
        let mut bad = raw_quiz("b");
        bad.game_type = "multiple_choice".into();
        assert!(validate_unit_games("T", vec![raw_quiz("a"), bad], 2).is_err());
    }

    #[test]
    fn batch_must_cover_exactly_its_indices() {
        let s = specs(&[4, 5]);
        let one = BatchResponse {
            units: vec![BatchUnit { unit_index: 4, games: vec![raw_quiz("a")] }],
        };
        assert!(batch_from_response(&s, one, 1).is_err());

        let dup = BatchResponse {
            units: vec![
                BatchUnit { unit_index: 4, games: vec![raw_quiz("a")] },
                BatchUnit { unit_index: 4, games: vec![raw_quiz("b")] },
            ],
        };
        assert!(batch_from_response(&s, dup, 1).is_err());

        let ok = BatchResponse {
            units: vec![
                BatchUnit { unit_index: 5, games: vec![raw_quiz("b")] },
                BatchUnit { unit_index: 4, games: vec![raw_quiz("a")] },
            ],
        };
        let batch = batch_from_response(&s, ok, 1).unwrap();
        assert_eq!(batch.unit_indices, vec![5, 4]);
        assert_eq!(batch.units[0].title, "T5");
    }

    #[tokio::test]
    async fn sequential_prompt_carries_two_sample_games_per_earlier_unit() {
        let service = Arc::new(FnService::new(|_| {
            Ok(json!({ "games": [{
                "title": "New", "gameType": "quiz", "difficultyLevel": "medium",
                "content": { "question": "q", "correctAnswer": "a" }
            }] }))
        }));
        let client = GenerationClient::new(service.clone(), "m", "v");
        let course = CourseMetadata { title: "Biology".into(), description: "Life".into() };
        let material = Material::default();
        let ctx = UnitRequestContext { course: &course, material: &material, games_per_unit: 1 };

        let prev = GeneratedUnit {
            title: "Cells".into(),
            games: ["g1", "g2", "g3"]
                .iter()
                .map(|t| validate_game(raw_quiz(t)).unwrap())
                .collect(),
        };
        let out = generate_unit(&client, &ctx, &specs(&[2])[0], &[prev]).await.unwrap();
        assert_eq!(out.games.len(), 1);

        let prompt = service.requests.lock()[0].prompt.clone();
        assert!(prompt.contains("Course: Biology"));
        assert!(prompt.contains("1. Cells"));
        assert!(prompt.contains("g1 [quiz]") && prompt.contains("g2 [quiz]"));
        assert!(!prompt.contains("g3 [quiz]"));
    }
}

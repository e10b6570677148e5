//! Response shapes expected from each generation call site, and the JSON schemas sent
//! along with the request to constrain the output.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::games::{self, Difficulty};

/// Named JSON schema for a structured response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TitlesResponse {
    pub titles: Vec<String>,
    pub descriptions: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CourseMetaResponse {
    pub title: String,
    pub description: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SummaryResponse {
    pub summary: String,
}

/// A game as returned by the service, before type dispatch and validation.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawGame {
    pub title: String,
    pub game_type: String,
    pub difficulty_level: String,
    pub content: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UnitGamesResponse {
    pub games: Vec<RawGame>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BatchUnit {
    pub unit_index: usize,
    pub games: Vec<RawGame>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BatchResponse {
    pub units: Vec<BatchUnit>,
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn string_array() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

pub fn titles_schema() -> ResponseSchema {
    ResponseSchema {
        name: "unit_titles",
        schema: object(
            json!({ "titles": string_array(), "descriptions": string_array() }),
            &["titles", "descriptions"],
        ),
    }
}

pub fn course_meta_schema() -> ResponseSchema {
    ResponseSchema {
        name: "course_metadata",
        schema: object(
            json!({ "title": { "type": "string" }, "description": { "type": "string" } }),
            &["title", "description"],
        ),
    }
}

pub fn summary_schema() -> ResponseSchema {
    ResponseSchema {
        name: "resource_summary",
        schema: object(json!({ "summary": { "type": "string" } }), &["summary"]),
    }
}

fn game_schema() -> Value {
    let type_names: Vec<&str> = games::kinds().iter().map(|k| k.name()).collect();
    let contents: Vec<Value> = games::kinds().iter().map(|k| k.content_schema()).collect();
    let difficulties: Vec<&str> = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard]
        .iter()
        .map(|d| d.as_str())
        .collect();
    object(
        json!({
            "title": { "type": "string" },
            "gameType": { "type": "string", "enum": type_names },
            "difficultyLevel": { "type": "string", "enum": difficulties },
            "content": { "anyOf": contents }
        }),
        &["title", "gameType", "difficultyLevel", "content"],
    )
}

pub fn unit_games_schema() -> ResponseSchema {
    ResponseSchema {
        name: "unit_games",
        schema: object(
            json!({ "games": { "type": "array", "items": game_schema() } }),
            &["games"],
        ),
    }
}

pub fn batch_schema() -> ResponseSchema {
    let unit = object(
        json!({
            "unitIndex": { "type": "integer" },
            "games": { "type": "array", "items": game_schema() }
        }),
        &["unitIndex", "games"],
    );
    ResponseSchema {
        name: "unit_batch",
        schema: object(json!({ "units": { "type": "array", "items": unit } }), &["units"]),
    }
}

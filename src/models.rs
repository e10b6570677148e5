use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::games::{Difficulty, GameContent};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Text,
    File,
    Image,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Text => "text",
            ResourceKind::File => "file",
            ResourceKind::Image => "image",
        }
    }

    pub fn parse(v: &str) -> Option<Self> {
        match v {
            "text" => Some(ResourceKind::Text),
            "file" => Some(ResourceKind::File),
            "image" => Some(ResourceKind::Image),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub order_index: i32,
}

impl Resource {
    pub fn text(content: impl Into<String>, order_index: i32) -> Self {
        Self {
            kind: ResourceKind::Text,
            content: Some(content.into()),
            file_url: None,
            file_type: None,
            order_index,
        }
    }

    pub fn image(url: impl Into<String>, order_index: i32) -> Self {
        Self {
            kind: ResourceKind::Image,
            content: None,
            file_url: Some(url.into()),
            file_type: Some("image/*".into()),
            order_index,
        }
    }

    /// Text that counts against the character budget. Images never do.
    pub fn budgeted_text(&self) -> Option<&str> {
        match self.kind {
            ResourceKind::Image => None,
            _ => self.content.as_deref(),
        }
    }
}

/// Course lifecycle. Only the edges accepted by [`CourseStatus::can_transition_to`] are legal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    Generating,
    GeneratingUnits,
    GeneratingGames,
    Ready,
    Error,
}

impl CourseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Generating => "generating",
            CourseStatus::GeneratingUnits => "generating_units",
            CourseStatus::GeneratingGames => "generating_games",
            CourseStatus::Ready => "ready",
            CourseStatus::Error => "error",
        }
    }

    pub fn parse(v: &str) -> Option<Self> {
        match v {
            "draft" => Some(CourseStatus::Draft),
            "generating" => Some(CourseStatus::Generating),
            "generating_units" => Some(CourseStatus::GeneratingUnits),
            "generating_games" => Some(CourseStatus::GeneratingGames),
            "ready" => Some(CourseStatus::Ready),
            "error" => Some(CourseStatus::Error),
            _ => None,
        }
    }

    pub fn is_generating(self) -> bool {
        matches!(
            self,
            CourseStatus::Generating | CourseStatus::GeneratingUnits | CourseStatus::GeneratingGames
        )
    }

    pub fn can_transition_to(self, next: CourseStatus) -> bool {
        use CourseStatus::*;
        match (self, next) {
            (Draft, Generating)
            | (Generating, GeneratingUnits)
            | (GeneratingUnits, GeneratingGames)
            | (GeneratingGames, Ready) => true,
            (from, Error) => from.is_generating(),
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Generating,
    Ready,
    Error,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Generating => "generating",
            UnitStatus::Ready => "ready",
            UnitStatus::Error => "error",
        }
    }

    pub fn parse(v: &str) -> Option<Self> {
        match v {
            "generating" => Some(UnitStatus::Generating),
            "ready" => Some(UnitStatus::Ready),
            "error" => Some(UnitStatus::Error),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub status: CourseStatus,
    pub auto_gen_enabled: bool,
    pub auto_gen_threshold: i32, // 0..=100
    pub has_auto_gen_triggered: bool,
    pub unit_count: i32,
    pub total_games: i32,
    pub games_per_unit: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub description: String,
    pub order_index: i32,
    pub status: UnitStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub title: String,
    pub difficulty_level: Difficulty,
    #[serde(flatten)]
    pub content: GameContent,
    pub order_index: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnitProgress {
    pub player_id: String,
    pub unit_id: Uuid,
    pub completed_games: i32,
    pub total_games: i32,
    pub is_completed: bool,
}

/// Fields accepted when a course is submitted; the rest are owned by the pipeline.
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub owner_id: String,
    pub auto_gen_enabled: bool,
    pub auto_gen_threshold: i32,
    pub games_per_unit: i32,
}

/// A unit shell to insert: title and description from Phase-1.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutline {
    pub title: String,
    pub description: String,
}

/// A generated exercise that has passed validation but is not yet persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedGame {
    pub title: String,
    pub difficulty_level: Difficulty,
    #[serde(flatten)]
    pub content: GameContent,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedUnit {
    pub title: String,
    pub games: Vec<GeneratedGame>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sequential,
    #[default]
    Parallel,
}

impl Strategy {
    pub fn parse(v: &str) -> Option<Self> {
        match v {
            "sequential" => Some(Strategy::Sequential),
            "parallel" => Some(Strategy::Parallel),
            _ => None,
        }
    }
}

// --- request / response bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseReq {
    pub resources: Vec<Resource>,
    pub unit_count: usize,
    #[serde(default)]
    pub games_per_unit: Option<usize>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    #[serde(default)]
    pub auto_gen_enabled: bool,
    #[serde(default = "default_threshold")]
    pub auto_gen_threshold: i32,
}

fn default_threshold() -> i32 {
    80
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerReq {
    pub player_id: String,
    pub answer: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnitWithGames {
    #[serde(flatten)]
    pub unit: Unit,
    pub games: Vec<Game>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub resources: Vec<Resource>,
    pub units: Vec<UnitWithGames>,
}

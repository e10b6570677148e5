//! Exercise types: one content schema, one validator and one answer checker per type,
//! all reached through the KINDS table.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Quiz,
    Matching,
    FillBlank,
    MultipleChoice,
}

impl GameType {
    pub fn as_str(self) -> &'static str {
        kind_for(self).name()
    }

    /// Case-insensitive, like [`Difficulty::parse`].
    pub fn parse(v: &str) -> Option<Self> {
        let v = v.trim();
        KINDS
            .iter()
            .find(|k| k.name().eq_ignore_ascii_case(v))
            .map(|k| k.game_type())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn parse(v: &str) -> Option<Self> {
        match v.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultipleChoiceContent {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizContent {
    pub question: String,
    pub correct_answer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Blank {
    pub answer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FillBlankContent {
    pub text: String,
    pub blanks: Vec<Blank>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub left: String,
    pub right: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchingContent {
    pub left_items: Vec<String>,
    pub right_items: Vec<String>,
    pub correct_pairs: Vec<Pair>,
}

/// Typed exercise content, serialized as `{"gameType": ..., "content": {...}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "gameType", content = "content", rename_all = "snake_case")]
pub enum GameContent {
    Quiz(QuizContent),
    Matching(MatchingContent),
    FillBlank(FillBlankContent),
    MultipleChoice(MultipleChoiceContent),
}

impl GameContent {
    pub fn game_type(&self) -> GameType {
        match self {
            GameContent::Quiz(_) => GameType::Quiz,
            GameContent::Matching(_) => GameType::Matching,
            GameContent::FillBlank(_) => GameType::FillBlank,
            GameContent::MultipleChoice(_) => GameType::MultipleChoice,
        }
    }

    /// The variant payload alone, as stored in the `content` column.
    pub fn payload(&self) -> Value {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        value.get("content").cloned().unwrap_or(Value::Null)
    }

    pub fn is_correct(&self, answer: &Value) -> bool {
        kind_for(self.game_type()).is_correct(self, answer)
    }
}

pub trait GameKind: Sync {
    fn game_type(&self) -> GameType;

    fn name(&self) -> &'static str;

    /// JSON schema of the `content` object, used to constrain generation output.
    fn content_schema(&self) -> Value;

    /// Parse and shape-check raw content produced by the generation service.
    fn parse(&self, content: Value) -> Result<GameContent, String>;

    fn is_correct(&self, content: &GameContent, answer: &Value) -> bool;
}

struct QuizKind;
struct MatchingKind;
struct FillBlankKind;
struct MultipleChoiceKind;

static KINDS: [&dyn GameKind; 4] = [&QuizKind, &MatchingKind, &FillBlankKind, &MultipleChoiceKind];

pub fn kinds() -> &'static [&'static dyn GameKind] {
    &KINDS
}

pub fn kind_for(game_type: GameType) -> &'static dyn GameKind {
    match game_type {
        GameType::Quiz => &QuizKind,
        GameType::Matching => &MatchingKind,
        GameType::FillBlank => &FillBlankKind,
        GameType::MultipleChoice => &MultipleChoiceKind,
    }
}

/// Rebuild content from a stored type string and payload.
pub fn content_from_parts(game_type: &str, payload: Value) -> Result<GameContent, String> {
    let gt = GameType::parse(game_type).ok_or_else(|| format!("unknown game type {game_type:?}"))?;
    kind_for(gt).parse(payload)
}

static BLANK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_{3,}|\{\{\s*blank\s*\}\}").expect("blank marker regex"));

pub fn count_blank_markers(text: &str) -> usize {
    BLANK_MARKER.find_iter(text).count()
}

fn normalize_answer(v: &str) -> String {
    v.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn typed<T: for<'de> Deserialize<'de>>(content: Value) -> Result<T, String> {
    serde_json::from_value(content).map_err(|e| e.to_string())
}

impl GameKind for QuizKind {
    fn game_type(&self) -> GameType {
        GameType::Quiz
    }

    fn name(&self) -> &'static str {
        "quiz"
    }

    fn content_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "correctAnswer": { "type": "string" }
            },
            "required": ["question", "correctAnswer"],
            "additionalProperties": false
        })
    }

    fn parse(&self, content: Value) -> Result<GameContent, String> {
        let c: QuizContent = typed(content)?;
        if c.question.trim().is_empty() {
            return Err("quiz question is empty".into());
        }
        if c.correct_answer.trim().is_empty() {
            return Err("quiz answer is empty".into());
        }
        Ok(GameContent::Quiz(c))
    }

    fn is_correct(&self, content: &GameContent, answer: &Value) -> bool {
        let (GameContent::Quiz(c), Some(given)) = (content, answer.as_str()) else {
            return false;
        };
        normalize_answer(given) == normalize_answer(&c.correct_answer)
    }
}

impl GameKind for MultipleChoiceKind {
    fn game_type(&self) -> GameType {
        GameType::MultipleChoice
    }

    fn name(&self) -> &'static str {
        "multiple_choice"
    }

    fn content_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "options": { "type": "array", "items": { "type": "string" } },
                "correctAnswer": { "type": "integer" }
            },
            "required": ["question", "options", "correctAnswer"],
            "additionalProperties": false
        })
    }

    fn parse(&self, content: Value) -> Result<GameContent, String> {
        let c: MultipleChoiceContent = typed(content)?;
        if c.question.trim().is_empty() {
            return Err("multiple choice question is empty".into());
        }
        if c.options.len() < 2 {
            return Err(format!("multiple choice needs at least 2 options, got {}", c.options.len()));
        }
        if c.correct_answer >= c.options.len() {
            return Err(format!(
                "correct answer index {} out of range for {} options",
                c.correct_answer,
                c.options.len()
            ));
        }
        Ok(GameContent::MultipleChoice(c))
    }

    fn is_correct(&self, content: &GameContent, answer: &Value) -> bool {
        let GameContent::MultipleChoice(c) = content else {
            return false;
        };
        match answer {
            Value::Number(n) => n.as_u64() == Some(c.correct_answer as u64),
            // accept the option text as well as its index
            Value::String(s) => c
                .options
                .get(c.correct_answer)
                .is_some_and(|opt| normalize_answer(opt) == normalize_answer(s)),
            _ => false,
        }
    }
}

impl GameKind for FillBlankKind {
    fn game_type(&self) -> GameType {
        GameType::FillBlank
    }

    fn name(&self) -> &'static str {
        "fill_blank"
    }

    fn content_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "blanks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "answer": { "type": "string" } },
                        "required": ["answer"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["text", "blanks"],
            "additionalProperties": false
        })
    }

    fn parse(&self, content: Value) -> Result<GameContent, String> {
        let c: FillBlankContent = typed(content)?;
        if c.blanks.is_empty() {
            return Err("fill in the blank has no blanks".into());
        }
        let markers = count_blank_markers(&c.text);
        if markers != c.blanks.len() {
            return Err(format!(
                "fill in the blank text has {} markers but {} answers",
                markers,
                c.blanks.len()
            ));
        }
        if c.blanks.iter().any(|b| b.answer.trim().is_empty()) {
            return Err("fill in the blank answer is empty".into());
        }
        Ok(GameContent::FillBlank(c))
    }

    fn is_correct(&self, content: &GameContent, answer: &Value) -> bool {
        let GameContent::FillBlank(c) = content else {
            return false;
        };
        let given: Vec<&str> = match answer {
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            Value::String(s) if c.blanks.len() == 1 => vec![s.as_str()],
            _ => return false,
        };
        given.len() == c.blanks.len()
            && given
                .iter()
                .zip(&c.blanks)
                .all(|(g, b)| normalize_answer(g) == normalize_answer(&b.answer))
    }
}

impl GameKind for MatchingKind {
    fn game_type(&self) -> GameType {
        GameType::Matching
    }

    fn name(&self) -> &'static str {
        "matching"
    }

    fn content_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "leftItems": { "type": "array", "items": { "type": "string" } },
                "rightItems": { "type": "array", "items": { "type": "string" } },
                "correctPairs": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "left": { "type": "string" },
                            "right": { "type": "string" }
                        },
                        "required": ["left", "right"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["leftItems", "rightItems", "correctPairs"],
            "additionalProperties": false
        })
    }

    fn parse(&self, content: Value) -> Result<GameContent, String> {
        let c: MatchingContent = typed(content)?;
        if c.left_items.len() < 2 || c.left_items.len() != c.right_items.len() {
            return Err(format!(
                "matching needs two equal lists of at least 2 items, got {} and {}",
                c.left_items.len(),
                c.right_items.len()
            ));
        }
        if c.correct_pairs.len() != c.left_items.len() {
            return Err(format!(
                "matching has {} pairs for {} items",
                c.correct_pairs.len(),
                c.left_items.len()
            ));
        }
        let mut seen_left = std::collections::HashSet::new();
        for pair in &c.correct_pairs {
            if !c.left_items.contains(&pair.left) || !c.right_items.contains(&pair.right) {
                return Err(format!("pair {:?} -> {:?} references an unknown item", pair.left, pair.right));
            }
            if !seen_left.insert(pair.left.as_str()) {
                return Err(format!("left item {:?} is paired twice", pair.left));
            }
        }
        Ok(GameContent::Matching(c))
    }

    fn is_correct(&self, content: &GameContent, answer: &Value) -> bool {
        let GameContent::Matching(c) = content else {
            return false;
        };
        let Ok(given) = serde_json::from_value::<Vec<Pair>>(answer.clone()) else {
            return false;
        };
        let expected: std::collections::HashSet<&Pair> = c.correct_pairs.iter().collect();
        let given: std::collections::HashSet<&Pair> = given.iter().collect();
        given == expected
    }
}

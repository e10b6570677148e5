#![allow(dead_code)]

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;

use course_forge::generation::{GenerationClient, GenerationRequest, GenerationService};
use course_forge::models::{CreateCourseReq, Resource, Strategy};
use course_forge::notify::{CourseEvent, Notifier};
use course_forge::pipeline::{Pipeline, PipelineSettings};
use course_forge::safety::BlocklistScreen;
use course_forge::store::MemoryStore;
use course_forge::Result;

static TITLE_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"exactly (\d+) unit titles").unwrap());
static GAME_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Return exactly (\d+) games").unwrap());
static BATCH_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"unitIndex (\d+):").unwrap());

type Responder = dyn Fn(&GenerationRequest) -> Result<Value> + Send + Sync;

/// Generation service driven by a closure; remembers every request.
pub struct ScriptedService {
    responder: Box<Responder>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedService {
    pub fn new(f: impl Fn(&GenerationRequest) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(f),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with well-formed content.
    pub fn well_behaved() -> Self {
        Self::new(|req| Ok(default_reply(req)))
    }

    pub fn calls(&self, schema: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.schema.name == schema)
            .count()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(&self, request: GenerationRequest) -> Result<Value> {
        let out = (self.responder)(&request);
        self.requests.lock().push(request);
        out
    }
}

fn captured(re: &Regex, text: &str) -> usize {
    re.captures(text)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(1)
}

pub fn quiz(title: &str) -> Value {
    json!({
        "title": title,
        "gameType": "quiz",
        "difficultyLevel": "easy",
        "content": { "question": format!("What is {title}?"), "correctAnswer": "yes" }
    })
}

pub fn games(prefix: &str, n: usize) -> Vec<Value> {
    (1..=n).map(|i| quiz(&format!("{prefix} game {i}"))).collect()
}

pub fn batch_indices(req: &GenerationRequest) -> Vec<usize> {
    BATCH_INDEX
        .captures_iter(&req.prompt)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

pub fn titles_reply(req: &GenerationRequest) -> Value {
    let n = captured(&TITLE_COUNT, &req.prompt);
    let prefix = if req.prompt.contains("already has these units") {
        "Further topic"
    } else {
        "Topic"
    };
    let titles: Vec<String> = (1..=n).map(|i| format!("{prefix} {i}")).collect();
    let descriptions: Vec<String> = (1..=n).map(|i| format!("About {prefix} {i}.")).collect();
    json!({ "titles": titles, "descriptions": descriptions })
}

pub fn batch_reply(req: &GenerationRequest) -> Value {
    let per_unit = captured(&GAME_COUNT, &req.prompt);
    let units: Vec<Value> = batch_indices(req)
        .into_iter()
        .rev()
        .map(|i| json!({ "unitIndex": i, "games": games(&format!("u{i}"), per_unit) }))
        .collect();
    json!({ "units": units })
}

pub fn default_reply(req: &GenerationRequest) -> Value {
    match req.schema.name {
        "unit_titles" => titles_reply(req),
        "course_metadata" => json!({ "title": "Unit 1: Plant Biology (Beginner)", "description": "How plants live." }),
        "resource_summary" => json!({ "summary": "condensed" }),
        "unit_games" => json!({ "games": games("seq", captured(&GAME_COUNT, &req.prompt)) }),
        "unit_batch" => batch_reply(req),
        other => panic!("unexpected schema {other}"),
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(Uuid, CourseEvent)>>,
}

impl RecordingNotifier {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|(_, e)| e.name()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, course_id: Uuid, event: CourseEvent) {
        self.events.lock().push((course_id, event));
    }
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<MemoryStore>,
    pub service: Arc<ScriptedService>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(service: ScriptedService, settings: PipelineSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(service);
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(
        store.clone(),
        GenerationClient::new(service.clone(), "text-model", "vision-model"),
        notifier.clone(),
        Arc::new(BlocklistScreen::new(["forbidden"])),
        settings,
    );
    Harness {
        pipeline: Arc::new(pipeline),
        store,
        service,
        notifier,
    }
}

pub fn course_request(unit_count: usize, strategy: Strategy) -> CreateCourseReq {
    CreateCourseReq {
        resources: vec![
            Resource::text("Plants convert light into chemical energy.", 0),
            Resource::image("https://img.example/leaf.png", 1),
        ],
        unit_count,
        games_per_unit: None,
        strategy: Some(strategy),
        auto_gen_enabled: false,
        auto_gen_threshold: 80,
    }
}

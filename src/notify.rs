//! Course-scoped lifecycle events.
//!
//! Delivery is at-most-once and nothing is replayed: a subscriber that joins late only sees
//! events published after it subscribed and must re-read course/unit status to catch up.
//! Publishing never blocks and never fails the caller.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::Db;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum CourseEvent {
    #[serde(rename_all = "camelCase")]
    UnitCreated { unit_id: Uuid, title: String, index: i32 },
    #[serde(rename_all = "camelCase")]
    UnitsComplete { unit_count: usize },
    CourseMetadataUpdated { title: String, description: String },
    #[serde(rename_all = "camelCase")]
    UnitGamesComplete { unit_id: Uuid, game_count: usize, progress: u8 },
    #[serde(rename_all = "camelCase")]
    UnitFailed { unit_id: Uuid, index: i32, error: String },
    #[serde(rename_all = "camelCase")]
    GenerationComplete { course_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GenerationFailed { course_id: Uuid, error: String },
}

impl CourseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CourseEvent::UnitCreated { .. } => "unit_created",
            CourseEvent::UnitsComplete { .. } => "units_complete",
            CourseEvent::CourseMetadataUpdated { .. } => "course_metadata_updated",
            CourseEvent::UnitGamesComplete { .. } => "unit_games_complete",
            CourseEvent::UnitFailed { .. } => "unit_failed",
            CourseEvent::GenerationComplete { .. } => "generation_complete",
            CourseEvent::GenerationFailed { .. } => "generation_failed",
        }
    }
}

pub fn channel_name(course_id: Uuid) -> String {
    format!("course_{}", course_id.simple())
}

pub trait Notifier: Send + Sync {
    fn publish(&self, course_id: Uuid, event: CourseEvent);
}

/// In-process hub: one broadcast channel per course, created on first subscribe.
#[derive(Default)]
pub struct BroadcastHub {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<CourseEvent>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels whose subscribers have all gone away are dropped here, so courses that
    /// never publish again do not keep an entry.
    pub fn subscribe(&self, course_id: Uuid) -> broadcast::Receiver<CourseEvent> {
        let mut channels = self.channels.lock();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(course_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Notifier for BroadcastHub {
    fn publish(&self, course_id: Uuid, event: CourseEvent) {
        let mut channels = self.channels.lock();
        let Some(tx) = channels.get(&course_id) else {
            return;
        };
        let terminal = matches!(
            event,
            CourseEvent::GenerationComplete { .. } | CourseEvent::GenerationFailed { .. }
        );
        if tx.send(event).is_err() || (terminal && tx.receiver_count() == 0) {
            // nobody listening
            channels.remove(&course_id);
        }
    }
}

/// Publishes through Postgres `pg_notify` on `course_<id>`.
pub struct PgNotifier {
    db: Db,
}

impl PgNotifier {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl Notifier for PgNotifier {
    fn publish(&self, course_id: Uuid, event: CourseEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode course event");
                return;
            }
        };
        let db = self.db.clone();
        let name = event.name();
        tokio::spawn(async move {
            let res = sqlx::query("SELECT pg_notify($1, $2)")
                .bind(channel_name(course_id))
                .bind(payload)
                .execute(&db)
                .await;
            if let Err(e) = res {
                tracing::warn!(%course_id, event = name, error = %e, "pg_notify failed");
            }
        });
    }
}

/// Sends every event to each inner notifier.
pub struct Fanout(pub Vec<Arc<dyn Notifier>>);

impl Notifier for Fanout {
    fn publish(&self, course_id: Uuid, event: CourseEvent) {
        tracing::debug!(%course_id, event = event.name(), "course event");
        for n in &self.0 {
            n.publish(course_id, event.clone());
        }
    }
}

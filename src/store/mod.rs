//! Persistence writer.
//!
//! Every method is its own short unit of work; the pipeline never holds a transaction open
//! across generation calls. Row-level atomicity (progress upsert, auto-gen claim, status
//! compare-and-set) lives in the store so that separate worker processes stay consistent.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Course, CourseStatus, Game, GeneratedGame, NewCourse, Resource, Unit, UnitOutline, UnitProgress,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CourseStore: Send + Sync {
    /// Course row (status `draft`) and its resources, created together.
    async fn create_course(&self, course: NewCourse, resources: &[Resource]) -> Result<Course>;

    async fn get_course(&self, course_id: Uuid) -> Result<Option<Course>>;

    async fn list_resources(&self, course_id: Uuid) -> Result<Vec<Resource>>;

    async fn update_course_metadata(&self, course_id: Uuid, title: &str, description: &str) -> Result<()>;

    /// Compare-and-set on status; false when the stored status is not `from`.
    async fn transition_status(&self, course_id: Uuid, from: CourseStatus, to: CourseStatus) -> Result<bool>;

    /// Insert unit shells at `start_index..`, all in one statement.
    async fn insert_units(&self, course_id: Uuid, start_index: i32, outlines: &[UnitOutline]) -> Result<Vec<Unit>>;

    /// Insert a unit's games, mark it ready and add the count to the course total.
    async fn insert_unit_games(&self, course_id: Uuid, unit_id: Uuid, games: &[GeneratedGame]) -> Result<Vec<Game>>;

    async fn mark_unit_failed(&self, unit_id: Uuid) -> Result<()>;

    /// Remove units (and their games) created by a round that is being abandoned.
    async fn delete_units(&self, course_id: Uuid, unit_ids: &[Uuid]) -> Result<()>;

    async fn list_units(&self, course_id: Uuid) -> Result<Vec<Unit>>;

    async fn list_games(&self, unit_id: Uuid) -> Result<Vec<Game>>;

    async fn max_order_index(&self, course_id: Uuid) -> Result<Option<i32>>;

    /// The game and the course it belongs to.
    async fn get_game(&self, game_id: Uuid) -> Result<Option<(Game, Uuid)>>;

    /// Insert-or-increment progress for (player, unit); `unit_total` is the unit's game count.
    async fn record_progress(&self, player_id: &str, unit_id: Uuid, unit_total: i32) -> Result<UnitProgress>;

    async fn get_progress(&self, player_id: &str, unit_id: Uuid) -> Result<Option<UnitProgress>>;

    /// Completed games summed over the course's units for one player.
    async fn completed_games(&self, course_id: Uuid, player_id: &str) -> Result<i64>;

    /// Atomically flip `has_auto_gen_triggered` false -> true. Exactly one caller wins.
    async fn try_claim_auto_gen(&self, course_id: Uuid) -> Result<bool>;

    async fn release_auto_gen(&self, course_id: Uuid) -> Result<()>;

    /// Cascades to resources, units, games and progress.
    async fn delete_course(&self, course_id: Uuid) -> Result<bool>;
}

/// Run a persistence step, retrying once on a persistence failure.
pub async fn retry_once<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match op().await {
        Err(crate::error::PipelineError::Persistence(msg)) => {
            tracing::warn!(step = label, error = %msg, "persistence failed, retrying once");
            op().await
        }
        other => other,
    }
}

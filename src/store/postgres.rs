use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use super::CourseStore;
use crate::db::Db;
use crate::error::{PipelineError, Result};
use crate::games::{self, Difficulty};
use crate::models::{
    Course, CourseStatus, Game, GeneratedGame, NewCourse, Resource, ResourceKind, Unit, UnitOutline,
    UnitProgress, UnitStatus,
};

const COURSE_COLUMNS: &str = "id, owner_id, title, description, status, auto_gen_enabled, \
    auto_gen_threshold, has_auto_gen_triggered, unit_count, total_games, games_per_unit, \
    created_at, updated_at";
const UNIT_COLUMNS: &str = "id, course_id, title, description, order_index, status, created_at";
const GAME_COLUMNS: &str = "id, unit_id, title, game_type, difficulty_level, content, order_index";

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    owner_id: String,
    title: String,
    description: String,
    status: String,
    auto_gen_enabled: bool,
    auto_gen_threshold: i32,
    has_auto_gen_triggered: bool,
    unit_count: i32,
    total_games: i32,
    games_per_unit: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CourseRow> for Course {
    type Error = PipelineError;

    fn try_from(r: CourseRow) -> Result<Self> {
        let status = CourseStatus::parse(&r.status)
            .ok_or_else(|| corrupt("course status", &r.status))?;
        Ok(Course {
            id: r.id,
            owner_id: r.owner_id,
            title: r.title,
            description: r.description,
            status,
            auto_gen_enabled: r.auto_gen_enabled,
            auto_gen_threshold: r.auto_gen_threshold,
            has_auto_gen_triggered: r.has_auto_gen_triggered,
            unit_count: r.unit_count,
            total_games: r.total_games,
            games_per_unit: r.games_per_unit,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    description: String,
    order_index: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UnitRow> for Unit {
    type Error = PipelineError;

    fn try_from(r: UnitRow) -> Result<Self> {
        let status = UnitStatus::parse(&r.status).ok_or_else(|| corrupt("unit status", &r.status))?;
        Ok(Unit {
            id: r.id,
            course_id: r.course_id,
            title: r.title,
            description: r.description,
            order_index: r.order_index,
            status,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GameRow {
    id: Uuid,
    unit_id: Uuid,
    title: String,
    game_type: String,
    difficulty_level: String,
    content: Json<serde_json::Value>,
    order_index: i32,
}

impl TryFrom<GameRow> for Game {
    type Error = PipelineError;

    fn try_from(r: GameRow) -> Result<Self> {
        let difficulty_level = Difficulty::parse(&r.difficulty_level)
            .ok_or_else(|| corrupt("difficulty", &r.difficulty_level))?;
        let content = games::content_from_parts(&r.game_type, r.content.0)
            .map_err(|e| PipelineError::Persistence(format!("stored game {} is invalid: {e}", r.id)))?;
        Ok(Game {
            id: r.id,
            unit_id: r.unit_id,
            title: r.title,
            difficulty_level,
            content,
            order_index: r.order_index,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GameWithCourseRow {
    #[sqlx(flatten)]
    game: GameRow,
    course_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    kind: String,
    content: Option<String>,
    file_url: Option<String>,
    file_type: Option<String>,
    order_index: i32,
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    player_id: String,
    unit_id: Uuid,
    completed_games: i32,
    total_games: i32,
    is_completed: bool,
}

impl From<ProgressRow> for UnitProgress {
    fn from(r: ProgressRow) -> Self {
        UnitProgress {
            player_id: r.player_id,
            unit_id: r.unit_id,
            completed_games: r.completed_games,
            total_games: r.total_games,
            is_completed: r.is_completed,
        }
    }
}

fn corrupt(what: &str, value: &str) -> PipelineError {
    PipelineError::Persistence(format!("unknown {what} {value:?} in store"))
}

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CourseStore for PgStore {
    async fn create_course(&self, new: NewCourse, resources: &[Resource]) -> Result<Course> {
        let mut tx = self.db.begin().await?;

        let row: CourseRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO courses (id, owner_id, title, description, status, auto_gen_enabled,
                                 auto_gen_threshold, games_per_unit)
            VALUES ($1, $2, '', '', 'draft', $3, $4, $5)
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.owner_id)
        .bind(new.auto_gen_enabled)
        .bind(new.auto_gen_threshold)
        .bind(new.games_per_unit)
        .fetch_one(&mut *tx)
        .await?;

        if !resources.is_empty() {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO resources (id, course_id, kind, content, file_url, file_type, order_index) ",
            );
            qb.push_values(resources, |mut b, r| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(row.id)
                    .push_bind(r.kind.as_str())
                    .push_bind(r.content.clone())
                    .push_bind(r.file_url.clone())
                    .push_bind(r.file_type.clone())
                    .push_bind(r.order_index);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        row.try_into()
    }

    async fn get_course(&self, course_id: Uuid) -> Result<Option<Course>> {
        let row: Option<CourseRow> =
            sqlx::query_as(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"))
                .bind(course_id)
                .fetch_optional(&self.db)
                .await?;
        row.map(Course::try_from).transpose()
    }

    async fn list_resources(&self, course_id: Uuid) -> Result<Vec<Resource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as(
            r#"
            SELECT kind, content, file_url, file_type, order_index
            FROM resources WHERE course_id = $1 ORDER BY order_index
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|r| {
                let kind = ResourceKind::parse(&r.kind).ok_or_else(|| corrupt("resource kind", &r.kind))?;
                Ok(Resource {
                    kind,
                    content: r.content,
                    file_url: r.file_url,
                    file_type: r.file_type,
                    order_index: r.order_index,
                })
            })
            .collect()
    }

    async fn update_course_metadata(&self, course_id: Uuid, title: &str, description: &str) -> Result<()> {
        sqlx::query("UPDATE courses SET title = $2, description = $3, updated_at = now() WHERE id = $1")
            .bind(course_id)
            .bind(title)
            .bind(description)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn transition_status(&self, course_id: Uuid, from: CourseStatus, to: CourseStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let res = sqlx::query(
            "UPDATE courses SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
        )
        .bind(course_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn insert_units(&self, course_id: Uuid, start_index: i32, outlines: &[UnitOutline]) -> Result<Vec<Unit>> {
        if outlines.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.db.begin().await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO units (id, course_id, title, description, order_index, status) ",
        );
        qb.push_values(outlines.iter().enumerate(), |mut b, (i, o)| {
            b.push_bind(Uuid::new_v4())
                .push_bind(course_id)
                .push_bind(o.title.clone())
                .push_bind(o.description.clone())
                .push_bind(start_index + i as i32)
                .push_bind(UnitStatus::Generating.as_str());
        });
        qb.push(format!(" RETURNING {UNIT_COLUMNS}"));
        let rows = qb.build_query_as::<UnitRow>().fetch_all(&mut *tx).await?;

        if rows.len() != outlines.len() {
            return Err(PipelineError::Persistence(format!(
                "inserted {} of {} units",
                rows.len(),
                outlines.len()
            )));
        }

        sqlx::query("UPDATE courses SET unit_count = unit_count + $2, updated_at = now() WHERE id = $1")
            .bind(course_id)
            .bind(rows.len() as i32)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut units = rows
            .into_iter()
            .map(Unit::try_from)
            .collect::<Result<Vec<_>>>()?;
        units.sort_by_key(|u| u.order_index);
        Ok(units)
    }

    async fn insert_unit_games(&self, course_id: Uuid, unit_id: Uuid, games: &[GeneratedGame]) -> Result<Vec<Game>> {
        let mut tx = self.db.begin().await?;

        let mut rows: Vec<GameRow> = Vec::new();
        if !games.is_empty() {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO games (id, unit_id, title, game_type, difficulty_level, content, order_index) ",
            );
            qb.push_values(games.iter().enumerate(), |mut b, (i, g)| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(unit_id)
                    .push_bind(g.title.clone())
                    .push_bind(g.content.game_type().as_str())
                    .push_bind(g.difficulty_level.as_str())
                    .push_bind(Json(g.content.payload()))
                    .push_bind(i as i32);
            });
            qb.push(format!(" RETURNING {GAME_COLUMNS}"));
            rows = qb.build_query_as::<GameRow>().fetch_all(&mut *tx).await?;
        }

        let updated = sqlx::query("UPDATE units SET status = 'ready' WHERE id = $1 AND course_id = $2")
            .bind(unit_id)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() != 1 {
            return Err(PipelineError::NotFound(format!("unit {unit_id}")));
        }

        sqlx::query("UPDATE courses SET total_games = total_games + $2, updated_at = now() WHERE id = $1")
            .bind(course_id)
            .bind(rows.len() as i32)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut out = rows
            .into_iter()
            .map(Game::try_from)
            .collect::<Result<Vec<_>>>()?;
        out.sort_by_key(|g| g.order_index);
        Ok(out)
    }

    async fn mark_unit_failed(&self, unit_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE units SET status = 'error' WHERE id = $1")
            .bind(unit_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_units(&self, course_id: Uuid, unit_ids: &[Uuid]) -> Result<()> {
        if unit_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.db.begin().await?;
        let games = sqlx::query(
            "DELETE FROM games g USING units u WHERE g.unit_id = u.id AND u.course_id = $1 AND u.id = ANY($2)",
        )
        .bind(course_id)
        .bind(unit_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let units = sqlx::query("DELETE FROM units WHERE course_id = $1 AND id = ANY($2)")
            .bind(course_id)
            .bind(unit_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(
            r#"
            UPDATE courses
            SET unit_count = unit_count - $2, total_games = total_games - $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(course_id)
        .bind(units as i32)
        .bind(games as i32)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_units(&self, course_id: Uuid) -> Result<Vec<Unit>> {
        let rows: Vec<UnitRow> = sqlx::query_as(&format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE course_id = $1 ORDER BY order_index"
        ))
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Unit::try_from).collect()
    }

    async fn list_games(&self, unit_id: Uuid) -> Result<Vec<Game>> {
        let rows: Vec<GameRow> = sqlx::query_as(&format!(
            "SELECT {GAME_COLUMNS} FROM games WHERE unit_id = $1 ORDER BY order_index"
        ))
        .bind(unit_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Game::try_from).collect()
    }

    async fn max_order_index(&self, course_id: Uuid) -> Result<Option<i32>> {
        let max: Option<i32> = sqlx::query_scalar("SELECT MAX(order_index) FROM units WHERE course_id = $1")
            .bind(course_id)
            .fetch_one(&self.db)
            .await?;
        Ok(max)
    }

    async fn get_game(&self, game_id: Uuid) -> Result<Option<(Game, Uuid)>> {
        let row: Option<GameWithCourseRow> = sqlx::query_as(
            r#"
            SELECT g.id, g.unit_id, g.title, g.game_type, g.difficulty_level, g.content,
                   g.order_index, u.course_id
            FROM games g JOIN units u ON u.id = g.unit_id
            WHERE g.id = $1
            "#,
        )
        .bind(game_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| Ok((Game::try_from(r.game)?, r.course_id))).transpose()
    }

    async fn record_progress(&self, player_id: &str, unit_id: Uuid, unit_total: i32) -> Result<UnitProgress> {
        // single statement: concurrent submissions for the same pair cannot lose an increment
        let row: ProgressRow = sqlx::query_as(
            r#"
            INSERT INTO unit_progress (player_id, unit_id, completed_games, total_games, is_completed)
            VALUES ($1, $2, LEAST(1, $3), $3, 1 >= $3)
            ON CONFLICT (player_id, unit_id) DO UPDATE SET
                completed_games = LEAST(unit_progress.completed_games + 1, EXCLUDED.total_games),
                total_games = EXCLUDED.total_games,
                is_completed = LEAST(unit_progress.completed_games + 1, EXCLUDED.total_games)
                               >= EXCLUDED.total_games,
                updated_at = now()
            RETURNING player_id, unit_id, completed_games, total_games, is_completed
            "#,
        )
        .bind(player_id)
        .bind(unit_id)
        .bind(unit_total)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into())
    }

    async fn get_progress(&self, player_id: &str, unit_id: Uuid) -> Result<Option<UnitProgress>> {
        let row: Option<ProgressRow> = sqlx::query_as(
            r#"
            SELECT player_id, unit_id, completed_games, total_games, is_completed
            FROM unit_progress WHERE player_id = $1 AND unit_id = $2
            "#,
        )
        .bind(player_id)
        .bind(unit_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn completed_games(&self, course_id: Uuid, player_id: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(p.completed_games), 0)::BIGINT
            FROM unit_progress p JOIN units u ON u.id = p.unit_id
            WHERE u.course_id = $1 AND p.player_id = $2
            "#,
        )
        .bind(course_id)
        .bind(player_id)
        .fetch_one(&self.db)
        .await?;
        Ok(n)
    }

    async fn try_claim_auto_gen(&self, course_id: Uuid) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE courses SET has_auto_gen_triggered = true, updated_at = now()
            WHERE id = $1 AND NOT has_auto_gen_triggered
            "#,
        )
        .bind(course_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn release_auto_gen(&self, course_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE courses SET has_auto_gen_triggered = false, updated_at = now() WHERE id = $1")
            .bind(course_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_course(&self, course_id: Uuid) -> Result<bool> {
        let res = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(course_id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }
}

//! In-process store with the same atomicity guarantees as the Postgres one, for local runs
//! (`STORE=memory`) and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::CourseStore;
use crate::error::{PipelineError, Result};
use crate::models::{
    Course, CourseStatus, Game, GeneratedGame, NewCourse, Resource, Unit, UnitOutline, UnitProgress,
    UnitStatus,
};

#[derive(Default)]
struct State {
    courses: HashMap<Uuid, Course>,
    resources: HashMap<Uuid, Vec<Resource>>,
    units: HashMap<Uuid, Unit>,
    games: HashMap<Uuid, Game>,
    progress: HashMap<(String, Uuid), UnitProgress>,
}

impl State {
    fn course_mut(&mut self, course_id: Uuid) -> Result<&mut Course> {
        self.courses
            .get_mut(&course_id)
            .ok_or_else(|| PipelineError::NotFound(format!("course {course_id}")))
    }

    fn remove_unit(&mut self, unit_id: Uuid) {
        self.units.remove(&unit_id);
        self.games.retain(|_, g| g.unit_id != unit_id);
        self.progress.retain(|(_, u), _| *u != unit_id);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn course_count(&self) -> usize {
        self.state.lock().courses.len()
    }
}

#[async_trait]
impl CourseStore for MemoryStore {
    async fn create_course(&self, new: NewCourse, resources: &[Resource]) -> Result<Course> {
        let now = Utc::now();
        let course = Course {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            title: String::new(),
            description: String::new(),
            status: CourseStatus::Draft,
            auto_gen_enabled: new.auto_gen_enabled,
            auto_gen_threshold: new.auto_gen_threshold,
            has_auto_gen_triggered: false,
            unit_count: 0,
            total_games: 0,
            games_per_unit: new.games_per_unit,
            created_at: now,
            updated_at: now,
        };
        let mut st = self.state.lock();
        st.resources.insert(course.id, resources.to_vec());
        st.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, course_id: Uuid) -> Result<Option<Course>> {
        Ok(self.state.lock().courses.get(&course_id).cloned())
    }

    async fn list_resources(&self, course_id: Uuid) -> Result<Vec<Resource>> {
        let st = self.state.lock();
        let mut out = st.resources.get(&course_id).cloned().unwrap_or_default();
        out.sort_by_key(|r| r.order_index);
        Ok(out)
    }

    async fn update_course_metadata(&self, course_id: Uuid, title: &str, description: &str) -> Result<()> {
        let mut st = self.state.lock();
        let course = st.course_mut(course_id)?;
        course.title = title.to_string();
        course.description = description.to_string();
        course.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_status(&self, course_id: Uuid, from: CourseStatus, to: CourseStatus) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        let mut st = self.state.lock();
        let course = st.course_mut(course_id)?;
        if course.status != from {
            return Ok(false);
        }
        course.status = to;
        course.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_units(&self, course_id: Uuid, start_index: i32, outlines: &[UnitOutline]) -> Result<Vec<Unit>> {
        let mut st = self.state.lock();
        st.course_mut(course_id)?;
        let taken = st
            .units
            .values()
            .any(|u| u.course_id == course_id && u.order_index >= start_index);
        if taken {
            return Err(PipelineError::Persistence(format!(
                "order index {start_index} already used in course {course_id}"
            )));
        }
        let now = Utc::now();
        let units: Vec<Unit> = outlines
            .iter()
            .enumerate()
            .map(|(i, o)| Unit {
                id: Uuid::new_v4(),
                course_id,
                title: o.title.clone(),
                description: o.description.clone(),
                order_index: start_index + i as i32,
                status: UnitStatus::Generating,
                created_at: now,
            })
            .collect();
        for u in &units {
            st.units.insert(u.id, u.clone());
        }
        st.course_mut(course_id)?.unit_count += units.len() as i32;
        Ok(units)
    }

    async fn insert_unit_games(&self, course_id: Uuid, unit_id: Uuid, games: &[GeneratedGame]) -> Result<Vec<Game>> {
        let mut st = self.state.lock();
        let unit = st
            .units
            .get_mut(&unit_id)
            .filter(|u| u.course_id == course_id)
            .ok_or_else(|| PipelineError::NotFound(format!("unit {unit_id}")))?;
        unit.status = UnitStatus::Ready;
        let rows: Vec<Game> = games
            .iter()
            .enumerate()
            .map(|(i, g)| Game {
                id: Uuid::new_v4(),
                unit_id,
                title: g.title.clone(),
                difficulty_level: g.difficulty_level,
                content: g.content.clone(),
                order_index: i as i32,
            })
            .collect();
        for g in &rows {
            st.games.insert(g.id, g.clone());
        }
        let course = st.course_mut(course_id)?;
        course.total_games += rows.len() as i32;
        course.updated_at = Utc::now();
        Ok(rows)
    }

    async fn mark_unit_failed(&self, unit_id: Uuid) -> Result<()> {
        let mut st = self.state.lock();
        if let Some(u) = st.units.get_mut(&unit_id) {
            u.status = UnitStatus::Error;
        }
        Ok(())
    }

    async fn delete_units(&self, course_id: Uuid, unit_ids: &[Uuid]) -> Result<()> {
        let mut st = self.state.lock();
        let mut removed_units = 0;
        let mut removed_games = 0;
        for id in unit_ids {
            if st.units.get(id).is_some_and(|u| u.course_id == course_id) {
                removed_games += st.games.values().filter(|g| g.unit_id == *id).count() as i32;
                removed_units += 1;
                st.remove_unit(*id);
            }
        }
        let course = st.course_mut(course_id)?;
        course.unit_count -= removed_units;
        course.total_games -= removed_games;
        Ok(())
    }

    async fn list_units(&self, course_id: Uuid) -> Result<Vec<Unit>> {
        let st = self.state.lock();
        let mut units: Vec<Unit> = st
            .units
            .values()
            .filter(|u| u.course_id == course_id)
            .cloned()
            .collect();
        units.sort_by_key(|u| u.order_index);
        Ok(units)
    }

    async fn list_games(&self, unit_id: Uuid) -> Result<Vec<Game>> {
        let st = self.state.lock();
        let mut games: Vec<Game> = st
            .games
            .values()
            .filter(|g| g.unit_id == unit_id)
            .cloned()
            .collect();
        games.sort_by_key(|g| g.order_index);
        Ok(games)
    }

    async fn max_order_index(&self, course_id: Uuid) -> Result<Option<i32>> {
        let st = self.state.lock();
        Ok(st
            .units
            .values()
            .filter(|u| u.course_id == course_id)
            .map(|u| u.order_index)
            .max())
    }

    async fn get_game(&self, game_id: Uuid) -> Result<Option<(Game, Uuid)>> {
        let st = self.state.lock();
        Ok(st.games.get(&game_id).and_then(|g| {
            st.units
                .get(&g.unit_id)
                .map(|u| (g.clone(), u.course_id))
        }))
    }

    async fn record_progress(&self, player_id: &str, unit_id: Uuid, unit_total: i32) -> Result<UnitProgress> {
        let mut st = self.state.lock();
        let entry = st
            .progress
            .entry((player_id.to_string(), unit_id))
            .and_modify(|p| {
                p.completed_games = (p.completed_games + 1).min(unit_total);
                p.total_games = unit_total;
                p.is_completed = p.completed_games >= unit_total;
            })
            .or_insert_with(|| UnitProgress {
                player_id: player_id.to_string(),
                unit_id,
                completed_games: 1.min(unit_total),
                total_games: unit_total,
                is_completed: 1 >= unit_total,
            });
        Ok(entry.clone())
    }

    async fn get_progress(&self, player_id: &str, unit_id: Uuid) -> Result<Option<UnitProgress>> {
        Ok(self
            .state
            .lock()
            .progress
            .get(&(player_id.to_string(), unit_id))
            .cloned())
    }

    async fn completed_games(&self, course_id: Uuid, player_id: &str) -> Result<i64> {
        let st = self.state.lock();
        Ok(st
            .progress
            .iter()
            .filter(|((p, u), _)| {
                p == player_id && st.units.get(u).is_some_and(|unit| unit.course_id == course_id)
            })
            .map(|(_, prog)| prog.completed_games as i64)
            .sum())
    }

    async fn try_claim_auto_gen(&self, course_id: Uuid) -> Result<bool> {
        let mut st = self.state.lock();
        let course = st.course_mut(course_id)?;
        if course.has_auto_gen_triggered {
            return Ok(false);
        }
        course.has_auto_gen_triggered = true;
        Ok(true)
    }

    async fn release_auto_gen(&self, course_id: Uuid) -> Result<()> {
        let mut st = self.state.lock();
        st.course_mut(course_id)?.has_auto_gen_triggered = false;
        Ok(())
    }

    async fn delete_course(&self, course_id: Uuid) -> Result<bool> {
        let mut st = self.state.lock();
        if st.courses.remove(&course_id).is_none() {
            return Ok(false);
        }
        st.resources.remove(&course_id);
        let unit_ids: Vec<Uuid> = st
            .units
            .values()
            .filter(|u| u.course_id == course_id)
            .map(|u| u.id)
            .collect();
        for id in unit_ids {
            st.remove_unit(id);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{Difficulty, GameContent, QuizContent};

    fn new_course() -> NewCourse {
        NewCourse {
            owner_id: "owner".into(),
            auto_gen_enabled: true,
            auto_gen_threshold: 50,
            games_per_unit: 3,
        }
    }

    fn quiz(n: usize) -> Vec<GeneratedGame> {
        (0..n)
            .map(|i| GeneratedGame {
                title: format!("Q{i}"),
                difficulty_level: Difficulty::Easy,
                content: GameContent::Quiz(QuizContent {
                    question: "q".into(),
                    correct_answer: "a".into(),
                }),
            })
            .collect()
    }

    #[tokio::test]
    async fn progress_upsert_counts_to_completion() {
        let store = MemoryStore::new();
        let unit = Uuid::new_v4();
        let p1 = store.record_progress("p", unit, 3).await.unwrap();
        assert_eq!((p1.completed_games, p1.is_completed), (1, false));
        let p2 = store.record_progress("p", unit, 3).await.unwrap();
        assert_eq!((p2.completed_games, p2.is_completed), (2, false));
        let p3 = store.record_progress("p", unit, 3).await.unwrap();
        assert_eq!((p3.completed_games, p3.is_completed), (3, true));
        let p4 = store.record_progress("p", unit, 3).await.unwrap();
        assert_eq!(p4.completed_games, 3);
    }

    #[tokio::test]
    async fn status_changes_only_along_legal_edges() {
        let store = MemoryStore::new();
        let c = store.create_course(new_course(), &[]).await.unwrap();
        assert!(!store.transition_status(c.id, CourseStatus::Draft, CourseStatus::Ready).await.unwrap());
        assert!(store.transition_status(c.id, CourseStatus::Draft, CourseStatus::Generating).await.unwrap());
        // stale `from` loses
        assert!(!store.transition_status(c.id, CourseStatus::Draft, CourseStatus::Generating).await.unwrap());
        assert_eq!(store.get_course(c.id).await.unwrap().unwrap().status, CourseStatus::Generating);
    }

    #[tokio::test]
    async fn totals_follow_inserted_games_and_deletes() {
        let store = MemoryStore::new();
        let c = store.create_course(new_course(), &[Resource::text("t", 0)]).await.unwrap();
        let outlines = vec![
            UnitOutline { title: "A".into(), description: "a".into() },
            UnitOutline { title: "B".into(), description: "b".into() },
        ];
        let units = store.insert_units(c.id, 0, &outlines).await.unwrap();
        store.insert_unit_games(c.id, units[0].id, &quiz(3)).await.unwrap();
        store.insert_unit_games(c.id, units[1].id, &quiz(2)).await.unwrap();
        let course = store.get_course(c.id).await.unwrap().unwrap();
        assert_eq!((course.unit_count, course.total_games), (2, 5));
        assert_eq!(store.max_order_index(c.id).await.unwrap(), Some(1));

        store.delete_units(c.id, &[units[1].id]).await.unwrap();
        let course = store.get_course(c.id).await.unwrap().unwrap();
        assert_eq!((course.unit_count, course.total_games), (1, 3));

        assert!(store.delete_course(c.id).await.unwrap());
        assert!(store.list_games(units[0].id).await.unwrap().is_empty());
        assert!(store.list_resources(c.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_gen_claim_is_single_winner() {
        let store = MemoryStore::new();
        let c = store.create_course(new_course(), &[]).await.unwrap();
        assert!(store.try_claim_auto_gen(c.id).await.unwrap());
        assert!(!store.try_claim_auto_gen(c.id).await.unwrap());
        store.release_auto_gen(c.id).await.unwrap();
        assert!(store.try_claim_auto_gen(c.id).await.unwrap());
    }
}

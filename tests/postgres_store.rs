//! Runs against a real database when `DATABASE_URL` is set; otherwise every test returns early.

use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;

use course_forge::db;
use course_forge::models::{NewCourse, Resource, UnitOutline};
use course_forge::store::{CourseStore, PgStore};

async fn store() -> Option<Arc<PgStore>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = db::connect(&url, 10).await.unwrap();
    db::migrate(&pool).await.unwrap();
    Some(Arc::new(PgStore::new(pool)))
}

async fn course_with_unit(store: &PgStore) -> (Uuid, Uuid) {
    let course = store
        .create_course(
            NewCourse {
                owner_id: "owner".into(),
                auto_gen_enabled: true,
                auto_gen_threshold: 50,
                games_per_unit: 2,
            },
            &[Resource::text("Plants convert light into chemical energy.", 0)],
        )
        .await
        .unwrap();
    let units = store
        .insert_units(
            course.id,
            0,
            &[UnitOutline {
                title: "Light".into(),
                description: "Where energy comes from.".into(),
            }],
        )
        .await
        .unwrap();
    (course.id, units[0].id)
}

#[tokio::test]
async fn progress_saturates_at_the_unit_total() {
    let Some(store) = store().await else { return };
    let (course_id, unit_id) = course_with_unit(&store).await;

    let first = store.record_progress("p1", unit_id, 2).await.unwrap();
    assert_eq!((first.completed_games, first.is_completed), (1, false));
    let second = store.record_progress("p1", unit_id, 2).await.unwrap();
    assert_eq!((second.completed_games, second.is_completed), (2, true));
    let again = store.record_progress("p1", unit_id, 2).await.unwrap();
    assert_eq!(again.completed_games, 2);

    assert_eq!(store.completed_games(course_id, "p1").await.unwrap(), 2);
    assert_eq!(store.completed_games(course_id, "p2").await.unwrap(), 0);
    store.delete_course(course_id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_not_lost() {
    let Some(store) = store().await else { return };
    let (course_id, unit_id) = course_with_unit(&store).await;

    let results = join_all((0..6).map(|_| {
        let store = store.clone();
        async move { store.record_progress("p1", unit_id, 10).await }
    }))
    .await;
    assert!(results.iter().all(Result::is_ok));

    let progress = store.get_progress("p1", unit_id).await.unwrap().unwrap();
    assert_eq!(progress.completed_games, 6);
    assert!(!progress.is_completed);
    store.delete_course(course_id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auto_generation_claim_is_won_once() {
    let Some(store) = store().await else { return };
    let (course_id, _) = course_with_unit(&store).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.try_claim_auto_gen(course_id).await.unwrap() })
        })
        .collect();
    let mut won = 0;
    for handle in handles {
        if handle.await.unwrap() {
            won += 1;
        }
    }
    assert_eq!(won, 1);
    assert!(store.get_course(course_id).await.unwrap().unwrap().has_auto_gen_triggered);

    store.release_auto_gen(course_id).await.unwrap();
    assert!(store.try_claim_auto_gen(course_id).await.unwrap());
    store.delete_course(course_id).await.unwrap();
}

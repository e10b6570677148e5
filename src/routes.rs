use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::*;
use crate::notify::BroadcastHub;
use crate::pipeline::{AnswerOutcome, Pipeline};

const OWNER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub hub: Arc<BroadcastHub>,
}

type HttpError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/courses", post(create_course))
        .route("/api/courses/:id", get(get_course).delete(delete_course))
        .route("/api/courses/:id/events", get(course_events))
        .route("/api/games/:id/answers", post(submit_answer))
        .with_state(state)
}

fn owner_id(headers: &HeaderMap) -> Result<String, HttpError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| e400(format!("{OWNER_HEADER} header is required")))
}

async fn create_course(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateCourseReq>,
) -> Result<(StatusCode, Json<Course>), HttpError> {
    let owner = owner_id(&headers)?;
    let (course, round) = state.pipeline.start_course(&owner, req).await.map_err(into_http)?;

    let pipeline = state.pipeline.clone();
    let course_id = course.id;
    tokio::spawn(async move {
        if let Err(e) = pipeline.complete_course(round).await {
            tracing::warn!(%course_id, error = %e, "course generation did not complete");
        }
    });

    Ok((StatusCode::CREATED, Json(course)))
}

async fn get_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetail>, HttpError> {
    let store = state.pipeline.store();
    let course = store
        .get_course(course_id)
        .await
        .map_err(into_http)?
        .ok_or_else(|| e404("course not found"))?;
    let resources = store.list_resources(course_id).await.map_err(into_http)?;

    let mut units = Vec::new();
    for unit in store.list_units(course_id).await.map_err(into_http)? {
        let games = store.list_games(unit.id).await.map_err(into_http)?;
        units.push(UnitWithGames { unit, games });
    }

    Ok(Json(CourseDetail {
        course,
        resources,
        units,
    }))
}

async fn delete_course(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(course_id): Path<Uuid>,
) -> Result<StatusCode, HttpError> {
    let owner = owner_id(&headers)?;
    let store = state.pipeline.store();
    let course = store
        .get_course(course_id)
        .await
        .map_err(into_http)?
        .ok_or_else(|| e404("course not found"))?;
    if course.owner_id != owner {
        return Err(into_http(PipelineError::Authorization(
            "only the owner may delete a course".into(),
        )));
    }
    if !store.delete_course(course_id).await.map_err(into_http)? {
        return Err(e404("course not found"));
    }
    tracing::info!(%course_id, "course deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Live course events. Nothing is replayed: clients should read the course first.
async fn course_events(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpError> {
    state
        .pipeline
        .store()
        .get_course(course_id)
        .await
        .map_err(into_http)?
        .ok_or_else(|| e404("course not found"))?;

    let rx = state.hub.subscribe(course_id);
    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(ev) => match Event::default().event(ev.name()).json_data(&ev) {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(e) => tracing::warn!(error = %e, "failed to encode course event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn submit_answer(
    State(state): State<AppState>,
    Path(game_id): Path<Uuid>,
    Json(req): Json<SubmitAnswerReq>,
) -> Result<Json<AnswerOutcome>, HttpError> {
    let outcome = state
        .pipeline
        .submit_answer(game_id, req)
        .await
        .map_err(into_http)?;
    Ok(Json(outcome))
}

fn into_http(e: PipelineError) -> HttpError {
    let status = match &e {
        PipelineError::Validation(_) | PipelineError::ContentSafety(_) => StatusCode::BAD_REQUEST,
        PipelineError::Authorization(_) => StatusCode::FORBIDDEN,
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::Generation(_) => StatusCode::BAD_GATEWAY,
        PipelineError::MissingUnits(_)
        | PipelineError::Persistence(_)
        | PipelineError::AutoGeneration(_) => return e500(e),
    };
    if status == StatusCode::BAD_GATEWAY {
        tracing::warn!(error = %e, "generation service failure");
    }
    (status, e.to_string())
}

fn e400<T: Into<String>>(msg: T) -> HttpError {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn e404<T: Into<String>>(msg: T) -> HttpError {
    (StatusCode::NOT_FOUND, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> HttpError {
    tracing::error!(error = %e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use course_forge::config::{Settings, StoreBackend};
use course_forge::generation::{openai::OpenAiService, GenerationClient};
use course_forge::notify::{BroadcastHub, Fanout, Notifier, PgNotifier};
use course_forge::pipeline::Pipeline;
use course_forge::routes::{self, AppState};
use course_forge::safety::BlocklistScreen;
use course_forge::store::{CourseStore, MemoryStore, PgStore};
use course_forge::{db, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env()?;
    logging::init(settings.log_format);

    let hub = Arc::new(BroadcastHub::new());
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![hub.clone() as Arc<dyn Notifier>];

    let store: Arc<dyn CourseStore> = match settings.store {
        StoreBackend::Postgres => {
            let url = settings.database_url.as_deref().unwrap_or_default();
            let pool = db::connect(url, 10).await?;
            db::migrate(&pool).await?;
            if settings.notify_pg {
                notifiers.push(Arc::new(PgNotifier::new(pool.clone())));
            }
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
    };

    let service = OpenAiService::new(
        settings.generation_base_url.clone(),
        settings.generation_api_key.clone(),
        settings.generation_timeout,
    )?;
    let client = GenerationClient::new(
        Arc::new(service),
        settings.generation_model.clone(),
        settings.generation_vision_model.clone(),
    );

    let pipeline = Pipeline::new(
        store,
        client,
        Arc::new(Fanout(notifiers)),
        Arc::new(BlocklistScreen::new(&settings.blocked_terms)),
        settings.pipeline.clone(),
    );

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(AppState {
            pipeline: Arc::new(pipeline),
            hub,
        }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

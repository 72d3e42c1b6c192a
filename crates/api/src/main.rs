use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use placement_core::domain::snapshot::Snapshot;
use placement_core::pipeline::{Pipeline, PipelineError};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = placement_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let config = settings.pipeline_config();
    tracing::info!(
        base_url = %config.base_url,
        cache_path = %config.cache_path.display(),
        cache_window_secs = config.cache_window.as_secs(),
        "pipeline configured"
    );

    let state = AppState {
        pipeline: Pipeline::new(&config)?,
    };

    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/companies", get(get_companies))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn index() -> &'static str {
    "Server is running. Visit /api/companies for company data."
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

#[derive(Debug, Serialize)]
struct ApiSnapshot {
    success: bool,
    #[serde(flatten)]
    snapshot: Snapshot,
}

#[derive(Debug, Serialize)]
struct ApiError {
    success: bool,
    error: &'static str,
}

async fn get_companies(State(state): State<AppState>) -> Response {
    match state.pipeline.run().await {
        // Dropping `persist` leaves the cache write running in the background.
        Ok(served) => {
            tracing::debug!(origin = ?served.origin, "serving companies");
            Json(ApiSnapshot {
                success: true,
                snapshot: served.snapshot,
            })
            .into_response()
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: PipelineError) -> Response {
    let (status, message) = match &err {
        PipelineError::NoData => (StatusCode::SERVICE_UNAVAILABLE, "no company data"),
        PipelineError::Internal(e) => {
            sentry_anyhow::capture_anyhow(e);
            tracing::error!(error = %err, "companies request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    };

    (
        status,
        Json(ApiError {
            success: false,
            error: message,
        }),
    )
        .into_response()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &placement_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

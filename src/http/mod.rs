//! HTTP surface: JSON routes over the record, reminder, attachment and auth
//! services. Every route except login and health requires a bearer token.

pub mod auth;
pub mod dashboard;
pub mod error;
pub mod extract;
pub mod files;
pub mod records;
pub mod reminders;

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{AppError, AppResult};

/// Slack for the JSON envelope around an upload's base64 payload.
const BODY_SLACK_BYTES: usize = 64 * 1024;

pub fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.div_ceil(3).saturating_mul(4).saturating_add(BODY_SLACK_BYTES)
}

fn cors_layer(origin: Option<&str>) -> AppResult<CorsLayer> {
    let Some(origin) = origin else {
        return Ok(CorsLayer::permissive());
    };
    let origin = HeaderValue::from_str(origin).map_err(|err| {
        AppError::new("CONFIG/CORS_ORIGIN", err.to_string()).with_context("origin", origin.to_string())
    })?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers(Any))
}

pub fn router(state: AppState, cors_origin: Option<&str>) -> AppResult<Router> {
    let limit = body_limit(state.max_upload_bytes);
    let router = Router::new()
        .route("/health", get(dashboard::health))
        // Auth
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/change-password", put(auth::change_password))
        .route("/auth/register", post(auth::register))
        // Dashboard and data portability
        .route("/api/dashboard/stats", get(dashboard::stats))
        .route("/api/activity-logs", get(dashboard::activity_logs))
        .route("/api/export", get(dashboard::export_all))
        .route("/api/import", post(dashboard::import_all))
        // Reminder engine
        .route(
            "/api/reminders",
            get(records::list_reminders).post(records::create_reminder),
        )
        .route("/api/reminders/due", get(reminders::due))
        .route(
            "/api/reminders/:id",
            get(records::get_reminder)
                .put(records::update_reminder)
                .delete(records::delete_reminder),
        )
        .route("/api/reminders/:id/complete", post(reminders::complete))
        .route("/api/reminders/:id/snooze", post(reminders::snooze))
        .route("/api/reminders/:id/schedule", post(reminders::schedule))
        .route("/api/reminders/:id/remind-tomorrow", post(reminders::remind_tomorrow))
        .route("/api/reminders/:id/notified", post(reminders::notified))
        .route("/api/reminders/:id/cancel", post(reminders::cancel))
        // Generic records
        .route("/api/:entity", get(records::list).post(records::create))
        .route(
            "/api/:entity/:id",
            get(records::get).put(records::update).delete(records::delete),
        )
        // Attachments
        .route("/files/upload/:entity/:id", post(files::upload))
        .route("/files/record/:entity/:id", get(files::list))
        .route("/files/download/:entity/:id/:file_id", get(files::download))
        .route("/files/:entity/:id/:file_id", delete(files::delete))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
        .layer(cors_layer(cors_origin)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    Ok(router)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(target: "kinboard", event = "http_listening", addr = %addr);
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

mod auth;
mod error;
mod meals;
mod middleware;
mod nutrition;
mod summaries;
mod user;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{Router, middleware::from_fn, middleware::from_fn_with_state};
use chrono::{Local, NaiveDate};
use tower_http::limit::RequestBodyLimitLayer;

use nutricoach_core::catalog::FoodLookupProvider;
use nutricoach_core::db::Database;
use nutricoach_core::models::parse_date;

use error::ApiError;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

/// Runtime knobs for the HTTP server, filled from CLI flags and environment.
#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    pub session_days: i64,
    pub secure_cookies: bool,
    /// Configured social sign-in providers, listed by `/api/auth/providers`.
    pub social_providers: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            session_days: nutricoach_core::auth::DEFAULT_SESSION_DAYS,
            secure_cookies: false,
            social_providers: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    db: Arc<Mutex<Database>>,
    foods: Arc<dyn FoodLookupProvider>,
    settings: Arc<ServerSettings>,
}

impl AppState {
    pub(crate) fn new(
        db: Database,
        foods: Arc<dyn FoodLookupProvider>,
        settings: ServerSettings,
    ) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            foods,
            settings: Arc::new(settings),
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.settings.session_days)
    }
}

fn parse_date_param(s: &str) -> Result<NaiveDate, ApiError> {
    parse_date(s).map_err(|e| ApiError::invalid(&e))
}

fn optional_date(s: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    s.map(parse_date_param).transpose()
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(user::routes())
        .merge(meals::routes())
        .merge(nutrition::routes())
        .merge(summaries::routes())
        .fallback(not_found)
        .layer(from_fn(middleware::page_guard))
        .layer(from_fn_with_state(state.clone(), middleware::resolve_session))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(from_fn(middleware::security_headers))
        .with_state(state)
}

pub(crate) async fn start_server(state: AppState, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!("NutriCoach API listening on http://{addr}");
    if bind == "0.0.0.0" {
        tracing::warn!("listening on all interfaces; put TLS in front before exposing this");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}


#[cfg(test)]
mod tests {
    use axum::{body::Body, http::StatusCode};
    use tower::ServiceExt;

    use super::test_support::{send, test_state};
    use super::*;

    #[tokio::test]
    async fn test_unknown_api_route_is_json_404() {
        let app = build_router(test_state());
        let (status, body) = send(&app, "GET", "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not found");
    }

    #[tokio::test]
    async fn test_body_limit_rejects_oversized_payload() {
        let app = build_router(test_state());
        let oversized = "x".repeat(BODY_LIMIT + 1);
        let response = app
            .oneshot(
                axum::http::Request::post("/api/auth/check-password")
                    .header("content-type", "application/json")
                    .body(Body::from(format!("{{\"password\":\"{oversized}\"}}")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_parse_date_param_rejects_garbage() {
        assert!(parse_date_param("2024-02-30").is_err());
        assert_eq!(
            parse_date_param("2024-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}

//! HTTP surface. Handlers validate input, delegate to the identity store and
//! turn every outcome into a response; nothing escapes the request boundary.
use crate::access;
use crate::errors::{AuthError, StoreError};
use crate::expiry::Expiry;
use crate::scopes::Grant;
use crate::settings::Settings;
use crate::storage::{IdentityStore, User};
use crate::validate;
use axum::body::Body;
use axum::extract::{MatchedPath, Path, Query, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use miette::IntoDiagnostic;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use thiserror::Error;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: IdentityStore,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(&'static str),

    /// Reported like a malformed request so callers cannot probe which
    /// identifiers exist.
    #[error("Unknown user")]
    UnknownUser,

    #[error(transparent)]
    Unauthorized(AuthError),

    #[error(transparent)]
    Internal(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => ApiError::UnknownUser,
            other => ApiError::Internal(other),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::UserNotFound => ApiError::UnknownUser,
            AuthError::Store(e) => ApiError::from(e),
            denied => ApiError::Unauthorized(denied),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({"error": "invalid_request", "error_description": msg}),
            ),
            ApiError::UnknownUser => (
                StatusCode::BAD_REQUEST,
                json!({"error": "invalid_request", "error_description": "unknown user"}),
            ),
            ApiError::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "unauthorized", "error_description": "scope not granted or expired"}),
            ),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Storage failure while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "internal_error"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

// Responses carry bearer identifiers; keep them out of caches and sniffers.
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/create-user", post(create_user))
        .route("/users", get(list_users))
        .route("/users/expired", get(list_expired_users))
        .route("/healthz", get(health))
        .route("/{id}", get(get_user))
        .route("/{id}/authenticate", get(authenticate))
        .route("/{id}/update-scope", post(update_scope))
        .route("/{id}/remove-scope", post(remove_scope))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span keyed by the route template. The raw URI carries the bearer
/// identifier and stays out of logs.
fn request_span(request: &Request<Body>) -> tracing::Span {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(MatchedPath::as_str)
        .unwrap_or("unmatched");
    tracing::info_span!("request", method = %request.method(), route)
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn serve(settings: &Settings, store: IdentityStore) -> miette::Result<()> {
    let listener = tokio::net::TcpListener::bind(settings.listen_addr())
        .await
        .into_diagnostic()?;
    let addr = listener.local_addr().into_diagnostic()?;
    tracing::info!(%addr, "Public API listening");
    tracing::warn!("GET /users is unauthenticated; restrict it at the reverse proxy in production");

    axum::serve(listener, router(AppState { store }))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    tracing::info!("Public API stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[derive(Debug, Deserialize)]
struct CreateUserQuery {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopeQuery {
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateScopeQuery {
    scope: Option<String>,
    expires_in: Option<String>,
}

fn require_scope(scope: Option<String>) -> Result<String, ApiError> {
    scope
        .filter(|s| validate::is_valid_scope(s))
        .ok_or(ApiError::Validation(
            "scope must be 1-39 letters, hyphens or underscores",
        ))
}

async fn create_user(
    State(state): State<AppState>,
    Query(q): Query<CreateUserQuery>,
) -> Result<(StatusCode, String), ApiError> {
    let name = q
        .name
        .filter(|n| validate::is_valid_user_name(n))
        .ok_or(ApiError::Validation(
            "name must be 1-39 letters, digits, underscores or spaces",
        ))?;

    let user = state.store.register_user(&name, &[]).await?;
    tracing::info!(%name, "Created user");
    Ok((StatusCode::CREATED, user.id))
}

async fn authenticate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ScopeQuery>,
) -> Result<&'static str, ApiError> {
    let scope = require_scope(q.scope)?;

    match access::authenticate(&state.store, &id, &scope, Utc::now()).await {
        Ok(_) => Ok("Authenticated"),
        Err(e) => {
            tracing::debug!(error = %e, %scope, "Authentication refused");
            Err(e.into())
        }
    }
}

async fn update_scope(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<UpdateScopeQuery>,
) -> Result<String, ApiError> {
    let scope = require_scope(q.scope)?;
    let days = match q.expires_in.as_deref() {
        None => NonZeroU32::MIN,
        Some(raw) => validate::parse_days(raw)
            .ok_or(ApiError::Validation("expires_in must be a positive integer"))?,
    };

    let expires_at = Expiry::Days(days).resolve();
    state
        .store
        .replace_scopes(&id, &[Grant::new(scope.clone(), expires_at)])
        .await?;

    tracing::info!(%scope, days = days.get(), %expires_at, "Scope updated");
    Ok(id)
}

async fn remove_scope(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ScopeQuery>,
) -> Result<String, ApiError> {
    let scope = require_scope(q.scope)?;
    let removed = state.store.remove_scopes(&id, [&scope]).await?;
    tracing::info!(%scope, removed, "Scope removed");
    Ok(id)
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.store.get_user(&id).await?))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.store.list_users().await?))
}

async fn list_expired_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(
        state
            .store
            .find_users_with_expired_scopes(Utc::now())
            .await?,
    ))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

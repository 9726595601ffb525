use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

use nutricoach_core::auth::{self as core_auth, IssuedSession, SignUp, password_issues};
use nutricoach_core::models::{Session, SessionContext, User, validate_email};

use super::AppState;
use super::error::ApiError;
use super::middleware::{AuthUser, SESSION_COOKIE, client_info, session_token};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/sign-up", post(sign_up))
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/session", get(get_session))
        .route("/api/auth/sign-out", post(sign_out))
        .route("/api/auth/account", delete(delete_account))
        .route("/api/auth/check-email", get(check_email))
        .route("/api/auth/check-password", post(check_password))
        .route("/api/auth/providers", get(list_providers))
        .route("/api/auth/password", put(change_password))
        .route("/api/auth/email", put(change_email))
        .route("/api/auth/callback/{provider}", get(social_callback))
}

#[derive(Deserialize)]
struct SignUpRequest {
    email: String,
    password: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct SignInRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct SessionResponse {
    /// Raw token for clients that send `Authorization: Bearer` instead of the cookie.
    token: String,
    session: Session,
    user: User,
}

#[derive(Deserialize)]
struct CheckEmailQuery {
    email: String,
}

#[derive(Deserialize)]
struct CheckPasswordRequest {
    password: String,
}

#[derive(Serialize)]
struct Provider {
    id: String,
    kind: &'static str,
}

fn session_cookie(state: &AppState, value: &str, max_age: i64) -> Result<HeaderValue, ApiError> {
    let secure = if state.settings.secure_cookies {
        "; Secure"
    } else {
        ""
    };
    let cookie =
        format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}");
    HeaderValue::from_str(&cookie)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("invalid session cookie: {e}")))
}

fn issued_response(
    state: &AppState,
    status: StatusCode,
    issued: IssuedSession,
) -> Result<Response, ApiError> {
    let cookie = session_cookie(state, &issued.token, state.session_ttl().num_seconds())?;
    let body = SessionResponse {
        token: issued.token,
        session: issued.session,
        user: issued.user,
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

fn cleared_response(state: &AppState) -> Result<Response, ApiError> {
    let cookie = session_cookie(state, "", 0)?;
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": true })),
    )
        .into_response())
}

/// Run argon2 work on the blocking pool. Callers must not hold the DB lock.
async fn password_work<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password task failed: {e}")))
}

async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SignUpRequest>,
) -> Result<Response, ApiError> {
    let client = client_info(&headers);
    let signup = SignUp {
        email: req.email,
        password: req.password,
        name: req.name,
    };
    let pending = core_auth::prepare_sign_up(&state.db(), &signup)?;
    let password = signup.password;
    let hash = password_work(move || core_auth::hash_password(&password)).await??;
    let issued =
        core_auth::finish_sign_up(&state.db(), pending, &hash, &client, state.session_ttl())?;
    issued_response(&state, StatusCode::CREATED, issued)
}

async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SignInRequest>,
) -> Result<Response, ApiError> {
    let client = client_info(&headers);
    let attempt = core_auth::begin_sign_in(&state.db(), &req.email)?;
    let password = req.password;
    let (attempt, verified) = password_work(move || {
        let verified = attempt.check(&password);
        (attempt, verified)
    })
    .await?;
    let issued = core_auth::finish_sign_in(
        &state.db(),
        attempt,
        verified,
        &client,
        state.session_ttl(),
    )?;
    issued_response(&state, StatusCode::OK, issued)
}

/// Public: returns `null` when there is no valid session.
async fn get_session(user: Option<AuthUser>) -> Json<Option<SessionContext>> {
    Json(user.map(|AuthUser(ctx)| ctx))
}

async fn sign_out(
    State(state): State<AppState>,
    _user: AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let client = client_info(&headers);
    if let Some(token) = session_token(&headers) {
        let db = state.db();
        core_auth::sign_out(&db, &token, &client)?;
    }
    cleared_response(&state)
}

async fn delete_account(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let client = client_info(&headers);
    let deleted = {
        let db = state.db();
        core_auth::delete_account(&db, &ctx.user, &client)?
    };
    if !deleted {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    cleared_response(&state)
}

async fn check_email(
    State(state): State<AppState>,
    Query(params): Query<CheckEmailQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = validate_email(&params.email).map_err(|e| ApiError::invalid(&e))?;
    let taken = state.db().email_exists(&email)?;
    Ok(Json(serde_json::json!({ "email": email, "available": !taken })))
}

async fn check_password(Json(req): Json<CheckPasswordRequest>) -> Json<serde_json::Value> {
    let issues = password_issues(&req.password);
    Json(serde_json::json!({ "valid": issues.is_empty(), "issues": issues }))
}

async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut providers = vec![Provider {
        id: "credential".to_string(),
        kind: "email",
    }];
    providers.extend(state.settings.social_providers.iter().map(|id| Provider {
        id: id.clone(),
        kind: "oauth",
    }));
    Json(serde_json::json!({ "providers": providers }))
}

async fn change_password(_user: AuthUser) -> ApiError {
    ApiError::NotImplemented("Password change is not implemented".to_string())
}

async fn change_email(_user: AuthUser) -> ApiError {
    ApiError::NotImplemented("Email change is not implemented".to_string())
}

async fn social_callback(Path(provider): Path<String>) -> ApiError {
    ApiError::NotImplemented(format!("Sign-in with '{provider}' is not implemented"))
}

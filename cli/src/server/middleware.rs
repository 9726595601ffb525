use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;

use nutricoach_core::auth;
use nutricoach_core::models::{ClientInfo, SessionContext};

use super::AppState;
use super::error::ApiError;

pub(crate) const SESSION_COOKIE: &str = "nutricoach.session_token";
pub(crate) const USER_ID_HEADER: &str = "x-user-id";

/// Page paths that need a signed-in user. Nested paths are covered too.
const PROTECTED_PAGES: &[&str] = &[
    "/dashboard",
    "/meals",
    "/goals",
    "/profile",
    "/summaries",
    "/settings",
    "/onboarding",
];
const AUTH_PAGES: &[&str] = &["/login", "/signup"];

/// The signed-in user for this request. Rejects with 401 when no valid session
/// was resolved.
pub(crate) struct AuthUser(pub SessionContext);

impl AuthUser {
    pub(crate) fn id(&self) -> &str {
        &self.0.user.id
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(ApiError::unauthorized)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for AuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<SessionContext>().cloned().map(AuthUser))
    }
}

/// Extract the raw session token. A bearer token wins over the cookie.
pub(crate) fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(crate) fn client_info(headers: &HeaderMap) -> ClientInfo {
    let ip_address = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string);

    ClientInfo {
        ip_address,
        user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_string),
    }
}

/// Resolve the caller's session and attach it to the request. Any
/// client-supplied `x-user-id` is discarded so handlers only ever see the
/// resolved identity.
pub(crate) async fn resolve_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    request.headers_mut().remove(USER_ID_HEADER);

    if let Some(token) = session_token(request.headers()) {
        let resolved = {
            let db = state.db();
            auth::resolve_session(&db, &token, Utc::now())
        };
        match resolved {
            Ok(Some(ctx)) => {
                if let Ok(value) = HeaderValue::from_str(&ctx.user.id) {
                    request.headers_mut().insert(USER_ID_HEADER, value);
                }
                request.extensions_mut().insert(ctx);
            }
            Ok(None) => {}
            Err(err) => return ApiError::Internal(err).into_response(),
        }
    }

    next.run(request).await
}

fn matches_page(path: &str, page: &str) -> bool {
    path.strip_prefix(page)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Redirect page navigation based on the resolved session. API routes are
/// left alone; they answer 401 themselves.
pub(crate) async fn page_guard(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if !path.starts_with("/api/") {
        let signed_in = request.extensions().get::<SessionContext>().is_some();

        if !signed_in && PROTECTED_PAGES.iter().any(|page| matches_page(path, page)) {
            let callback = request
                .uri()
                .path_and_query()
                .map_or(path, |pq| pq.as_str());
            let location = format!("/login?callbackUrl={}", percent_encode_component(callback));
            return Redirect::temporary(&location).into_response();
        }
        if signed_in && AUTH_PAGES.iter().any(|page| matches_page(path, page)) {
            return Redirect::temporary("/dashboard").into_response();
        }
    }

    next.run(request).await
}

pub(crate) async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    response
}

fn percent_encode_component(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push('%');
                encoded.push(char::from(HEX_CHARS[(byte >> 4) as usize]));
                encoded.push(char::from(HEX_CHARS[(byte & 0x0F) as usize]));
            }
        }
    }
    encoded
}

const HEX_CHARS: [u8; 16] = *b"0123456789ABCDEF";

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use crate::server::build_router;
    use crate::server::test_support::{send, signed_in_user, test_state};

    #[test]
    fn test_session_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("nutricoach.session_token=def"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn test_session_token_from_cookie_list() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; nutricoach.session_token=def; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("def"));

        let mut empty = HeaderMap::new();
        empty.insert(header::COOKIE, HeaderValue::from_static("nutricoach.session_token="));
        assert_eq!(session_token(&empty), None);
    }

    #[test]
    fn test_client_info_uses_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        let client = client_info(&headers);
        assert_eq!(client.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(client.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_matches_page() {
        assert!(matches_page("/dashboard", "/dashboard"));
        assert!(matches_page("/meals/42", "/meals"));
        assert!(!matches_page("/mealsplan", "/meals"));
    }

    #[test]
    fn test_percent_encode_component() {
        assert_eq!(percent_encode_component("/meals?date=2024-01-15"), "%2Fmeals%3Fdate%3D2024-01-15");
        assert_eq!(percent_encode_component("safe-_.~"), "safe-_.~");
    }

    #[tokio::test]
    async fn test_protected_page_redirects_to_login() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::get("/meals/7?tab=items")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/login?callbackUrl=%2Fmeals%2F7%3Ftab%3Ditems"
        );
    }

    #[tokio::test]
    async fn test_signed_in_user_leaves_login_page() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);
        let response = app
            .oneshot(
                axum::http::Request::get("/login")
                    .header(header::COOKIE, format!("{SESSION_COOKIE}={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/dashboard");
    }

    #[tokio::test]
    async fn test_anonymous_login_page_passes_through() {
        let app = build_router(test_state());
        let (status, _) = send(&app, "GET", "/login", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_route_without_session_is_401() {
        let app = build_router(test_state());
        let (status, body) = send(&app, "GET", "/api/meals", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Authentication required");
    }

    #[tokio::test]
    async fn test_invalid_token_is_401() {
        let app = build_router(test_state());
        let (status, _) = send(&app, "GET", "/api/user/profile", Some("not-a-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_client_user_id_header_is_ignored() {
        let state = test_state();
        let (victim, _) = signed_in_user(&state, "victim@example.com");
        let app = build_router(state);
        let response = app
            .oneshot(
                axum::http::Request::get("/api/user/profile")
                    .header(USER_ID_HEADER, victim.id.as_str())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::get("/api/auth/providers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn test_security_headers_on_unauthorized() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::get("/api/meals")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }
}

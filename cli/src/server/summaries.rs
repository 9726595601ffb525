use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
};
use serde::Deserialize;

use nutricoach_core::models::{DailySummary, SummaryStats};

use super::error::ApiError;
use super::middleware::AuthUser;
use super::{AppState, optional_date, parse_date_param, today};

const DEFAULT_LIST_LIMIT: i64 = 30;
const MAX_LIST_LIMIT: i64 = 365;
const DEFAULT_STATS_DAYS: i64 = 30;
const MAX_SUMMARY_TEXT_LEN: usize = 2000;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/summaries", get(list_summaries))
        .route("/api/summaries/stats", get(summary_stats))
        .route(
            "/api/summaries/{date}",
            get(get_summary).post(upsert_summary).delete(delete_summary),
        )
        .route("/api/summaries/{date}/text", put(update_summary_text))
}

#[derive(Deserialize)]
struct ListQuery {
    from: Option<String>,
    to: Option<String>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct StatsQuery {
    days: Option<i64>,
    end: Option<String>,
}

#[derive(Deserialize)]
struct SummaryTextRequest {
    summary_text: Option<String>,
}

fn summary_not_found(date: &str) -> ApiError {
    ApiError::NotFound(format!("No summary for {date}"))
}

async fn list_summaries(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<DailySummary>>, ApiError> {
    let from = optional_date(params.from.as_deref())?;
    let to = optional_date(params.to.as_deref())?;
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ApiError::BadRequest(format!(
                "from ({from}) must not be after to ({to})"
            )));
        }
    }
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }

    let summaries = state.db().list_daily_summaries(user.id(), from, to, limit)?;
    Ok(Json(summaries))
}

async fn summary_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<StatsQuery>,
) -> Result<Json<SummaryStats>, ApiError> {
    let days = params.days.unwrap_or(DEFAULT_STATS_DAYS);
    if !(1..=MAX_LIST_LIMIT).contains(&days) {
        return Err(ApiError::BadRequest(format!(
            "days must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }
    let end = optional_date(params.end.as_deref())?.unwrap_or_else(today);

    let stats = state.db().summary_stats(user.id(), end, days)?;
    Ok(Json(stats))
}

async fn get_summary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(date_str): Path<String>,
) -> Result<Json<DailySummary>, ApiError> {
    let date = parse_date_param(&date_str)?;
    let summary = state.db().get_daily_summary(user.id(), date)?;
    summary
        .map(Json)
        .ok_or_else(|| summary_not_found(&date_str))
}

/// Recompute the snapshot from the day's meals.
async fn upsert_summary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(date_str): Path<String>,
) -> Result<Json<DailySummary>, ApiError> {
    let date = parse_date_param(&date_str)?;
    let summary = state.db().upsert_daily_summary(user.id(), date)?;
    Ok(Json(summary))
}

async fn delete_summary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(date_str): Path<String>,
) -> Result<StatusCode, ApiError> {
    let date = parse_date_param(&date_str)?;
    if state.db().delete_daily_summary(user.id(), date)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(summary_not_found(&date_str))
    }
}

async fn update_summary_text(
    State(state): State<AppState>,
    user: AuthUser,
    Path(date_str): Path<String>,
    Json(req): Json<SummaryTextRequest>,
) -> Result<Json<DailySummary>, ApiError> {
    let date = parse_date_param(&date_str)?;
    let text = req
        .summary_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if text.is_some_and(|t| t.chars().count() > MAX_SUMMARY_TEXT_LEN) {
        return Err(ApiError::BadRequest(format!(
            "summary_text must be at most {MAX_SUMMARY_TEXT_LEN} characters"
        )));
    }

    let summary = state.db().update_summary_text(user.id(), date, text)?;
    summary
        .map(Json)
        .ok_or_else(|| summary_not_found(&date_str))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::server::build_router;
    use crate::server::test_support::{send, signed_in_user, test_state};

    fn meal_on(date: &str, calories: f64) -> serde_json::Value {
        json!({
            "name": "Meal",
            "logged_at": format!("{date}T12:00:00Z"),
            "food_items": [{ "name": "Food", "quantity": 1, "calories": calories, "protein": 10 }]
        })
    }

    #[tokio::test]
    async fn test_upsert_without_meals_is_zeroed() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, body) = send(&app, "POST", "/api/summaries/2024-02-01", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meal_count"], 0);
        assert_eq!(body["date"], "2024-02-01");
        for field in ["calories", "protein", "carbs", "fat", "fiber", "sugar", "sodium"] {
            assert_eq!(body["totals"][field], 0.0, "{field}");
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_is_identical() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (_, meal) = send(&app, "POST", "/api/meals", Some(&token), Some(meal_on("2024-02-01", 500.0))).await;
        let date = meal["log_date"].as_str().unwrap().to_string();

        let uri = format!("/api/summaries/{date}");
        let (_, first) = send(&app, "POST", &uri, Some(&token), None).await;
        let (_, second) = send(&app, "POST", &uri, Some(&token), None).await;
        assert_eq!(first, second);
        assert_eq!(first["meal_count"], 1);

        let (_, listed) = send(&app, "GET", "/api/summaries", Some(&token), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_follows_meal_deletion() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (_, meal) = send(&app, "POST", "/api/meals", Some(&token), Some(meal_on("2024-02-01", 500.0))).await;
        let date = meal["log_date"].as_str().unwrap().to_string();
        let id = meal["id"].as_i64().unwrap();

        let (status, summary) = send(&app, "GET", &format!("/api/summaries/{date}"), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["totals"]["calories"], 500.0);

        send(&app, "DELETE", &format!("/api/meals/{id}"), Some(&token), None).await;
        let (_, summary) = send(&app, "GET", &format!("/api/summaries/{date}"), Some(&token), None).await;
        assert_eq!(summary["meal_count"], 0);
        assert_eq!(summary["totals"]["calories"], 0.0);
    }

    #[tokio::test]
    async fn test_missing_summary_and_bad_date() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, body) = send(&app, "GET", "/api/summaries/2024-02-01", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No summary for 2024-02-01");

        let (status, body) = send(&app, "GET", "/api/summaries/02-01-2024", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid date '02-01-2024'. Use YYYY-MM-DD");

        let (status, _) = send(&app, "DELETE", "/api/summaries/2024-02-01", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_summary_text_set_and_clear() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/summaries/2024-02-01/text",
            Some(&token),
            Some(json!({ "summary_text": "Good day" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&app, "POST", "/api/summaries/2024-02-01", Some(&token), None).await;
        let (status, body) = send(
            &app,
            "PUT",
            "/api/summaries/2024-02-01/text",
            Some(&token),
            Some(json!({ "summary_text": "Good day" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary_text"], "Good day");

        let (_, body) = send(
            &app,
            "PUT",
            "/api/summaries/2024-02-01/text",
            Some(&token),
            Some(json!({ "summary_text": null })),
        )
        .await;
        assert!(body.get("summary_text").is_none());

        let (status, _) = send(&app, "DELETE", "/api/summaries/2024-02-01", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_list_range_and_stats() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        for date in ["2024-02-01", "2024-02-02", "2024-02-03"] {
            send(&app, "POST", &format!("/api/summaries/{date}"), Some(&token), None).await;
        }
        let (_, listed) = send(&app, "GET", "/api/summaries?from=2024-02-02&to=2024-02-03", Some(&token), None).await;
        let dates: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["date"].as_str().unwrap())
            .collect();
        assert_eq!(dates, vec!["2024-02-03", "2024-02-02"]);

        let (status, _) = send(&app, "GET", "/api/summaries?from=2024-02-03&to=2024-02-01", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, stats) = send(&app, "GET", "/api/summaries/stats?days=7&end=2024-02-03", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["days"], 7);
        assert_eq!(stats["days_logged"], 0);
        assert_eq!(stats["average_calories"], 0.0);

        let (status, _) = send(&app, "GET", "/api/summaries/stats?days=0", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_summaries_are_per_user() {
        let state = test_state();
        let (_, ana) = signed_in_user(&state, "ana@example.com");
        let (_, ben) = signed_in_user(&state, "ben@example.com");
        let app = build_router(state);

        send(&app, "POST", "/api/summaries/2024-02-01", Some(&ana), None).await;
        let (status, _) = send(&app, "GET", "/api/summaries/2024-02-01", Some(&ben), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, listed) = send(&app, "GET", "/api/summaries", Some(&ben), None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn test_stats_and_list_reject_malformed_and_extreme_dates() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        for bad in ["-262143-01-01", "262143-01-01", "%2B10000-01-01", "2024-02-30", "20240201"] {
            for uri in [
                format!("/api/summaries/stats?end={bad}"),
                format!("/api/summaries/stats?days=365&end={bad}"),
                format!("/api/summaries?from={bad}"),
                format!("/api/summaries?to={bad}"),
            ] {
                let (status, body) = send(&app, "GET", &uri, Some(&token), None).await;
                assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
                assert!(body["error"].as_str().unwrap().starts_with("Invalid date"));
            }
        }

        let (status, stats) = send(&app, "GET", "/api/summaries/stats?days=365&end=0000-01-01", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["days_logged"], 0);
    }
}

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use nutricoach_core::models::{
    Goal, GoalType, NewGoal, NewWeightEntry, Profile, ProfileUpdate, WeightEntry,
    validate_new_goal, validate_new_weight_entry, validate_profile_update,
};

use super::error::ApiError;
use super::middleware::AuthUser;
use super::{AppState, optional_date, today};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/user/profile", get(get_profile).put(update_profile))
        .route("/api/user/goals", get(list_goals).post(create_goal))
        .route("/api/user/goals/active", get(get_active_goal))
        .route("/api/user/weight", get(weight_history).post(log_weight))
}

#[derive(Deserialize)]
struct CreateGoalRequest {
    goal_type: String,
    target_weight_kg: Option<f64>,
    daily_calories: Option<i64>,
    protein_g: Option<f64>,
    carbs_g: Option<f64>,
    fat_g: Option<f64>,
    target_date: Option<String>,
}

#[derive(Deserialize)]
struct LogWeightRequest {
    date: Option<String>,
    weight_kg: f64,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct WeightHistoryQuery {
    limit: Option<i64>,
}

async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Profile>, ApiError> {
    let profile = state.db().get_profile(user.id())?;
    profile
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Profile not found".to_string()))
}

async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<Profile>, ApiError> {
    validate_profile_update(&update).map_err(|e| ApiError::invalid(&e))?;
    let profile = state.db().update_profile(user.id(), &update)?;
    Ok(Json(profile))
}

async fn list_goals(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Goal>>, ApiError> {
    let goals = state.db().list_goals(user.id())?;
    Ok(Json(goals))
}

async fn create_goal(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateGoalRequest>,
) -> Result<(StatusCode, Json<Goal>), ApiError> {
    let goal = NewGoal {
        goal_type: GoalType::parse(&req.goal_type).map_err(|e| ApiError::invalid(&e))?,
        target_weight_kg: req.target_weight_kg,
        daily_calories: req.daily_calories,
        protein_g: req.protein_g,
        carbs_g: req.carbs_g,
        fat_g: req.fat_g,
        target_date: optional_date(req.target_date.as_deref())?,
    };
    validate_new_goal(&goal).map_err(|e| ApiError::invalid(&e))?;

    let created = state.db().create_goal(user.id(), &goal)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `null` when the user has no active goal.
async fn get_active_goal(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Option<Goal>>, ApiError> {
    let goal = state.db().get_active_goal(user.id())?;
    Ok(Json(goal))
}

async fn log_weight(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<LogWeightRequest>,
) -> Result<(StatusCode, Json<WeightEntry>), ApiError> {
    let entry = NewWeightEntry {
        date: optional_date(req.date.as_deref())?.unwrap_or_else(today),
        weight_kg: req.weight_kg,
        notes: req.notes,
    };
    validate_new_weight_entry(&entry).map_err(|e| ApiError::invalid(&e))?;

    let saved = state.db().log_weight(user.id(), &entry)?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn weight_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<WeightHistoryQuery>,
) -> Result<Json<Vec<WeightEntry>>, ApiError> {
    if params.limit.is_some_and(|l| !(1..=1000).contains(&l)) {
        return Err(ApiError::BadRequest(
            "limit must be between 1 and 1000".to_string(),
        ));
    }
    let entries = state.db().get_weight_history(user.id(), params.limit)?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::server::build_router;
    use crate::server::test_support::{send, signed_in_user, test_state};

    #[tokio::test]
    async fn test_profile_defaults_then_update() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, body) = send(&app, "GET", "/api/user/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "ana");
        assert!(body["age"].is_null());

        let update = json!({ "age": 34, "sex": "female", "height_cm": 168, "activity_level": "light" });
        let (status, body) = send(&app, "PUT", "/api/user/profile", Some(&token), Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["age"], 34);
        assert_eq!(body["activity_level"], "light");
        assert_eq!(body["name"], "ana");
    }

    #[tokio::test]
    async fn test_profile_update_validation() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, body) = send(&app, "PUT", "/api/user/profile", Some(&token), Some(json!({ "age": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "age must be between 1 and 130");

        let (status, _) = send(
            &app,
            "PUT",
            "/api/user/profile",
            Some(&token),
            Some(json!({ "activity_level": "couch" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_no_goals_is_empty_not_error() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, body) = send(&app, "GET", "/api/user/goals", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, body) = send(&app, "GET", "/api/user/goals/active", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn test_new_goal_replaces_active_goal() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let first = json!({ "goal_type": "lose_weight", "daily_calories": 1800 });
        let (status, _) = send(&app, "POST", "/api/user/goals", Some(&token), Some(first)).await;
        assert_eq!(status, StatusCode::CREATED);
        let second = json!({ "goal_type": "build_muscle", "daily_calories": 2600, "target_date": "2025-06-01" });
        let (status, created) = send(&app, "POST", "/api/user/goals", Some(&token), Some(second)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["is_active"], true);

        let (_, goals) = send(&app, "GET", "/api/user/goals", Some(&token), None).await;
        let active: Vec<_> = goals
            .as_array()
            .unwrap()
            .iter()
            .filter(|g| g["is_active"] == true)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["goal_type"], "build_muscle");

        let (_, active) = send(&app, "GET", "/api/user/goals/active", Some(&token), None).await;
        assert_eq!(active["daily_calories"], 2600);
    }

    #[tokio::test]
    async fn test_goal_validation() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, _) = send(&app, "POST", "/api/user/goals", Some(&token), Some(json!({ "goal_type": "bulk" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            "POST",
            "/api/user/goals",
            Some(&token),
            Some(json!({ "goal_type": "maintain", "daily_calories": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            "POST",
            "/api/user/goals",
            Some(&token),
            Some(json!({ "goal_type": "maintain", "target_date": "soon" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_weight_log_upserts_and_updates_profile() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, _) = send(
            &app,
            "POST",
            "/api/user/weight",
            Some(&token),
            Some(json!({ "date": "2024-03-01", "weight_kg": 72.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, entry) = send(
            &app,
            "POST",
            "/api/user/weight",
            Some(&token),
            Some(json!({ "date": "2024-03-01", "weight_kg": 71.5, "notes": "after run" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(entry["weight_kg"], 71.5);

        let (_, history) = send(&app, "GET", "/api/user/weight?limit=10", Some(&token), None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["notes"], "after run");

        let (_, profile) = send(&app, "GET", "/api/user/profile", Some(&token), None).await;
        assert_eq!(profile["weight_kg"], 71.5);
    }

    #[tokio::test]
    async fn test_weight_rejects_non_positive() {
        let state = test_state();
        let (_, token) = signed_in_user(&state, "ana@example.com");
        let app = build_router(state);

        let (status, _) = send(&app, "POST", "/api/user/weight", Some(&token), Some(json!({ "weight_kg": -3 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, "GET", "/api/user/weight?limit=0", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_profile_is_scoped_to_session_user() {
        let state = test_state();
        let (_, ana) = signed_in_user(&state, "ana@example.com");
        let (ben_user, _) = signed_in_user(&state, "ben@example.com");
        let app = build_router(state);

        let response = tower::ServiceExt::oneshot(
            app,
            axum::http::Request::get("/api/user/profile")
                .header("authorization", format!("Bearer {ana}"))
                .header("x-user-id", ben_user.id.as_str())
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["email"], "ana@example.com");
    }
}

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;

use nutricoach_core::models::{
    FoodSuggestion, GoalType, MacroDistribution, MealAnalysis, Recommendation,
};
use nutricoach_core::nutrition::{RecommendationInput, default_split, macro_distribution, recommend};

use super::AppState;
use super::error::ApiError;
use super::middleware::AuthUser;

const MAX_DESCRIPTION_LEN: usize = 2000;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/nutrition/foods/search", get(search_foods))
        .route("/api/nutrition/foods/{id}", get(get_food))
        .route("/api/nutrition/analyze", post(analyze_meal))
        .route("/api/nutrition/recommendations", post(recommendations))
        .route("/api/nutrition/macro-distribution", post(distribution))
}

#[derive(Deserialize)]
struct FoodSearchQuery {
    q: String,
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    description: String,
}

/// Any field left out is taken from the stored profile and active goal.
#[derive(Deserialize, Default)]
#[serde(default)]
struct RecommendationRequest {
    age: Option<i64>,
    sex: Option<String>,
    height_cm: Option<f64>,
    weight_kg: Option<f64>,
    activity_level: Option<String>,
    goal_type: Option<String>,
}

#[derive(Deserialize)]
struct DistributionRequest {
    calories: f64,
    protein_pct: Option<i64>,
    carbs_pct: Option<i64>,
    fat_pct: Option<i64>,
    goal_type: Option<String>,
}

fn missing(field: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Missing {field}: set it on the profile or include it in the request"
    ))
}

fn parse_goal_type(s: &str) -> Result<GoalType, ApiError> {
    GoalType::parse(s).map_err(|e| ApiError::invalid(&e))
}

async fn search_foods(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<FoodSearchQuery>,
) -> Result<Json<Vec<FoodSuggestion>>, ApiError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest(
            "Search query must not be empty".to_string(),
        ));
    }
    let foods = state.foods.search(query)?;
    Ok(Json(foods))
}

async fn get_food(_user: AuthUser, Path(id): Path<String>) -> ApiError {
    ApiError::NotImplemented(format!("Food details for '{id}' are not implemented"))
}

async fn analyze_meal(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<MealAnalysis>, ApiError> {
    let description = req.description.trim();
    if description.is_empty() {
        return Err(ApiError::BadRequest(
            "Meal description must not be empty".to_string(),
        ));
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ApiError::BadRequest(format!(
            "Meal description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    let analysis = state.foods.analyze(description)?;
    Ok(Json(analysis))
}

async fn recommendations(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<RecommendationRequest>,
) -> Result<Json<Recommendation>, ApiError> {
    let (profile, goal) = {
        let db = state.db();
        (db.get_profile(user.id())?, db.get_active_goal(user.id())?)
    };

    let goal_type = match req.goal_type.as_deref() {
        Some(s) => parse_goal_type(s)?,
        None => goal.map_or(GoalType::Maintain, |g| g.goal_type),
    };
    let input = RecommendationInput {
        age: req
            .age
            .or_else(|| profile.as_ref().and_then(|p| p.age))
            .ok_or_else(|| missing("age"))?,
        sex: req
            .sex
            .or_else(|| profile.as_ref().and_then(|p| p.sex.clone()))
            .ok_or_else(|| missing("sex"))?,
        height_cm: req
            .height_cm
            .or_else(|| profile.as_ref().and_then(|p| p.height_cm))
            .ok_or_else(|| missing("height_cm"))?,
        weight_kg: req
            .weight_kg
            .or_else(|| profile.as_ref().and_then(|p| p.weight_kg))
            .ok_or_else(|| missing("weight_kg"))?,
        activity_level: req
            .activity_level
            .or_else(|| profile.as_ref().and_then(|p| p.activity_level.clone()))
            .ok_or_else(|| missing("activity_level"))?,
        goal_type,
    };

    let recommendation = recommend(&input).map_err(|e| ApiError::invalid(&e))?;
    Ok(Json(recommendation))
}

async fn distribution(
    _user: AuthUser,
    Json(req): Json<DistributionRequest>,
) -> Result<Json<MacroDistribution>, ApiError> {
    let (protein, carbs, fat) = match (req.protein_pct, req.carbs_pct, req.fat_pct) {
        (Some(p), Some(c), Some(f)) => (p, c, f),
        (None, None, None) => {
            let goal_type = match req.goal_type.as_deref() {
                Some(s) => parse_goal_type(s)?,
                None => GoalType::Maintain,
            };
            default_split(goal_type)
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Provide all three of protein_pct, carbs_pct and fat_pct, or none".to_string(),
            ));
        }
    };

    let macros =
        macro_distribution(req.calories, protein, carbs, fat).map_err(|e| ApiError::invalid(&e))?;
    Ok(Json(macros))
}

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer};

use nutricoach_core::models::{
    DailyStats, Meal, NewFoodItem, NewMeal, UpdateMeal, validate_new_meal, validate_update_meal,
};

use super::error::ApiError;
use super::middleware::AuthUser;
use super::{AppState, optional_date, today};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_SEARCH_LIMIT: i64 = 20;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/meals", get(list_meals).post(create_meal))
        .route("/api/meals/search", get(search_meals))
        .route("/api/meals/daily-stats", get(daily_stats))
        .route("/api/meals/weekly-stats", get(weekly_stats))
        .route(
            "/api/meals/{id}",
            get(get_meal).put(update_meal).delete(delete_meal),
        )
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn default_source() -> String {
    "manual".to_string()
}

#[derive(Deserialize)]
struct CreateMealRequest {
    name: String,
    meal_type: Option<String>,
    description: Option<String>,
    #[serde(default = "default_source")]
    source: String,
    logged_at: Option<String>,
    #[serde(default)]
    food_items: Vec<NewFoodItem>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateMealRequest {
    name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    meal_type: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    description: Option<Option<String>>,
    logged_at: Option<String>,
    food_items: Option<Vec<NewFoodItem>>,
}

#[derive(Deserialize)]
struct ListQuery {
    date: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct WeekQuery {
    end: Option<String>,
}

fn parse_logged_at(s: &str) -> Result<DateTime<Local>, ApiError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|_| {
            ApiError::BadRequest(format!(
                "Invalid logged_at '{s}'. Use an RFC 3339 timestamp like 2024-01-15T12:30:00Z"
            ))
        })
}

fn page_size(limit: Option<i64>, default: i64) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(default);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(limit)
}

fn meal_not_found() -> ApiError {
    ApiError::NotFound("Meal not found".to_string())
}

async fn list_meals(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<Meal>>, ApiError> {
    let date = optional_date(params.date.as_deref())?;
    let limit = page_size(params.limit, DEFAULT_PAGE_SIZE)?;
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::BadRequest("offset must not be negative".to_string()));
    }

    let meals = state.db().list_meals(user.id(), date, limit, offset)?;
    Ok(Json(meals))
}

async fn create_meal(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateMealRequest>,
) -> Result<(StatusCode, Json<Meal>), ApiError> {
    let logged_at = match req.logged_at.as_deref() {
        Some(s) => parse_logged_at(s)?,
        None => Local::now(),
    };
    let meal = NewMeal {
        name: req.name,
        meal_type: req.meal_type,
        description: req.description,
        source: req.source,
        logged_at,
        food_items: req.food_items,
    };
    validate_new_meal(&meal).map_err(|e| ApiError::invalid(&e))?;

    let created = state.db().create_meal(user.id(), &meal)?;
    tracing::debug!(meal_id = created.id, items = created.food_items.len(), "meal created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_meal(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Meal>, ApiError> {
    let meal = state.db().get_meal(user.id(), id)?;
    meal.map(Json).ok_or_else(meal_not_found)
}

async fn update_meal(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMealRequest>,
) -> Result<Json<Meal>, ApiError> {
    let update = UpdateMeal {
        name: req.name,
        meal_type: req.meal_type,
        description: req.description,
        logged_at: req.logged_at.as_deref().map(parse_logged_at).transpose()?,
        food_items: req.food_items,
    };
    validate_update_meal(&update).map_err(|e| ApiError::invalid(&e))?;

    let meal = state.db().update_meal(user.id(), id, &update)?;
    meal.map(Json).ok_or_else(meal_not_found)
}

async fn delete_meal(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db().delete_meal(user.id(), id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(meal_not_found())
    }
}

async fn search_meals(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<Meal>>, ApiError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest(
            "Search query must not be empty".to_string(),
        ));
    }
    let limit = page_size(params.limit, DEFAULT_SEARCH_LIMIT)?;

    let meals = state.db().search_meals(user.id(), query, limit)?;
    Ok(Json(meals))
}

async fn daily_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<DateQuery>,
) -> Result<Json<DailyStats>, ApiError> {
    let date = optional_date(params.date.as_deref())?.unwrap_or_else(today);
    let stats = state.db().daily_stats(user.id(), date)?;
    Ok(Json(stats))
}

async fn weekly_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<WeekQuery>,
) -> Result<Json<Vec<DailyStats>>, ApiError> {
    let end = optional_date(params.end.as_deref())?.unwrap_or_else(today);
    let stats = state.db().weekly_stats(user.id(), end)?;
    Ok(Json(stats))
}

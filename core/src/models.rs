use anyhow::{Result, bail};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

// --- Nutrients ---

/// Per-item nutrient values. Every field is optional; missing values count as zero
/// when aggregated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiber: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sugar: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sodium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potassium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calcium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iron: Option<f64>,
}

impl Nutrients {
    /// Field name / value pairs, in column order.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, Option<f64>); 10] {
        [
            ("calories", self.calories),
            ("protein", self.protein),
            ("carbs", self.carbs),
            ("fat", self.fat),
            ("fiber", self.fiber),
            ("sugar", self.sugar),
            ("sodium", self.sodium),
            ("potassium", self.potassium),
            ("calcium", self.calcium),
            ("iron", self.iron),
        ]
    }
}

/// Fully-resolved nutrient sums (meal totals, daily totals).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub sodium: f64,
    pub potassium: f64,
    pub calcium: f64,
    pub iron: f64,
}

// --- Users & sessions ---

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: String,
}

/// A resolved session together with its owner. Handlers scope every query by
/// `user.id`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    pub session: Session,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

/// A one-time value tied to an identifier such as an email address.
#[derive(Debug, Clone)]
pub struct Verification {
    pub id: String,
    pub identifier: String,
    pub value: String,
    pub expires_at: String,
    pub created_at: String,
}

/// Client metadata captured at sign-in / sign-up.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

// --- Profile ---

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub age: Option<i64>,
    pub sex: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub activity_level: Option<String>,
    pub dietary_preferences: Vec<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub sex: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub activity_level: Option<String>,
    pub dietary_preferences: Option<Vec<String>>,
}

pub const ACTIVITY_LEVELS: &[&str] = &["sedentary", "light", "moderate", "active", "very_active"];

pub const SEXES: &[&str] = &["male", "female"];

// --- Goals ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    LoseWeight,
    Maintain,
    GainWeight,
    BuildMuscle,
}

impl GoalType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoseWeight => "lose_weight",
            Self::Maintain => "maintain",
            Self::GainWeight => "gain_weight",
            Self::BuildMuscle => "build_muscle",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lose_weight" => Ok(Self::LoseWeight),
            "maintain" => Ok(Self::Maintain),
            "gain_weight" => Ok(Self::GainWeight),
            "build_muscle" => Ok(Self::BuildMuscle),
            _ => bail!(
                "Invalid goal type '{s}'. Must be one of: lose_weight, maintain, gain_weight, build_muscle"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Goal {
    pub id: i64,
    pub user_id: String,
    pub goal_type: GoalType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_weight_kg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_calories: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fat_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewGoal {
    pub goal_type: GoalType,
    pub target_weight_kg: Option<f64>,
    pub daily_calories: Option<i64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub target_date: Option<NaiveDate>,
}

// --- Meals ---

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];

pub const MEAL_SOURCES: &[&str] = &["manual", "ai"];

const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct FoodItem {
    pub id: i64,
    pub meal_id: i64,
    pub name: String,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub nutrients: Nutrients,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFoodItem {
    pub name: String,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub nutrients: Nutrients,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meal {
    pub id: i64,
    pub uuid: String,
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meal_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: String,
    pub logged_at: String,
    pub log_date: String,
    pub totals: NutrientTotals,
    pub food_items: Vec<FoodItem>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMeal {
    pub name: String,
    pub meal_type: Option<String>,
    pub description: Option<String>,
    pub source: String,
    pub logged_at: DateTime<Local>,
    pub food_items: Vec<NewFoodItem>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateMeal {
    pub name: Option<String>,
    pub meal_type: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub logged_at: Option<DateTime<Local>>,
    pub food_items: Option<Vec<NewFoodItem>>,
}

impl UpdateMeal {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.meal_type.is_none()
            && self.description.is_none()
            && self.logged_at.is_none()
            && self.food_items.is_none()
    }
}

// --- Stats & summaries ---

/// Live aggregate over a user's meals for one calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub date: String,
    pub totals: NutrientTotals,
    pub meal_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calorie_target: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories_remaining: Option<f64>,
}

/// Persisted per-day snapshot, keyed by (user, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub id: i64,
    pub user_id: String,
    pub date: String,
    pub totals: NutrientTotals,
    pub meal_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    pub days: i64,
    pub days_logged: i64,
    pub total_meals: i64,
    pub average_calories: f64,
    pub average_protein: f64,
    pub average_carbs: f64,
    pub average_fat: f64,
    pub logging_streak: i64,
}

// --- Weight tracking ---

#[derive(Debug, Clone, Serialize)]
pub struct WeightEntry {
    pub id: i64,
    pub uuid: String,
    pub date: NaiveDate,
    pub weight_kg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewWeightEntry {
    pub date: NaiveDate,
    pub weight_kg: f64,
    pub notes: Option<String>,
}

// --- Nutrition helpers ---

#[derive(Debug, Clone, Serialize)]
pub struct FoodSuggestion {
    pub id: String,
    pub name: String,
    pub serving_size: f64,
    pub serving_unit: String,
    #[serde(flatten)]
    pub nutrients: Nutrients,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealAnalysis {
    pub description: String,
    pub food_items: Vec<NewFoodItem>,
    pub totals: NutrientTotals,
    pub confidence: f64,
    pub unmatched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroDistribution {
    pub calories: f64,
    pub protein_pct: i64,
    pub carbs_pct: i64,
    pub fat_pct: i64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub goal_type: GoalType,
    pub bmr: f64,
    pub tdee: f64,
    pub daily_calories: i64,
    pub macros: MacroDistribution,
}

// --- Validation ---

pub fn validate_meal_type(meal: &str) -> Result<String> {
    let lower = meal.to_lowercase();
    if MEAL_TYPES.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        )
    }
}

pub fn validate_meal_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("Meal name must not be empty");
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        bail!("Meal name must be at most {MAX_NAME_LEN} characters");
    }
    Ok(trimmed.to_string())
}

pub fn validate_nutrients(nutrients: &Nutrients) -> Result<()> {
    for (field, value) in nutrients.fields() {
        if let Some(v) = value {
            if !v.is_finite() {
                bail!("{field} must be a finite number");
            }
            if v < 0.0 {
                bail!("{field} must not be negative");
            }
        }
    }
    Ok(())
}

pub fn validate_food_item(item: &NewFoodItem) -> Result<()> {
    if item.name.trim().is_empty() {
        bail!("Food item name must not be empty");
    }
    if item.name.trim().chars().count() > MAX_NAME_LEN {
        bail!("Food item name must be at most {MAX_NAME_LEN} characters");
    }
    if !item.quantity.is_finite() || item.quantity <= 0.0 {
        bail!("Food item '{}' quantity must be greater than 0", item.name.trim());
    }
    validate_nutrients(&item.nutrients)
}

pub fn validate_food_items(items: &[NewFoodItem]) -> Result<()> {
    if items.is_empty() {
        bail!("A meal must contain at least one food item");
    }
    for item in items {
        validate_food_item(item)?;
    }
    Ok(())
}

pub fn validate_new_meal(meal: &NewMeal) -> Result<()> {
    validate_meal_name(&meal.name)?;
    if let Some(ref meal_type) = meal.meal_type {
        validate_meal_type(meal_type)?;
    }
    if !MEAL_SOURCES.contains(&meal.source.as_str()) {
        bail!("Invalid meal source '{}'", meal.source);
    }
    validate_food_items(&meal.food_items)
}

pub fn validate_update_meal(update: &UpdateMeal) -> Result<()> {
    if update.is_empty() {
        bail!("At least one field must be provided");
    }
    if let Some(ref name) = update.name {
        validate_meal_name(name)?;
    }
    if let Some(Some(ref meal_type)) = update.meal_type {
        validate_meal_type(meal_type)?;
    }
    if let Some(ref items) = update.food_items {
        validate_food_items(items)?;
    }
    Ok(())
}

pub fn validate_macro_split(protein: i64, carbs: i64, fat: i64) -> Result<()> {
    if protein < 0 || carbs < 0 || fat < 0 {
        bail!("Macro percentages must be non-negative");
    }
    if protein > 100 || carbs > 100 || fat > 100 {
        bail!("Each macro percentage must be between 0 and 100");
    }
    let sum = protein + carbs + fat;
    if sum != 100 {
        bail!("Macro percentages must sum to 100 (got {sum})");
    }
    Ok(())
}

pub fn validate_new_goal(goal: &NewGoal) -> Result<()> {
    if goal.daily_calories.is_some_and(|c| c <= 0) {
        bail!("daily_calories must be greater than 0");
    }
    if goal.target_weight_kg.is_some_and(|w| !w.is_finite() || w <= 0.0) {
        bail!("target_weight_kg must be greater than 0");
    }
    for (field, value) in [
        ("protein_g", goal.protein_g),
        ("carbs_g", goal.carbs_g),
        ("fat_g", goal.fat_g),
    ] {
        if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            bail!("{field} must not be negative");
        }
    }
    Ok(())
}

pub fn validate_profile_update(update: &ProfileUpdate) -> Result<()> {
    if let Some(ref name) = update.name {
        if name.trim().is_empty() {
            bail!("Name must not be empty");
        }
    }
    if update.age.is_some_and(|a| !(1..=130).contains(&a)) {
        bail!("age must be between 1 and 130");
    }
    if update
        .height_cm
        .is_some_and(|h| !h.is_finite() || !(50.0..=300.0).contains(&h))
    {
        bail!("height_cm must be between 50 and 300");
    }
    if update.weight_kg.is_some_and(|w| !w.is_finite() || w <= 0.0) {
        bail!("weight_kg must be greater than 0");
    }
    if let Some(ref sex) = update.sex {
        if !SEXES.contains(&sex.as_str()) {
            bail!("Invalid sex '{sex}'. Must be one of: {}", SEXES.join(", "));
        }
    }
    if let Some(ref level) = update.activity_level {
        if !ACTIVITY_LEVELS.contains(&level.as_str()) {
            bail!(
                "Invalid activity level '{level}'. Must be one of: {}",
                ACTIVITY_LEVELS.join(", ")
            );
        }
    }
    Ok(())
}

pub fn validate_new_weight_entry(entry: &NewWeightEntry) -> Result<()> {
    if !entry.weight_kg.is_finite() || entry.weight_kg <= 0.0 || entry.weight_kg > 1000.0 {
        bail!("weight_kg must be greater than 0 and at most 1000");
    }
    if entry.notes.as_ref().is_some_and(|n| n.chars().count() > 500) {
        bail!("Notes must be at most 500 characters");
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        bail!("Invalid email address");
    };
    if local.is_empty() || domain.len() < 3 || !domain.contains('.') || domain.starts_with('.') {
        bail!("Invalid email address");
    }
    if email.chars().any(char::is_whitespace) {
        bail!("Invalid email address");
    }
    Ok(email)
}

/// Requirements the password does not meet, phrased to follow "must have".
/// Empty when acceptable.
#[must_use]
pub fn password_issues(password: &str) -> Vec<&'static str> {
    let len = password.chars().count();
    let mut issues = Vec::new();
    if len < 8 {
        issues.push("at least 8 characters");
    }
    if len > 128 {
        issues.push("at most 128 characters");
    }
    if !password.chars().any(char::is_alphabetic) {
        issues.push("at least one letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        issues.push("at least one digit");
    }
    issues
}

pub fn validate_password(password: &str) -> Result<()> {
    let issues = password_issues(password);
    if !issues.is_empty() {
        bail!("Password must have {}", issues.join(", "));
    }
    Ok(())
}

/// Parse a calendar date written exactly as `YYYY-MM-DD`. Signed or
/// wider-than-four-digit years are rejected.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let b = s.as_bytes();
    let shaped = b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b
            .iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit());
    if !shaped {
        bail!("Invalid date '{s}'. Use YYYY-MM-DD");
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date '{s}'. Use YYYY-MM-DD"))
}

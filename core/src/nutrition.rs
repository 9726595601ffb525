//! Pure nutrition math: nutrient aggregation, macro distributions and calorie
//! recommendations. Nothing in here touches the database.

use anyhow::{Result, bail};

use crate::models::{
    GoalType, MacroDistribution, NewFoodItem, NutrientTotals, Nutrients, Recommendation,
    validate_macro_split,
};

const KCAL_PER_G_PROTEIN: f64 = 4.0;
const KCAL_PER_G_CARBS: f64 = 4.0;
const KCAL_PER_G_FAT: f64 = 9.0;

const MIN_DAILY_CALORIES: f64 = 1200.0;

impl NutrientTotals {
    /// Add one item's values; missing fields contribute zero.
    pub fn add_nutrients(&mut self, n: &Nutrients) {
        self.calories += n.calories.unwrap_or(0.0);
        self.protein += n.protein.unwrap_or(0.0);
        self.carbs += n.carbs.unwrap_or(0.0);
        self.fat += n.fat.unwrap_or(0.0);
        self.fiber += n.fiber.unwrap_or(0.0);
        self.sugar += n.sugar.unwrap_or(0.0);
        self.sodium += n.sodium.unwrap_or(0.0);
        self.potassium += n.potassium.unwrap_or(0.0);
        self.calcium += n.calcium.unwrap_or(0.0);
        self.iron += n.iron.unwrap_or(0.0);
    }

    pub fn add_totals(&mut self, other: &NutrientTotals) {
        self.calories += other.calories;
        self.protein += other.protein;
        self.carbs += other.carbs;
        self.fat += other.fat;
        self.fiber += other.fiber;
        self.sugar += other.sugar;
        self.sodium += other.sodium;
        self.potassium += other.potassium;
        self.calcium += other.calcium;
        self.iron += other.iron;
    }
}

/// Field-wise sum of food item nutrients. Used for both meal create and update.
#[must_use]
pub fn aggregate_nutrients(items: &[NewFoodItem]) -> NutrientTotals {
    let mut totals = NutrientTotals::default();
    for item in items {
        totals.add_nutrients(&item.nutrients);
    }
    totals
}

/// Fold already-computed meal totals into a daily aggregate. Returns the totals
/// and the number of meals folded.
pub fn fold_meal_totals<'a>(
    meal_totals: impl IntoIterator<Item = &'a NutrientTotals>,
) -> (NutrientTotals, i64) {
    let mut totals = NutrientTotals::default();
    let mut count = 0;
    for meal in meal_totals {
        totals.add_totals(meal);
        count += 1;
    }
    (totals, count)
}

/// Default protein / carbs / fat percentage split for a goal.
#[must_use]
pub fn default_split(goal_type: GoalType) -> (i64, i64, i64) {
    match goal_type {
        GoalType::LoseWeight => (35, 35, 30),
        GoalType::Maintain => (25, 50, 25),
        GoalType::GainWeight => (25, 50, 25),
        GoalType::BuildMuscle => (30, 45, 25),
    }
}

#[allow(clippy::cast_precision_loss)]
pub fn macro_distribution(
    calories: f64,
    protein_pct: i64,
    carbs_pct: i64,
    fat_pct: i64,
) -> Result<MacroDistribution> {
    if !calories.is_finite() || calories <= 0.0 {
        bail!("calories must be greater than 0");
    }
    validate_macro_split(protein_pct, carbs_pct, fat_pct)?;
    Ok(MacroDistribution {
        calories,
        protein_pct,
        carbs_pct,
        fat_pct,
        protein_g: calories * protein_pct as f64 / 100.0 / KCAL_PER_G_PROTEIN,
        carbs_g: calories * carbs_pct as f64 / 100.0 / KCAL_PER_G_CARBS,
        fat_g: calories * fat_pct as f64 / 100.0 / KCAL_PER_G_FAT,
    })
}

pub fn activity_multiplier(level: &str) -> Result<f64> {
    match level {
        "sedentary" => Ok(1.2),
        "light" => Ok(1.375),
        "moderate" => Ok(1.55),
        "active" => Ok(1.725),
        "very_active" => Ok(1.9),
        _ => bail!("Invalid activity level '{level}'"),
    }
}

/// Inputs for a calorie recommendation.
#[derive(Debug, Clone)]
pub struct RecommendationInput {
    pub age: i64,
    pub sex: String,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub activity_level: String,
    pub goal_type: GoalType,
}

/// Mifflin-St Jeor basal metabolic rate in kcal/day.
#[allow(clippy::cast_precision_loss)]
pub fn basal_metabolic_rate(age: i64, sex: &str, height_cm: f64, weight_kg: f64) -> Result<f64> {
    let base = 10.0 * weight_kg + 6.25 * height_cm - 5.0 * age as f64;
    match sex {
        "male" => Ok(base + 5.0),
        "female" => Ok(base - 161.0),
        _ => bail!("Invalid sex '{sex}'. Must be one of: male, female"),
    }
}

pub fn recommend(input: &RecommendationInput) -> Result<Recommendation> {
    if !(1..=130).contains(&input.age) {
        bail!("age must be between 1 and 130");
    }
    if !input.height_cm.is_finite() || input.height_cm <= 0.0 {
        bail!("height_cm must be greater than 0");
    }
    if !input.weight_kg.is_finite() || input.weight_kg <= 0.0 {
        bail!("weight_kg must be greater than 0");
    }

    let bmr = basal_metabolic_rate(input.age, &input.sex, input.height_cm, input.weight_kg)?;
    let tdee = bmr * activity_multiplier(&input.activity_level)?;
    let adjustment = match input.goal_type {
        GoalType::LoseWeight => -500.0,
        GoalType::Maintain => 0.0,
        GoalType::GainWeight => 300.0,
        GoalType::BuildMuscle => 250.0,
    };
    let daily = (tdee + adjustment).max(MIN_DAILY_CALORIES).round();

    let (p, c, f) = default_split(input.goal_type);
    let macros = macro_distribution(daily, p, c, f)?;

    Ok(Recommendation {
        goal_type: input.goal_type,
        bmr,
        tdee,
        daily_calories: daily as i64,
        macros,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, calories: f64, protein: f64, carbs: f64, fat: f64) -> NewFoodItem {
        NewFoodItem {
            name: name.to_string(),
            quantity: 1.0,
            unit: None,
            nutrients: Nutrients {
                calories: Some(calories),
                protein: Some(protein),
                carbs: Some(carbs),
                fat: Some(fat),
                ..Nutrients::default()
            },
        }
    }

    #[test]
    fn test_aggregate_lunch_example() {
        let items = vec![
            item("Chicken Breast", 165.0, 31.0, 0.0, 3.6),
            item("Brown Rice", 216.0, 5.0, 45.0, 1.8),
        ];
        let totals = aggregate_nutrients(&items);
        assert!((totals.calories - 381.0).abs() < 1e-9);
        assert!((totals.protein - 36.0).abs() < 1e-9);
        assert!((totals.carbs - 45.0).abs() < 1e-9);
        assert!((totals.fat - 5.4).abs() < 1e-9);
        assert!(totals.fiber.abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_missing_fields_count_as_zero() {
        let sparse = NewFoodItem {
            name: "Apple".to_string(),
            quantity: 1.0,
            unit: Some("piece".to_string()),
            nutrients: Nutrients {
                calories: Some(95.0),
                fiber: Some(4.4),
                ..Nutrients::default()
            },
        };
        let totals = aggregate_nutrients(&[sparse, item("Egg", 78.0, 6.0, 0.6, 5.3)]);
        assert!((totals.calories - 173.0).abs() < 1e-9);
        assert!((totals.protein - 6.0).abs() < 1e-9);
        assert!((totals.fiber - 4.4).abs() < 1e-9);
        assert!(totals.sodium.abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_order_independent() {
        let a = item("A", 120.0, 3.0, 20.0, 2.0);
        let b = item("B", 50.0, 1.0, 10.0, 0.5);
        let c = item("C", 300.0, 25.0, 0.0, 22.0);
        let forward = aggregate_nutrients(&[a.clone(), b.clone(), c.clone()]);
        let backward = aggregate_nutrients(&[c, b, a]);
        assert!((forward.calories - backward.calories).abs() < 1e-9);
        assert!((forward.protein - backward.protein).abs() < 1e-9);
        assert!((forward.carbs - backward.carbs).abs() < 1e-9);
        assert!((forward.fat - backward.fat).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty_is_zero() {
        assert_eq!(aggregate_nutrients(&[]), NutrientTotals::default());
    }

    #[test]
    fn test_fold_meal_totals() {
        let breakfast = aggregate_nutrients(&[item("Egg", 78.0, 6.0, 0.6, 5.3)]);
        let lunch = aggregate_nutrients(&[
            item("Chicken Breast", 165.0, 31.0, 0.0, 3.6),
            item("Brown Rice", 216.0, 5.0, 45.0, 1.8),
        ]);
        let (totals, count) = fold_meal_totals([&breakfast, &lunch]);
        assert_eq!(count, 2);
        assert!((totals.calories - 459.0).abs() < 1e-9);
        assert!((totals.protein - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_fold_no_meals() {
        let (totals, count) = fold_meal_totals(std::iter::empty());
        assert_eq!(count, 0);
        assert_eq!(totals, NutrientTotals::default());
    }

    #[test]
    fn test_macro_distribution() {
        let dist = macro_distribution(1800.0, 40, 30, 30).unwrap();
        // 1800 * 40% / 4 = 180g protein
        assert!((dist.protein_g - 180.0).abs() < 0.01);
        // 1800 * 30% / 4 = 135g carbs
        assert!((dist.carbs_g - 135.0).abs() < 0.01);
        // 1800 * 30% / 9 = 60g fat
        assert!((dist.fat_g - 60.0).abs() < 0.01);
    }

    #[test]
    fn test_macro_distribution_rejects_bad_input() {
        assert!(macro_distribution(0.0, 40, 30, 30).is_err());
        assert!(macro_distribution(2000.0, 40, 40, 40).is_err());
    }

    #[test]
    fn test_default_splits_sum_to_100() {
        for goal in [
            GoalType::LoseWeight,
            GoalType::Maintain,
            GoalType::GainWeight,
            GoalType::BuildMuscle,
        ] {
            let (p, c, f) = default_split(goal);
            assert_eq!(p + c + f, 100, "{goal:?}");
        }
    }

    #[test]
    fn test_bmr_mifflin_st_jeor() {
        // 10*80 + 6.25*180 - 5*30 + 5 = 1780
        let bmr = basal_metabolic_rate(30, "male", 180.0, 80.0).unwrap();
        assert!((bmr - 1780.0).abs() < 1e-9);
        // 10*60 + 6.25*165 - 5*25 - 161 = 1345.25
        let bmr = basal_metabolic_rate(25, "female", 165.0, 60.0).unwrap();
        assert!((bmr - 1345.25).abs() < 1e-9);
        assert!(basal_metabolic_rate(25, "other", 165.0, 60.0).is_err());
    }

    #[test]
    fn test_recommend_lose_weight() {
        let rec = recommend(&RecommendationInput {
            age: 30,
            sex: "male".to_string(),
            height_cm: 180.0,
            weight_kg: 80.0,
            activity_level: "moderate".to_string(),
            goal_type: GoalType::LoseWeight,
        })
        .unwrap();
        // 1780 * 1.55 = 2759 - 500 = 2259
        assert!((rec.tdee - 2759.0).abs() < 1e-9);
        assert_eq!(rec.daily_calories, 2259);
        assert_eq!(rec.macros.protein_pct, 35);
    }

    #[test]
    fn test_recommend_has_calorie_floor() {
        let rec = recommend(&RecommendationInput {
            age: 80,
            sex: "female".to_string(),
            height_cm: 150.0,
            weight_kg: 45.0,
            activity_level: "sedentary".to_string(),
            goal_type: GoalType::LoseWeight,
        })
        .unwrap();
        assert_eq!(rec.daily_calories, 1200);
    }

    #[test]
    fn test_recommend_rejects_unknown_activity() {
        let result = recommend(&RecommendationInput {
            age: 30,
            sex: "male".to_string(),
            height_cm: 180.0,
            weight_kg: 80.0,
            activity_level: "couch".to_string(),
            goal_type: GoalType::Maintain,
        });
        assert!(result.is_err());
    }
}

use anyhow::{Result, bail};

use crate::models::{FoodSuggestion, MealAnalysis, NewFoodItem, Nutrients};
use crate::nutrition::aggregate_nutrients;

/// Food lookup provider used by the nutrition endpoints.
///
/// The bundled implementation is [`StaticFoodCatalog`], a fixed in-process
/// table. A remote food database or AI parser can be dropped in behind the same
/// trait.
pub trait FoodLookupProvider: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<FoodSuggestion>>;
    fn analyze(&self, description: &str) -> Result<MealAnalysis>;
}

struct CatalogEntry {
    id: &'static str,
    name: &'static str,
    aliases: &'static [&'static str],
    serving_size: f64,
    serving_unit: &'static str,
    calories: f64,
    protein: f64,
    carbs: f64,
    fat: f64,
    fiber: f64,
    sugar: f64,
    sodium: f64,
}

impl CatalogEntry {
    fn nutrients(&self, servings: f64) -> Nutrients {
        Nutrients {
            calories: Some(self.calories * servings),
            protein: Some(self.protein * servings),
            carbs: Some(self.carbs * servings),
            fat: Some(self.fat * servings),
            fiber: Some(self.fiber * servings),
            sugar: Some(self.sugar * servings),
            sodium: Some(self.sodium * servings),
            potassium: None,
            calcium: None,
            iron: None,
        }
    }

    fn suggestion(&self) -> FoodSuggestion {
        FoodSuggestion {
            id: self.id.to_string(),
            name: self.name.to_string(),
            serving_size: self.serving_size,
            serving_unit: self.serving_unit.to_string(),
            nutrients: self.nutrients(1.0),
        }
    }
}

// Values per serving.
const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "chicken-breast",
        name: "Chicken Breast",
        aliases: &["chicken breast", "chicken"],
        serving_size: 100.0,
        serving_unit: "g",
        calories: 165.0,
        protein: 31.0,
        carbs: 0.0,
        fat: 3.6,
        fiber: 0.0,
        sugar: 0.0,
        sodium: 74.0,
    },
    CatalogEntry {
        id: "brown-rice",
        name: "Brown Rice",
        aliases: &["brown rice", "rice"],
        serving_size: 1.0,
        serving_unit: "cup",
        calories: 216.0,
        protein: 5.0,
        carbs: 45.0,
        fat: 1.8,
        fiber: 3.5,
        sugar: 0.7,
        sodium: 10.0,
    },
    CatalogEntry {
        id: "egg",
        name: "Egg",
        aliases: &["eggs", "egg"],
        serving_size: 1.0,
        serving_unit: "large",
        calories: 78.0,
        protein: 6.3,
        carbs: 0.6,
        fat: 5.3,
        fiber: 0.0,
        sugar: 0.6,
        sodium: 62.0,
    },
    CatalogEntry {
        id: "whole-wheat-toast",
        name: "Whole Wheat Toast",
        aliases: &["toast", "bread"],
        serving_size: 1.0,
        serving_unit: "slice",
        calories: 81.0,
        protein: 4.0,
        carbs: 13.8,
        fat: 1.1,
        fiber: 1.9,
        sugar: 1.4,
        sodium: 146.0,
    },
    CatalogEntry {
        id: "banana",
        name: "Banana",
        aliases: &["bananas", "banana"],
        serving_size: 1.0,
        serving_unit: "medium",
        calories: 105.0,
        protein: 1.3,
        carbs: 27.0,
        fat: 0.4,
        fiber: 3.1,
        sugar: 14.4,
        sodium: 1.0,
    },
    CatalogEntry {
        id: "apple",
        name: "Apple",
        aliases: &["apples", "apple"],
        serving_size: 1.0,
        serving_unit: "medium",
        calories: 95.0,
        protein: 0.5,
        carbs: 25.0,
        fat: 0.3,
        fiber: 4.4,
        sugar: 18.9,
        sodium: 2.0,
    },
    CatalogEntry {
        id: "greek-yogurt",
        name: "Greek Yogurt",
        aliases: &["greek yogurt", "yogurt", "yoghurt"],
        serving_size: 170.0,
        serving_unit: "g",
        calories: 100.0,
        protein: 17.0,
        carbs: 6.0,
        fat: 0.7,
        fiber: 0.0,
        sugar: 6.0,
        sodium: 61.0,
    },
    CatalogEntry {
        id: "oatmeal",
        name: "Oatmeal",
        aliases: &["oatmeal", "oats", "porridge"],
        serving_size: 1.0,
        serving_unit: "cup",
        calories: 158.0,
        protein: 6.0,
        carbs: 27.0,
        fat: 3.2,
        fiber: 4.0,
        sugar: 1.1,
        sodium: 115.0,
    },
    CatalogEntry {
        id: "salmon",
        name: "Salmon Fillet",
        aliases: &["salmon"],
        serving_size: 100.0,
        serving_unit: "g",
        calories: 208.0,
        protein: 20.0,
        carbs: 0.0,
        fat: 13.0,
        fiber: 0.0,
        sugar: 0.0,
        sodium: 59.0,
    },
    CatalogEntry {
        id: "broccoli",
        name: "Broccoli",
        aliases: &["broccoli"],
        serving_size: 1.0,
        serving_unit: "cup",
        calories: 31.0,
        protein: 2.5,
        carbs: 6.0,
        fat: 0.3,
        fiber: 2.4,
        sugar: 1.5,
        sodium: 30.0,
    },
    CatalogEntry {
        id: "avocado",
        name: "Avocado",
        aliases: &["avocados", "avocado"],
        serving_size: 0.5,
        serving_unit: "fruit",
        calories: 160.0,
        protein: 2.0,
        carbs: 8.5,
        fat: 14.7,
        fiber: 6.7,
        sugar: 0.7,
        sodium: 7.0,
    },
    CatalogEntry {
        id: "almonds",
        name: "Almonds",
        aliases: &["almonds", "almond"],
        serving_size: 28.0,
        serving_unit: "g",
        calories: 164.0,
        protein: 6.0,
        carbs: 6.1,
        fat: 14.2,
        fiber: 3.5,
        sugar: 1.2,
        sodium: 0.0,
    },
];

const SEARCH_LIMIT: usize = 20;

/// Deterministic in-process catalog. Search and analysis always return the same
/// results for the same input.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticFoodCatalog;

impl StaticFoodCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn match_fragment(fragment: &str) -> Option<&'static CatalogEntry> {
        let words: Vec<&str> = fragment
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        CATALOG.iter().find(|entry| {
            entry
                .aliases
                .iter()
                .any(|alias| contains_words(&words, alias))
        })
    }
}

impl FoodLookupProvider for StaticFoodCatalog {
    fn search(&self, query: &str) -> Result<Vec<FoodSuggestion>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            bail!("Search query must not be empty");
        }
        Ok(CATALOG
            .iter()
            .filter(|entry| {
                entry.name.to_lowercase().contains(&query)
                    || entry.aliases.iter().any(|alias| alias.contains(&query))
            })
            .take(SEARCH_LIMIT)
            .map(CatalogEntry::suggestion)
            .collect())
    }

    #[allow(clippy::cast_precision_loss)]
    fn analyze(&self, description: &str) -> Result<MealAnalysis> {
        let text = description.trim();
        if text.is_empty() {
            bail!("Meal description must not be empty");
        }

        let normalized = text
            .to_lowercase()
            .replace(" and ", ",")
            .replace(" with ", ",")
            .replace(['&', ';', '+'], ",");

        let mut food_items = Vec::new();
        let mut unmatched = Vec::new();
        for fragment in normalized.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            let (servings, rest) = split_quantity(fragment);
            match Self::match_fragment(rest) {
                Some(entry) => food_items.push(NewFoodItem {
                    name: entry.name.to_string(),
                    quantity: servings * entry.serving_size,
                    unit: Some(entry.serving_unit.to_string()),
                    nutrients: entry.nutrients(servings),
                }),
                None => unmatched.push(fragment.to_string()),
            }
        }

        let considered = food_items.len() + unmatched.len();
        let confidence = if considered == 0 {
            0.0
        } else {
            food_items.len() as f64 / considered as f64
        };

        Ok(MealAnalysis {
            description: text.to_string(),
            totals: aggregate_nutrients(&food_items),
            food_items,
            confidence,
            unmatched,
        })
    }
}

/// Whether the alias appears in `words` as a run of whole words.
fn contains_words(words: &[&str], alias: &str) -> bool {
    let wanted: Vec<&str> = alias.split_whitespace().collect();
    !wanted.is_empty() && words.windows(wanted.len()).any(|run| run == wanted.as_slice())
}

/// Split a leading serving count off a fragment: "2 eggs" -> (2.0, "eggs").
fn split_quantity(fragment: &str) -> (f64, &str) {
    let Some((first, rest)) = fragment.split_once(char::is_whitespace) else {
        return (1.0, fragment);
    };
    let servings = match first {
        "a" | "an" | "one" => Some(1.0),
        "two" => Some(2.0),
        "three" => Some(3.0),
        "half" => Some(0.5),
        _ => first.parse::<f64>().ok().filter(|q| q.is_finite() && *q > 0.0),
    };
    match servings {
        Some(q) => (q, rest.trim()),
        None => (1.0, fragment),
    }
}

use anyhow::Result;
use chrono::Local;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutricoach_core::db::Database;

use super::helpers::{find_user, no_neg_zero, parse_date, truncate};

pub(crate) fn cmd_stats(
    db: &Database,
    email: &str,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let user = find_user(db, email)?;
    let date = parse_date(date)?;
    let stats = db.daily_stats(&user.id, date)?;
    let meals = db.meals_for_date(&user.id, date)?;

    if json {
        let value = serde_json::json!({ "stats": stats, "meals": meals });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if meals.is_empty() {
        eprintln!("No meals logged for {date}");
        process::exit(2);
    }

    println!("=== {} ({}) ===\n", stats.date, user.email);

    for meal in &meals {
        let label = meal
            .meal_type
            .as_deref()
            .map(|t| format!("{} ", t.to_uppercase()))
            .unwrap_or_default();
        let name = &meal.name;
        let cal = meal.totals.calories;
        println!("  [{}] {label}{name} ({cal:.0} kcal)", meal.id);
        for item in &meal.food_items {
            let item_name = truncate(&item.name, 40);
            let qty = item.quantity;
            let unit = item.unit.as_deref().unwrap_or("x");
            let n = &item.nutrients;
            let cal = n.calories.unwrap_or(0.0);
            let protein = n.protein.unwrap_or(0.0);
            let carbs = n.carbs.unwrap_or(0.0);
            let fat = n.fat.unwrap_or(0.0);
            println!(
                "    {item_name}: {qty} {unit}, {cal:.0} kcal | P:{protein:.0}g C:{carbs:.0}g F:{fat:.0}g"
            );
        }
        println!();
    }

    let t = &stats.totals;
    println!(
        "  TOTAL: {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g ({} meals)",
        t.calories, t.protein, t.carbs, t.fat, stats.meal_count
    );
    if let (Some(target), Some(remaining)) = (stats.calorie_target, stats.calories_remaining) {
        println!("  TARGET: {target} kcal");
        println!("  REMAINING: {:.0} kcal", no_neg_zero(remaining));
    }

    Ok(())
}

pub(crate) fn cmd_history(db: &Database, email: &str, days: u32, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Meals")]
        meals: i64,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    let user = find_user(db, email)?;
    let today = Local::now().date_naive();
    let mut daily = Vec::new();
    for i in 0..days {
        let date = today - chrono::Duration::days(i64::from(i));
        daily.push(db.daily_stats(&user.id, date)?);
    }
    let overview = db.summary_stats(&user.id, today, i64::from(days.max(1)))?;

    if json {
        let value = serde_json::json!({ "days": daily, "stats": overview });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if overview.total_meals == 0 {
        eprintln!("No meals logged in the last {days} days");
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = daily
        .iter()
        .map(|s| {
            let cal = no_neg_zero(s.totals.calories);
            let p = no_neg_zero(s.totals.protein);
            let c = no_neg_zero(s.totals.carbs);
            let f = no_neg_zero(s.totals.fat);
            HistoryRow {
                date: s.date.clone(),
                meals: s.meal_count,
                calories: format!("{cal:.0}"),
                protein: format!("{p:.0}g"),
                carbs: format!("{c:.0}g"),
                fat: format!("{f:.0}g"),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    println!(
        "Logged {} of {} days, avg {:.0} kcal/day, streak {} days",
        overview.days_logged, overview.days, overview.average_calories, overview.logging_streak
    );

    Ok(())
}

use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nutricoach_core::db::Database;
use nutricoach_core::models::Goal;

use super::helpers::find_user;

fn grams(v: Option<f64>) -> String {
    v.map_or("-".into(), |g| format!("{g:.0}g"))
}

pub(crate) fn cmd_goals(db: &Database, email: &str, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct GoalRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Type")]
        goal_type: &'static str,
        #[tabled(rename = "Active")]
        active: &'static str,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
        #[tabled(rename = "Target")]
        target: String,
    }

    let user = find_user(db, email)?;
    let goals: Vec<Goal> = db.list_goals(&user.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&goals)?);
        return Ok(());
    }

    if goals.is_empty() {
        eprintln!("No goals set for {}", user.email);
        return Ok(());
    }

    let rows: Vec<GoalRow> = goals
        .iter()
        .map(|g| GoalRow {
            id: g.id,
            goal_type: g.goal_type.as_str(),
            active: if g.is_active { "*" } else { "" },
            calories: g.daily_calories.map_or("-".into(), |c| c.to_string()),
            protein: grams(g.protein_g),
            carbs: grams(g.carbs_g),
            fat: grams(g.fat_g),
            target: match (g.target_weight_kg, g.target_date.as_deref()) {
                (Some(w), Some(d)) => format!("{w:.1} kg by {d}"),
                (Some(w), None) => format!("{w:.1} kg"),
                (None, Some(d)) => format!("by {d}"),
                (None, None) => String::new(),
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};

use nutricoach_core::db::Database;
use nutricoach_core::models::{User, parse_date as core_parse_date, validate_email};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            _ => core_parse_date(&s)
                .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")),
        },
    }
}

pub(crate) fn find_user(db: &Database, email: &str) -> Result<User> {
    let email = validate_email(email)?;
    match db.get_user_by_email(&email)? {
        Some(user) => Ok(user),
        None => bail!("No user with email {email}"),
    }
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::models::{
    AuditLogEntry, ClientInfo, DailyStats, DailySummary, FoodItem, Goal, GoalType, Meal, NewFoodItem,
    NewGoal, NewMeal, NewWeightEntry, NutrientTotals, Nutrients, Profile, ProfileUpdate, Session,
    SummaryStats, UpdateMeal, User, Verification, WeightEntry,
};
use crate::nutrition::{aggregate_nutrients, fold_meal_totals};

pub struct Database {
    conn: Connection,
}

const USER_COLUMNS: &str = "id, email, name, email_verified, image, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, expires_at, ip_address, user_agent, created_at";

const GOAL_COLUMNS: &str = "id, user_id, goal_type, target_weight_kg, daily_calories, protein_g, \
     carbs_g, fat_g, target_date, is_active, created_at";

const MEAL_COLUMNS: &str = "id, uuid, user_id, name, meal_type, description, source, logged_at, \
     log_date, total_calories, total_protein, total_carbs, total_fat, total_fiber, total_sugar, \
     total_sodium, total_potassium, total_calcium, total_iron, created_at, updated_at";

const MEAL_TOTAL_COLUMNS: &str = "total_calories, total_protein, total_carbs, total_fat, \
     total_fiber, total_sugar, total_sodium, total_potassium, total_calcium, total_iron";

const FOOD_ITEM_COLUMNS: &str = "id, meal_id, name, quantity, unit, calories, protein, carbs, fat, \
     fiber, sugar, sodium, potassium, calcium, iron";

const SUMMARY_COLUMNS: &str = "id, user_id, date, total_calories, total_protein, total_carbs, \
     total_fat, total_fiber, total_sugar, total_sodium, total_potassium, total_calcium, \
     total_iron, meal_count, summary_text, created_at, updated_at";

const WEIGHT_COLUMNS: &str = "id, uuid, date, weight_kg, notes, created_at, updated_at";

const VERIFICATION_COLUMNS: &str = "id, identifier, value, expires_at, created_at";

const AUDIT_COLUMNS: &str = "id, user_id, event, ip_address, user_agent, metadata, created_at";

/// Render an instant the way every timestamp column stores it. Fixed-width UTC,
/// so string order is chronological order.
#[must_use]
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn now() -> String {
    timestamp(Utc::now())
}

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn days_before(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    Duration::try_days(days)
        .and_then(|d| date.checked_sub_signed(d))
        .with_context(|| format!("Date {date} minus {days} days is out of range"))
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

// --- Row mapping ---

fn totals_from_row(row: &rusqlite::Row, start: usize) -> rusqlite::Result<NutrientTotals> {
    Ok(NutrientTotals {
        calories: row.get(start)?,
        protein: row.get(start + 1)?,
        carbs: row.get(start + 2)?,
        fat: row.get(start + 3)?,
        fiber: row.get(start + 4)?,
        sugar: row.get(start + 5)?,
        sodium: row.get(start + 6)?,
        potassium: row.get(start + 7)?,
        calcium: row.get(start + 8)?,
        iron: row.get(start + 9)?,
    })
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        email_verified: row.get(3)?,
        image: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn session_from_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        expires_at: row.get(2)?,
        ip_address: row.get(3)?,
        user_agent: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn verification_from_row(row: &rusqlite::Row) -> rusqlite::Result<Verification> {
    Ok(Verification {
        id: row.get(0)?,
        identifier: row.get(1)?,
        value: row.get(2)?,
        expires_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn goal_from_row(row: &rusqlite::Row) -> rusqlite::Result<Goal> {
    let goal_type: String = row.get(2)?;
    let goal_type = GoalType::parse(&goal_type).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Goal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        goal_type,
        target_weight_kg: row.get(3)?,
        daily_calories: row.get(4)?,
        protein_g: row.get(5)?,
        carbs_g: row.get(6)?,
        fat_g: row.get(7)?,
        target_date: row.get(8)?,
        is_active: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn meal_from_row(row: &rusqlite::Row) -> rusqlite::Result<Meal> {
    Ok(Meal {
        id: row.get(0)?,
        uuid: row.get(1)?,
        user_id: row.get(2)?,
        name: row.get(3)?,
        meal_type: row.get(4)?,
        description: row.get(5)?,
        source: row.get(6)?,
        logged_at: row.get(7)?,
        log_date: row.get(8)?,
        totals: totals_from_row(row, 9)?,
        food_items: Vec::new(),
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

fn food_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<FoodItem> {
    Ok(FoodItem {
        id: row.get(0)?,
        meal_id: row.get(1)?,
        name: row.get(2)?,
        quantity: row.get(3)?,
        unit: row.get(4)?,
        nutrients: Nutrients {
            calories: row.get(5)?,
            protein: row.get(6)?,
            carbs: row.get(7)?,
            fat: row.get(8)?,
            fiber: row.get(9)?,
            sugar: row.get(10)?,
            sodium: row.get(11)?,
            potassium: row.get(12)?,
            calcium: row.get(13)?,
            iron: row.get(14)?,
        },
    })
}

fn summary_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailySummary> {
    Ok(DailySummary {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: row.get(2)?,
        totals: totals_from_row(row, 3)?,
        meal_count: row.get(13)?,
        summary_text: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn weight_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<WeightEntry> {
    let date_str: String = row.get(2)?;
    let date =
        NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| conversion_error(2, e))?;
    Ok(WeightEntry {
        id: row.get(0)?,
        uuid: row.get(1)?,
        date,
        weight_kg: row.get(3)?,
        notes: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn profile_from_row(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
    let prefs: String = row.get(8)?;
    let dietary_preferences = serde_json::from_str(&prefs).map_err(|e| conversion_error(8, e))?;
    Ok(Profile {
        user_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        age: row.get(3)?,
        sex: row.get(4)?,
        height_cm: row.get(5)?,
        weight_kg: row.get(6)?,
        activity_level: row.get(7)?,
        dietary_preferences,
        updated_at: row.get(9)?,
    })
}

fn audit_from_row(row: &rusqlite::Row) -> rusqlite::Result<AuditLogEntry> {
    let metadata: Option<String> = row.get(5)?;
    let metadata = metadata
        .map(|m| serde_json::from_str(&m))
        .transpose()
        .map_err(|e| conversion_error(5, e))?;
    Ok(AuditLogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        event: row.get(2)?,
        ip_address: row.get(3)?,
        user_agent: row.get(4)?,
        metadata,
        created_at: row.get(6)?,
    })
}

// --- Connection-level helpers, usable inside a transaction ---

fn load_food_items(conn: &Connection, meal_id: i64) -> Result<Vec<FoodItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FOOD_ITEM_COLUMNS} FROM food_items WHERE meal_id = ?1 ORDER BY position, id"
    ))?;
    let items = stmt
        .query_map(params![meal_id], food_item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

fn with_food_items(conn: &Connection, mut meals: Vec<Meal>) -> Result<Vec<Meal>> {
    for meal in &mut meals {
        meal.food_items = load_food_items(conn, meal.id)?;
    }
    Ok(meals)
}

fn insert_food_items(conn: &Connection, meal_id: i64, items: &[NewFoodItem]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO food_items (meal_id, position, name, quantity, unit, calories, protein,
             carbs, fat, fiber, sugar, sodium, potassium, calcium, iron)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )?;
    for (position, item) in items.iter().enumerate() {
        let n = &item.nutrients;
        stmt.execute(params![
            meal_id,
            i64::try_from(position)?,
            item.name.trim(),
            item.quantity,
            item.unit,
            n.calories,
            n.protein,
            n.carbs,
            n.fat,
            n.fiber,
            n.sugar,
            n.sodium,
            n.potassium,
            n.calcium,
            n.iron,
        ])?;
    }
    Ok(())
}

fn write_meal_totals(conn: &Connection, meal_id: i64, t: &NutrientTotals) -> Result<()> {
    conn.execute(
        "UPDATE meals SET total_calories = ?1, total_protein = ?2, total_carbs = ?3,
             total_fat = ?4, total_fiber = ?5, total_sugar = ?6, total_sodium = ?7,
             total_potassium = ?8, total_calcium = ?9, total_iron = ?10
         WHERE id = ?11",
        params![
            t.calories,
            t.protein,
            t.carbs,
            t.fat,
            t.fiber,
            t.sugar,
            t.sodium,
            t.potassium,
            t.calcium,
            t.iron,
            meal_id
        ],
    )?;
    Ok(())
}

fn meal_totals_on(conn: &Connection, user_id: &str, date: &str) -> Result<Vec<NutrientTotals>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEAL_TOTAL_COLUMNS} FROM meals
         WHERE user_id = ?1 AND log_date = ?2
         ORDER BY logged_at, id"
    ))?;
    let totals = stmt
        .query_map(params![user_id, date], |row| totals_from_row(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(totals)
}

/// Recompute the cached summary row for (user, date) from meal rows. The row is
/// only rewritten when a value actually changed.
fn refresh_summary(conn: &Connection, user_id: &str, date: &str) -> Result<()> {
    let meal_totals = meal_totals_on(conn, user_id, date)?;
    let (t, meal_count) = fold_meal_totals(&meal_totals);
    let now = now();
    conn.execute(
        "INSERT INTO daily_summaries (user_id, date, total_calories, total_protein, total_carbs,
             total_fat, total_fiber, total_sugar, total_sodium, total_potassium, total_calcium,
             total_iron, meal_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
         ON CONFLICT(user_id, date) DO UPDATE SET
             total_calories = excluded.total_calories,
             total_protein = excluded.total_protein,
             total_carbs = excluded.total_carbs,
             total_fat = excluded.total_fat,
             total_fiber = excluded.total_fiber,
             total_sugar = excluded.total_sugar,
             total_sodium = excluded.total_sodium,
             total_potassium = excluded.total_potassium,
             total_calcium = excluded.total_calcium,
             total_iron = excluded.total_iron,
             meal_count = excluded.meal_count,
             updated_at = excluded.updated_at
         WHERE daily_summaries.total_calories IS NOT excluded.total_calories
            OR daily_summaries.total_protein IS NOT excluded.total_protein
            OR daily_summaries.total_carbs IS NOT excluded.total_carbs
            OR daily_summaries.total_fat IS NOT excluded.total_fat
            OR daily_summaries.total_fiber IS NOT excluded.total_fiber
            OR daily_summaries.total_sugar IS NOT excluded.total_sugar
            OR daily_summaries.total_sodium IS NOT excluded.total_sodium
            OR daily_summaries.total_potassium IS NOT excluded.total_potassium
            OR daily_summaries.total_calcium IS NOT excluded.total_calcium
            OR daily_summaries.total_iron IS NOT excluded.total_iron
            OR daily_summaries.meal_count IS NOT excluded.meal_count",
        params![
            user_id,
            date,
            t.calories,
            t.protein,
            t.carbs,
            t.fat,
            t.fiber,
            t.sugar,
            t.sodium,
            t.potassium,
            t.calcium,
            t.iron,
            meal_count,
            now
        ],
    )?;
    Ok(())
}

fn active_goal_on(conn: &Connection, user_id: &str) -> Result<Option<Goal>> {
    let goal = conn
        .query_row(
            &format!(
                "SELECT {GOAL_COLUMNS} FROM goals
                 WHERE user_id = ?1 AND is_active = 1
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            params![user_id],
            goal_from_row,
        )
        .optional()?;
    Ok(goal)
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    #[allow(clippy::too_many_lines)]
    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    email_verified INTEGER NOT NULL DEFAULT 0,
                    image TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS accounts (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    provider_id TEXT NOT NULL,
                    account_id TEXT NOT NULL,
                    password TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (provider_id, account_id)
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    token_hash TEXT NOT NULL UNIQUE,
                    expires_at TEXT NOT NULL,
                    ip_address TEXT,
                    user_agent TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS verifications (
                    id TEXT PRIMARY KEY,
                    identifier TEXT NOT NULL,
                    value TEXT NOT NULL,
                    expires_at TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_profiles (
                    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                    age INTEGER,
                    sex TEXT,
                    height_cm REAL,
                    weight_kg REAL,
                    activity_level TEXT,
                    dietary_preferences TEXT NOT NULL DEFAULT '[]',
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS goals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    goal_type TEXT NOT NULL,
                    target_weight_kg REAL,
                    daily_calories INTEGER,
                    protein_g REAL,
                    carbs_g REAL,
                    fat_g REAL,
                    target_date TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    meal_type TEXT,
                    description TEXT,
                    source TEXT NOT NULL DEFAULT 'manual',
                    logged_at TEXT NOT NULL,
                    log_date TEXT NOT NULL,
                    total_calories REAL NOT NULL DEFAULT 0,
                    total_protein REAL NOT NULL DEFAULT 0,
                    total_carbs REAL NOT NULL DEFAULT 0,
                    total_fat REAL NOT NULL DEFAULT 0,
                    total_fiber REAL NOT NULL DEFAULT 0,
                    total_sugar REAL NOT NULL DEFAULT 0,
                    total_sodium REAL NOT NULL DEFAULT 0,
                    total_potassium REAL NOT NULL DEFAULT 0,
                    total_calcium REAL NOT NULL DEFAULT 0,
                    total_iron REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS food_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meal_id INTEGER NOT NULL REFERENCES meals(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL DEFAULT 0,
                    name TEXT NOT NULL,
                    quantity REAL NOT NULL CHECK (quantity > 0),
                    unit TEXT,
                    calories REAL,
                    protein REAL,
                    carbs REAL,
                    fat REAL,
                    fiber REAL,
                    sugar REAL,
                    sodium REAL,
                    potassium REAL,
                    calcium REAL,
                    iron REAL
                );

                CREATE TABLE IF NOT EXISTS weight_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    date TEXT NOT NULL,
                    weight_kg REAL NOT NULL,
                    notes TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, date)
                );

                CREATE TABLE IF NOT EXISTS daily_summaries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    date TEXT NOT NULL,
                    total_calories REAL NOT NULL DEFAULT 0,
                    total_protein REAL NOT NULL DEFAULT 0,
                    total_carbs REAL NOT NULL DEFAULT 0,
                    total_fat REAL NOT NULL DEFAULT 0,
                    total_fiber REAL NOT NULL DEFAULT 0,
                    total_sugar REAL NOT NULL DEFAULT 0,
                    total_sodium REAL NOT NULL DEFAULT 0,
                    total_potassium REAL NOT NULL DEFAULT 0,
                    total_calcium REAL NOT NULL DEFAULT 0,
                    total_iron REAL NOT NULL DEFAULT 0,
                    meal_count INTEGER NOT NULL DEFAULT 0,
                    summary_text TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (user_id, date)
                );

                CREATE TABLE IF NOT EXISTS audit_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    event TEXT NOT NULL,
                    ip_address TEXT,
                    user_agent TEXT,
                    metadata TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS login_attempts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    ip_address TEXT,
                    attempted_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS device_fingerprints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    fingerprint TEXT NOT NULL,
                    user_agent TEXT,
                    first_seen TEXT NOT NULL,
                    last_seen TEXT NOT NULL,
                    UNIQUE (user_id, fingerprint)
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_goals_one_active
                    ON goals(user_id) WHERE is_active = 1;
                CREATE INDEX IF NOT EXISTS idx_meals_user_date ON meals(user_id, log_date);
                CREATE INDEX IF NOT EXISTS idx_food_items_meal ON food_items(meal_id);
                CREATE INDEX IF NOT EXISTS idx_audit_logs_user ON audit_logs(user_id);
                CREATE INDEX IF NOT EXISTS idx_login_attempts_email
                    ON login_attempts(email, attempted_at);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Users & accounts ---

    /// Create a user with a credential account and an empty profile.
    pub fn create_user(&self, email: &str, name: &str, password_hash: &str) -> Result<User> {
        let now = now();
        let id = Uuid::new_v4().to_string();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO users (id, email, name, email_verified, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            params![id, email, name, now],
        )?;
        tx.execute(
            "INSERT INTO accounts (id, user_id, provider_id, account_id, password, created_at, updated_at)
             VALUES (?1, ?2, 'credential', ?2, ?3, ?4, ?4)",
            params![Uuid::new_v4().to_string(), id, password_hash, now],
        )?;
        tx.execute(
            "INSERT INTO user_profiles (user_id, updated_at) VALUES (?1, ?2)",
            params![id, now],
        )?;
        tx.commit()?;
        self.get_user(&id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![email],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_password_hash(&self, user_id: &str) -> Result<Option<String>> {
        let hash: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT password FROM accounts
                 WHERE user_id = ?1 AND provider_id = 'credential'",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }

    /// Delete a user. Owned rows cascade; audit entries keep a null user id.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Sessions ---

    pub fn insert_session(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        client: &ClientInfo,
    ) -> Result<Session> {
        let now = now();
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, ip_address, user_agent,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                user_id,
                token_hash,
                timestamp(expires_at),
                client.ip_address,
                client.user_agent,
                now
            ],
        )?;
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                session_from_row,
            )
            .context("Session not found after insert")
    }

    pub fn find_session_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = ?1"),
                params![token_hash],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![timestamp(now)],
        )?;
        Ok(rows)
    }

    // --- Verifications ---

    pub fn create_verification(
        &self,
        identifier: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Verification> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO verifications (id, identifier, value, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, identifier, value, timestamp(expires_at), now()],
        )?;
        self.conn
            .query_row(
                &format!("SELECT {VERIFICATION_COLUMNS} FROM verifications WHERE id = ?1"),
                params![id],
                verification_from_row,
            )
            .context("Verification not found after insert")
    }

    /// Newest unexpired verification for the identifier.
    pub fn find_verification(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Verification>> {
        let verification = self
            .conn
            .query_row(
                &format!(
                    "SELECT {VERIFICATION_COLUMNS} FROM verifications
                     WHERE identifier = ?1 AND expires_at > ?2
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![identifier, timestamp(now)],
                verification_from_row,
            )
            .optional()?;
        Ok(verification)
    }

    pub fn delete_verification(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM verifications WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn set_email_verified(&self, user_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET email_verified = 1, updated_at = ?1 WHERE id = ?2",
            params![now(), user_id],
        )?;
        Ok(rows > 0)
    }

    // --- Audit log, login attempts, devices ---

    pub fn append_audit_log(
        &self,
        user_id: Option<&str>,
        event: &str,
        client: &ClientInfo,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_logs (user_id, event, ip_address, user_agent, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                event,
                client.ip_address,
                client.user_agent,
                metadata.map(serde_json::Value::to_string),
                now()
            ],
        )?;
        Ok(())
    }

    pub fn list_audit_logs(&self, user_id: &str, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs
             WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let entries = stmt
            .query_map(params![user_id, limit], audit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn record_login_attempt(
        &self,
        email: &str,
        success: bool,
        ip_address: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO login_attempts (email, success, ip_address, attempted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![email, success, ip_address, now()],
        )?;
        Ok(())
    }

    /// Failed attempts for `email` since `since`, not counting any before the
    /// latest successful sign-in.
    pub fn count_failed_logins_since(&self, email: &str, since: DateTime<Utc>) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM login_attempts
             WHERE email = ?1 AND success = 0 AND attempted_at >= ?2
               AND attempted_at > COALESCE(
                   (SELECT MAX(attempted_at) FROM login_attempts WHERE email = ?1 AND success = 1),
                   '')",
            params![email, timestamp(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record that a device was seen for a user. Returns true the first time.
    pub fn touch_device(
        &self,
        user_id: &str,
        fingerprint: &str,
        user_agent: Option<&str>,
    ) -> Result<bool> {
        let now = now();
        let updated = self.conn.execute(
            "UPDATE device_fingerprints SET last_seen = ?1
             WHERE user_id = ?2 AND fingerprint = ?3",
            params![now, user_id, fingerprint],
        )?;
        if updated > 0 {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO device_fingerprints (user_id, fingerprint, user_agent, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![user_id, fingerprint, user_agent, now],
        )?;
        Ok(true)
    }

    // --- Profile ---

    pub fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let profile = self
            .conn
            .query_row(
                "SELECT u.id, u.name, u.email, p.age, p.sex, p.height_cm, p.weight_kg,
                        p.activity_level, COALESCE(p.dietary_preferences, '[]'),
                        COALESCE(p.updated_at, u.updated_at)
                 FROM users u
                 LEFT JOIN user_profiles p ON p.user_id = u.id
                 WHERE u.id = ?1",
                params![user_id],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    /// Apply the supplied fields; absent fields keep their stored value.
    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        let now = now();
        let prefs = update
            .dietary_preferences
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let tx = self.conn.unchecked_transaction()?;
        if let Some(ref name) = update.name {
            let rows = tx.execute(
                "UPDATE users SET name = ?1, updated_at = ?2 WHERE id = ?3",
                params![name.trim(), now, user_id],
            )?;
            if rows == 0 {
                bail!("User not found");
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO user_profiles (user_id, updated_at) VALUES (?1, ?2)",
            params![user_id, now],
        )?;
        tx.execute(
            "UPDATE user_profiles SET
                 age = COALESCE(?2, age),
                 sex = COALESCE(?3, sex),
                 height_cm = COALESCE(?4, height_cm),
                 weight_kg = COALESCE(?5, weight_kg),
                 activity_level = COALESCE(?6, activity_level),
                 dietary_preferences = COALESCE(?7, dietary_preferences),
                 updated_at = ?8
             WHERE user_id = ?1",
            params![
                user_id,
                update.age,
                update.sex,
                update.height_cm,
                update.weight_kg,
                update.activity_level,
                prefs,
                now
            ],
        )?;
        tx.commit()?;

        self.get_profile(user_id)?.context("User not found")
    }

    // --- Goals ---

    /// Insert a new active goal, deactivating any previous one in the same
    /// transaction. The partial unique index on active goals backs this up.
    pub fn create_goal(&self, user_id: &str, goal: &NewGoal) -> Result<Goal> {
        let now = now();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE goals SET is_active = 0 WHERE user_id = ?1 AND is_active = 1",
            params![user_id],
        )?;
        tx.execute(
            "INSERT INTO goals (user_id, goal_type, target_weight_kg, daily_calories, protein_g,
                 carbs_g, fat_g, target_date, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
            params![
                user_id,
                goal.goal_type.as_str(),
                goal.target_weight_kg,
                goal.daily_calories,
                goal.protein_g,
                goal.carbs_g,
                goal.fat_g,
                goal.target_date.map(date_str),
                now
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        self.conn
            .query_row(
                &format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?1"),
                params![id],
                goal_from_row,
            )
            .context("Goal not found after insert")
    }

    /// All goals for a user, newest first. Empty when none exist.
    pub fn list_goals(&self, user_id: &str) -> Result<Vec<Goal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let goals = stmt
            .query_map(params![user_id], goal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(goals)
    }

    pub fn get_active_goal(&self, user_id: &str) -> Result<Option<Goal>> {
        active_goal_on(&self.conn, user_id)
    }

    // --- Weight tracking ---

    /// Insert or replace the entry for the date. The profile weight follows the
    /// most recent entry.
    pub fn log_weight(&self, user_id: &str, entry: &NewWeightEntry) -> Result<WeightEntry> {
        let now = now();
        let uuid = Uuid::new_v4().to_string();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO weight_entries (uuid, user_id, date, weight_kg, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id, date) DO UPDATE SET
                weight_kg = excluded.weight_kg,
                notes = excluded.notes,
                updated_at = excluded.updated_at",
            params![
                uuid,
                user_id,
                date_str(entry.date),
                entry.weight_kg,
                entry.notes,
                now
            ],
        )?;
        tx.execute(
            "UPDATE user_profiles SET
                 weight_kg = (SELECT weight_kg FROM weight_entries
                              WHERE user_id = ?1 ORDER BY date DESC LIMIT 1),
                 updated_at = ?2
             WHERE user_id = ?1",
            params![user_id, now],
        )?;
        tx.commit()?;

        self.get_weight(user_id, entry.date)?
            .context("Weight entry not found after upsert")
    }

    pub fn get_weight(&self, user_id: &str, date: NaiveDate) -> Result<Option<WeightEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!(
                    "SELECT {WEIGHT_COLUMNS} FROM weight_entries WHERE user_id = ?1 AND date = ?2"
                ),
                params![user_id, date_str(date)],
                weight_entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Newest first. `limit` of `None` returns the whole history.
    pub fn get_weight_history(&self, user_id: &str, limit: Option<i64>) -> Result<Vec<WeightEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {WEIGHT_COLUMNS} FROM weight_entries
             WHERE user_id = ?1 ORDER BY date DESC LIMIT ?2"
        ))?;
        let entries = stmt
            .query_map(params![user_id, limit.unwrap_or(-1)], weight_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // --- Meals ---

    /// Persist a meal, its food items and the refreshed daily summary as one
    /// transaction.
    pub fn create_meal(&self, user_id: &str, meal: &NewMeal) -> Result<Meal> {
        let t = aggregate_nutrients(&meal.food_items);
        let now = now();
        let uuid = Uuid::new_v4().to_string();
        let log_date = date_str(meal.logged_at.date_naive());
        let meal_type = meal.meal_type.as_deref().map(str::to_lowercase);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO meals (uuid, user_id, name, meal_type, description, source, logged_at,
                 log_date, total_calories, total_protein, total_carbs, total_fat, total_fiber,
                 total_sugar, total_sodium, total_potassium, total_calcium, total_iron,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?19)",
            params![
                uuid,
                user_id,
                meal.name.trim(),
                meal_type,
                meal.description,
                meal.source,
                timestamp(meal.logged_at.with_timezone(&Utc)),
                log_date,
                t.calories,
                t.protein,
                t.carbs,
                t.fat,
                t.fiber,
                t.sugar,
                t.sodium,
                t.potassium,
                t.calcium,
                t.iron,
                now
            ],
        )?;
        let id = tx.last_insert_rowid();
        insert_food_items(&tx, id, &meal.food_items)?;
        refresh_summary(&tx, user_id, &log_date)?;
        tx.commit()?;

        self.get_meal(user_id, id)?
            .context("Meal not found after insert")
    }

    /// A meal owned by `user_id`. Someone else's meal reads as absent.
    pub fn get_meal(&self, user_id: &str, id: i64) -> Result<Option<Meal>> {
        let meal = self
            .conn
            .query_row(
                &format!("SELECT {MEAL_COLUMNS} FROM meals WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                meal_from_row,
            )
            .optional()?;
        match meal {
            Some(mut meal) => {
                meal.food_items = load_food_items(&self.conn, meal.id)?;
                Ok(Some(meal))
            }
            None => Ok(None),
        }
    }

    /// Meals newest first, optionally restricted to one day.
    pub fn list_meals(
        &self,
        user_id: &str,
        date: Option<NaiveDate>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Meal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEAL_COLUMNS} FROM meals
             WHERE user_id = ?1 AND (?2 IS NULL OR log_date = ?2)
             ORDER BY log_date DESC, logged_at DESC, id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let meals = stmt
            .query_map(
                params![user_id, date.map(date_str), limit, offset],
                meal_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        with_food_items(&self.conn, meals)
    }

    pub fn meals_for_date(&self, user_id: &str, date: NaiveDate) -> Result<Vec<Meal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEAL_COLUMNS} FROM meals
             WHERE user_id = ?1 AND log_date = ?2
             ORDER BY logged_at, id"
        ))?;
        let meals = stmt
            .query_map(params![user_id, date_str(date)], meal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        with_food_items(&self.conn, meals)
    }

    /// Case-insensitive match on the meal name or any of its food item names.
    pub fn search_meals(&self, user_id: &str, query: &str, limit: i64) -> Result<Vec<Meal>> {
        let pattern = like_pattern(query);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEAL_COLUMNS} FROM meals
             WHERE user_id = ?1
               AND (name LIKE ?2 ESCAPE '\\'
                    OR id IN (SELECT meal_id FROM food_items WHERE name LIKE ?2 ESCAPE '\\'))
             ORDER BY log_date DESC, logged_at DESC, id DESC
             LIMIT ?3"
        ))?;
        let meals = stmt
            .query_map(params![user_id, pattern, limit], meal_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        with_food_items(&self.conn, meals)
    }

    /// Apply a partial update. Supplying food items replaces the whole set and
    /// recomputes totals. Returns `None` when the meal is absent or not owned.
    pub fn update_meal(&self, user_id: &str, id: i64, update: &UpdateMeal) -> Result<Option<Meal>> {
        let tx = self.conn.unchecked_transaction()?;
        let old_date: Option<String> = tx
            .query_row(
                "SELECT log_date FROM meals WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(old_date) = old_date else {
            return Ok(None);
        };

        if let Some(ref name) = update.name {
            tx.execute(
                "UPDATE meals SET name = ?1 WHERE id = ?2",
                params![name.trim(), id],
            )?;
        }
        if let Some(ref meal_type) = update.meal_type {
            tx.execute(
                "UPDATE meals SET meal_type = ?1 WHERE id = ?2",
                params![meal_type.as_deref().map(str::to_lowercase), id],
            )?;
        }
        if let Some(ref description) = update.description {
            tx.execute(
                "UPDATE meals SET description = ?1 WHERE id = ?2",
                params![description, id],
            )?;
        }
        let mut new_date = old_date.clone();
        if let Some(logged_at) = update.logged_at {
            new_date = date_str(logged_at.date_naive());
            tx.execute(
                "UPDATE meals SET logged_at = ?1, log_date = ?2 WHERE id = ?3",
                params![timestamp(logged_at.with_timezone(&Utc)), new_date, id],
            )?;
        }
        if let Some(ref items) = update.food_items {
            tx.execute("DELETE FROM food_items WHERE meal_id = ?1", params![id])?;
            insert_food_items(&tx, id, items)?;
            write_meal_totals(&tx, id, &aggregate_nutrients(items))?;
        }
        tx.execute(
            "UPDATE meals SET updated_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;

        refresh_summary(&tx, user_id, &old_date)?;
        if new_date != old_date {
            refresh_summary(&tx, user_id, &new_date)?;
        }
        tx.commit()?;

        self.get_meal(user_id, id)
    }

    /// Delete a meal owned by `user_id`; food items cascade.
    pub fn delete_meal(&self, user_id: &str, id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let log_date: Option<String> = tx
            .query_row(
                "SELECT log_date FROM meals WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(log_date) = log_date else {
            return Ok(false);
        };
        tx.execute("DELETE FROM meals WHERE id = ?1", params![id])?;
        refresh_summary(&tx, user_id, &log_date)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn count_food_items(&self, meal_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM food_items WHERE meal_id = ?1",
            params![meal_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- Live stats ---

    /// Totals folded from meal rows at read time, with the active goal's
    /// calorie target when one is set.
    #[allow(clippy::cast_precision_loss)]
    pub fn daily_stats(&self, user_id: &str, date: NaiveDate) -> Result<DailyStats> {
        let day = date_str(date);
        let meal_totals = meal_totals_on(&self.conn, user_id, &day)?;
        let (totals, meal_count) = fold_meal_totals(&meal_totals);
        let calorie_target = active_goal_on(&self.conn, user_id)?.and_then(|g| g.daily_calories);
        Ok(DailyStats {
            date: day,
            totals,
            meal_count,
            calorie_target,
            calories_remaining: calorie_target.map(|target| target as f64 - totals.calories),
        })
    }

    /// Seven days of live stats ending at `end`, oldest first.
    pub fn weekly_stats(&self, user_id: &str, end: NaiveDate) -> Result<Vec<DailyStats>> {
        (0..7)
            .rev()
            .map(|offset| self.daily_stats(user_id, days_before(end, offset)?))
            .collect()
    }

    pub fn logging_streak(&self, user_id: &str, today: NaiveDate) -> Result<i64> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT log_date FROM meals WHERE user_id = ?1 ORDER BY log_date DESC",
        )?;
        let dates: Vec<String> = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let yesterday = days_before(today, 1)?;
        // A streak may still be alive if the last logged day was yesterday
        let start_date = match dates.first() {
            Some(d) if *d == date_str(today) => today,
            Some(d) if *d == date_str(yesterday) => yesterday,
            _ => return Ok(0),
        };

        let mut streak: i64 = 0;
        for date in &dates {
            if *date == date_str(days_before(start_date, streak)?) {
                streak += 1;
            } else {
                break;
            }
        }
        Ok(streak)
    }

    /// Averages over the days in the window that have at least one meal.
    #[allow(clippy::cast_precision_loss)]
    pub fn summary_stats(&self, user_id: &str, end: NaiveDate, days: i64) -> Result<SummaryStats> {
        if days < 1 {
            bail!("days must be at least 1");
        }
        let start = days_before(end, days - 1)?;
        let (days_logged, total_meals, calories, protein, carbs, fat): (
            i64,
            i64,
            f64,
            f64,
            f64,
            f64,
        ) = self.conn.query_row(
            "SELECT COUNT(DISTINCT log_date), COUNT(*),
                    COALESCE(SUM(total_calories), 0), COALESCE(SUM(total_protein), 0),
                    COALESCE(SUM(total_carbs), 0), COALESCE(SUM(total_fat), 0)
             FROM meals
             WHERE user_id = ?1 AND log_date >= ?2 AND log_date <= ?3",
            params![user_id, date_str(start), date_str(end)],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

        let average = |sum: f64| {
            if days_logged == 0 {
                0.0
            } else {
                sum / days_logged as f64
            }
        };

        Ok(SummaryStats {
            days,
            days_logged,
            total_meals,
            average_calories: average(calories),
            average_protein: average(protein),
            average_carbs: average(carbs),
            average_fat: average(fat),
            logging_streak: self.logging_streak(user_id, end)?,
        })
    }

    // --- Daily summaries ---

    /// Recompute and persist the summary for a day. A day without meals yields a
    /// zeroed row. Calling this again without meal changes leaves the row as is.
    pub fn upsert_daily_summary(&self, user_id: &str, date: NaiveDate) -> Result<DailySummary> {
        refresh_summary(&self.conn, user_id, &date_str(date))?;
        self.get_daily_summary(user_id, date)?
            .context("Daily summary not found after upsert")
    }

    pub fn get_daily_summary(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailySummary>> {
        let summary = self
            .conn
            .query_row(
                &format!(
                    "SELECT {SUMMARY_COLUMNS} FROM daily_summaries WHERE user_id = ?1 AND date = ?2"
                ),
                params![user_id, date_str(date)],
                summary_from_row,
            )
            .optional()?;
        Ok(summary)
    }

    /// Summaries newest first within an optional inclusive date range.
    pub fn list_daily_summaries(
        &self,
        user_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        limit: i64,
    ) -> Result<Vec<DailySummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM daily_summaries
             WHERE user_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date DESC LIMIT ?4"
        ))?;
        let summaries = stmt
            .query_map(
                params![user_id, from.map(date_str), to.map(date_str), limit],
                summary_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Set or clear the free-text note. `None` when no summary exists for the day.
    pub fn update_summary_text(
        &self,
        user_id: &str,
        date: NaiveDate,
        text: Option<&str>,
    ) -> Result<Option<DailySummary>> {
        let rows = self.conn.execute(
            "UPDATE daily_summaries SET summary_text = ?1, updated_at = ?2
             WHERE user_id = ?3 AND date = ?4",
            params![text, now(), user_id, date_str(date)],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_daily_summary(user_id, date)
    }

    pub fn delete_daily_summary(&self, user_id: &str, date: NaiveDate) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM daily_summaries WHERE user_id = ?1 AND date = ?2",
            params![user_id, date_str(date)],
        )?;
        Ok(rows > 0)
    }
}

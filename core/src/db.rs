use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{HealthEntry, MealPlan, NewHealthEntry, NewMealPlan, Profile, ProfileUpdate};
use crate::realtime::{ChangeEvent, ChangeFeed, ChangeKind, Table};

const PROFILE_COLUMNS: &str = "id, first_name, last_name, age, gender, weight, height, dietary_goals,
     allergies, preferred_cuisines, activity_level, created_at, updated_at";
const HEALTH_COLUMNS: &str = "id, user_id, date, steps, sleep_hours, mood, created_at";
const MEAL_PLAN_COLUMNS: &str = "id, user_id, week_start_date, meals, grocery_list, created_at";

pub struct Database {
    conn: Connection,
    feed: ChangeFeed,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_date_column(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn text_value(v: Option<&String>) -> SqlValue {
    v.map_or(SqlValue::Null, |s| SqlValue::Text(s.clone()))
}

fn list_value(v: Option<&Vec<String>>) -> Result<SqlValue> {
    match v {
        Some(list) => Ok(SqlValue::Text(serde_json::to_string(list)?)),
        None => Ok(SqlValue::Null),
    }
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database {
            conn,
            feed: ChangeFeed::new(),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Change feed that every write on this database publishes to.
    #[must_use]
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS profiles (
                    id TEXT PRIMARY KEY NOT NULL,
                    first_name TEXT,
                    last_name TEXT,
                    age INTEGER,
                    gender TEXT,
                    weight REAL,
                    height REAL,
                    dietary_goals TEXT,
                    allergies TEXT,
                    preferred_cuisines TEXT,
                    activity_level TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS health_data (
                    id TEXT PRIMARY KEY NOT NULL,
                    user_id TEXT NOT NULL REFERENCES profiles(id),
                    date TEXT NOT NULL,
                    steps INTEGER,
                    sleep_hours REAL,
                    mood INTEGER,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_plans (
                    id TEXT PRIMARY KEY NOT NULL,
                    user_id TEXT NOT NULL REFERENCES profiles(id),
                    week_start_date TEXT NOT NULL,
                    meals TEXT NOT NULL,
                    grocery_list TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_health_data_user_date ON health_data(user_id, date);
                CREATE INDEX IF NOT EXISTS idx_meal_plans_user ON meal_plans(user_id, created_at);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    fn publish<T: Serialize>(
        &self,
        table: Table,
        kind: ChangeKind,
        owner: &str,
        row: &T,
    ) -> Result<()> {
        let record = serde_json::to_value(row).context("failed to serialize change record")?;
        self.feed.publish(ChangeEvent {
            table,
            kind,
            owner: owner.to_string(),
            record,
        });
        Ok(())
    }

    // --- Row mapping helpers ---

    fn profile_from_row(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
        let allergies: Option<String> = row.get(8)?;
        let cuisines: Option<String> = row.get(9)?;
        Ok(Profile {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            age: row.get(3)?,
            gender: row.get(4)?,
            weight: row.get(5)?,
            height: row.get(6)?,
            dietary_goals: row.get(7)?,
            allergies: allergies.map(|s| parse_json_column(8, &s)).transpose()?,
            preferred_cuisines: cuisines.map(|s| parse_json_column(9, &s)).transpose()?,
            activity_level: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn health_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<HealthEntry> {
        let date: String = row.get(2)?;
        Ok(HealthEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date: parse_date_column(2, &date)?,
            steps: row.get(3)?,
            sleep_hours: row.get(4)?,
            mood: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn meal_plan_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealPlan> {
        let week_start: String = row.get(2)?;
        let meals: String = row.get(3)?;
        let grocery_list: Option<String> = row.get(4)?;
        Ok(MealPlan {
            id: row.get(0)?,
            user_id: row.get(1)?,
            week_start_date: parse_date_column(2, &week_start)?,
            meals: parse_json_column(3, &meals)?,
            grocery_list: grocery_list.map(|s| parse_json_column(4, &s)).transpose()?,
            created_at: row.get(5)?,
        })
    }

    // --- Profiles ---

    /// Create the empty profile row for a freshly signed-up user. Existing rows are kept.
    pub fn create_profile(&self, user_id: &str) -> Result<Profile> {
        if user_id.trim().is_empty() {
            bail!("User id must not be empty");
        }
        let ts = now();
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO profiles (id, created_at, updated_at) VALUES (?1, ?2, ?3)",
            params![user_id, ts, ts],
        )?;
        let profile = self
            .get_profile(user_id)?
            .context("Profile not found after insert")?;
        if inserted > 0 {
            self.publish(Table::Profiles, ChangeKind::Insert, user_id, &profile)?;
        }
        Ok(profile)
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let profile = self
            .conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                params![user_id],
                Self::profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    pub fn profile_exists(&self, user_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM profiles WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Apply only the fields present in `update`. Fails if the profile does not exist.
    pub fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<Profile> {
        if !self.profile_exists(user_id)? {
            bail!("Profile not found for user '{user_id}'");
        }

        let mut assignments: Vec<(&str, SqlValue)> = Vec::new();
        if let Some(v) = &update.first_name {
            assignments.push(("first_name", text_value(v.as_ref())));
        }
        if let Some(v) = &update.last_name {
            assignments.push(("last_name", text_value(v.as_ref())));
        }
        if let Some(v) = update.age {
            assignments.push(("age", v.map_or(SqlValue::Null, SqlValue::Integer)));
        }
        if let Some(v) = &update.gender {
            assignments.push(("gender", text_value(v.as_ref())));
        }
        if let Some(v) = update.weight {
            assignments.push(("weight", v.map_or(SqlValue::Null, SqlValue::Real)));
        }
        if let Some(v) = update.height {
            assignments.push(("height", v.map_or(SqlValue::Null, SqlValue::Real)));
        }
        if let Some(v) = &update.dietary_goals {
            assignments.push(("dietary_goals", text_value(v.as_ref())));
        }
        if let Some(v) = &update.allergies {
            assignments.push(("allergies", list_value(v.as_ref())?));
        }
        if let Some(v) = &update.preferred_cuisines {
            assignments.push(("preferred_cuisines", list_value(v.as_ref())?));
        }
        if let Some(v) = &update.activity_level {
            assignments.push(("activity_level", text_value(v.as_ref())));
        }

        if !assignments.is_empty() {
            let mut set_clause: Vec<String> = assignments
                .iter()
                .enumerate()
                .map(|(i, (col, _))| format!("{col} = ?{}", i + 1))
                .collect();
            set_clause.push(format!("updated_at = ?{}", assignments.len() + 1));
            let sql = format!(
                "UPDATE profiles SET {} WHERE id = ?{}",
                set_clause.join(", "),
                assignments.len() + 2
            );
            let mut values: Vec<SqlValue> = assignments.into_iter().map(|(_, v)| v).collect();
            values.push(SqlValue::Text(now()));
            values.push(SqlValue::Text(user_id.to_string()));
            self.conn.execute(&sql, params_from_iter(values))?;
        }

        let profile = self
            .get_profile(user_id)?
            .context("Profile not found after update")?;
        self.publish(Table::Profiles, ChangeKind::Update, user_id, &profile)?;
        Ok(profile)
    }

    // --- Health data ---

    pub fn insert_health_entry(&self, user_id: &str, entry: &NewHealthEntry) -> Result<HealthEntry> {
        let id = Uuid::new_v4().to_string();
        let date_str = entry.date.format("%Y-%m-%d").to_string();
        self.conn
            .execute(
                "INSERT INTO health_data (id, user_id, date, steps, sleep_hours, mood, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    user_id,
                    date_str,
                    entry.steps,
                    entry.sleep_hours,
                    entry.mood,
                    now(),
                ],
            )
            .with_context(|| format!("Failed to insert health entry for user '{user_id}'"))?;
        let inserted = self.get_health_entry(user_id, &id)?;
        self.publish(Table::HealthData, ChangeKind::Insert, user_id, &inserted)?;
        Ok(inserted)
    }

    pub fn get_health_entry(&self, user_id: &str, id: &str) -> Result<HealthEntry> {
        self.conn
            .query_row(
                &format!("SELECT {HEALTH_COLUMNS} FROM health_data WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                Self::health_entry_from_row,
            )
            .context("Health entry not found")
    }

    /// Newest first by observation date.
    pub fn list_health_entries(&self, user_id: &str) -> Result<Vec<HealthEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HEALTH_COLUMNS} FROM health_data WHERE user_id = ?1
             ORDER BY date DESC, created_at DESC, rowid DESC"
        ))?;
        let entries = stmt
            .query_map(params![user_id], Self::health_entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // --- Meal plans ---

    pub fn insert_meal_plan(&self, user_id: &str, plan: &NewMealPlan) -> Result<MealPlan> {
        let id = Uuid::new_v4().to_string();
        let week_start = plan.week_start_date.format("%Y-%m-%d").to_string();
        let meals = serde_json::to_string(&plan.meals)?;
        let grocery_list = plan
            .grocery_list
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn
            .execute(
                "INSERT INTO meal_plans (id, user_id, week_start_date, meals, grocery_list, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, user_id, week_start, meals, grocery_list, now()],
            )
            .with_context(|| format!("Failed to insert meal plan for user '{user_id}'"))?;
        let inserted = self
            .get_meal_plan(user_id, &id)?
            .context("Meal plan not found after insert")?;
        self.publish(Table::MealPlans, ChangeKind::Insert, user_id, &inserted)?;
        Ok(inserted)
    }

    pub fn get_meal_plan(&self, user_id: &str, id: &str) -> Result<Option<MealPlan>> {
        let plan = self
            .conn
            .query_row(
                &format!("SELECT {MEAL_PLAN_COLUMNS} FROM meal_plans WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                Self::meal_plan_from_row,
            )
            .optional()?;
        Ok(plan)
    }

    /// Most recently created first.
    pub fn list_meal_plans(&self, user_id: &str) -> Result<Vec<MealPlan>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEAL_PLAN_COLUMNS} FROM meal_plans WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let plans = stmt
            .query_map(params![user_id], Self::meal_plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }
}

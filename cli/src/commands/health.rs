use anyhow::{Result, bail};
use chrono::{Days, Local, NaiveDate};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use crate::config::Config;
use nutrisense_core::db::Database;
use nutrisense_core::models::{HealthEntry, NewHealthEntry};

use super::helpers::{open_session, or_dash, parse_date};

pub(crate) fn cmd_health_log(
    config: &Config,
    db: &Database,
    steps: Option<i64>,
    sleep: Option<f64>,
    mood: Option<i64>,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    if steps.is_none() && sleep.is_none() && mood.is_none() {
        bail!("Nothing to log. Pass at least one of --steps, --sleep or --mood");
    }
    if steps.is_some_and(|s| s < 0) {
        bail!("Steps must not be negative");
    }
    if sleep.is_some_and(|h| !(0.0..=24.0).contains(&h)) {
        bail!("Sleep must be between 0 and 24 hours");
    }
    if mood.is_some_and(|m| !(1..=10).contains(&m)) {
        bail!("Mood must be between 1 and 10");
    }

    let entry = NewHealthEntry {
        date: parse_date(date)?,
        steps,
        sleep_hours: sleep,
        mood,
    };

    let mut sync = open_session(config, db)?;
    let saved = sync.add_health_entry(&entry)?;
    sync.poll();

    if json {
        println!("{}", serde_json::to_string_pretty(&saved)?);
    } else {
        println!(
            "Logged for {}: {} steps, {} h sleep, mood {}",
            saved.date.format("%Y-%m-%d"),
            or_dash(saved.steps),
            or_dash(saved.sleep_hours),
            saved.mood.map_or_else(|| "-".to_string(), |m| format!("{m}/10")),
        );
    }
    Ok(())
}

pub(crate) fn cmd_health_history(
    config: &Config,
    db: &Database,
    days: u32,
    json: bool,
) -> Result<()> {
    let sync = open_session(config, db)?;
    let cutoff = Local::now()
        .date_naive()
        .checked_sub_days(Days::new(days.into()))
        .unwrap_or(NaiveDate::MIN);
    let entries: Vec<&HealthEntry> = sync
        .health_entries()
        .iter()
        .filter(|e| e.date > cutoff)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No health data in the last {days} days. Log some with `nutrisense health log`.");
        return Ok(());
    }
    print_health_table(&entries);
    Ok(())
}

pub(super) fn print_health_table(entries: &[&HealthEntry]) {
    #[derive(Tabled)]
    struct HealthRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Steps")]
        steps: String,
        #[tabled(rename = "Sleep (h)")]
        sleep: String,
        #[tabled(rename = "Mood")]
        mood: String,
    }

    let rows: Vec<HealthRow> = entries
        .iter()
        .map(|e| HealthRow {
            date: e.date.format("%Y-%m-%d").to_string(),
            steps: or_dash(e.steps),
            sleep: e
                .sleep_hours
                .map_or_else(|| "-".to_string(), |h| format!("{h:.1}")),
            mood: e.mood.map_or_else(|| "-".to_string(), |m| format!("{m}/10")),
        })
        .collect();

    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Config, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_data_dir(dir.path().to_path_buf()).unwrap();
        let db = Database::open_in_memory().unwrap();
        db.create_profile("alice").unwrap();
        config.save_session("alice").unwrap();
        (dir, config, db)
    }

    #[test]
    fn test_log_partial_entry() {
        let (_dir, config, db) = setup();
        cmd_health_log(&config, &db, Some(8500), None, Some(7), None, true).unwrap();

        let entries = db.list_health_entries("alice").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].steps, Some(8500));
        assert_eq!(entries[0].sleep_hours, None);
        assert_eq!(entries[0].mood, Some(7));
        assert_eq!(entries[0].date, Local::now().date_naive());
    }

    #[test]
    fn test_log_rejects_empty_and_out_of_range() {
        let (_dir, config, db) = setup();
        assert!(cmd_health_log(&config, &db, None, None, None, None, true).is_err());
        assert!(cmd_health_log(&config, &db, None, None, Some(11), None, true).is_err());
        assert!(cmd_health_log(&config, &db, None, Some(25.0), None, None, true).is_err());
        assert!(cmd_health_log(&config, &db, Some(-5), None, None, None, true).is_err());
        assert!(db.list_health_entries("alice").unwrap().is_empty());
    }

    #[test]
    fn test_log_with_explicit_date() {
        let (_dir, config, db) = setup();
        cmd_health_log(
            &config,
            &db,
            None,
            Some(7.5),
            None,
            Some("2024-03-02".to_string()),
            true,
        )
        .unwrap();
        let entries = db.list_health_entries("alice").unwrap();
        assert_eq!(entries[0].date.to_string(), "2024-03-02");
    }

    #[test]
    fn test_history_with_huge_window_shows_everything() {
        let (_dir, config, db) = setup();
        cmd_health_log(
            &config,
            &db,
            Some(100),
            None,
            None,
            Some("1999-12-31".to_string()),
            true,
        )
        .unwrap();
        cmd_health_history(&config, &db, u32::MAX, true).unwrap();
        cmd_health_history(&config, &db, u32::MAX, false).unwrap();
    }

    #[test]
    fn test_history_requires_session() {
        let (_dir, config, db) = setup();
        cmd_health_history(&config, &db, 7, true).unwrap();
        config.clear_session().unwrap();
        assert!(cmd_health_history(&config, &db, 7, true).is_err());
    }
}

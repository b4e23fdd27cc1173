use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};

use crate::config::Config;
use nutrisense_core::db::Database;
use nutrisense_core::sync::UserDataSync;

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")),
        },
    }
}

/// Split a comma separated flag value, dropping blanks.
pub(crate) fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub(crate) fn require_user(config: &Config) -> Result<String> {
    match config.current_user()? {
        Some(user) => Ok(user),
        None => bail!("Not signed in. Run `nutrisense signup` or `nutrisense signin <user-id>` first"),
    }
}

/// Sync session for the signed-in user, already loaded.
pub(crate) fn open_session<'a>(
    config: &Config,
    db: &'a Database,
) -> Result<UserDataSync<&'a Database>> {
    let user = require_user(config)?;
    let mut sync = UserDataSync::new(db);
    sync.set_user(Some(&user));
    Ok(sync)
}

pub(crate) fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

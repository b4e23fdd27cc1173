use anyhow::{Result, bail};

use crate::config::Config;
use nutrisense_core::db::Database;
use nutrisense_core::models::new_user_id;

pub(crate) fn cmd_signup(
    config: &Config,
    db: &Database,
    user_id: Option<String>,
    json: bool,
) -> Result<()> {
    let user_id = user_id.unwrap_or_else(new_user_id);
    if db.profile_exists(&user_id)? {
        bail!("User '{user_id}' already exists. Use `nutrisense signin {user_id}` instead");
    }
    let profile = db.create_profile(&user_id)?;
    config.save_session(&profile.id)?;
    tracing::info!(user = %profile.id, "signed up");

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Signed up as {}", profile.id);
        println!("Next: run `nutrisense onboard` to set up your profile.");
    }
    Ok(())
}

pub(crate) fn cmd_signin(config: &Config, db: &Database, user_id: &str, json: bool) -> Result<()> {
    let Some(profile) = db.get_profile(user_id)? else {
        bail!("No user '{user_id}'. Run `nutrisense signup` to create one");
    };
    config.save_session(&profile.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Signed in as {} ({})", profile.display_name(), profile.id);
        if !profile.is_onboarded() {
            println!("Your profile is incomplete. Run `nutrisense onboard` to finish it.");
        }
    }
    Ok(())
}

pub(crate) fn cmd_signout(config: &Config, json: bool) -> Result<()> {
    let was_signed_in = config.clear_session()?;
    if json {
        println!("{}", serde_json::json!({ "signed_out": was_signed_in }));
    } else if was_signed_in {
        println!("Signed out.");
    } else {
        println!("Not signed in.");
    }
    Ok(())
}

pub(crate) fn cmd_whoami(config: &Config, db: &Database, json: bool) -> Result<()> {
    let Some(user_id) = config.current_user()? else {
        bail!("Not signed in");
    };
    let Some(profile) = db.get_profile(&user_id)? else {
        bail!("Signed in as '{user_id}', but that user no longer exists. Run `nutrisense signout`");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("{} ({})", profile.display_name(), profile.id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Config, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_data_dir(dir.path().to_path_buf()).unwrap();
        let db = Database::open_in_memory().unwrap();
        (dir, config, db)
    }

    #[test]
    fn test_signup_creates_profile_and_session() {
        let (_dir, config, db) = setup();
        cmd_signup(&config, &db, Some("alice".to_string()), true).unwrap();
        assert!(db.profile_exists("alice").unwrap());
        assert_eq!(config.current_user().unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_signup_generates_id() {
        let (_dir, config, db) = setup();
        cmd_signup(&config, &db, None, true).unwrap();
        let user = config.current_user().unwrap().unwrap();
        assert!(db.profile_exists(&user).unwrap());
    }

    #[test]
    fn test_signup_rejects_existing_user() {
        let (_dir, config, db) = setup();
        db.create_profile("alice").unwrap();
        assert!(cmd_signup(&config, &db, Some("alice".to_string()), true).is_err());
    }

    #[test]
    fn test_signin_requires_known_user() {
        let (_dir, config, db) = setup();
        assert!(cmd_signin(&config, &db, "ghost", true).is_err());
        assert!(config.current_user().unwrap().is_none());

        db.create_profile("bob").unwrap();
        cmd_signin(&config, &db, "bob", true).unwrap();
        assert_eq!(config.current_user().unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn test_signout_clears_session() {
        let (_dir, config, db) = setup();
        db.create_profile("bob").unwrap();
        cmd_signin(&config, &db, "bob", true).unwrap();
        cmd_signout(&config, true).unwrap();
        assert!(config.current_user().unwrap().is_none());
        assert!(cmd_whoami(&config, &db, true).is_err());
    }
}

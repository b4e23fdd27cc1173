use anyhow::{Result, bail};
use tabled::{Table, Tabled, settings::Style};

use crate::config::Config;
use nutrisense_core::db::Database;
use nutrisense_core::models::{
    ACTIVITY_LEVELS, COMMON_ALLERGIES, COMMON_CUISINES, DIETARY_GOALS, GENDERS, OnboardingAnswers,
    Profile, ProfileUpdate, validate_activity_level, validate_gender,
};

use super::helpers::{open_session, or_dash, parse_list};

/// Flags shared by `onboard` and `profile set`.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct ProfileFields {
    /// First name
    #[arg(long)]
    pub name: Option<String>,
    /// Last name
    #[arg(long)]
    pub last_name: Option<String>,
    /// Age in years
    #[arg(long)]
    pub age: Option<i64>,
    /// Gender: male, female, other
    #[arg(long)]
    pub gender: Option<String>,
    /// Weight in kg
    #[arg(long)]
    pub weight: Option<f64>,
    /// Height in cm
    #[arg(long)]
    pub height: Option<f64>,
    /// Dietary goal (e.g. `weight_loss`, `muscle_gain`, maintenance)
    #[arg(long)]
    pub goal: Option<String>,
    /// Activity level: sedentary, `lightly_active`, `moderately_active`, `very_active`, `extremely_active`
    #[arg(long)]
    pub activity: Option<String>,
    /// Comma separated allergies (e.g. "Nuts,Dairy"); pass "" to clear
    #[arg(long)]
    pub allergies: Option<String>,
    /// Comma separated preferred cuisines (e.g. "Italian,Asian"); pass "" to clear
    #[arg(long)]
    pub cuisines: Option<String>,
}

impl ProfileFields {
    fn into_onboarding(self) -> OnboardingAnswers {
        OnboardingAnswers {
            name: self.name.unwrap_or_default(),
            last_name: self.last_name,
            age: self.age,
            gender: self.gender,
            weight: self.weight,
            height: self.height,
            primary_goal: self.goal.unwrap_or_default(),
            activity_level: self.activity,
            allergies: self.allergies.as_deref().map(parse_list).unwrap_or_default(),
            cuisines: self.cuisines.as_deref().map(parse_list).unwrap_or_default(),
        }
    }

    fn into_update(self) -> Result<ProfileUpdate> {
        if self.age.is_some_and(|age| age <= 0) {
            bail!("Age must be greater than 0");
        }
        for (label, value) in [("Weight", self.weight), ("Height", self.height)] {
            if value.is_some_and(|v| v <= 0.0) {
                bail!("{label} must be greater than 0");
            }
        }
        Ok(ProfileUpdate {
            first_name: self.name.map(Some),
            last_name: self.last_name.map(Some),
            age: self.age.map(Some),
            gender: self
                .gender
                .as_deref()
                .map(validate_gender)
                .transpose()?
                .map(Some),
            weight: self.weight.map(Some),
            height: self.height.map(Some),
            dietary_goals: self.goal.map(Some),
            activity_level: self
                .activity
                .as_deref()
                .map(validate_activity_level)
                .transpose()?
                .map(Some),
            allergies: self.allergies.as_deref().map(|a| Some(parse_list(a))),
            preferred_cuisines: self.cuisines.as_deref().map(|c| Some(parse_list(c))),
        })
    }
}

pub(crate) fn cmd_onboard(
    config: &Config,
    db: &Database,
    fields: ProfileFields,
    json: bool,
) -> Result<()> {
    let update = fields.into_onboarding().into_profile_update()?;
    let mut sync = open_session(config, db)?;
    sync.update_profile(&update)?;
    sync.poll();

    let Some(profile) = sync.profile() else {
        bail!("Profile was not saved");
    };
    if json {
        println!("{}", serde_json::to_string_pretty(profile)?);
    } else {
        println!("Welcome, {}! Your profile is set up.", profile.display_name());
        println!("Try `nutrisense plan generate` for your first weekly meal plan.");
    }
    Ok(())
}

pub(crate) fn cmd_profile_show(config: &Config, db: &Database, json: bool) -> Result<()> {
    let sync = open_session(config, db)?;
    let Some(profile) = sync.profile() else {
        bail!("No profile found. Run `nutrisense onboard` first");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(profile)?);
    } else {
        print_profile(profile);
    }
    Ok(())
}

pub(crate) fn cmd_profile_set(
    config: &Config,
    db: &Database,
    fields: ProfileFields,
    json: bool,
) -> Result<()> {
    let update = fields.into_update()?;
    if update.is_empty() {
        bail!("Nothing to update. Pass at least one field flag");
    }

    let mut sync = open_session(config, db)?;
    let profile = sync.update_profile(&update)?;
    sync.poll();

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Profile updated.");
        print_profile(&profile);
    }
    Ok(())
}

/// Choices offered during onboarding. Goals, allergies and cuisines also accept free text.
pub(crate) fn cmd_profile_options(json: bool) -> Result<()> {
    let options = [
        ("Goals", DIETARY_GOALS),
        ("Activity levels", ACTIVITY_LEVELS),
        ("Genders", GENDERS),
        ("Common allergies", COMMON_ALLERGIES),
        ("Cuisines", COMMON_CUISINES),
    ];

    if json {
        let map: serde_json::Map<String, serde_json::Value> = options
            .iter()
            .map(|(label, values)| {
                let key = label.to_lowercase().replace(' ', "_");
                (key, serde_json::json!(values))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    for (label, values) in options {
        println!("{label}: {}", values.join(", "));
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    #[derive(Tabled)]
    struct FieldRow {
        #[tabled(rename = "Field")]
        field: &'static str,
        #[tabled(rename = "Value")]
        value: String,
    }

    let name = [profile.first_name.as_deref(), profile.last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let list = |items: Option<&Vec<String>>| match items {
        Some(items) if !items.is_empty() => items.join(", "),
        _ => "-".to_string(),
    };

    let rows = vec![
        FieldRow {
            field: "User",
            value: profile.id.clone(),
        },
        FieldRow {
            field: "Name",
            value: if name.is_empty() { "-".to_string() } else { name },
        },
        FieldRow {
            field: "Age",
            value: or_dash(profile.age),
        },
        FieldRow {
            field: "Gender",
            value: or_dash(profile.gender.as_deref()),
        },
        FieldRow {
            field: "Weight (kg)",
            value: or_dash(profile.weight),
        },
        FieldRow {
            field: "Height (cm)",
            value: or_dash(profile.height),
        },
        FieldRow {
            field: "Goal",
            value: or_dash(profile.dietary_goals.as_deref()),
        },
        FieldRow {
            field: "Activity",
            value: or_dash(profile.activity_level.as_deref()),
        },
        FieldRow {
            field: "Allergies",
            value: list(profile.allergies.as_ref()),
        },
        FieldRow {
            field: "Cuisines",
            value: list(profile.preferred_cuisines.as_ref()),
        },
    ];

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{table}");
}

use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

pub const ACTIVITY_LEVELS: &[&str] = &[
    "sedentary",
    "lightly_active",
    "moderately_active",
    "very_active",
    "extremely_active",
];

/// Goals offered by the onboarding form. Free text is accepted as well.
pub const DIETARY_GOALS: &[&str] = &[
    "weight_loss",
    "weight_gain",
    "muscle_gain",
    "maintenance",
    "general_health",
];

pub const GENDERS: &[&str] = &["male", "female", "other"];

pub const COMMON_ALLERGIES: &[&str] = &["Nuts", "Dairy", "Gluten", "Shellfish", "Eggs", "Soy"];

pub const COMMON_CUISINES: &[&str] = &[
    "Italian",
    "Mexican",
    "Asian",
    "Mediterranean",
    "American",
    "Indian",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub dietary_goals: Option<String>,
    pub allergies: Option<Vec<String>>,
    pub preferred_cuisines: Option<Vec<String>>,
    pub activity_level: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Profile {
    /// A profile is usable for plan generation once the body metrics and a goal are known.
    #[must_use]
    pub fn is_onboarded(&self) -> bool {
        self.age.is_some()
            && self.weight.is_some()
            && self.height.is_some()
            && self.dietary_goals.as_deref().is_some_and(|g| !g.is_empty())
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or("there")
    }
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Partial profile update. The outer `Option` says whether the field is
/// touched at all; the inner one allows clearing it (`null` in JSON).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(clippy::option_option)]
pub struct ProfileUpdate {
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub age: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub gender: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub weight: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub height: Option<Option<f64>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub dietary_goals: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub allergies: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub preferred_cuisines: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "deserialize_some", skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<Option<String>>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: Option<i64>,
    pub sleep_hours: Option<f64>,
    pub mood: Option<i64>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHealthEntry {
    pub date: NaiveDate,
    pub steps: Option<i64>,
    pub sleep_hours: Option<f64>,
    pub mood: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    pub id: String,
    pub user_id: String,
    pub week_start_date: NaiveDate,
    pub meals: serde_json::Value,
    pub grocery_list: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMealPlan {
    pub week_start_date: NaiveDate,
    pub meals: serde_json::Value,
    pub grocery_list: Option<serde_json::Value>,
}

/// Everything the onboarding form collects, before conversion into a profile update.
#[derive(Debug, Clone, Default)]
pub struct OnboardingAnswers {
    pub name: String,
    pub last_name: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub primary_goal: String,
    pub activity_level: Option<String>,
    pub allergies: Vec<String>,
    pub cuisines: Vec<String>,
}

impl OnboardingAnswers {
    /// Form-level checks: name, age and goal are required; enumerations must match.
    pub fn into_profile_update(self) -> Result<ProfileUpdate> {
        let name = self.name.trim().to_string();
        let goal = self.primary_goal.trim().to_string();
        if name.is_empty() || self.age.is_none() || goal.is_empty() {
            bail!("Please fill in all required fields (name, age, goal)");
        }
        let activity_level = self
            .activity_level
            .as_deref()
            .map(validate_activity_level)
            .transpose()?;
        let gender = self.gender.as_deref().map(validate_gender).transpose()?;
        let last_name = self
            .last_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(ProfileUpdate {
            first_name: Some(Some(name)),
            last_name: last_name.map(Some),
            age: Some(self.age),
            gender: Some(gender),
            weight: Some(self.weight),
            height: Some(self.height),
            dietary_goals: Some(Some(goal)),
            activity_level: Some(activity_level),
            allergies: Some(Some(self.allergies)),
            preferred_cuisines: Some(Some(self.cuisines)),
            ..ProfileUpdate::default()
        })
    }
}

pub fn validate_activity_level(level: &str) -> Result<String> {
    let normalized = level.trim().to_lowercase().replace(['-', ' '], "_");
    if ACTIVITY_LEVELS.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        bail!(
            "Invalid activity level '{level}'. Must be one of: {}",
            ACTIVITY_LEVELS.join(", ")
        )
    }
}

pub fn validate_gender(gender: &str) -> Result<String> {
    let lower = gender.trim().to_lowercase();
    if GENDERS.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        bail!(
            "Invalid gender '{gender}'. Must be one of: {}",
            GENDERS.join(", ")
        )
    }
}

/// Opaque identity for a fresh signup.
#[must_use]
pub fn new_user_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Sunday on or before `date`.
#[must_use]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = i64::from(date.weekday().num_days_from_sunday());
    date - chrono::Duration::days(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_profile() -> Profile {
        Profile {
            id: "u1".to_string(),
            first_name: None,
            last_name: None,
            age: None,
            gender: None,
            weight: None,
            height: None,
            dietary_goals: None,
            allergies: None,
            preferred_cuisines: None,
            activity_level: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_week_start_is_previous_sunday() {
        // 2024-06-15 is a Saturday
        let sat = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(week_start(sat), NaiveDate::from_ymd_opt(2024, 6, 9).unwrap());

        let sun = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        assert_eq!(week_start(sun), sun);
    }

    #[test]
    fn test_is_onboarded_requires_metrics_and_goal() {
        let mut p = empty_profile();
        assert!(!p.is_onboarded());

        p.age = Some(30);
        p.weight = Some(70.0);
        p.height = Some(175.0);
        assert!(!p.is_onboarded());

        p.dietary_goals = Some("weight_loss".to_string());
        assert!(p.is_onboarded());
    }

    #[test]
    fn test_display_name_falls_back() {
        let mut p = empty_profile();
        assert_eq!(p.display_name(), "there");
        p.first_name = Some("Ada".to_string());
        assert_eq!(p.display_name(), "Ada");
    }

    #[test]
    fn test_validate_activity_level() {
        assert_eq!(validate_activity_level("Very Active").unwrap(), "very_active");
        assert_eq!(validate_activity_level("sedentary").unwrap(), "sedentary");
        assert!(validate_activity_level("couch").is_err());
    }

    #[test]
    fn test_profile_update_distinguishes_absent_and_null() {
        let update: ProfileUpdate =
            serde_json::from_str(r#"{"age": 31, "gender": null}"#).unwrap();
        assert_eq!(update.age, Some(Some(31)));
        assert_eq!(update.gender, Some(None));
        assert_eq!(update.weight, None);
        assert!(!update.is_empty());

        let empty: ProfileUpdate = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_onboarding_requires_name_age_goal() {
        let answers = OnboardingAnswers {
            name: "Ada".to_string(),
            age: None,
            primary_goal: "weight_loss".to_string(),
            ..OnboardingAnswers::default()
        };
        let err = answers.into_profile_update().unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_onboarding_builds_update() {
        let answers = OnboardingAnswers {
            name: " Ada ".to_string(),
            last_name: None,
            age: Some(36),
            gender: Some("Female".to_string()),
            weight: Some(61.5),
            height: Some(168.0),
            primary_goal: "muscle_gain".to_string(),
            activity_level: Some("moderately_active".to_string()),
            allergies: vec!["Nuts".to_string()],
            cuisines: vec!["Italian".to_string(), "Indian".to_string()],
        };
        let update = answers.into_profile_update().unwrap();
        assert_eq!(update.first_name, Some(Some("Ada".to_string())));
        assert_eq!(update.gender, Some(Some("female".to_string())));
        assert_eq!(update.dietary_goals, Some(Some("muscle_gain".to_string())));
        assert_eq!(
            update.preferred_cuisines,
            Some(Some(vec!["Italian".to_string(), "Indian".to_string()]))
        );
        assert_eq!(update.last_name, None);
    }

    #[test]
    fn test_onboarding_keeps_last_name() {
        let answers = OnboardingAnswers {
            name: "Ada".to_string(),
            last_name: Some(" Lovelace ".to_string()),
            age: Some(36),
            primary_goal: "maintenance".to_string(),
            ..OnboardingAnswers::default()
        };
        let update = answers.into_profile_update().unwrap();
        assert_eq!(update.last_name, Some(Some("Lovelace".to_string())));

        let blank = OnboardingAnswers {
            name: "Ada".to_string(),
            last_name: Some("  ".to_string()),
            age: Some(36),
            primary_goal: "maintenance".to_string(),
            ..OnboardingAnswers::default()
        };
        assert_eq!(blank.into_profile_update().unwrap().last_name, None);
    }

    #[test]
    fn test_onboarding_rejects_bad_activity_level() {
        let answers = OnboardingAnswers {
            name: "Ada".to_string(),
            age: Some(36),
            primary_goal: "maintenance".to_string(),
            activity_level: Some("hyperactive".to_string()),
            ..OnboardingAnswers::default()
        };
        assert!(answers.into_profile_update().is_err());
    }
}

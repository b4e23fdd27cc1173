use std::fmt;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{NewMealPlan, Profile};

pub const SYSTEM_PROMPT: &str = "You are a professional nutritionist and meal planning expert. \
Create detailed, healthy, and practical meal plans. Always respond with valid JSON only.";

pub const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const RESPONSE_SHAPE: &str = r#"{
  "explanation": "Brief explanation",
  "meals": {
    "monday": {
      "breakfast": {"name": "...", "calories": 300, "protein": "15g", "carbs": "40g", "fat": "10g"},
      "lunch": {...},
      "dinner": {...},
      "snacks": [{"name": "...", "calories": 150, "protein": "5g", "carbs": "20g", "fat": "5g"}]
    },
    "tuesday": {...},
    "wednesday": {...},
    "thursday": {...},
    "friday": {...},
    "saturday": {...},
    "sunday": {...}
  },
  "grocery_list": {
    "proteins": ["chicken breast", "salmon"],
    "vegetables": ["broccoli", "spinach"],
    "fruits": ["bananas", "apples"],
    "grains": ["brown rice", "quinoa"],
    "dairy": ["Greek yogurt", "milk"],
    "pantry": ["olive oil", "spices"]
  }
}"#;

/// Request body of the meal-plan function. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MealPlanPreferences {
    #[serde(default)]
    pub dietary_goals: Option<String>,
    #[serde(default)]
    pub allergies: Option<Vec<String>>,
    #[serde(default)]
    pub preferred_cuisines: Option<Vec<String>>,
    #[serde(default)]
    pub activity_level: Option<String>,
}

impl MealPlanPreferences {
    #[must_use]
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            dietary_goals: profile.dietary_goals.clone(),
            allergies: profile.allergies.clone(),
            preferred_cuisines: profile.preferred_cuisines.clone(),
            activity_level: profile.activity_level.clone(),
        }
    }
}

fn or_default<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or(default)
}

fn joined_or(list: Option<&[String]>, default: &str) -> String {
    match list {
        Some(items) if !items.is_empty() => items.join(", "),
        _ => default.to_string(),
    }
}

#[must_use]
pub fn build_prompt(prefs: &MealPlanPreferences) -> String {
    format!(
        "Create a personalized weekly meal plan for someone with these preferences:
- Dietary goals: {goals}
- Allergies: {allergies}
- Preferred cuisines: {cuisines}
- Activity level: {activity}

Please provide:
1. 7 days of meals (breakfast, lunch, dinner, 2 snacks)
2. Nutritional information for each meal
3. A grocery shopping list organized by category
4. Brief explanation of why this plan fits their goals

Format the response as JSON with this structure:
{RESPONSE_SHAPE}",
        goals = or_default(prefs.dietary_goals.as_deref(), "General health"),
        allergies = joined_or(prefs.allergies.as_deref(), "None"),
        cuisines = joined_or(prefs.preferred_cuisines.as_deref(), "Any"),
        activity = or_default(prefs.activity_level.as_deref(), "Moderate"),
    )
}

/// A calorie or macro figure. Models return either bare numbers or strings like `"15g"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) if n.fract() == 0.0 => write!(f, "{n:.0}"),
            Self::Number(n) => write!(f, "{n:.1}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub name: String,
    #[serde(default)]
    pub calories: Option<Amount>,
    #[serde(default)]
    pub protein: Option<Amount>,
    #[serde(default)]
    pub carbs: Option<Amount>,
    #[serde(default)]
    pub fat: Option<Amount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayMeals {
    #[serde(default)]
    pub breakfast: Option<Meal>,
    #[serde(default)]
    pub lunch: Option<Meal>,
    #[serde(default)]
    pub dinner: Option<Meal>,
    #[serde(default)]
    pub snacks: Vec<Meal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekMeals {
    #[serde(default)]
    pub monday: Option<DayMeals>,
    #[serde(default)]
    pub tuesday: Option<DayMeals>,
    #[serde(default)]
    pub wednesday: Option<DayMeals>,
    #[serde(default)]
    pub thursday: Option<DayMeals>,
    #[serde(default)]
    pub friday: Option<DayMeals>,
    #[serde(default)]
    pub saturday: Option<DayMeals>,
    #[serde(default)]
    pub sunday: Option<DayMeals>,
}

impl WeekMeals {
    /// Days in calendar order, skipping any the plan leaves out.
    #[must_use]
    pub fn days(&self) -> Vec<(&'static str, &DayMeals)> {
        [
            &self.monday,
            &self.tuesday,
            &self.wednesday,
            &self.thursday,
            &self.friday,
            &self.saturday,
            &self.sunday,
        ]
        .into_iter()
        .zip(WEEKDAYS)
        .filter_map(|(day, name)| day.as_ref().map(|d| (name, d)))
        .collect()
    }

    pub fn from_value(meals: &Value) -> Result<Self> {
        serde_json::from_value(meals.clone()).context("Stored meals are not a weekly plan")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroceryList {
    #[serde(default)]
    pub proteins: Vec<String>,
    #[serde(default)]
    pub vegetables: Vec<String>,
    #[serde(default)]
    pub fruits: Vec<String>,
    #[serde(default)]
    pub grains: Vec<String>,
    #[serde(default)]
    pub dairy: Vec<String>,
    #[serde(default)]
    pub pantry: Vec<String>,
}

impl GroceryList {
    #[must_use]
    pub fn categories(&self) -> [(&'static str, &[String]); 6] {
        [
            ("Proteins", self.proteins.as_slice()),
            ("Vegetables", self.vegetables.as_slice()),
            ("Fruits", self.fruits.as_slice()),
            ("Grains", self.grains.as_slice()),
            ("Dairy", self.dairy.as_slice()),
            ("Pantry", self.pantry.as_slice()),
        ]
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.categories().iter().map(|(_, items)| items.len()).sum()
    }

    pub fn from_value(list: &Value) -> Result<Self> {
        serde_json::from_value(list.clone()).context("Stored grocery list is malformed")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanDocument {
    #[serde(default)]
    pub explanation: Option<String>,
    pub meals: WeekMeals,
    #[serde(default)]
    pub grocery_list: Option<GroceryList>,
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the model's reply into plan JSON. The raw object is returned so
/// extra fields the model adds survive; it must still have the weekly shape.
pub fn parse_meal_plan(content: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .context("Meal plan reply is not valid JSON")?;
    if !value.is_object() {
        bail!("Meal plan reply is not a JSON object");
    }
    let document: MealPlanDocument = serde_json::from_value(value.clone())
        .context("Meal plan reply does not have the expected shape")?;
    if document.meals.days().is_empty() {
        bail!("Meal plan reply contains no days");
    }
    Ok(value)
}

/// Row to persist for a generated plan.
pub fn to_new_meal_plan(plan: &Value, week_start_date: NaiveDate) -> Result<NewMealPlan> {
    let meals = plan
        .get("meals")
        .cloned()
        .context("Meal plan has no meals")?;
    Ok(NewMealPlan {
        week_start_date,
        meals,
        grocery_list: plan.get("grocery_list").filter(|g| !g.is_null()).cloned(),
    })
}

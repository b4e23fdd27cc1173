use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Profile;

pub const SEARCH_RESULT_COUNT: u32 = 12;
/// Only the first results are expanded with a detail lookup.
pub const MAX_DETAILED_RECIPES: usize = 6;
pub const DEFAULT_MEAL_TYPE: &str = "main course";

/// Request body of the recipe function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeQuery {
    #[serde(default)]
    pub ingredients: Option<Vec<String>>,
    #[serde(default)]
    pub dietary_restrictions: Option<String>,
    #[serde(default)]
    pub cuisine_type: Option<String>,
    #[serde(default)]
    pub meal_type: Option<String>,
}

impl RecipeQuery {
    /// Build a query for `ingredients`, filling the optional filters from a profile.
    #[must_use]
    pub fn for_profile(ingredients: Vec<String>, profile: Option<&Profile>) -> Self {
        let allergies = profile
            .and_then(|p| p.allergies.as_ref())
            .filter(|a| !a.is_empty())
            .map(|a| a.join(","));
        let cuisine = profile
            .and_then(|p| p.preferred_cuisines.as_ref())
            .and_then(|c| c.first().cloned());
        Self {
            ingredients: Some(ingredients),
            dietary_restrictions: allergies,
            cuisine_type: cuisine,
            meal_type: Some(DEFAULT_MEAL_TYPE.to_string()),
        }
    }

    /// Non-empty ingredient list, with blank entries dropped.
    pub fn validated_ingredients(&self) -> Result<Vec<String>> {
        let ingredients: Vec<String> = self
            .ingredients
            .iter()
            .flatten()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        if ingredients.is_empty() {
            bail!("Ingredients array is required and must not be empty");
        }
        Ok(ingredients)
    }

    /// Query parameters for the complex-search endpoint, credential excluded.
    pub fn search_params(&self) -> Result<Vec<(&'static str, String)>> {
        let ingredients = self.validated_ingredients()?;
        Ok(vec![
            ("includeIngredients", ingredients.join(",")),
            ("diet", self.dietary_restrictions.clone().unwrap_or_default()),
            ("cuisine", self.cuisine_type.clone().unwrap_or_default()),
            ("type", self.meal_type.clone().unwrap_or_default()),
            ("number", SEARCH_RESULT_COUNT.to_string()),
            ("addRecipeInformation", "true".to_string()),
            ("fillIngredients", "true".to_string()),
        ])
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Option<Value>,
}

impl SearchResponse {
    /// Summary records to expand. A missing or non-array `results` means nothing was found.
    #[must_use]
    pub fn into_candidates(self) -> Vec<Value> {
        match self.results {
            Some(Value::Array(items)) => items.into_iter().take(MAX_DETAILED_RECIPES).collect(),
            _ => Vec::new(),
        }
    }
}

/// Identifier used for the detail lookup. Spoonacular ids are numeric.
#[must_use]
pub fn recipe_id(recipe: &Value) -> Option<String> {
    match recipe.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// The fields the CLI renders. Everything else in a record is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSummary {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ready_in_minutes: Option<i64>,
    #[serde(default)]
    pub servings: Option<i64>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub health_score: Option<f64>,
}

impl RecipeSummary {
    #[must_use]
    pub fn from_value(recipe: &Value) -> Self {
        serde_json::from_value(recipe.clone()).unwrap_or_default()
    }
}

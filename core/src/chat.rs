use serde::{Deserialize, Serialize};

use crate::models::Profile;

/// Profile facts the assistant is told about. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub dietary_goals: Option<String>,
    #[serde(default)]
    pub allergies: Option<Vec<String>>,
    #[serde(default)]
    pub activity_level: Option<String>,
    #[serde(default)]
    pub age: Option<serde_json::Value>,
    #[serde(default)]
    pub weight: Option<serde_json::Value>,
    #[serde(default)]
    pub height: Option<serde_json::Value>,
}

impl UserContext {
    #[must_use]
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            dietary_goals: profile.dietary_goals.clone(),
            allergies: profile.allergies.clone(),
            activity_level: profile.activity_level.clone(),
            age: profile.age.map(Into::into),
            weight: profile.weight.map(Into::into),
            height: profile.height.map(Into::into),
        }
    }
}

const NOT_SPECIFIED: &str = "Not specified";

fn text_or_default(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or(NOT_SPECIFIED)
}

// Clients send numbers or strings here.
fn scalar_or_default(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => NOT_SPECIFIED.to_string(),
    }
}

#[must_use]
pub fn build_system_prompt(context: Option<&UserContext>) -> String {
    let empty = UserContext::default();
    let ctx = context.unwrap_or(&empty);
    let allergies = match ctx.allergies.as_deref() {
        Some(list) if !list.is_empty() => list.join(", "),
        _ => "None".to_string(),
    };

    format!(
        "You are NutriSenseAI, a caring and knowledgeable AI nutritionist. You provide personalized \
nutrition advice, meal planning help, and wellness guidance.

User Context:
- Dietary Goals: {goals}
- Allergies: {allergies}
- Activity Level: {activity}
- Age: {age}
- Weight: {weight}
- Height: {height}

Guidelines:
- Be encouraging and supportive
- Provide practical, actionable advice
- Consider the user's specific context and restrictions
- Ask clarifying questions when needed
- Always prioritize safety and recommend consulting healthcare providers for medical issues
- Keep responses conversational but informative
- Limit responses to 150-200 words for better readability",
        goals = text_or_default(ctx.dietary_goals.as_deref()),
        activity = text_or_default(ctx.activity_level.as_deref()),
        age = scalar_or_default(ctx.age.as_ref()),
        weight = scalar_or_default(ctx.weight.as_ref()),
        height = scalar_or_default(ctx.height.as_ref()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_without_context() {
        let prompt = build_system_prompt(None);
        assert!(prompt.starts_with("You are NutriSenseAI"));
        assert!(prompt.contains("- Dietary Goals: Not specified"));
        assert!(prompt.contains("- Allergies: None"));
        assert!(prompt.contains("- Age: Not specified"));
        assert!(prompt.contains("150-200 words"));
    }

    #[test]
    fn test_prompt_with_context() {
        let ctx = UserContext {
            dietary_goals: Some("weight_loss".to_string()),
            allergies: Some(vec!["Nuts".to_string(), "Soy".to_string()]),
            activity_level: Some("lightly_active".to_string()),
            age: Some(json!(29)),
            weight: Some(json!(72.5)),
            height: Some(json!("180")),
        };
        let prompt = build_system_prompt(Some(&ctx));
        assert!(prompt.contains("- Dietary Goals: weight_loss"));
        assert!(prompt.contains("- Allergies: Nuts, Soy"));
        assert!(prompt.contains("- Activity Level: lightly_active"));
        assert!(prompt.contains("- Age: 29"));
        assert!(prompt.contains("- Weight: 72.5"));
        assert!(prompt.contains("- Height: 180"));
    }

    #[test]
    fn test_context_from_profile() {
        let profile: Profile = serde_json::from_value(json!({
            "id": "u1",
            "first_name": "Ada",
            "last_name": null,
            "age": 40,
            "gender": null,
            "weight": 65.0,
            "height": null,
            "dietary_goals": "maintenance",
            "allergies": [],
            "preferred_cuisines": null,
            "activity_level": null
        }))
        .unwrap();
        let ctx = UserContext::from_profile(&profile);
        assert_eq!(ctx.age, Some(json!(40)));
        assert!(ctx.height.is_none());

        let prompt = build_system_prompt(Some(&ctx));
        assert!(prompt.contains("- Allergies: None"));
        assert!(prompt.contains("- Height: Not specified"));
    }
}

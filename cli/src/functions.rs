//! The three proxy functions: meal-plan generation, nutrition chat and
//! recipe suggestions. Each validates its input, makes the upstream call and
//! reshapes the reply. Nothing here persists anything; callers do.

use std::fmt;

use anyhow::Result;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::UpstreamConfig;
use crate::openai::OpenAiClient;
use crate::spoonacular::SpoonacularClient;
use nutrisense_core::chat::{UserContext, build_system_prompt};
use nutrisense_core::mealplan::{MealPlanPreferences, SYSTEM_PROMPT, build_prompt, parse_meal_plan};
use nutrisense_core::openai::{CHAT_MAX_TOKENS, MEAL_PLAN_MAX_TOKENS};
use nutrisense_core::spoonacular::{RecipeQuery, recipe_id};

#[derive(Debug)]
pub enum FunctionError {
    /// A required upstream credential is missing.
    Config(String),
    /// The request body is missing a field or malformed.
    Validation(String),
    /// The upstream call failed or returned a non-success status.
    Upstream(String),
    /// The upstream reply did not have the expected shape.
    Parse(String),
}

impl FunctionError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) | Self::Parse(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Config(m) | Self::Validation(m) | Self::Upstream(m) | Self::Parse(m) => m,
        }
    }
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for FunctionError {}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

impl IntoResponse for FunctionError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_context: Option<UserContext>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MealPlanResponse {
    #[serde(rename = "mealPlan")]
    pub meal_plan: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecipesResponse {
    pub recipes: Vec<Value>,
}

pub struct Functions {
    openai: OpenAiClient,
    spoonacular: SpoonacularClient,
}

impl Functions {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        Ok(Self {
            openai: OpenAiClient::new(
                &config.openai_base_url,
                config.openai_api_key.clone(),
                &config.openai_model,
            )?,
            spoonacular: SpoonacularClient::new(
                &config.spoonacular_base_url,
                config.spoonacular_api_key.clone(),
            )?,
        })
    }

    pub async fn generate_meal_plan(
        &self,
        prefs: &MealPlanPreferences,
    ) -> Result<MealPlanResponse, FunctionError> {
        self.openai.ensure_configured()?;

        let prompt = build_prompt(prefs);
        tracing::info!(goals = ?prefs.dietary_goals, "generating meal plan");
        let content = self
            .openai
            .complete(SYSTEM_PROMPT, &prompt, MEAL_PLAN_MAX_TOKENS)
            .await?
            .ok_or_else(|| {
                tracing::error!("meal plan completion had no content");
                FunctionError::Parse("Failed to parse meal plan response".to_string())
            })?;

        let meal_plan = parse_meal_plan(&content).map_err(|e| {
            tracing::error!(error = %format!("{e:#}"), "failed to parse meal plan reply");
            FunctionError::Parse("Failed to parse meal plan response".to_string())
        })?;

        Ok(MealPlanResponse { meal_plan })
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, FunctionError> {
        self.openai.ensure_configured()?;

        let message = request
            .message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                FunctionError::Validation("Message is required and must be a string".to_string())
            })?;

        let system = build_system_prompt(request.user_context.as_ref());
        tracing::info!(chars = message.len(), "processing chat message");
        let response = self
            .openai
            .complete(&system, message, CHAT_MAX_TOKENS)
            .await?
            .ok_or_else(|| {
                tracing::error!("chat completion had no content");
                FunctionError::Upstream("No response received from OpenAI".to_string())
            })?;

        Ok(ChatResponse { response })
    }

    pub async fn recipe_suggestions(
        &self,
        query: &RecipeQuery,
    ) -> Result<RecipesResponse, FunctionError> {
        self.spoonacular.ensure_configured()?;

        let params = query
            .search_params()
            .map_err(|e| FunctionError::Validation(e.to_string()))?;

        let search = self.spoonacular.complex_search(&params).await?;
        let candidates = search.into_candidates();
        if candidates.is_empty() {
            tracing::info!("no recipes found for the given ingredients");
            return Ok(RecipesResponse {
                recipes: Vec::new(),
            });
        }

        tracing::info!(count = candidates.len(), "fetching recipe details");
        let lookups = candidates.into_iter().map(|recipe| async move {
            let Some(id) = recipe_id(&recipe) else {
                return recipe;
            };
            match self.spoonacular.information(&id).await {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::warn!(recipe = %id, error = %format!("{e:#}"), "using summary for recipe");
                    recipe
                }
            }
        });
        let recipes = futures::future::join_all(lookups).await;

        Ok(RecipesResponse { recipes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    fn functions_for(server: &MockServer) -> Functions {
        Functions::new(&UpstreamConfig {
            openai_api_key: Some("sk-test".to_string()),
            openai_base_url: format!("{}/v1", server.base_url()),
            openai_model: "gpt-4o-mini".to_string(),
            spoonacular_api_key: Some("spoon-key".to_string()),
            spoonacular_base_url: server.base_url(),
        })
        .unwrap()
    }

    fn unconfigured() -> Functions {
        Functions::new(&UpstreamConfig::from_lookup(|_| None)).unwrap()
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    async fn error_body(err: FunctionError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn chat_returns_completion_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .body_includes("gpt-4o-mini")
                    .body_includes("Allergies: Nuts");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(completion("Try adding lentils to your lunches."));
            })
            .await;

        let functions = functions_for(&server);
        let resp = functions
            .chat(&ChatRequest {
                message: Some("How do I get more protein?".to_string()),
                user_context: Some(UserContext {
                    allergies: Some(vec!["Nuts".to_string()]),
                    ..UserContext::default()
                }),
            })
            .await
            .unwrap();

        assert_eq!(resp.response, "Try adding lentils to your lunches.");
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn chat_missing_message_is_validation_error_without_upstream_call() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(completion("unused"));
            })
            .await;

        let functions = functions_for(&server);
        let err = functions.chat(&ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, FunctionError::Validation(_)));

        let blank = functions
            .chat(&ChatRequest {
                message: Some("   ".to_string()),
                user_context: None,
            })
            .await
            .unwrap_err();
        let (status, body) = error_body(blank).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required and must be a string");
        mock.assert_calls(0);
    }

    #[tokio::test]
    async fn chat_empty_completion_is_upstream_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let err = functions_for(&server)
            .chat(&ChatRequest {
                message: Some("hi".to_string()),
                user_context: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FunctionError::Upstream(_)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn upstream_failure_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let err = functions_for(&server)
            .chat(&ChatRequest {
                message: Some("hi".to_string()),
                user_context: None,
            })
            .await
            .unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("429"));
    }

    #[tokio::test]
    async fn missing_credentials_are_configuration_errors() {
        let functions = unconfigured();

        let chat = functions
            .chat(&ChatRequest {
                message: Some("hi".to_string()),
                user_context: None,
            })
            .await
            .unwrap_err();
        let (status, body) = error_body(chat).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "OpenAI API key not configured");

        let plan = functions
            .generate_meal_plan(&MealPlanPreferences::default())
            .await
            .unwrap_err();
        assert!(matches!(plan, FunctionError::Config(_)));

        let recipes = functions
            .recipe_suggestions(&RecipeQuery {
                ingredients: Some(vec!["egg".to_string()]),
                ..RecipeQuery::default()
            })
            .await
            .unwrap_err();
        assert_eq!(recipes.to_string(), "Spoonacular API key not configured");
    }

    #[tokio::test]
    async fn meal_plan_returns_parsed_plan() {
        let server = MockServer::start_async().await;
        let plan = json!({
            "explanation": "Balanced week",
            "meals": {
                "monday": {
                    "breakfast": {"name": "Oats", "calories": 350, "protein": "12g"},
                    "lunch": {"name": "Lentil soup", "calories": 450},
                    "dinner": {"name": "Tofu stir fry", "calories": 550},
                    "snacks": [{"name": "Pear", "calories": 100}]
                }
            },
            "grocery_list": {"grains": ["oats"]}
        });
        let content = format!("```json\n{plan}\n```");
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_includes("Dietary goals: muscle_gain")
                    .body_includes("Always respond with valid JSON only.");
                then.status(200).json_body(completion(&content));
            })
            .await;

        let resp = functions_for(&server)
            .generate_meal_plan(&MealPlanPreferences {
                dietary_goals: Some("muscle_gain".to_string()),
                ..MealPlanPreferences::default()
            })
            .await
            .unwrap();

        assert_eq!(resp.meal_plan["meals"]["monday"]["breakfast"]["name"], "Oats");
        let wire = serde_json::to_value(&resp).unwrap();
        assert!(wire["mealPlan"]["grocery_list"]["grains"].is_array());
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn meal_plan_non_json_reply_is_parse_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .json_body(completion("Here is a lovely plan: eat vegetables every day."));
            })
            .await;

        let err = functions_for(&server)
            .generate_meal_plan(&MealPlanPreferences::default())
            .await
            .unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Failed to parse meal plan response");
    }

    #[tokio::test]
    async fn recipes_empty_search_returns_empty_list() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/recipes/complexSearch")
                    .query_param("apiKey", "spoon-key")
                    .query_param("includeIngredients", "kale,tofu")
                    .query_param("number", "12");
                then.status(200)
                    .json_body(json!({"offset": 0, "number": 12, "totalResults": 0}));
            })
            .await;

        let resp = functions_for(&server)
            .recipe_suggestions(&RecipeQuery {
                ingredients: Some(vec!["kale".to_string(), "tofu".to_string()]),
                ..RecipeQuery::default()
            })
            .await
            .unwrap();

        assert!(resp.recipes.is_empty());
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"recipes": []}));
        search.assert_calls(1);
    }

    #[tokio::test]
    async fn recipes_capped_at_six_with_detail_fallback() {
        let server = MockServer::start_async().await;
        let results: Vec<Value> = (1..=10)
            .map(|id| json!({"id": id, "title": format!("Summary {id}")}))
            .collect();
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/recipes/complexSearch")
                    .query_param("addRecipeInformation", "true")
                    .query_param("fillIngredients", "true");
                then.status(200).json_body(json!({ "results": results }));
            })
            .await;

        let mut details = Vec::new();
        for id in 1..=6 {
            let path = format!("/recipes/{id}/information");
            let detail = server
                .mock_async(|when, then| {
                    when.method(GET).path(path.as_str()).query_param("apiKey", "spoon-key");
                    if id == 3 {
                        then.status(500);
                    } else {
                        then.status(200)
                            .json_body(json!({"id": id, "title": format!("Detailed {id}")}));
                    }
                })
                .await;
            details.push(detail);
        }

        let resp = functions_for(&server)
            .recipe_suggestions(&RecipeQuery {
                ingredients: Some(vec!["chicken".to_string()]),
                ..RecipeQuery::default()
            })
            .await
            .unwrap();

        assert_eq!(resp.recipes.len(), 6);
        assert_eq!(resp.recipes[0]["title"], "Detailed 1");
        assert_eq!(resp.recipes[2]["title"], "Summary 3");
        assert_eq!(resp.recipes[5]["title"], "Detailed 6");
        for detail in &details {
            detail.assert_calls(1);
        }
    }

    #[tokio::test]
    async fn recipes_require_ingredients_before_calling_upstream() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET).path("/recipes/complexSearch");
                then.status(200).json_body(json!({"results": []}));
            })
            .await;

        let err = functions_for(&server)
            .recipe_suggestions(&RecipeQuery {
                ingredients: Some(vec![]),
                ..RecipeQuery::default()
            })
            .await
            .unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Ingredients array is required and must not be empty"
        );
        search.assert_calls(0);
    }
}

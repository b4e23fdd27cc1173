use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use crate::config::Config;
use crate::functions::{ChatRequest, Functions};
use nutrisense_core::chat::UserContext;
use nutrisense_core::db::Database;
use nutrisense_core::spoonacular::{RecipeQuery, RecipeSummary};

use super::helpers::{open_session, or_dash, parse_list, truncate};

pub(crate) async fn cmd_chat(
    config: &Config,
    db: &Database,
    functions: &Functions,
    message: &str,
    json: bool,
) -> Result<()> {
    let sync = open_session(config, db)?;
    let request = ChatRequest {
        message: Some(message.to_string()),
        user_context: sync.profile().map(UserContext::from_profile),
    };
    drop(sync);

    let reply = functions.chat(&request).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else {
        println!("{}", reply.response);
    }
    Ok(())
}

/// Optional overrides for the profile-derived recipe filters.
#[derive(Debug, Default)]
pub(crate) struct RecipeFilters {
    pub diet: Option<String>,
    pub cuisine: Option<String>,
    pub meal_type: Option<String>,
}

pub(crate) async fn cmd_recipes(
    config: &Config,
    db: &Database,
    functions: &Functions,
    ingredients: &str,
    filters: RecipeFilters,
    json: bool,
) -> Result<()> {
    let ingredients = parse_list(ingredients);
    if ingredients.is_empty() {
        bail!("Give at least one ingredient, e.g. `nutrisense recipes \"chicken, rice\"`");
    }

    let sync = open_session(config, db)?;
    let mut query = RecipeQuery::for_profile(ingredients, sync.profile());
    drop(sync);
    if let Some(diet) = filters.diet {
        query.dietary_restrictions = Some(diet);
    }
    if let Some(cuisine) = filters.cuisine {
        query.cuisine_type = Some(cuisine);
    }
    if let Some(meal_type) = filters.meal_type {
        query.meal_type = Some(meal_type);
    }

    let found = functions.recipe_suggestions(&query).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }

    if found.recipes.is_empty() {
        println!("No recipes found for those ingredients.");
        return Ok(());
    }
    print_recipes(&found.recipes.iter().map(RecipeSummary::from_value).collect::<Vec<_>>());
    Ok(())
}

fn print_recipes(recipes: &[RecipeSummary]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "Recipe")]
        title: String,
        #[tabled(rename = "Ready in")]
        ready: String,
        #[tabled(rename = "Serves")]
        servings: String,
        #[tabled(rename = "Health")]
        health: String,
        #[tabled(rename = "Link")]
        url: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            title: truncate(r.title.as_deref().unwrap_or("Untitled recipe"), 40),
            ready: r
                .ready_in_minutes
                .map_or_else(|| "-".to_string(), |m| format!("{m} min")),
            servings: or_dash(r.servings),
            health: r
                .health_score
                .map_or_else(|| "-".to_string(), |h| format!("{h:.0}")),
            url: or_dash(r.source_url.as_deref()),
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
    use crate::config::UpstreamConfig;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use nutrisense_core::models::ProfileUpdate;
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, Config, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_data_dir(dir.path().to_path_buf()).unwrap();
        let db = Database::open_in_memory().unwrap();
        db.create_profile("alice").unwrap();
        db.update_profile(
            "alice",
            &ProfileUpdate {
                allergies: Some(Some(vec!["Nuts".to_string(), "Soy".to_string()])),
                preferred_cuisines: Some(Some(vec!["Italian".to_string()])),
                dietary_goals: Some(Some("weight_loss".to_string())),
                ..ProfileUpdate::default()
            },
        )
        .unwrap();
        config.save_session("alice").unwrap();
        (dir, config, db)
    }

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

    #[tokio::test]
    async fn test_chat_sends_profile_context() {
        let (_dir, config, db) = setup();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_includes("weight_loss")
                    .body_includes("Nuts, Soy");
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "Eat more greens."}}]
                }));
            })
            .await;

        cmd_chat(&config, &db, &functions_for(&server), "Any tips?", true)
            .await
            .unwrap();
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_recipes_use_profile_defaults() {
        let (_dir, config, db) = setup();
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/recipes/complexSearch")
                    .query_param("includeIngredients", "chicken,rice")
                    .query_param("diet", "Nuts,Soy")
                    .query_param("cuisine", "Italian")
                    .query_param("type", "main course");
                then.status(200).json_body(json!({"results": []}));
            })
            .await;

        cmd_recipes(
            &config,
            &db,
            &functions_for(&server),
            "chicken, rice",
            RecipeFilters::default(),
            true,
        )
        .await
        .unwrap();
        search.assert_calls(1);
    }

    #[tokio::test]
    async fn test_recipes_flag_overrides_profile() {
        let (_dir, config, db) = setup();
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/recipes/complexSearch")
                    .query_param("cuisine", "Mexican")
                    .query_param("type", "breakfast");
                then.status(200).json_body(json!({"results": []}));
            })
            .await;

        let filters = RecipeFilters {
            cuisine: Some("Mexican".to_string()),
            meal_type: Some("breakfast".to_string()),
            ..RecipeFilters::default()
        };
        cmd_recipes(&config, &db, &functions_for(&server), "eggs", filters, true)
            .await
            .unwrap();
        search.assert_calls(1);
    }

    #[tokio::test]
    async fn test_recipes_require_ingredients() {
        let (_dir, config, db) = setup();
        let server = MockServer::start_async().await;
        assert!(
            cmd_recipes(&config, &db, &functions_for(&server), " , ", RecipeFilters::default(), true)
                .await
                .is_err()
        );
    }
}

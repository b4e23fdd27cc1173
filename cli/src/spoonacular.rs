use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::functions::FunctionError;
use nutrisense_core::spoonacular::SearchResponse;

pub struct SpoonacularClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SpoonacularClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("nutrisense/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn ensure_configured(&self) -> Result<(), FunctionError> {
        if self.api_key.is_none() {
            tracing::error!("Spoonacular API key not configured");
            return Err(FunctionError::Config(
                "Spoonacular API key not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    pub async fn complex_search(
        &self,
        params: &[(&'static str, String)],
    ) -> Result<SearchResponse, FunctionError> {
        self.ensure_configured()?;
        let url = format!("{}/recipes/complexSearch", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key())])
            .query(params)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to reach Spoonacular API");
                FunctionError::Upstream("Failed to reach Spoonacular API".to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            tracing::error!(%status, "Spoonacular API error");
            return Err(FunctionError::Upstream(format!(
                "Spoonacular API error: {status}"
            )));
        }

        resp.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to decode Spoonacular search response");
            FunctionError::Parse("Failed to parse recipe search response".to_string())
        })
    }

    pub async fn information(&self, id: &str) -> Result<Value> {
        let url = format!("{}/recipes/{id}/information", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key())])
            .send()
            .await
            .context("Failed to reach Spoonacular API")?;
        if !resp.status().is_success() {
            bail!("Spoonacular returned {}", resp.status());
        }
        resp.json()
            .await
            .context("Failed to parse recipe information")
    }
}

use std::time::Duration;

use anyhow::{Context, Result};

use crate::functions::FunctionError;
use nutrisense_core::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, DEFAULT_TEMPERATURE,
};

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("nutrisense/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    /// Fails with a configuration error when no key is set.
    pub fn ensure_configured(&self) -> Result<(), FunctionError> {
        if self.api_key.is_none() {
            tracing::error!("OpenAI API key not configured");
            return Err(FunctionError::Config(
                "OpenAI API key not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// One system + one user message. Returns the first choice's text, if any.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<Option<String>, FunctionError> {
        self.ensure_configured()?;
        let api_key = self.api_key.as_deref().unwrap_or_default();

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: DEFAULT_TEMPERATURE,
            max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %self.model, max_tokens, "requesting chat completion");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to reach OpenAI API");
                FunctionError::Upstream("Failed to reach OpenAI API".to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            tracing::error!(%status, "OpenAI API error");
            return Err(FunctionError::Upstream(format!("OpenAI API error: {status}")));
        }

        let data: ChatCompletionResponse = resp.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to decode OpenAI response");
            FunctionError::Parse("Failed to parse OpenAI response".to_string())
        })?;

        Ok(data.into_content())
    }
}

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use guard_core::agent::{GenerationBackend, PromptRole};
use serde::Serialize;
use tracing::{info, warn};

use crate::message::{ApiError, MessagesResponse};
use crate::prompts::{build_instruction, system_prompt};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Calls the Anthropic Messages API, one request per stage.
pub struct AnthropicBackend {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_URL.to_string(),
            max_tokens: 4096,
            timeout_secs: 300,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, role: PromptRole, context: &str) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("ANTHROPIC_API_KEY is not set");
        }

        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system_prompt(role),
            messages: vec![Message { role: "user", content: build_instruction(role, context) }],
            temperature: 0.0,
        };

        info!(role = role.as_str(), model = %self.model, "calling anthropic messages API");

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .build()?;

        let response = client
            .post(&self.base_url)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("anthropic request for {} failed", role.as_str()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiError>(&text)
                .map(|e| format!("{}: {}", e.error.kind, e.error.message))
                .unwrap_or(text);
            warn!(role = role.as_str(), status = %status, "anthropic returned non-2xx: {}", detail);
            bail!("anthropic error {status}: {detail}");
        }

        let parsed: MessagesResponse = response.json().await.context("failed to parse anthropic response")?;
        if parsed.truncated() {
            warn!(role = role.as_str(), max_tokens = self.max_tokens, "anthropic reply hit the token limit");
        }
        let output = parsed.text();
        info!(
            role = role.as_str(),
            output_len = output.len(),
            output_tokens = parsed.usage.as_ref().and_then(|u| u.output_tokens),
            "anthropic response received"
        );
        Ok(output)
    }
}

use anyhow::{bail, Result};
use async_trait::async_trait;
use guard_core::agent::{GenerationBackend, PromptRole};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::prompts::{build_instruction, system_prompt};

/// Calls a locally-hosted Ollama model via its native chat API.
///
/// For contracts that must not leave the local machine. Replies are requested
/// in Ollama's JSON mode.
pub struct OllamaBackend {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), model: model.into(), timeout_secs: 300 }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, role: PromptRole, context: &str) -> Result<String> {
        let request_body = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage { role: "system".into(), content: system_prompt(role) },
                OllamaMessage { role: "user".into(), content: build_instruction(role, context) },
            ],
            stream: false,
            format: "json",
        };

        info!(
            role = role.as_str(),
            model = %self.model,
            base_url = %self.base_url,
            "calling ollama chat API"
        );

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .build()?;

        let response = match client.post(&url).json(&request_body).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(role = role.as_str(), timeout_secs = self.timeout_secs, "ollama request timed out");
                bail!("ollama request timed out after {}s", self.timeout_secs);
            }
            Err(e) => {
                warn!(role = role.as_str(), "ollama request failed: {}", e);
                bail!("ollama request failed: {e}");
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(role = role.as_str(), status = %status, "ollama returned non-200: {}", body);
            bail!("ollama error {status}: {body}");
        }

        let parsed: OllamaChatResponse = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(role = role.as_str(), "failed to parse ollama response: {}", e);
                bail!("failed to parse ollama response: {e}");
            }
        };

        let output = parsed.message.content;
        info!(role = role.as_str(), output_len = output.len(), "ollama response received");
        Ok(output)
    }
}

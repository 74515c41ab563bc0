pub mod anthropic;
pub mod message;
pub mod ollama;
pub mod prompts;
pub mod rules;

use std::sync::Arc;

use anyhow::{bail, Result};
use guard_core::agent::GenerationBackend;
use guard_core::config::Config;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use rules::RuleBackend;

/// Build the generation backend named by `config.backend`. The HTTP client
/// timeout is the stage deadline, which the pipeline also enforces.
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn GenerationBackend>> {
    let backend: Arc<dyn GenerationBackend> = match config.backend.as_str() {
        "anthropic" => Arc::new(
            AnthropicBackend::new(config.anthropic_api_key.clone(), config.model.clone())
                .with_timeout(config.stage_timeout_s),
        ),
        "ollama" => Arc::new(
            OllamaBackend::new(config.ollama_url.clone(), config.ollama_model.clone())
                .with_timeout(config.stage_timeout_s),
        ),
        "rules" => Arc::new(RuleBackend::new()?),
        other => bail!("unknown backend {other:?}"),
    };
    Ok(backend)
}

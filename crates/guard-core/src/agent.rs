use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Stage;

/// Which model persona a generation request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    Extractor,
    Advocate,
    Auditor,
}

impl PromptRole {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Extractor => Stage::Extraction,
            Self::Advocate => Stage::Advocacy,
            Self::Auditor => Stage::Audit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extractor => "extractor",
            Self::Advocate => "advocate",
            Self::Auditor => "auditor",
        }
    }
}

/// Text generation behind one stage call. Implementations return the model's
/// raw reply; the stage parses and validates it.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, role: PromptRole, context: &str) -> Result<String>;
}

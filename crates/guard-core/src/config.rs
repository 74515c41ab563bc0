use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::pipeline::RunOptions;
use crate::types::RunMode;

/// Application configuration, read from the environment with `.env` as a
/// fallback. Policy limits live in their own JSON file, see `policy.rs`.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub model: String,
    /// "anthropic", "ollama" or "rules". Defaults to anthropic when an API
    /// key is present, else rules.
    pub backend: String,
    pub ollama_url: String,
    pub ollama_model: String,

    pub policy_path: String,
    pub cache_path: String,
    pub samples_dir: String,

    pub stage_timeout_s: u64,
    pub allow_degraded_runs: bool,
    /// Mode used when a request does not name one.
    pub default_mode: RunMode,

    // Web
    pub web_bind: String,
    pub web_port: u16,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().trim_matches('"').to_string());
        }
    }
    map
}

fn get(key: &str, vars: &HashMap<String, String>) -> Option<String> {
    vars.get(key).cloned().filter(|v| !v.is_empty())
}

fn get_str(key: &str, vars: &HashMap<String, String>, default: &str) -> String {
    get(key, vars).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, vars: &HashMap<String, String>, default: bool) -> bool {
    match get(key, vars).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        Some(_) => default,
        None => default,
    }
}

fn get_u64(key: &str, vars: &HashMap<String, String>, default: u64) -> u64 {
    get(key, vars).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u16(key: &str, vars: &HashMap<String, String>, default: u16) -> u16 {
    get(key, vars).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn resolve_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut vars = parse_dotenv();
        vars.extend(std::env::vars());
        Self::from_vars(&vars)
    }

    /// Build from an explicit variable map; process env takes no part.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let anthropic_api_key = get_str("ANTHROPIC_API_KEY", vars, "");
        let explicit_backend = get("BACKEND", vars).map(|b| b.to_ascii_lowercase());
        let backend = match explicit_backend.clone() {
            Some(b) => b,
            None if anthropic_api_key.is_empty() => "rules".to_string(),
            None => "anthropic".to_string(),
        };
        if !matches!(backend.as_str(), "anthropic" | "ollama" | "rules") {
            bail!("BACKEND must be one of anthropic, ollama, rules; got {backend:?}");
        }

        let default_mode = match get("DEFAULT_MODE", vars) {
            Some(raw) => match RunMode::parse(&raw) {
                Some(mode) => mode,
                None => bail!("DEFAULT_MODE must be demo or live; got {raw:?}"),
            },
            // Live only with a key or an explicitly chosen backend.
            None if !anthropic_api_key.is_empty() || explicit_backend.is_some() => RunMode::Live,
            None => RunMode::Demo,
        };

        let stage_timeout_s = get_u64("STAGE_TIMEOUT_S", vars, 120);
        if stage_timeout_s == 0 {
            bail!("STAGE_TIMEOUT_S must be positive");
        }

        Ok(Self {
            anthropic_api_key,
            model: get_str("MODEL", vars, "claude-sonnet-4-20250514"),
            backend,
            ollama_url: get_str("OLLAMA_URL", vars, "http://localhost:11434"),
            ollama_model: get_str("OLLAMA_MODEL", vars, "qwen2.5:14b"),
            policy_path: resolve_tilde(&get_str("POLICY_PATH", vars, "data/company_policy.json")),
            cache_path: resolve_tilde(&get_str("CACHE_PATH", vars, "data/demo_results.json")),
            samples_dir: resolve_tilde(&get_str("SAMPLES_DIR", vars, "data/contracts")),
            stage_timeout_s,
            allow_degraded_runs: get_bool("ALLOW_DEGRADED_RUNS", vars, false),
            default_mode,
            web_bind: get_str("WEB_BIND", vars, "127.0.0.1"),
            web_port: get_u16("WEB_PORT", vars, 3131),
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            stage_timeout: Duration::from_secs(self.stage_timeout_s),
            allow_degraded: self.allow_degraded_runs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_without_key_select_demo() {
        let c = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(c.backend, "rules");
        assert_eq!(c.default_mode, RunMode::Demo);
        assert_eq!(c.stage_timeout_s, 120);
        assert!(!c.allow_degraded_runs);
        assert_eq!(c.policy_path, "data/company_policy.json");
    }

    #[test]
    fn key_or_local_backend_selects_live() {
        let c = Config::from_vars(&vars(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(c.backend, "anthropic");
        assert_eq!(c.default_mode, RunMode::Live);
        let c = Config::from_vars(&vars(&[("BACKEND", "rules")])).unwrap();
        assert_eq!(c.default_mode, RunMode::Live);
        let c = Config::from_vars(&vars(&[("BACKEND", "rules"), ("DEFAULT_MODE", "demo")])).unwrap();
        assert_eq!(c.default_mode, RunMode::Demo);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_vars(&vars(&[("BACKEND", "gpt")])).is_err());
        assert!(Config::from_vars(&vars(&[("DEFAULT_MODE", "fast")])).is_err());
        assert!(Config::from_vars(&vars(&[("STAGE_TIMEOUT_S", "0")])).is_err());
    }

    #[test]
    fn run_options_carry_timeout_and_degraded_flag() {
        let c = Config::from_vars(&vars(&[("STAGE_TIMEOUT_S", "5"), ("ALLOW_DEGRADED_RUNS", "1")])).unwrap();
        let opts = c.run_options();
        assert_eq!(opts.stage_timeout, Duration::from_secs(5));
        assert!(opts.allow_degraded);
    }
}

//! Offline demo-cache population: runs a live analysis over every catalog
//! sample and writes the fingerprint-keyed results file served in demo mode.

use std::sync::Arc;

use anyhow::{bail, Context};
use guard_core::{
    cache::ResultCache,
    config::Config,
    fingerprint::fingerprint,
    pipeline::Pipeline,
    policy::PolicyThresholds,
    samples::SAMPLE_CONTRACTS,
    RunMode,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guard_populate=info,guard_core=info,guard_agent=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let policy = PolicyThresholds::load(&config.policy_path)
        .with_context(|| format!("loading policy from {}", config.policy_path))?;
    let backend = guard_agent::backend_from_config(&config)?;
    info!(backend = backend.name(), samples_dir = %config.samples_dir, "populating demo cache");

    // Live runs never consult the cache, so an empty one is fine here.
    let (pipeline, _rx) =
        Pipeline::new(backend, Arc::new(policy), Arc::new(ResultCache::empty()), config.run_options());

    let mut cache = ResultCache::empty();
    for sample in &SAMPLE_CONTRACTS {
        let text = match sample.read(&config.samples_dir) {
            Ok(t) => t,
            Err(e) => {
                warn!(sample = sample.id, "skipping sample: {e:#}");
                continue;
            }
        };
        match pipeline.run_analysis(&text, RunMode::Live).await {
            Ok(run) => {
                let Some(analysis) = run.to_cached(sample.id, sample.name) else {
                    warn!(sample = sample.id, "run completed without a full result set");
                    continue;
                };
                info!(
                    sample = sample.id,
                    score = analysis.verdict.score,
                    recommendation = %analysis.verdict.recommendation,
                    "sample analyzed"
                );
                cache.insert(fingerprint(&text), analysis);
            }
            Err(e) => error!(sample = sample.id, kind = e.kind(), "sample analysis failed: {e}"),
        }
    }

    if cache.is_empty() {
        bail!("no samples were analyzed; nothing written");
    }
    cache.save(&config.cache_path)?;
    info!(path = %config.cache_path, entries = cache.len(), "demo cache written");
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use guard_agent::{AnthropicBackend, OllamaBackend, RuleBackend};
use guard_core::{
    agent::{GenerationBackend, PromptRole},
    cache::ResultCache,
    fingerprint::fingerprint,
    pipeline::{Pipeline, RunOptions},
    policy::PolicyThresholds,
    samples::{self, SAMPLE_CONTRACTS},
    ErrorOrigin, GuardError, Recommendation, RiskCategory, RunMode, RunState, Stage,
};
use tracing_test::traced_test;

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data")
}

fn policy() -> Arc<PolicyThresholds> {
    Arc::new(PolicyThresholds::load(data_dir().join("company_policy.json")).unwrap())
}

fn sample_text(id: &str) -> String {
    samples::find(id).unwrap().read(data_dir().join("contracts")).unwrap()
}

fn rules_pipeline(cache: ResultCache) -> Pipeline {
    let backend: Arc<dyn GenerationBackend> = Arc::new(RuleBackend::new().unwrap());
    let (pipeline, _rx) = Pipeline::new(backend, policy(), Arc::new(cache), RunOptions::default());
    pipeline
}

// ── rule backend over the sample catalog ─────────────────────────────────────

#[tokio::test]
async fn samples_get_expected_recommendations() {
    let pipeline = rules_pipeline(ResultCache::empty());
    let expected = [
        ("standard_saas", Recommendation::Approve),
        ("extended_payment", Recommendation::LegalReview),
        ("right_of_return", Recommendation::Reject),
        ("milestone_payment", Recommendation::LegalReview),
        ("price_protection", Recommendation::LegalReview),
        ("auto_renewal", Recommendation::LegalReview),
        ("consignment", Recommendation::Reject),
        ("clean_license", Recommendation::Approve),
    ];
    for (id, recommendation) in expected {
        let run = pipeline.run_analysis(&sample_text(id), RunMode::Live).await.unwrap();
        assert_eq!(run.state(), RunState::Completed, "{id}");
        let verdict = run.verdict().unwrap();
        assert_eq!(verdict.recommendation, recommendation, "{id}: {}", verdict.rationale);
        assert_eq!(verdict.recommendation, Recommendation::from_score(verdict.score), "{id}");
    }
}

#[tokio::test]
async fn extended_payment_is_flagged_with_policy_reference() {
    let pipeline = rules_pipeline(ResultCache::empty());
    let run = pipeline.run_analysis(&sample_text("extended_payment"), RunMode::Live).await.unwrap();

    let sheet = run.term_sheet().unwrap();
    assert_eq!(sheet.payment_term_days, 120);
    assert!(sheet.parties.contains("Nimbus Analytics Inc."));

    let flags = &run.flags().unwrap().flags;
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].category, RiskCategory::ExtendedPayment);
    assert_eq!(flags[0].reference.as_deref(), Some("ASC 606-10-32-15"));
    assert_eq!(flags[0].quote, "Payment is due Net 120 days from the invoice date.");

    let verdict = run.verdict().unwrap();
    assert_eq!(verdict.score, 50);
    assert!(verdict.rationale.contains("Strongest mitigating argument"));
}

#[tokio::test]
async fn flag_quotes_appear_verbatim_in_contracts() {
    let pipeline = rules_pipeline(ResultCache::empty());
    for sample in &SAMPLE_CONTRACTS {
        let text = sample_text(sample.id);
        let run = pipeline.run_analysis(&text, RunMode::Live).await.unwrap();
        for flag in &run.flags().unwrap().flags {
            assert!(text.contains(&flag.quote), "{}: {:?}", sample.id, flag.quote);
        }
    }
}

#[tokio::test]
async fn populated_cache_serves_demo_runs() {
    let live = rules_pipeline(ResultCache::empty());
    let mut cache = ResultCache::empty();
    for sample in &SAMPLE_CONTRACTS {
        let text = sample_text(sample.id);
        let run = live.run_analysis(&text, RunMode::Live).await.unwrap();
        let analysis = run.to_cached(sample.id, sample.name).unwrap();
        cache.insert(fingerprint(&text), analysis);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo_results.json");
    cache.save(&path).unwrap();
    let reloaded = ResultCache::load(&path).unwrap();
    assert_eq!(reloaded.len(), SAMPLE_CONTRACTS.len());

    let portfolio = reloaded.portfolio();
    assert_eq!(portfolio.contracts, 8);
    assert_eq!(portfolio.approve, 2);
    assert_eq!(portfolio.reject, 2);
    assert_eq!(reloaded.summaries()[0].id, "standard_saas");

    let demo = rules_pipeline(reloaded);
    let run = demo.run_analysis(&sample_text("consignment"), RunMode::Demo).await.unwrap();
    assert_eq!(run.sample_id(), Some("consignment"));
    assert_eq!(run.verdict().unwrap().recommendation, Recommendation::Reject);
}

#[tokio::test]
async fn committed_demo_results_serve_every_sample() {
    let committed = ResultCache::load(data_dir().join("demo_results.json")).unwrap();
    assert_eq!(committed.len(), SAMPLE_CONTRACTS.len());

    let live = rules_pipeline(ResultCache::empty());
    let demo = rules_pipeline(committed.clone());
    for sample in &SAMPLE_CONTRACTS {
        let text = sample_text(sample.id);

        // The committed file is exactly what guard-populate writes with BACKEND=rules.
        let fresh = live.run_analysis(&text, RunMode::Live).await.unwrap();
        let cached = committed.get(&fingerprint(&text)).unwrap_or_else(|| panic!("{} not cached", sample.id));
        assert_eq!(Some(cached), fresh.to_cached(sample.id, sample.name).as_ref(), "{}", sample.id);

        let run = demo.run_analysis(&text, RunMode::Demo).await.unwrap();
        assert_eq!(run.state(), RunState::Completed, "{}", sample.id);
        assert_eq!(run.sample_id(), Some(sample.id));
        assert_eq!(run.verdict(), Some(&cached.verdict), "{}", sample.id);
    }
}

// ── network backends ─────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_api_key_fails_extraction_as_upstream() {
    let backend: Arc<dyn GenerationBackend> = Arc::new(AnthropicBackend::new("", "claude-sonnet-4-20250514"));
    let (pipeline, _rx) = Pipeline::new(backend, policy(), Arc::new(ResultCache::empty()), RunOptions::default());

    let err = pipeline.run_analysis(&sample_text("standard_saas"), RunMode::Live).await.unwrap_err();
    assert!(matches!(err, GuardError::Backend { stage: Stage::Extraction, .. }), "{err}");
    assert_eq!(err.origin(), ErrorOrigin::Upstream);
}

#[traced_test]
#[tokio::test]
async fn unreachable_ollama_is_logged_and_reported() {
    let backend = OllamaBackend::new("http://127.0.0.1:9", "qwen2.5:14b").with_timeout(5);
    let err = backend.generate(PromptRole::Extractor, "contract text").await.unwrap_err();
    assert!(err.to_string().starts_with("ollama request"), "{err}");
    assert!(logs_contain("calling ollama chat API"));
    assert!(logs_contain("ollama request"));
}

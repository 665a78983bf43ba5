use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;

use kira_accession_resolver::cache::CacheStore;
use kira_accession_resolver::clock::ManualClock;
use kira_accession_resolver::config::ResolverConfig;
use kira_accession_resolver::domain::{AccessionId, Outcome, ResolutionResult};
use kira_accession_resolver::error::KiraError;
use kira_accession_resolver::known::KnownMappings;
use kira_accession_resolver::providers::SourceStrategy;
use kira_accession_resolver::scheduler::{NoProgress, Resolver};

/// Answers from a fixed table; ids in `flaky` fail the given number of times first.
#[derive(Default)]
struct ScriptedStrategy {
    results: HashMap<String, ResolutionResult>,
    flaky: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedStrategy {
    fn with(mut self, accession: &str, bioproject: &str, geo: &str) -> Self {
        self.results.insert(
            accession.to_string(),
            ResolutionResult::new(bioproject, geo),
        );
        self
    }

    fn failing(self, accession: &str, times: usize) -> Self {
        self.flaky
            .lock()
            .unwrap()
            .insert(accession.to_string(), times);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SourceStrategy for ScriptedStrategy {
    fn resolve(&self, id: &AccessionId) -> Outcome {
        self.calls.lock().unwrap().push(id.to_string());
        if let Some(left) = self.flaky.lock().unwrap().get_mut(id.as_str()) {
            if *left > 0 {
                *left -= 1;
                return Outcome::Failed(KiraError::EbiHttp("operation timed out".to_string()));
            }
        }
        match self.results.get(id.as_str()) {
            Some(result) => Outcome::Resolved(result.clone()),
            None => Outcome::NotFound,
        }
    }
}

fn config() -> ResolverConfig {
    ResolverConfig {
        batch_size: 2,
        max_workers: 1,
        delay_between_batches: Duration::from_secs(2),
        retry_delay: Duration::from_secs(5),
        known_mappings: KnownMappings::empty(),
        ..ResolverConfig::default()
    }
}

fn resolver(
    config: ResolverConfig,
    strategy: &Arc<ScriptedStrategy>,
    clock: &Arc<ManualClock>,
) -> Resolver {
    Resolver::new(config, strategy.clone(), strategy.clone(), clock.clone())
}

fn inputs(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn cache_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join("cache.json")).unwrap()
}

#[test]
fn one_entry_per_input_including_duplicates_and_unrecognized() {
    let strategy = Arc::new(ScriptedStrategy::default().with("SRP1", "PRJNA1", "GSE1"));
    let clock = Arc::new(ManualClock::new());
    let input = inputs(&["SRP1", "XYZ123", "srp1", "SRP1", "ERP2"]);

    let resolution = resolver(config(), &strategy, &clock).resolve(&input, &NoProgress);

    assert_eq!(resolution.entries.len(), input.len());
    let order: Vec<&str> = resolution
        .entries
        .iter()
        .map(|entry| entry.input.as_str())
        .collect();
    assert_eq!(order, vec!["SRP1", "XYZ123", "srp1", "SRP1", "ERP2"]);
    assert_eq!(resolution.entries[2].result.geo(), "GSE1");
    assert!(resolution.get("XYZ123").unwrap().is_empty());
    assert!(resolution.get("ERP2").unwrap().is_empty());
    assert_eq!(resolution.stats.unique, 3);
    assert_eq!(resolution.stats.unsupported, 1);
    assert_eq!(resolution.stats.not_found, 1);
}

#[test]
fn known_mappings_need_no_network() {
    let strategy = Arc::new(ScriptedStrategy::default());
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        known_mappings: KnownMappings::builtin(),
        ..config()
    };

    let resolution = resolver(config, &strategy, &clock)
        .resolve(&inputs(&["ERP127673", "SRP324458"]), &NoProgress);

    assert_eq!(
        resolution.get("ERP127673"),
        Some(&ResolutionResult::new("PRJEB43688", "E-MTAB-10220"))
    );
    assert_eq!(
        resolution.get("SRP324458"),
        Some(&ResolutionResult::new("PRJNA738600", "GSE178360"))
    );
    assert!(strategy.calls().is_empty());
    assert_eq!(resolution.stats.known, 2);
}

#[test]
fn unrecognized_accession_is_never_dispatched_or_cached() {
    let dir = tempfile::tempdir().unwrap();
    let strategy = Arc::new(ScriptedStrategy::default());
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        cache_file: Some(cache_path(&dir)),
        ..config()
    };

    let resolution = resolver(config, &strategy, &clock).resolve(&inputs(&["XYZ123"]), &NoProgress);

    assert_eq!(resolution.get("XYZ123"), Some(&ResolutionResult::empty()));
    assert!(strategy.calls().is_empty());
    assert!(clock.sleeps().is_empty());
    assert!(CacheStore::load(cache_path(&dir)).get("XYZ123").is_none());
}

#[test]
fn duplicates_are_resolved_once() {
    let strategy = Arc::new(ScriptedStrategy::default().with("SRX1", "PRJNA1", ""));
    let clock = Arc::new(ManualClock::new());

    resolver(config(), &strategy, &clock).resolve(
        &inputs(&["SRX1", "srx1", " SRX1 ", "ERX9", "ERX9"]),
        &NoProgress,
    );

    let mut calls = strategy.calls();
    calls.sort();
    assert_eq!(calls, vec!["ERX9", "SRX1"]);
}

#[test]
fn cached_accessions_trigger_no_calls_on_later_runs() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        cache_file: Some(cache_path(&dir)),
        ..config()
    };
    let input = inputs(&["SRP1", "ERP2"]);

    let first = Arc::new(ScriptedStrategy::default().with("SRP1", "PRJNA1", "GSE1"));
    let initial = resolver(config.clone(), &first, &clock).resolve(&input, &NoProgress);
    assert_eq!(first.calls().len(), 2);

    let second = Arc::new(ScriptedStrategy::default());
    let repeat = resolver(config, &second, &clock).resolve(&input, &NoProgress);

    assert!(second.calls().is_empty());
    assert_eq!(repeat.entries, initial.entries);
    assert_eq!(repeat.stats.cached, 2);
}

#[test]
fn exhausted_failures_become_cached_empty_results() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        cache_file: Some(cache_path(&dir)),
        max_retries: 2,
        ..config()
    };
    let strategy = Arc::new(ScriptedStrategy::default().failing("ERP999999", usize::MAX));

    let resolution =
        resolver(config.clone(), &strategy, &clock).resolve(&inputs(&["ERP999999"]), &NoProgress);

    assert_eq!(resolution.get("ERP999999"), Some(&ResolutionResult::empty()));
    assert_eq!(strategy.calls().len(), 3);
    assert_eq!(resolution.stats.failed, 1);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(5), Duration::from_secs(5)]
    );

    let content = fs::read_to_string(cache_path(&dir)).unwrap();
    let cached: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(
        cached["ERP999999"],
        serde_json::json!({"bioproject_id": "", "geo_id": ""})
    );

    let later = Arc::new(ScriptedStrategy::default());
    resolver(config, &later, &clock).resolve(&inputs(&["ERP999999"]), &NoProgress);
    assert!(later.calls().is_empty());
}

#[test]
fn refresh_cached_misses_reattempts_empty_entries() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        cache_path(&dir),
        r#"{"ERP1":{"bioproject_id":"","geo_id":""},"SRP1":{"bioproject_id":"PRJNA1","geo_id":""}}"#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        cache_file: Some(cache_path(&dir)),
        refresh_cached_misses: true,
        ..config()
    };
    let strategy = Arc::new(ScriptedStrategy::default().with("ERP1", "PRJEB1", "E-MTAB-1"));

    let resolution = resolver(config, &strategy, &clock).resolve(&inputs(&["ERP1", "SRP1"]), &NoProgress);

    assert_eq!(strategy.calls(), vec!["ERP1"]);
    assert_eq!(resolution.get("ERP1").unwrap().geo(), "E-MTAB-1");
    assert_eq!(
        CacheStore::load(cache_path(&dir)).get("ERP1").unwrap().geo(),
        "E-MTAB-1"
    );
}

#[test]
fn transient_failure_recovers_in_a_retry_round() {
    let strategy = Arc::new(
        ScriptedStrategy::default()
            .with("SRP1", "PRJNA1", "GSE1")
            .failing("SRP1", 1),
    );
    let clock = Arc::new(ManualClock::new());

    let resolution = resolver(config(), &strategy, &clock).resolve(&inputs(&["SRP1"]), &NoProgress);

    assert_eq!(resolution.get("SRP1").unwrap().geo(), "GSE1");
    assert_eq!(strategy.calls(), vec!["SRP1", "SRP1"]);
    assert_eq!(resolution.stats.resolved, 1);
    assert_eq!(resolution.stats.failed, 0);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
}

#[test]
fn not_found_is_terminal() {
    let strategy = Arc::new(ScriptedStrategy::default());
    let clock = Arc::new(ManualClock::new());

    let resolution = resolver(config(), &strategy, &clock).resolve(&inputs(&["SRP404"]), &NoProgress);

    assert_eq!(strategy.calls().len(), 1);
    assert_eq!(resolution.stats.not_found, 1);
    assert!(clock.sleeps().is_empty());
}

#[test]
fn namespaces_run_in_order_with_delays_between_batches() {
    let strategy = Arc::new(ScriptedStrategy::default());
    let clock = Arc::new(ManualClock::new());
    let input = inputs(&["ERX1", "SRP1", "ERP1", "SRX1", "SRP2", "SRP3"]);

    resolver(config(), &strategy, &clock).resolve(&input, &NoProgress);

    assert_eq!(
        strategy.calls(),
        vec!["SRP1", "SRP2", "SRP3", "SRX1", "ERP1", "ERX1"]
    );
    // SRP: 2 batches, SRX, ERP, ERX: 1 each; no delay after the last.
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 4]);
}

#[test]
fn bounded_pool_resolves_every_id_in_a_batch() {
    let strategy = Arc::new(
        ScriptedStrategy::default()
            .with("SRP1", "PRJNA1", "")
            .with("SRP2", "PRJNA2", "")
            .with("SRP3", "PRJNA3", ""),
    );
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        batch_size: 5,
        max_workers: 4,
        ..config()
    };

    let resolution = resolver(config, &strategy, &clock)
        .resolve(&inputs(&["SRP3", "SRP1", "SRP2"]), &NoProgress);

    assert_eq!(strategy.calls().len(), 3);
    assert_eq!(resolution.get("SRP1").unwrap().bioproject(), "PRJNA1");
    assert_eq!(resolution.get("SRP2").unwrap().bioproject(), "PRJNA2");
    assert_eq!(resolution.get("SRP3").unwrap().bioproject(), "PRJNA3");
    assert!(clock.sleeps().is_empty());
}

#[test]
fn progress_is_cumulative_and_monotonic() {
    let strategy = Arc::new(ScriptedStrategy::default());
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        known_mappings: KnownMappings::builtin(),
        ..config()
    };
    let seen = Mutex::new(Vec::new());
    let progress = |count: usize| seen.lock().unwrap().push(count);

    resolver(config, &strategy, &clock).resolve(
        &inputs(&["ERP127673", "XYZ123", "SRP1", "SRP2", "SRP3", "ERP1"]),
        &progress,
    );

    let seen = seen.into_inner().unwrap();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(seen.first(), Some(&1));
    assert_eq!(seen.last(), Some(&6));
}

#[test]
fn retry_batches_repeat_the_current_progress_count() {
    let strategy = Arc::new(
        ScriptedStrategy::default()
            .with("SRP1", "PRJNA1", "GSE1")
            .failing("SRP1", 1),
    );
    let clock = Arc::new(ManualClock::new());
    let seen = Mutex::new(Vec::new());
    let progress = |count: usize| seen.lock().unwrap().push(count);

    resolver(config(), &strategy, &clock).resolve(&inputs(&["SRP1"]), &progress);

    assert_eq!(seen.into_inner().unwrap(), vec![1, 1]);
}

#[test]
fn zero_batch_size_is_treated_as_one() {
    let strategy = Arc::new(
        ScriptedStrategy::default()
            .with("SRP1", "PRJNA1", "")
            .with("SRP2", "PRJNA2", ""),
    );
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        batch_size: 0,
        ..config()
    };

    let resolution = resolver(config, &strategy, &clock).resolve(&inputs(&["SRP1", "SRP2"]), &NoProgress);

    assert_eq!(resolution.get("SRP2").unwrap().bioproject(), "PRJNA2");
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
}

#[test]
fn unwritable_cache_still_returns_results() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();
    let path = Utf8PathBuf::from_path_buf(blocker.join("cache.json")).unwrap();
    let strategy = Arc::new(ScriptedStrategy::default().with("SRP1", "PRJNA1", "GSE1"));
    let clock = Arc::new(ManualClock::new());
    let config = ResolverConfig {
        cache_file: Some(path),
        ..config()
    };

    let resolution = resolver(config, &strategy, &clock).resolve(&inputs(&["SRP1"]), &NoProgress);

    assert_eq!(resolution.get("SRP1").unwrap().geo(), "GSE1");
}

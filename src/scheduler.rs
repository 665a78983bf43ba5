use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheMap, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::config::ResolverConfig;
use crate::domain::{AccessionId, Host, Namespace, Outcome, ResolutionResult};
use crate::error::KiraError;
use crate::http::{ReqwestTransport, Upstream};
use crate::providers::SourceStrategy;
use crate::providers::ena::EnaStrategy;
use crate::providers::ncbi::NcbiStrategy;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryPolicy, run_rounds};

const NAMESPACE_ORDER: [Namespace; 4] = [Namespace::Srp, Namespace::Srx, Namespace::Erp, Namespace::Erx];

/// Receives the cumulative number of unique accessions processed so far.
///
/// Called after every short-circuited accession and after every batch,
/// including retry-round batches. Retried accessions were already counted
/// in the first round, so retry batches repeat the current count.
pub trait ProgressSink {
    fn processed(&self, count: usize);
}

impl<F: Fn(usize)> ProgressSink for F {
    fn processed(&self, count: usize) {
        self(count)
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn processed(&self, _count: usize) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub unique: usize,
    pub known: usize,
    pub cached: usize,
    pub resolved: usize,
    pub not_found: usize,
    pub failed: usize,
    pub unsupported: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    /// The accession exactly as the caller passed it.
    pub input: String,
    pub result: ResolutionResult,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub entries: Vec<ResolvedEntry>,
    pub stats: ResolutionStats,
}

impl Resolution {
    pub fn get(&self, input: &str) -> Option<&ResolutionResult> {
        self.entries
            .iter()
            .find(|entry| entry.input == input)
            .map(|entry| &entry.result)
    }
}

/// Deduplicates, short-circuits through known mappings and the cache, and
/// drives the remaining accessions through batched, bounded-concurrency
/// resolution with retry rounds.
pub struct Resolver {
    config: ResolverConfig,
    ncbi: Arc<dyn SourceStrategy>,
    ebi: Arc<dyn SourceStrategy>,
    clock: Arc<dyn Clock>,
}

impl Resolver {
    pub fn new(
        config: ResolverConfig,
        ncbi: Arc<dyn SourceStrategy>,
        ebi: Arc<dyn SourceStrategy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ncbi,
            ebi,
            clock,
        }
    }

    /// Wires the live HTTP stack: one rate limiter and transport shared by both strategies.
    pub fn from_config(config: ResolverConfig) -> Result<Self, KiraError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        let limiter = Arc::new(RateLimiter::new(clock.clone(), config.api_key.is_some()));
        let upstream = Upstream::new(
            transport,
            limiter,
            clock.clone(),
            config.api_key.clone(),
            config.backoff,
        );
        let known = Arc::new(config.known_mappings.clone());
        let ncbi = Arc::new(NcbiStrategy::new(upstream.clone(), known.clone()));
        let ebi = Arc::new(EnaStrategy::new(upstream, known));
        Ok(Self::new(config, ncbi, ebi, clock))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, inputs: &[String], progress: &dyn ProgressSink) -> Resolution {
        let mut stats = ResolutionStats::default();
        let unique = dedup(inputs);
        stats.unique = unique.len();

        let mut cache = self
            .config
            .cache_file
            .as_ref()
            .map(|path| CacheStore::load(path.clone()));

        let mut merged: BTreeMap<String, ResolutionResult> = BTreeMap::new();
        let mut pending: BTreeMap<Namespace, Vec<AccessionId>> = BTreeMap::new();
        let mut processed = 0usize;

        for id in unique {
            if !id.is_supported() {
                warn!(accession = %id, "unsupported accession namespace; skipping");
                stats.unsupported += 1;
                merged.insert(id.as_str().to_string(), ResolutionResult::empty());
            } else if let Some(known) = self.config.known_mappings.get(&id) {
                debug!(accession = %id, "known mapping");
                stats.known += 1;
                merged.insert(id.as_str().to_string(), known.clone());
            } else if let Some(hit) = cache
                .as_ref()
                .and_then(|cache| cache.get(id.as_str()))
                .filter(|hit| !(self.config.refresh_cached_misses && hit.is_empty()))
            {
                debug!(accession = %id, "cache hit");
                stats.cached += 1;
                merged.insert(id.as_str().to_string(), hit.clone());
            } else {
                pending.entry(id.namespace()).or_default().push(id);
                continue;
            }
            processed += 1;
            progress.processed(processed);
        }

        let ordered: Vec<AccessionId> = NAMESPACE_ORDER
            .iter()
            .filter_map(|namespace| pending.remove(namespace))
            .flatten()
            .collect();

        let mut fresh = CacheMap::new();
        let failures = self.run_round(ordered, &mut fresh, &mut stats, &mut |count: usize| {
            processed += count;
            progress.processed(processed);
        });
        let exhausted = run_rounds(
            RetryPolicy {
                max_retries: self.config.max_retries,
                retry_delay: self.config.retry_delay,
            },
            self.clock.as_ref(),
            failures,
            |_, failing| {
                self.run_round(failing, &mut fresh, &mut stats, &mut |_: usize| {
                    progress.processed(processed)
                })
            },
        );
        for id in exhausted {
            warn!(accession = %id, "giving up after retry rounds");
            stats.failed += 1;
            fresh.insert(id.as_str().to_string(), ResolutionResult::empty());
        }

        if let Some(cache) = cache.as_mut() {
            if let Err(err) = cache.merge_and_save(&fresh) {
                warn!(path = %cache.path(), error = %err, "failed to persist cache");
            }
        }
        merged.extend(fresh);

        info!(
            unique = stats.unique,
            known = stats.known,
            cached = stats.cached,
            resolved = stats.resolved,
            not_found = stats.not_found,
            failed = stats.failed,
            unsupported = stats.unsupported,
            "resolution finished"
        );

        let entries = inputs
            .iter()
            .map(|input| {
                let result = input
                    .parse::<AccessionId>()
                    .ok()
                    .and_then(|id| merged.get(id.as_str()).cloned())
                    .unwrap_or_default();
                ResolvedEntry {
                    input: input.clone(),
                    result,
                }
            })
            .collect();

        Resolution { entries, stats }
    }

    /// One pass over `ids` in namespace batches. Terminal outcomes land in
    /// `fresh`; failed ids are returned for the next round.
    fn run_round(
        &self,
        ids: Vec<AccessionId>,
        fresh: &mut CacheMap,
        stats: &mut ResolutionStats,
        on_batch: &mut dyn FnMut(usize),
    ) -> Vec<AccessionId> {
        let mut by_namespace: BTreeMap<Namespace, Vec<AccessionId>> = BTreeMap::new();
        for id in ids {
            by_namespace.entry(id.namespace()).or_default().push(id);
        }
        let batches: Vec<&[AccessionId]> = NAMESPACE_ORDER
            .iter()
            .filter_map(|namespace| by_namespace.get(namespace))
            .flat_map(|ids| ids.chunks(self.config.batch_size.max(1)))
            .collect();

        let mut failures = Vec::new();
        let total = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            debug!(batch = index + 1, total, size = batch.len(), "dispatching batch");
            for (id, outcome) in batch.iter().zip(self.run_batch(batch)) {
                match outcome {
                    Outcome::Resolved(result) => {
                        stats.resolved += 1;
                        fresh.insert(id.as_str().to_string(), result);
                    }
                    Outcome::NotFound => {
                        info!(accession = %id, "no cross-reference found");
                        stats.not_found += 1;
                        fresh.insert(id.as_str().to_string(), ResolutionResult::empty());
                    }
                    Outcome::Failed(err) => {
                        warn!(accession = %id, error = %err, "resolution failed");
                        failures.push(id.clone());
                    }
                }
            }
            on_batch(batch.len());
            if index + 1 < total {
                self.clock.sleep(self.config.delay_between_batches);
            }
        }
        failures
    }

    /// Resolves one batch on at most `max_workers` scoped threads; outcomes keep batch order.
    fn run_batch(&self, batch: &[AccessionId]) -> Vec<Outcome> {
        let cursor = AtomicUsize::new(0);
        let done: Mutex<Vec<(usize, Outcome)>> = Mutex::new(Vec::with_capacity(batch.len()));
        let workers = self.config.max_workers.clamp(1, batch.len().max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(id) = batch.get(index) else {
                            break;
                        };
                        let outcome = self.resolve_one(id);
                        done.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((index, outcome));
                    }
                });
            }
        });

        let mut done = done.into_inner().unwrap_or_else(PoisonError::into_inner);
        done.sort_by_key(|(index, _)| *index);
        done.into_iter().map(|(_, outcome)| outcome).collect()
    }

    fn resolve_one(&self, id: &AccessionId) -> Outcome {
        match id.namespace().host() {
            Some(Host::Ncbi) => self.ncbi.resolve(id),
            Some(Host::Ebi) => self.ebi.resolve(id),
            None => Outcome::Failed(KiraError::UnsupportedNamespace(id.to_string())),
        }
    }
}

/// Unique parsed accessions in first-seen order; blank inputs are dropped.
fn dedup(inputs: &[String]) -> Vec<AccessionId> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for input in inputs {
        match input.parse::<AccessionId>() {
            Ok(id) => {
                if seen.insert(id.as_str().to_string()) {
                    unique.push(id);
                }
            }
            Err(err) => warn!(error = %err, "skipping input"),
        }
    }
    unique
}

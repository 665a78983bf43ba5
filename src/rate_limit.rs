use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::clock::Clock;
use crate::domain::Host;

const NCBI_INTERVAL: Duration = Duration::from_millis(1000);
const NCBI_INTERVAL_WITH_KEY: Duration = Duration::from_millis(340);
const EBI_INTERVAL: Duration = Duration::from_millis(1000);
const JITTER_MIN_MS: u64 = 100;
const JITTER_MAX_MS: u64 = 300;

/// Minimum-interval gate per upstream host, shared by all workers of a run.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    has_api_key: bool,
    ncbi_last: Mutex<Option<Instant>>,
    ebi_last: Mutex<Option<Instant>>,
    jitter: Mutex<StdRng>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, has_api_key: bool) -> Self {
        Self::with_rng(clock, has_api_key, StdRng::from_entropy())
    }

    pub fn with_seed(clock: Arc<dyn Clock>, has_api_key: bool, seed: u64) -> Self {
        Self::with_rng(clock, has_api_key, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, has_api_key: bool, rng: StdRng) -> Self {
        Self {
            clock,
            has_api_key,
            ncbi_last: Mutex::new(None),
            ebi_last: Mutex::new(None),
            jitter: Mutex::new(rng),
        }
    }

    pub fn min_interval(&self, host: Host) -> Duration {
        match host {
            Host::Ncbi if self.has_api_key => NCBI_INTERVAL_WITH_KEY,
            Host::Ncbi => NCBI_INTERVAL,
            Host::Ebi => EBI_INTERVAL,
        }
    }

    /// Blocks until `host` may be called again and returns how long it waited.
    pub fn acquire(&self, host: Host) -> Duration {
        let interval = self.min_interval(host);
        let mut last = self.slot(host);
        let mut waited = Duration::ZERO;
        if let Some(prev) = *last {
            let elapsed = self.clock.now().saturating_duration_since(prev);
            if elapsed < interval {
                waited = interval - elapsed + self.jitter();
                trace!(%host, ?waited, "rate limit wait");
                self.clock.sleep(waited);
            }
        }
        *last = Some(self.clock.now());
        waited
    }

    fn slot(&self, host: Host) -> MutexGuard<'_, Option<Instant>> {
        let slot = match host {
            Host::Ncbi => &self.ncbi_last,
            Host::Ebi => &self.ebi_last,
        };
        slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn jitter(&self) -> Duration {
        let mut rng = self
            .jitter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Duration::from_millis(rng.gen_range(JITTER_MIN_MS..=JITTER_MAX_MS))
    }
}

use std::time::Duration;

use tracing::info;

use crate::clock::Clock;

/// Whole-set retry rounds on top of the per-request backoff in [`crate::http`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Re-runs `round` on a shrinking failure set.
///
/// `round` receives the round number (starting at 1) and the items still
/// failing, and returns the items that failed again. Each round is preceded by
/// `retry_delay`. Whatever is left after `max_retries` rounds is returned.
pub fn run_rounds<T, F>(policy: RetryPolicy, clock: &dyn Clock, initial: Vec<T>, mut round: F) -> Vec<T>
where
    F: FnMut(u32, Vec<T>) -> Vec<T>,
{
    let mut failures = initial;
    for attempt in 1..=policy.max_retries {
        if failures.is_empty() {
            break;
        }
        info!(
            round = attempt,
            max_retries = policy.max_retries,
            count = failures.len(),
            delay = ?policy.retry_delay,
            "retrying failed accessions"
        );
        clock.sleep(policy.retry_delay);
        failures = round(attempt, failures);
    }
    failures
}

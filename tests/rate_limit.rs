use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kira_accession_resolver::clock::{Clock, ManualClock};
use kira_accession_resolver::domain::Host;
use kira_accession_resolver::rate_limit::RateLimiter;

#[test]
fn concurrent_workers_are_spaced_by_the_interval() {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(RateLimiter::with_seed(clock.clone(), false, 11));

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| limiter.acquire(Host::Ncbi));
        }
    });

    let sleeps = clock.sleeps();
    assert_eq!(sleeps.len(), 3);
    for sleep in sleeps {
        assert!(sleep >= Duration::from_millis(1100), "{sleep:?}");
        assert!(sleep <= Duration::from_millis(1300), "{sleep:?}");
    }
}

#[test]
fn keyed_ncbi_interval_is_shorter() {
    let clock = Arc::new(ManualClock::new());
    let limiter = RateLimiter::with_seed(clock.clone(), true, 11);

    limiter.acquire(Host::Ncbi);
    let waited = limiter.acquire(Host::Ncbi);

    assert!(waited >= Duration::from_millis(440));
    assert!(waited <= Duration::from_millis(640));
    assert_eq!(clock.now() - clock.origin(), waited);
}

#[test]
fn same_seed_gives_same_jitter() {
    let waits = |seed| {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_seed(clock, false, seed);
        (0..3).map(|_| limiter.acquire(Host::Ebi)).collect::<Vec<_>>()
    };
    assert_eq!(waits(5), waits(5));
}

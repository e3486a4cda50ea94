//! Per-object exponential backoff for failed reconciles.

use crate::status::ResourceId;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use tokio::time::Duration;

/// Tracks consecutive reconcile failures per object. Each failure doubles the
/// requeue delay, up to a cap, and a successful reconcile starts over.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: Mutex<HashMap<ResourceId, u32>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure and returns how long to wait before retrying. The
    /// delay is jittered between 0.5x and 1.5x of the backoff.
    pub fn failed(&self, id: ResourceId) -> Duration {
        let failures = {
            let mut failures = self.failures.lock();
            let count = failures.entry(id).or_default();
            *count = count.saturating_add(1);
            *count
        };
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        self.delay(failures).mul_f64(jitter)
    }

    pub fn reset(&self, id: &ResourceId) {
        self.failures.lock().remove(id);
    }

    /// The delay before jitter after `failures` consecutive failures.
    fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.initial.saturating_mul(1 << exp).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("web".to_string(), name.to_string())
    }

    fn assert_jittered(delay: Duration, base: Duration) {
        assert!(
            delay >= base / 2 && delay <= base * 3 / 2,
            "{delay:?} is not within jitter of {base:?}"
        );
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let delays = (1..=8).map(|n| backoff.delay(n)).collect::<Vec<_>>();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16, 32, 60, 60].map(Duration::from_secs).to_vec()
        );
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn consecutive_failures_grow_and_success_resets() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(300));
        for n in 0..5 {
            assert_jittered(backoff.failed(id("edge")), Duration::from_secs(1 << n));
        }
        // Other objects keep their own count.
        assert_jittered(backoff.failed(id("internal")), Duration::from_secs(1));

        backoff.reset(&id("edge"));
        assert_jittered(backoff.failed(id("edge")), Duration::from_secs(1));
        assert_jittered(backoff.failed(id("internal")), Duration::from_secs(2));
    }
}

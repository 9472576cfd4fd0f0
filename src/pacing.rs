use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::{DelayRange, PacingConfig};

/// Every wait the crawler performs goes through a pacer.
pub trait Pacer: Send + Sync {
    /// Fixed wait (retry backoff, cooldowns).
    fn pause(&self, duration: Duration);

    /// Random wait drawn from `range`.
    fn human(&self, range: DelayRange) {
        self.pause(sample(range));
    }
}

pub fn sample(range: DelayRange) -> Duration {
    if range.max_secs <= range.min_secs {
        return Duration::from_secs_f64(range.min_secs.max(0.0));
    }
    let secs = rand::thread_rng().gen_range(range.min_secs..range.max_secs);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Default)]
pub struct HumanPacer {
    pub config: PacingConfig,
}

impl HumanPacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }
}

impl Pacer for HumanPacer {
    fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        debug!("waiting {:.1}s", duration.as_secs_f64());
        std::thread::sleep(duration);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stays_in_range() {
        let range = DelayRange::new(1.0, 3.0);
        for _ in 0..100 {
            let d = sample(range).as_secs_f64();
            assert!((1.0..3.0).contains(&d));
        }
    }

    #[test]
    fn test_degenerate_range() {
        assert_eq!(sample(DelayRange::new(2.0, 2.0)), Duration::from_secs(2));
    }
}

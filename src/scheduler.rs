//! Cycle timing: one posting cycle at a time, with a randomized gap.
//!
//! The next delay is armed only after the current cycle finishes, success or
//! failure, so cycles never overlap and are never skipped.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::info;

use crate::config::RunMode;
use crate::orchestrator::Orchestrator;

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    mode: RunMode,
    test_interval: Duration,
    live_window_min_hours: u64,
    live_window_max_hours: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        mode: RunMode,
        test_interval: Duration,
        live_window_min_hours: u64,
        live_window_max_hours: u64,
    ) -> Self {
        Self {
            orchestrator,
            mode,
            test_interval,
            live_window_min_hours,
            live_window_max_hours,
        }
    }

    /// Run posting cycles forever. Intended to be spawned and aborted on
    /// shutdown.
    pub async fn run(&self) {
        info!(mode = ?self.mode, "Scheduler started");
        loop {
            let outcome = self.orchestrator.execute_post_with_fallback().await;
            info!(
                success = outcome.success,
                post_id = outcome.post_id,
                "Cycle finished"
            );

            let delay = self.next_delay();
            info!(delay_secs = delay.as_secs(), "Next cycle scheduled");
            tokio::time::sleep(delay).await;
        }
    }

    fn next_delay(&self) -> Duration {
        match self.mode {
            RunMode::Test => self.test_interval,
            RunMode::Live => live_delay(
                &mut rand::thread_rng(),
                self.live_window_min_hours,
                self.live_window_max_hours,
            ),
        }
    }
}

/// Draw a uniform delay from the live posting window.
fn live_delay<R: Rng>(rng: &mut R, min_hours: u64, max_hours: u64) -> Duration {
    let min = min_hours * 3600;
    let max = max_hours.max(min_hours) * 3600;
    let secs = if min == max {
        min
    } else {
        rng.gen_range(min..=max)
    };
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_live_delay_within_window() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let delay = live_delay(&mut rng, 4, 8);
            assert!(delay >= Duration::from_secs(4 * 3600));
            assert!(delay <= Duration::from_secs(8 * 3600));
        }
    }

    #[test]
    fn test_live_delay_degenerate_window() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        assert_eq!(live_delay(&mut rng, 6, 6), Duration::from_secs(6 * 3600));
        // An inverted window clamps to the minimum instead of panicking.
        assert_eq!(live_delay(&mut rng, 6, 2), Duration::from_secs(6 * 3600));
    }
}

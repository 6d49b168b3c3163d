//! Inter-pass pacing

use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Computes and applies the delay between scheduling passes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleController {
    sleep: Duration,
    jitter_percent: u8,
}

impl ThrottleController {
    pub fn new(sleep_seconds: u64, jitter_percent: u8) -> Self {
        Self {
            sleep: Duration::from_secs(sleep_seconds),
            jitter_percent: jitter_percent.min(100),
        }
    }

    /// No pacing at all
    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    pub fn is_disabled(&self) -> bool {
        self.sleep.is_zero()
    }

    /// Inclusive range the delay is drawn from
    pub fn bounds(&self) -> (Duration, Duration) {
        let upper = self.sleep.mul_f64(1.0 + f64::from(self.jitter_percent) / 100.0);
        (self.sleep, upper)
    }

    /// Draw a delay uniformly from [`bounds`](Self::bounds)
    pub fn delay(&self) -> Duration {
        self.delay_with(&mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (lower, upper) = self.bounds();
        if upper <= lower {
            return lower;
        }
        let secs = rng.gen_range(lower.as_secs_f64()..=upper.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Sleep for one drawn delay plus `extra`
    pub async fn pause(&self, extra: Duration) {
        let total = if self.is_disabled() {
            extra
        } else {
            self.delay() + extra
        };
        if total.is_zero() {
            return;
        }
        debug!("Throttling next pass for {:.2}s", total.as_secs_f64());
        tokio::time::sleep(total).await;
    }
}

impl Default for ThrottleController {
    fn default() -> Self {
        Self::disabled()
    }
}

//! Per-provider health tracking with exponentially weighted moving averages.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Reported provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Still selectable, but ranked down (auth/quota trouble, validation
    /// failures, elevated error rate).
    Degraded,
    /// Never selected.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

const EWMA_ALPHA: f64 = 0.2;
const DEGRADED_ERROR_RATE: f64 = 0.3;
const UNHEALTHY_ERROR_RATE: f64 = 0.8;

/// EWMA-based health tracker for one provider.
#[derive(Debug)]
pub struct HealthTracker {
    error_rate: f64,
    latency_ms: f64,
    last_probe: Option<Instant>,
    /// Sticky override set by auth/quota failures or operators; cleared by
    /// the next success.
    forced: Option<HealthStatus>,
}

impl HealthTracker {
    pub fn new(typical_latency: Duration) -> Self {
        Self {
            error_rate: 0.0,
            latency_ms: typical_latency.as_millis() as f64,
            last_probe: None,
            forced: None,
        }
    }

    pub fn record_success(&mut self, latency: Duration) {
        self.error_rate *= 1.0 - EWMA_ALPHA;
        self.latency_ms = self.latency_ms * (1.0 - EWMA_ALPHA)
            + latency.as_millis() as f64 * EWMA_ALPHA;
        self.last_probe = Some(Instant::now());
        self.forced = None;
    }

    pub fn record_failure(&mut self) {
        self.error_rate = self.error_rate * (1.0 - EWMA_ALPHA) + EWMA_ALPHA;
        self.last_probe = Some(Instant::now());
    }

    /// Quality datum from response validation; weighs half a hard failure.
    pub fn record_validation_failure(&mut self) {
        self.error_rate = self.error_rate * (1.0 - EWMA_ALPHA) + EWMA_ALPHA * 0.5;
        self.last_probe = Some(Instant::now());
    }

    /// Pin the status (auth/quota degradation, operator override, tests).
    pub fn force(&mut self, status: HealthStatus) {
        self.forced = Some(status);
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub fn last_probe(&self) -> Option<Instant> {
        self.last_probe
    }

    pub fn status(&self) -> HealthStatus {
        if let Some(forced) = self.forced {
            return forced;
        }
        if self.error_rate >= UNHEALTHY_ERROR_RATE {
            HealthStatus::Unhealthy
        } else if self.error_rate >= DEGRADED_ERROR_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy() {
        let tracker = HealthTracker::new(Duration::from_secs(5));
        assert_eq!(tracker.status(), HealthStatus::Healthy);
        assert_eq!(tracker.error_rate(), 0.0);
    }

    #[test]
    fn repeated_failures_degrade_then_sicken() {
        let mut tracker = HealthTracker::new(Duration::from_secs(5));

        for _ in 0..2 {
            tracker.record_failure();
        }
        assert_eq!(tracker.status(), HealthStatus::Degraded);

        for _ in 0..20 {
            tracker.record_failure();
        }
        assert_eq!(tracker.status(), HealthStatus::Unhealthy);
    }

    #[test]
    fn success_recovers_and_clears_override() {
        let mut tracker = HealthTracker::new(Duration::from_secs(5));
        tracker.force(HealthStatus::Degraded);
        assert_eq!(tracker.status(), HealthStatus::Degraded);

        for _ in 0..10 {
            tracker.record_success(Duration::from_millis(500));
        }
        assert_eq!(tracker.status(), HealthStatus::Healthy);
        assert!(tracker.latency_ms() < 5000.0);
    }

    #[test]
    fn validation_failures_count_half() {
        let mut hard = HealthTracker::new(Duration::from_secs(1));
        let mut soft = HealthTracker::new(Duration::from_secs(1));

        hard.record_failure();
        soft.record_validation_failure();

        assert!(soft.error_rate() < hard.error_rate());
        assert!(soft.error_rate() > 0.0);
    }
}

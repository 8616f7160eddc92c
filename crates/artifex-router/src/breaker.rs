//! Per-provider circuit breaker
//!
//! State machine:
//!
//! ```text
//! ┌─────────┐ failure ratio ≥ 60% ┌─────────┐   cooldown    ┌──────────┐
//! │ Closed  │ ──────────────────► │  Open   │ ────────────► │ HalfOpen │
//! └─────────┘  over last ≥ 10     └─────────┘               └──────────┘
//!      ▲                               ▲     probe failure        │
//!      │        probe success          └────── (cooldown ×2) ─────┤
//!      └──────────────────────────────────────────────────────────┘
//! ```
//!
//! HalfOpen admits exactly one probe at a time. Every re-open doubles the
//! cooldown up to a cap; a successful probe resets it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerConfig {
    /// Rolling window size; the ratio is only evaluated once the window
    /// holds this many outcomes.
    pub window_size: usize,

    /// Failure ratio that opens the circuit.
    pub failure_ratio: f64,

    /// Initial Open duration before a probe is admitted.
    #[serde(with = "duration_millis")]
    pub cooldown: Duration,

    /// Cap for the doubling cooldown.
    #[serde(with = "duration_millis")]
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_ratio: 0.6,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

impl BreakerConfig {
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size.max(1);
        self
    }

    pub fn with_failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Rolling-window circuit breaker. Callers must pair every admitted call
/// with exactly one `record_success` / `record_failure`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    /// Recent outcomes, `true` = failure.
    outcomes: VecDeque<bool>,
    opened_at: Option<Instant>,
    /// Consecutive opens since the last successful probe; drives cooldown
    /// doubling.
    reopen_count: u32,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            outcomes: VecDeque::new(),
            opened_at: None,
            reopen_count: 0,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Cooldown currently in effect (doubles per re-open, capped).
    pub fn current_cooldown(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.reopen_count.min(16));
        (self.config.cooldown * factor).min(self.config.max_cooldown)
    }

    /// Try to admit a call. In `Open`, transitions to `HalfOpen` once the
    /// cooldown has elapsed; `HalfOpen` admits a single probe at a time.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed() >= self.current_cooldown())
                    .unwrap_or(true);
                if elapsed {
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Whether a call would currently be admitted, without reserving the
    /// half-open probe slot.
    pub fn would_admit(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self
                .opened_at
                .map(|t| t.elapsed() >= self.current_cooldown())
                .unwrap_or(true),
            CircuitState::HalfOpen => !self.probe_in_flight,
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Closed;
                self.outcomes.clear();
                self.opened_at = None;
                self.reopen_count = 0;
                self.probe_in_flight = false;
            }
            _ => self.push_outcome(false),
        }
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                // Failed probe: re-open with doubled cooldown.
                self.reopen_count += 1;
                self.open();
            }
            CircuitState::Closed => {
                self.push_outcome(true);
                if self.window_tripped() {
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Abandon an admitted call without an outcome (request-shape errors are
    /// the caller's fault, not the provider's). Frees the half-open probe
    /// slot.
    pub fn release(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probe_in_flight = false;
        }
    }

    /// Force the circuit open (admin/test hook).
    pub fn force_open(&mut self) {
        self.open();
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.probe_in_flight = false;
        self.outcomes.clear();
    }

    fn push_outcome(&mut self, failure: bool) {
        self.outcomes.push_back(failure);
        while self.outcomes.len() > self.config.window_size {
            self.outcomes.pop_front();
        }
    }

    fn window_tripped(&self) -> bool {
        if self.outcomes.len() < self.config.window_size {
            return false;
        }
        let failures = self.outcomes.iter().filter(|&&f| f).count();
        failures as f64 / self.outcomes.len() as f64 >= self.config.failure_ratio
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig::default()
            .with_window_size(4)
            .with_cooldown(Duration::from_millis(10))
    }

    #[test]
    fn opens_on_failure_ratio() {
        let mut breaker = CircuitBreaker::new(fast_config());

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // Fourth outcome fills the window: 3/4 = 75% ≥ 60%.
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.opened_at().is_some());
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn stays_closed_under_ratio() {
        let mut breaker = CircuitBreaker::new(fast_config());

        breaker.record_failure();
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();
        // 2/4 = 50% < 60%
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_single_probe() {
        let mut breaker = CircuitBreaker::new(fast_config());
        breaker.force_open();

        std::thread::sleep(Duration::from_millis(15));

        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Second caller is rejected while the probe is in flight.
        assert!(!breaker.try_acquire());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_doubles_cooldown() {
        let mut breaker = CircuitBreaker::new(fast_config());
        breaker.force_open();
        let initial = breaker.current_cooldown();

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.try_acquire());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.current_cooldown(), initial * 2);

        // A second failed probe doubles again.
        std::thread::sleep(breaker.current_cooldown() + Duration::from_millis(5));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.current_cooldown(), initial * 4);
    }

    #[test]
    fn cooldown_is_capped() {
        let config = BreakerConfig {
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(60),
            ..Default::default()
        };
        let mut breaker = CircuitBreaker::new(config);
        breaker.force_open();
        breaker.reopen_count = 10;
        assert_eq!(breaker.current_cooldown(), Duration::from_secs(60));
    }

    #[test]
    fn successful_probe_resets_reopen_count() {
        let mut breaker = CircuitBreaker::new(fast_config());
        breaker.force_open();
        let initial = breaker.current_cooldown();

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert!(breaker.current_cooldown() > initial);

        std::thread::sleep(breaker.current_cooldown() + Duration::from_millis(5));
        assert!(breaker.try_acquire());
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.current_cooldown(), initial);
    }
}

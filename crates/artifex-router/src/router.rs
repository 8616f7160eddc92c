//! Provider selection and fallback
//!
//! The router owns per-provider mutable state (breaker, bucket, health) and
//! walks an ordered candidate list until a provider returns a valid
//! response. Selection is deterministic for a given state snapshot; ties
//! break by provider name.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::cache::ResponseCache;
use crate::health::{HealthStatus, HealthTracker};
use crate::rate_limit::TokenBucket;
use crate::request::{
    GenerateRequest, GenerateResponse, ProviderCapabilities, ProviderFailure,
};
use crate::validate::{ResponseValidator, ValidationConfig};

/// Scoring weights: latency 0.5, cost 0.3, error rate 0.2.
const ALPHA_LATENCY: f64 = 0.5;
const BETA_COST: f64 = 0.3;
const GAMMA_ERROR: f64 = 0.2;

/// Error from a single provider call, classified for routing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderCallError {
    #[error("provider call timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Auth or quota rejection; the provider is marked Degraded and skipped.
    #[error("auth/quota rejection {status}: {message}")]
    AuthOrQuota { status: u16, message: String },

    /// The request itself is malformed; no other provider will do better.
    #[error("request rejected {status}: {message}")]
    BadRequest { status: u16, message: String },

    /// Response arrived but could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProviderCallError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection(_) => "connection",
            Self::Server { .. } => "server",
            Self::AuthOrQuota { .. } => "auth_or_quota",
            Self::BadRequest { .. } => "bad_request",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Error surfaced to router callers.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every provider was ineligible or failed; the per-provider log rides
    /// along for diagnostics and error drops.
    #[error("all providers failed ({} attempts)", failures.len())]
    AllProvidersFailed { failures: Vec<ProviderFailure> },
}

/// Adapter over one text-generation provider.
///
/// Implementations map the normalized request to the provider wire format
/// and back, preserving token usage and measured latency. Credentials come
/// from the environment; adapters never log them.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn generate(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<GenerateResponse, ProviderCallError>;
}

/// Router tuning knobs.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub breaker: BreakerConfig,
    pub validation: ValidationConfig,
    /// Enables the content-addressed response cache.
    pub cache_ttl: Option<Duration>,
    /// Token-bucket rate for providers without an explicit rate.
    pub default_rate_per_sec: f64,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            validation: ValidationConfig::default(),
            cache_ttl: None,
            default_rate_per_sec: 5.0,
        }
    }
}

/// Point-in-time health report for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealthReport {
    pub status: HealthStatus,
    pub circuit: CircuitState,
    pub error_rate: f64,
    pub ewma_latency_ms: f64,
}

struct ProviderState {
    breaker: Mutex<CircuitBreaker>,
    bucket: Mutex<TokenBucket>,
    health: Mutex<HealthTracker>,
}

/// The provider router.
pub struct Router {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    states: DashMap<String, Arc<ProviderState>>,
    validator: ResponseValidator,
    cache: Option<ResponseCache>,
    options: RouterOptions,
}

impl Router {
    pub fn new() -> Self {
        Self::with_options(RouterOptions::default())
    }

    pub fn with_options(options: RouterOptions) -> Self {
        Self {
            providers: Vec::new(),
            states: DashMap::new(),
            validator: ResponseValidator::new(options.validation.clone()),
            cache: options.cache_ttl.map(ResponseCache::new),
            options,
        }
    }

    /// Register a provider with its rate limit. Registration order is the
    /// final tie-break only through name ordering; it does not grant
    /// priority.
    pub fn add_provider(&mut self, adapter: Arc<dyn ProviderAdapter>, rate_per_sec: Option<f64>) {
        let name = adapter.name().to_string();
        let rate = rate_per_sec.unwrap_or(self.options.default_rate_per_sec);
        self.states.insert(
            name,
            Arc::new(ProviderState {
                breaker: Mutex::new(CircuitBreaker::new(self.options.breaker.clone())),
                bucket: Mutex::new(TokenBucket::new(rate)),
                health: Mutex::new(HealthTracker::new(adapter.capabilities().typical_latency)),
            }),
        );
        self.providers.push(adapter);
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Health map for every registered provider.
    pub fn health(&self) -> BTreeMap<String, ProviderHealthReport> {
        let mut report = BTreeMap::new();
        for provider in &self.providers {
            if let Some(state) = self.states.get(provider.name()) {
                let health = state.health.lock();
                report.insert(
                    provider.name().to_string(),
                    ProviderHealthReport {
                        status: health.status(),
                        circuit: state.breaker.lock().state(),
                        error_rate: health.error_rate(),
                        ewma_latency_ms: health.latency_ms(),
                    },
                );
            }
        }
        report
    }

    /// Trip a provider's circuit (admin/test hook).
    pub fn force_circuit_open(&self, name: &str) {
        if let Some(state) = self.states.get(name) {
            state.breaker.lock().force_open();
        }
    }

    /// Pin a provider's health status (admin/test hook).
    pub fn force_health(&self, name: &str, status: HealthStatus) {
        if let Some(state) = self.states.get(name) {
            state.health.lock().force(status);
        }
    }

    /// Generate text. Walks the candidate list per the selection rules and
    /// returns the first validated response.
    #[instrument(skip(self, request), fields(providers = self.providers.len()))]
    pub async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, RouterError> {
        if request.messages.is_empty() {
            return Err(RouterError::InvalidRequest("no messages".into()));
        }
        if request.max_tokens == 0 {
            return Err(RouterError::InvalidRequest("max_tokens must be > 0".into()));
        }

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(request) {
                debug!("cache hit, bypassing providers");
                return Ok(hit);
            }
        }

        let started = Instant::now();
        let mut failures: Vec<ProviderFailure> = Vec::new();
        let candidates = self.eligible_candidates(request, &mut failures);

        if candidates.is_empty() {
            warn!("no eligible providers");
            return Err(RouterError::AllProvidersFailed { failures });
        }

        let per_candidate_wait = request.deadline / candidates.len() as u32;

        for adapter in candidates {
            let name = adapter.name().to_string();
            let remaining = request.deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                failures.push(ProviderFailure {
                    provider: name,
                    error: "request deadline exhausted before attempt".into(),
                    kind: "deadline".into(),
                });
                break;
            }

            // Clone the Arc out so no shard guard is held across awaits.
            let state = {
                let guard = self
                    .states
                    .get(&name)
                    .expect("state exists for registered provider");
                Arc::clone(guard.value())
            };

            // Rate limit: bounded wait, then skip.
            if !self
                .acquire_token(&state, per_candidate_wait.min(remaining))
                .await
            {
                debug!(provider = %name, "rate limited, skipping");
                failures.push(ProviderFailure {
                    provider: name,
                    error: "rate limit token unavailable within wait budget".into(),
                    kind: "rate_limited".into(),
                });
                continue;
            }

            // Circuit admission (reserves the half-open probe slot).
            if !state.breaker.lock().try_acquire() {
                failures.push(ProviderFailure {
                    provider: name,
                    error: "circuit open".into(),
                    kind: "circuit_open".into(),
                });
                continue;
            }

            let remaining = request.deadline.saturating_sub(started.elapsed());
            let call_timeout = remaining.min(adapter.capabilities().typical_latency * 3);

            debug!(provider = %name, timeout_ms = call_timeout.as_millis() as u64, "attempting provider");

            match adapter.generate(request, call_timeout).await {
                Ok(response) => {
                    match self
                        .validator
                        .validate(&response.content, request.language.as_deref())
                    {
                        Ok(()) => {
                            state.breaker.lock().record_success();
                            state
                                .health
                                .lock()
                                .record_success(Duration::from_millis(response.latency_ms));
                            if let Some(cache) = &self.cache {
                                cache.insert(request, response.clone());
                            }
                            info!(provider = %name, latency_ms = response.latency_ms, "generation succeeded");
                            return Ok(response);
                        }
                        Err(validation) => {
                            // Transient against this provider; quality datum
                            // for future ranking.
                            warn!(provider = %name, error = %validation, "response failed validation");
                            state.breaker.lock().record_failure();
                            state.health.lock().record_validation_failure();
                            failures.push(ProviderFailure {
                                provider: name,
                                error: validation.to_string(),
                                kind: "validation".into(),
                            });
                        }
                    }
                }
                Err(ProviderCallError::BadRequest { status, message }) => {
                    // Our request shape is wrong; no provider will fare
                    // better. Not held against the provider.
                    state.breaker.lock().release();
                    return Err(RouterError::InvalidRequest(format!(
                        "provider {name} rejected request ({status}): {message}"
                    )));
                }
                Err(error @ ProviderCallError::AuthOrQuota { .. }) => {
                    warn!(provider = %name, error = %error, "auth/quota rejection, degrading provider");
                    {
                        let mut health = state.health.lock();
                        health.record_failure();
                        health.force(HealthStatus::Degraded);
                    }
                    state.breaker.lock().record_failure();
                    failures.push(ProviderFailure {
                        provider: name,
                        error: error.to_string(),
                        kind: error.kind().into(),
                    });
                }
                Err(error) => {
                    warn!(provider = %name, error = %error, "provider call failed");
                    state.breaker.lock().record_failure();
                    state.health.lock().record_failure();
                    failures.push(ProviderFailure {
                        provider: name,
                        error: error.to_string(),
                        kind: error.kind().into(),
                    });
                }
            }
        }

        Err(RouterError::AllProvidersFailed { failures })
    }

    /// Build the ordered candidate list: filter by circuit, health, and
    /// capabilities; score; promote the preferred provider.
    fn eligible_candidates(
        &self,
        request: &GenerateRequest,
        failures: &mut Vec<ProviderFailure>,
    ) -> Vec<Arc<dyn ProviderAdapter>> {
        struct Scored {
            adapter: Arc<dyn ProviderAdapter>,
            latency_ms: f64,
            cost: f64,
            error_rate: f64,
        }

        let mut scored: Vec<Scored> = Vec::new();

        for adapter in &self.providers {
            let name = adapter.name();
            let Some(state) = self.states.get(name) else {
                continue;
            };

            if !state.breaker.lock().would_admit() {
                failures.push(ProviderFailure {
                    provider: name.to_string(),
                    error: "circuit open".into(),
                    kind: "circuit_open".into(),
                });
                continue;
            }

            let health = state.health.lock();
            if health.status() == HealthStatus::Unhealthy {
                failures.push(ProviderFailure {
                    provider: name.to_string(),
                    error: "provider unhealthy".into(),
                    kind: "unhealthy".into(),
                });
                continue;
            }

            let caps = adapter.capabilities();
            if !caps.satisfies(request) {
                failures.push(ProviderFailure {
                    provider: name.to_string(),
                    error: "capabilities do not satisfy request".into(),
                    kind: "capability".into(),
                });
                continue;
            }

            scored.push(Scored {
                adapter: adapter.clone(),
                latency_ms: health.latency_ms(),
                cost: caps.cost_per_1k_tokens,
                error_rate: health.error_rate(),
            });
        }

        if scored.is_empty() {
            return vec![];
        }

        let max_latency = scored.iter().map(|s| s.latency_ms).fold(1.0, f64::max);
        let max_cost = scored.iter().map(|s| s.cost).fold(f64::EPSILON, f64::max);

        let mut ranked: Vec<(f64, Arc<dyn ProviderAdapter>)> = scored
            .into_iter()
            .map(|s| {
                let score = ALPHA_LATENCY * (1.0 - s.latency_ms / max_latency)
                    + BETA_COST * (1.0 - s.cost / max_cost)
                    + GAMMA_ERROR * (1.0 - s.error_rate);
                (score, s.adapter)
            })
            .collect();

        // Deterministic: score descending, name ascending on ties.
        ranked.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name().cmp(b.name()))
        });

        let mut candidates: Vec<Arc<dyn ProviderAdapter>> =
            ranked.into_iter().map(|(_, a)| a).collect();

        if let Some(preferred) = &request.preferred_provider {
            if let Some(pos) = candidates.iter().position(|a| a.name() == preferred) {
                let preferred = candidates.remove(pos);
                candidates.insert(0, preferred);
            }
        }

        candidates
    }

    /// Bounded-wait token acquisition.
    async fn acquire_token(&self, state: &ProviderState, budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            let wait = {
                let mut bucket = state.bucket.lock();
                if bucket.try_acquire() {
                    return true;
                }
                bucket.time_until_available()
            };

            let now = Instant::now();
            if now + wait > deadline {
                return false;
            }
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{SimAdapter, SimBehavior};
    use crate::request::ChatMessage;

    fn request() -> GenerateRequest {
        GenerateRequest::new(vec![ChatMessage::user(
            "Create a Python FastAPI service for a todo list with CRUD endpoints.",
        )])
        .with_deadline(Duration::from_secs(5))
    }

    fn router_with(adapters: Vec<SimAdapter>) -> Router {
        let mut router = Router::new();
        for adapter in adapters {
            router.add_provider(Arc::new(adapter), Some(100.0));
        }
        router
    }

    const LONG_BODY: &str =
        "fn main() {\n    let service = Service::new();\n    service.run();\n}\n";

    #[tokio::test]
    async fn single_provider_success() {
        let router = router_with(vec![SimAdapter::fixed("alpha", LONG_BODY)]);
        let response = router.generate(&request()).await.unwrap();
        assert_eq!(response.provider, "alpha");
        assert!(response.completion_tokens.is_some());
    }

    #[tokio::test]
    async fn empty_request_is_invalid() {
        let router = router_with(vec![SimAdapter::fixed("alpha", LONG_BODY)]);
        let err = router
            .generate(&GenerateRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn falls_back_when_primary_fails() {
        let failing = SimAdapter::new("alpha", SimBehavior::AlwaysFail);
        let healthy = SimAdapter::fixed("beta", LONG_BODY);
        let router = router_with(vec![failing, healthy]);

        let response = router.generate(&request()).await.unwrap();
        assert_eq!(response.provider, "beta");
    }

    #[tokio::test]
    async fn open_circuit_excludes_provider() {
        let primary = SimAdapter::fixed("alpha", LONG_BODY);
        let fallback = SimAdapter::fixed("beta", LONG_BODY);
        let router = router_with(vec![primary, fallback]);

        router.force_circuit_open("alpha");

        let response = router
            .generate(&request().with_preferred_provider("alpha"))
            .await
            .unwrap();
        assert_eq!(response.provider, "beta");
    }

    #[tokio::test]
    async fn all_unhealthy_fails_with_log() {
        let router = router_with(vec![
            SimAdapter::fixed("alpha", LONG_BODY),
            SimAdapter::fixed("beta", LONG_BODY),
        ]);
        router.force_health("alpha", HealthStatus::Unhealthy);
        router.force_health("beta", HealthStatus::Unhealthy);

        let err = router.generate(&request()).await.unwrap_err();
        match err {
            RouterError::AllProvidersFailed { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.kind == "unhealthy"));
            }
            other => panic!("expected AllProvidersFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_advances_to_next_provider() {
        // Provider returning an empty body fails validation; the router
        // advances and records the quality datum.
        let empty = SimAdapter::new("alpha", SimBehavior::Fixed(String::new()));
        let healthy = SimAdapter::fixed("beta", LONG_BODY);
        let router = router_with(vec![empty, healthy]);

        let response = router
            .generate(&request().with_preferred_provider("alpha"))
            .await
            .unwrap();
        assert_eq!(response.provider, "beta");

        let health = router.health();
        assert!(health["alpha"].error_rate > 0.0);
    }

    #[tokio::test]
    async fn preferred_provider_is_promoted() {
        // beta is more expensive, but preference wins when eligible.
        let cheap = SimAdapter::fixed("alpha", LONG_BODY);
        let expensive = SimAdapter::fixed("beta", LONG_BODY).with_cost(10.0);
        let router = router_with(vec![cheap, expensive]);

        let response = router
            .generate(&request().with_preferred_provider("beta"))
            .await
            .unwrap();
        assert_eq!(response.provider, "beta");
    }

    #[tokio::test]
    async fn cache_hit_bypasses_providers() {
        let mut router = Router::with_options(RouterOptions {
            cache_ttl: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let scripted = SimAdapter::scripted(
            "alpha",
            vec![Ok(LONG_BODY.to_string()), Err(ProviderCallError::Timeout)],
        );
        router.add_provider(Arc::new(scripted), Some(100.0));

        let first = router.generate(&request()).await.unwrap();
        // Second call would hit the scripted timeout if it reached the
        // provider; the cache serves it instead.
        let second = router.generate(&request()).await.unwrap();
        assert_eq!(first.content, second.content);
    }

    #[tokio::test]
    async fn bad_request_shape_fails_fast() {
        let bad = SimAdapter::new(
            "alpha",
            SimBehavior::FailWith(ProviderCallError::BadRequest {
                status: 422,
                message: "unknown field".into(),
            }),
        );
        let healthy = SimAdapter::fixed("beta", LONG_BODY);
        let router = router_with(vec![bad, healthy]);

        let err = router
            .generate(&request().with_preferred_provider("alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn auth_failure_degrades_provider() {
        let auth_broken = SimAdapter::new(
            "alpha",
            SimBehavior::FailWith(ProviderCallError::AuthOrQuota {
                status: 401,
                message: "bad key".into(),
            }),
        );
        let healthy = SimAdapter::fixed("beta", LONG_BODY);
        let router = router_with(vec![auth_broken, healthy]);

        let response = router
            .generate(&request().with_preferred_provider("alpha"))
            .await
            .unwrap();
        assert_eq!(response.provider, "beta");
        assert_eq!(router.health()["alpha"].status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn repeated_failures_open_the_circuit() {
        let flaky = SimAdapter::new("alpha", SimBehavior::AlwaysFail);
        let mut router = Router::with_options(RouterOptions {
            breaker: BreakerConfig::default().with_window_size(3),
            ..Default::default()
        });
        router.add_provider(Arc::new(flaky), Some(100.0));

        for _ in 0..3 {
            let _ = router.generate(&request()).await;
        }
        assert_eq!(router.health()["alpha"].circuit, CircuitState::Open);

        // With the circuit open the provider is excluded outright.
        let err = router.generate(&request()).await.unwrap_err();
        match err {
            RouterError::AllProvidersFailed { failures } => {
                assert!(failures.iter().any(|f| f.kind == "circuit_open"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

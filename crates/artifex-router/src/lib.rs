//! # Model Provider Router
//!
//! Fan-in front-end over text-generation providers. Activities never talk to
//! a provider directly; they hand the router a normalized request and the
//! router picks a provider, enforces its rate limit and circuit breaker,
//! validates the response, and falls back down the candidate list until one
//! succeeds or all are exhausted.
//!
//! Selection is deterministic for a given state snapshot: eligible providers
//! are scored by latency, cost, and observed error rate, with ties broken by
//! name. A caller-preferred provider is promoted to the front when eligible.
//!
//! All router state (breakers, buckets, health) is per-process; across
//! processes each worker self-regulates and drift is acceptable.

pub mod adapters;
mod breaker;
mod cache;
mod config;
mod health;
mod rate_limit;
mod request;
mod router;
mod validate;

pub use adapters::{AnthropicAdapter, OpenAiAdapter, SimAdapter, SimBehavior};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cache::ResponseCache;
pub use config::RouterConfig;
pub use health::{HealthStatus, HealthTracker};
pub use rate_limit::TokenBucket;
pub use request::{
    ChatMessage, GenerateRequest, GenerateResponse, ProviderCapabilities, ProviderFailure, Role,
};
pub use router::{
    ProviderAdapter, ProviderCallError, ProviderHealthReport, Router, RouterError, RouterOptions,
};
pub use validate::{ResponseValidator, ValidationConfig, ValidationFailure};

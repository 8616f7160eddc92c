//! Router configuration from the environment
//!
//! Recognized variables:
//! - `ROUTER_PRIMARY` — provider name tried first (becomes the default
//!   preferred provider)
//! - `ROUTER_FALLBACKS` — comma-separated provider names
//! - per provider: `{PROVIDER}_ENDPOINT`, `{PROVIDER}_API_KEY`,
//!   `{PROVIDER}_MODEL`, `{PROVIDER}_RATE_PER_SEC`
//!
//! Credentials stay inside the adapters; they are never logged.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{AnthropicAdapter, OpenAiAdapter, SimAdapter};
use crate::router::{ProviderAdapter, Router, RouterOptions};

/// Provider chain parsed from the environment.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub primary: Option<String>,
    pub fallbacks: Vec<String>,
}

impl RouterConfig {
    pub fn from_env() -> Self {
        let primary = std::env::var("ROUTER_PRIMARY").ok().filter(|s| !s.is_empty());
        let fallbacks = std::env::var("ROUTER_FALLBACKS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self { primary, fallbacks }
    }

    /// Ordered provider names, primary first, deduplicated.
    pub fn chain(&self) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        if let Some(primary) = &self.primary {
            chain.push(primary.clone());
        }
        for name in &self.fallbacks {
            if !chain.contains(name) {
                chain.push(name.clone());
            }
        }
        chain
    }

    /// Build a router with one adapter per configured provider.
    ///
    /// Unknown names and providers missing credentials are skipped with a
    /// warning. Falls back to the simulator when nothing is configured so a
    /// bare environment still runs end to end.
    pub fn build(&self, options: RouterOptions) -> Router {
        let mut router = Router::with_options(options);
        let mut chain = self.chain();
        if chain.is_empty() {
            warn!("no providers configured, using the simulator");
            chain.push("sim".to_string());
        }

        for name in chain {
            let rate = rate_from_env(&name);
            let adapter: Option<Arc<dyn ProviderAdapter>> = match name.as_str() {
                "openai" => OpenAiAdapter::from_env()
                    .map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
                "anthropic" => AnthropicAdapter::from_env()
                    .map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
                "sim" => Some(Arc::new(SimAdapter::canned("sim"))),
                other => {
                    warn!(provider = other, "unknown provider name, skipping");
                    None
                }
            };

            match adapter {
                Some(adapter) => {
                    info!(provider = %name, "registered provider");
                    router.add_provider(adapter, rate);
                }
                None if name != "sim" => {
                    warn!(provider = %name, "provider not configured (missing API key?), skipping");
                }
                None => {}
            }
        }

        router
    }
}

fn rate_from_env(provider: &str) -> Option<f64> {
    let var = format!("{}_RATE_PER_SEC", provider.to_uppercase());
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_orders_primary_first_and_dedupes() {
        let config = RouterConfig {
            primary: Some("openai".into()),
            fallbacks: vec!["anthropic".into(), "openai".into(), "sim".into()],
        };
        assert_eq!(config.chain(), vec!["openai", "anthropic", "sim"]);
    }

    #[test]
    fn empty_config_builds_sim_router() {
        let config = RouterConfig {
            primary: None,
            fallbacks: vec![],
        };
        let router = config.build(RouterOptions::default());
        assert_eq!(router.provider_names(), vec!["sim"]);
    }
}

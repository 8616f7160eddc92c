//! Provider adapters
//!
//! Each adapter maps the normalized request to one provider's wire format
//! and back. Adding a provider is a config entry plus one implementation of
//! [`ProviderAdapter`](crate::ProviderAdapter).

mod anthropic;
mod openai;
mod sim;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;
pub use sim::{SimAdapter, SimBehavior};

//! Content-addressed response cache
//!
//! Keyed by a sha-256 of the normalized request. A hit bypasses rate
//! limiting and circuit breaking entirely.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::request::{GenerateRequest, GenerateResponse};

/// TTL cache over generation responses.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, (GenerateResponse, Instant)>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cache key: hash of the provider-independent request fields.
    pub fn key(request: &GenerateRequest) -> String {
        let mut hasher = Sha256::new();
        for message in &request.messages {
            hasher.update(message.role.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(message.content.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(request.language.as_deref().unwrap_or("").as_bytes());
        hasher.update(request.max_tokens.to_le_bytes());
        hasher.update(request.temperature.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, request: &GenerateRequest) -> Option<GenerateResponse> {
        let key = Self::key(request);
        if let Some(entry) = self.entries.get(&key) {
            let (response, inserted_at) = entry.value();
            if inserted_at.elapsed() < self.ttl {
                return Some(response.clone());
            }
        }
        // Expired or missing; drop the stale entry if present.
        self.entries.remove_if(&key, |_, (_, t)| t.elapsed() >= self.ttl);
        None
    }

    pub fn insert(&self, request: &GenerateRequest, response: GenerateResponse) {
        self.entries
            .insert(Self::key(request), (response, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

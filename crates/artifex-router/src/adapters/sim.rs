//! Deterministic simulator adapter
//!
//! Stands in for a real provider in tests and offline development. Supports
//! fixed and echoed responses, language-aware canned code, scripted
//! response/failure sequences, and unconditional failure modes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::request::{GenerateRequest, GenerateResponse, ProviderCapabilities, Role};
use crate::router::{ProviderAdapter, ProviderCallError};

/// How the simulator answers.
pub enum SimBehavior {
    /// Always the same body.
    Fixed(String),

    /// Echo the last user message with a prefix.
    Echo,

    /// Canned, compilable-looking code for the request's language hint;
    /// structured text when there is no hint.
    ByLanguage,

    /// Pop responses from a script; repeats the last entry when exhausted.
    Scripted(Mutex<VecDeque<Result<String, ProviderCallError>>>),

    /// Always fail with a server error.
    AlwaysFail,

    /// Always fail with the given error.
    FailWith(ProviderCallError),
}

/// Simulated provider.
pub struct SimAdapter {
    name: String,
    behavior: SimBehavior,
    capabilities: ProviderCapabilities,
    latency: Duration,
}

impl SimAdapter {
    pub fn new(name: impl Into<String>, behavior: SimBehavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            capabilities: ProviderCapabilities {
                max_context_tokens: 64_000,
                languages: vec![],
                cost_per_1k_tokens: 0.001,
                typical_latency: Duration::from_millis(50),
            },
            latency: Duration::ZERO,
        }
    }

    pub fn fixed(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(name, SimBehavior::Fixed(body.into()))
    }

    /// Canned code generator; the default for pipeline tests.
    pub fn canned(name: impl Into<String>) -> Self {
        Self::new(name, SimBehavior::ByLanguage)
    }

    pub fn scripted(
        name: impl Into<String>,
        script: Vec<Result<String, ProviderCallError>>,
    ) -> Self {
        Self::new(name, SimBehavior::Scripted(Mutex::new(script.into())))
    }

    pub fn with_cost(mut self, cost_per_1k_tokens: f64) -> Self {
        self.capabilities.cost_per_1k_tokens = cost_per_1k_tokens;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn canned_code(language: &str) -> String {
        match language.to_lowercase().as_str() {
            "python" => PYTHON_SERVICE.to_string(),
            "rust" => RUST_SERVICE.to_string(),
            "go" => GO_SERVICE.to_string(),
            other => format!(
                "// {other} service scaffold\n{}",
                JS_SERVICE
            ),
        }
    }

    fn respond(&self, request: &GenerateRequest) -> Result<String, ProviderCallError> {
        match &self.behavior {
            SimBehavior::Fixed(body) => Ok(body.clone()),
            SimBehavior::Echo => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                Ok(format!("echo: {last_user}"))
            }
            SimBehavior::ByLanguage => match request.language.as_deref() {
                Some(language) => Ok(Self::canned_code(language)),
                None => Ok(STRUCTURED_TEXT.to_string()),
            },
            SimBehavior::Scripted(script) => {
                let mut script = script.lock();
                match script.len() {
                    0 => Err(ProviderCallError::Server {
                        status: 500,
                        message: "script exhausted".into(),
                    }),
                    1 => script.front().cloned().unwrap(),
                    _ => script.pop_front().unwrap(),
                }
            }
            SimBehavior::AlwaysFail => Err(ProviderCallError::Server {
                status: 503,
                message: "simulated outage".into(),
            }),
            SimBehavior::FailWith(error) => Err(error.clone()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for SimAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<GenerateResponse, ProviderCallError> {
        if self.latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(ProviderCallError::Timeout);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let started = Instant::now();
        let content = self.respond(request)?;
        let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();

        Ok(GenerateResponse {
            prompt_tokens: Some((prompt_chars / 4) as u32),
            completion_tokens: Some((content.len() / 4) as u32),
            content,
            provider: self.name.clone(),
            model: format!("{}-sim", self.name),
            latency_ms: started.elapsed().as_millis().max(1) as u64,
        })
    }
}

const PYTHON_SERVICE: &str = r#"from fastapi import FastAPI, HTTPException
from pydantic import BaseModel

app = FastAPI()
items: dict[int, "Item"] = {}


class Item(BaseModel):
    id: int
    title: str
    done: bool = False


def next_id() -> int:
    return max(items.keys(), default=0) + 1


@app.post("/items")
def create_item(item: Item):
    item.id = next_id()
    items[item.id] = item
    return item


@app.get("/items/{item_id}")
def read_item(item_id: int):
    if item_id not in items:
        raise HTTPException(status_code=404, detail="not found")
    return items[item_id]


@app.delete("/items/{item_id}")
def delete_item(item_id: int):
    items.pop(item_id, None)
    return {"deleted": item_id}
"#;

const RUST_SERVICE: &str = r#"use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Item {
    pub id: u64,
    pub title: String,
    pub done: bool,
}

#[derive(Default)]
pub struct Store {
    items: HashMap<u64, Item>,
    next_id: u64,
}

impl Store {
    pub fn create(&mut self, title: String) -> &Item {
        self.next_id += 1;
        let item = Item { id: self.next_id, title, done: false };
        self.items.entry(item.id).or_insert(item)
    }

    pub fn get(&self, id: u64) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn delete(&mut self, id: u64) -> bool {
        self.items.remove(&id).is_some()
    }
}
"#;

const GO_SERVICE: &str = r#"package main

import (
    "encoding/json"
    "net/http"
    "sync"
)

type Item struct {
    ID    int    `json:"id"`
    Title string `json:"title"`
    Done  bool   `json:"done"`
}

var (
    mu    sync.Mutex
    items = map[int]Item{}
)

func createItem(w http.ResponseWriter, r *http.Request) {
    mu.Lock()
    defer mu.Unlock()
    var item Item
    json.NewDecoder(r.Body).Decode(&item)
    item.ID = len(items) + 1
    items[item.ID] = item
    json.NewEncoder(w).Encode(item)
}

func main() {
    http.HandleFunc("/items", createItem)
    http.ListenAndServe(":8080", nil)
}
"#;

const JS_SERVICE: &str = r#"const express = require("express");
const app = express();
app.use(express.json());

const items = new Map();
let nextId = 1;

app.post("/items", (req, res) => {
  const item = { id: nextId++, ...req.body };
  items.set(item.id, item);
  res.status(201).json(item);
});

app.get("/items/:id", (req, res) => {
  const item = items.get(Number(req.params.id));
  if (!item) return res.status(404).end();
  res.json(item);
});

app.listen(3000);
"#;

const STRUCTURED_TEXT: &str = r#"# Functional Requirements

## Overview
The service exposes create, read, update, and delete operations over a
persistent collection of items, with input validation and structured errors.

## Requirements
- REQ-1 (functional): create items with server-assigned identifiers
- REQ-2 (functional): list and fetch items by identifier
- REQ-3 (functional): update and delete existing items
- REQ-4 (non-functional): reject malformed payloads with a 422 response
- REQ-5 (non-functional): persist items across restarts

## Out of scope
Authentication, rate limiting, and multi-tenant isolation.
"#;

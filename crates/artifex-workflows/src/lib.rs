//! # Generation Orchestrator
//!
//! Durable workflows over the execution engine:
//!
//! - [`GenerationWorkflow`] — the twelve-stage pipeline from raw prompt to
//!   code, tests, docs, and a published preview. Only code generation is
//!   critical; every other stage records its failure as an error drop and
//!   the pipeline moves on.
//! - [`InfrastructureWorkflow`] — turns a completed generation workflow's
//!   ledger into IaC, configuration, compliance, and cost artifacts.
//!
//! Workflow bodies perform no I/O and read no clocks; stage outputs reach
//! them as small summaries returned by activities, and artifact bytes stay
//! in the ledger.

mod generation;
mod infrastructure;
mod result;

pub use generation::{GenerationRequest, GenerationWorkflow};
pub use infrastructure::{InfrastructureRequest, InfrastructureWorkflow};
pub use result::{DropRef, GenerationResult, InfrastructureResult, StageWarning};

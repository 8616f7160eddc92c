//! # Artifact Ledger
//!
//! Persistent, ordered, per-workflow store of pipeline outputs ("drops").
//!
//! Every pipeline stage persists its output here, keyed by
//! `(workflow_id, stage)` with a monotonically increasing version. The ledger
//! is append-only: re-running a stage creates a new version, rollback marks
//! later stages superseded without deleting anything, and downstream
//! consumers assemble results from drop references rather than copied bytes.

mod drop;
mod memory;
mod postgres;
mod store;

pub use drop::{Drop, DropMetadata, DropType, NewDrop, Stage};
pub use memory::InMemoryDropStore;
pub use postgres::PostgresDropStore;
pub use store::{DropFilter, DropOrder, DropStore, LedgerError};

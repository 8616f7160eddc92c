//! # Durable Execution Engine
//!
//! An event-sourced workflow engine for the generation pipeline.
//!
//! ## Model
//!
//! - **Workflows** are deterministic state machines. Every decision they make
//!   is a pure function of the event history; clocks, randomness, and I/O live
//!   in activities.
//! - **Activities** are retryable units of work executed by worker processes.
//!   They are scheduled through a task queue, claimed with `SKIP LOCKED`
//!   semantics, and retried with exponential backoff.
//! - **Events** form an append-only log per workflow. Replaying the log
//!   reconstructs workflow state after suspension, crash, or migration to
//!   another worker.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    WorkflowExecutor                       │
//! │   (replays event history, turns actions into tasks)      │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  WorkflowEventStore                       │
//! │   (workflow instances, event log, activity task queue)    │
//! └──────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                      WorkerPool                           │
//! │   (claims tasks, runs registered handlers, reports back)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Cancellation is cooperative: a cancel signal sets a flag inside the
//! workflow, and the transition to `Cancelled` happens at the next activity
//! boundary so in-flight output is still captured.

pub mod activity;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod worker;
pub mod workflow;

pub use activity::{Activity, ActivityContext, ActivityError};
pub use engine::{ExecutorConfig, ExecutorError, WorkflowExecutor, WorkflowRegistry};
pub use persistence::{
    ClaimedTask, InMemoryWorkflowEventStore, PostgresWorkflowEventStore, StoreError,
    TaskDefinition, TaskFailureOutcome, WorkflowEventStore, WorkflowInfo, WorkflowStatus,
};
pub use reliability::RetryPolicy;
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError};
pub use workflow::{
    ActivityOptions, Workflow, WorkflowAction, WorkflowError, WorkflowEvent, WorkflowSignal,
};

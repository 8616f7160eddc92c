//! Task execution workers: adaptive polling and the handler pool.

mod poller;
mod pool;

pub use poller::{PollerConfig, TaskPoller};
pub use pool::{ActivityHandler, ActivityResult, WorkerPool, WorkerPoolConfig, WorkerPoolError};

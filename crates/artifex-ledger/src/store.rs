//! DropStore trait definition

use async_trait::async_trait;
use uuid::Uuid;

use crate::drop::{Drop, DropType, NewDrop, Stage};

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("drop not found for workflow {workflow_id} stage {stage}")]
    NotFound { workflow_id: Uuid, stage: Stage },

    /// The exact (workflow, stage, version) slot is taken with different
    /// content. Identical content is idempotent and does not raise this.
    #[error("drop already exists: workflow {workflow_id} stage {stage} version {version}")]
    AlreadyExists {
        workflow_id: Uuid,
        stage: Stage,
        version: i32,
    },

    /// Storage unavailability; callers should retry under their policy.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Listing order for drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropOrder {
    /// `(stage order, version)` ascending — execution order.
    #[default]
    Ascending,
    Descending,
}

/// Filter for `list_drops` and `search_drops`.
#[derive(Debug, Clone, Default)]
pub struct DropFilter {
    pub stage: Option<Stage>,
    pub drop_type: Option<DropType>,
    pub limit: Option<usize>,
    pub order: DropOrder,
    /// Include drops marked superseded by a rollback (off by default).
    pub include_superseded: bool,
}

impl DropFilter {
    pub fn stage(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            ..Default::default()
        }
    }

    pub fn drop_type(drop_type: DropType) -> Self {
        Self {
            drop_type: Some(drop_type),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, order: DropOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_superseded(mut self) -> Self {
        self.include_superseded = true;
        self
    }
}

/// Store for drops.
///
/// Implementations serialize version allocation per `(workflow, stage)` so
/// versions are contiguous from 1, and tolerate concurrent readers.
#[async_trait]
pub trait DropStore: Send + Sync + 'static {
    /// Persist a drop, assigning the next version.
    ///
    /// Idempotent under identical content: if the latest live version for
    /// `(workflow, stage)` has byte-equal artifact and equal type, that drop
    /// is returned instead of a new version being created.
    async fn create_drop(&self, drop: NewDrop) -> Result<Drop, LedgerError>;

    /// List a workflow's drops ordered by `(stage order, version)`.
    async fn list_drops(
        &self,
        workflow_id: Uuid,
        filter: DropFilter,
    ) -> Result<Vec<Drop>, LedgerError>;

    /// Latest live (non-superseded) drop for a stage.
    async fn get_latest(&self, workflow_id: Uuid, stage: Stage) -> Result<Drop, LedgerError>;

    /// Mark every drop of stages after `to_stage` superseded. Nothing is
    /// deleted; superseded drops stay listable via
    /// [`DropFilter::with_superseded`].
    async fn rollback(&self, workflow_id: Uuid, to_stage: Stage) -> Result<u64, LedgerError>;

    /// Free-text search over artifact bodies and metadata. Eventually
    /// consistent; ordering matches `list_drops`.
    async fn search_drops(
        &self,
        query: &str,
        filter: DropFilter,
    ) -> Result<Vec<Drop>, LedgerError>;

    /// Number of drops recorded for a workflow (live versions only).
    async fn count_drops(&self, workflow_id: Uuid) -> Result<u64, LedgerError>;
}

//! In-memory drop store for tests and single-process development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::drop::{Drop, NewDrop, Stage};
use crate::store::{DropFilter, DropOrder, DropStore, LedgerError};

/// In-memory implementation of [`DropStore`]. Same semantics as the
/// PostgreSQL store: contiguous versions, content idempotence, supersede-only
/// rollback.
pub struct InMemoryDropStore {
    drops: RwLock<HashMap<Uuid, Vec<Drop>>>,
}

impl InMemoryDropStore {
    pub fn new() -> Self {
        Self {
            drops: RwLock::new(HashMap::new()),
        }
    }

    pub fn total_drops(&self) -> usize {
        self.drops.read().values().map(Vec::len).sum()
    }

    pub fn clear(&self) {
        self.drops.write().clear();
    }

    fn sort(drops: &mut [Drop], order: DropOrder) {
        drops.sort_by_key(|d| (d.stage.order(), d.version));
        if order == DropOrder::Descending {
            drops.reverse();
        }
    }

    fn apply_filter(drops: Vec<Drop>, filter: &DropFilter) -> Vec<Drop> {
        let mut out: Vec<Drop> = drops
            .into_iter()
            .filter(|d| filter.include_superseded || !d.superseded)
            .filter(|d| filter.stage.map_or(true, |s| d.stage == s))
            .filter(|d| filter.drop_type.map_or(true, |t| d.drop_type == t))
            .collect();
        Self::sort(&mut out, filter.order);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }
}

impl Default for InMemoryDropStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DropStore for InMemoryDropStore {
    async fn create_drop(&self, drop: NewDrop) -> Result<Drop, LedgerError> {
        let mut drops = self.drops.write();
        let entries = drops.entry(drop.workflow_id).or_default();

        let latest_live = entries
            .iter()
            .filter(|d| d.stage == drop.stage && !d.superseded)
            .max_by_key(|d| d.version);

        if let Some(existing) = latest_live {
            if existing.artifact == drop.artifact && existing.drop_type == drop.drop_type {
                return Ok(existing.clone());
            }
        }

        let next_version = entries
            .iter()
            .filter(|d| d.stage == drop.stage)
            .map(|d| d.version)
            .max()
            .unwrap_or(0)
            + 1;

        let stored = Drop {
            id: Uuid::now_v7(),
            workflow_id: drop.workflow_id,
            stage: drop.stage,
            drop_type: drop.drop_type,
            artifact: drop.artifact,
            metadata: drop.metadata,
            version: next_version,
            superseded: false,
            created_at: Utc::now(),
        };
        entries.push(stored.clone());
        Ok(stored)
    }

    async fn list_drops(
        &self,
        workflow_id: Uuid,
        filter: DropFilter,
    ) -> Result<Vec<Drop>, LedgerError> {
        let drops = self.drops.read();
        let entries = drops.get(&workflow_id).cloned().unwrap_or_default();
        Ok(Self::apply_filter(entries, &filter))
    }

    async fn get_latest(&self, workflow_id: Uuid, stage: Stage) -> Result<Drop, LedgerError> {
        let drops = self.drops.read();
        drops
            .get(&workflow_id)
            .and_then(|entries| {
                entries
                    .iter()
                    .filter(|d| d.stage == stage && !d.superseded)
                    .max_by_key(|d| d.version)
                    .cloned()
            })
            .ok_or(LedgerError::NotFound { workflow_id, stage })
    }

    async fn rollback(&self, workflow_id: Uuid, to_stage: Stage) -> Result<u64, LedgerError> {
        let mut drops = self.drops.write();
        let Some(entries) = drops.get_mut(&workflow_id) else {
            return Ok(0);
        };

        let mut count = 0;
        for d in entries.iter_mut() {
            if d.stage.order() > to_stage.order() && !d.superseded {
                d.superseded = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn search_drops(
        &self,
        query: &str,
        filter: DropFilter,
    ) -> Result<Vec<Drop>, LedgerError> {
        let needle = query.to_lowercase();
        let drops = self.drops.read();
        let matched: Vec<Drop> = drops
            .values()
            .flatten()
            .filter(|d| {
                d.artifact.to_lowercase().contains(&needle)
                    || serde_json::Value::Object(d.metadata.clone())
                        .to_string()
                        .to_lowercase()
                        .contains(&needle)
            })
            .cloned()
            .collect();
        Ok(Self::apply_filter(matched, &filter))
    }

    async fn count_drops(&self, workflow_id: Uuid) -> Result<u64, LedgerError> {
        let drops = self.drops.read();
        Ok(drops
            .get(&workflow_id)
            .map(|entries| entries.iter().filter(|d| !d.superseded).count() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drop::DropType;

    fn code_drop(workflow_id: Uuid, body: &str) -> NewDrop {
        NewDrop::new(workflow_id, Stage::CodeGeneration, DropType::Code, body)
    }

    #[tokio::test]
    async fn versions_are_contiguous_from_one() {
        let store = InMemoryDropStore::new();
        let wf = Uuid::now_v7();

        let d1 = store.create_drop(code_drop(wf, "v1")).await.unwrap();
        let d2 = store.create_drop(code_drop(wf, "v2")).await.unwrap();
        let d3 = store.create_drop(code_drop(wf, "v3")).await.unwrap();

        assert_eq!((d1.version, d2.version, d3.version), (1, 2, 3));
    }

    #[tokio::test]
    async fn identical_content_is_idempotent() {
        let store = InMemoryDropStore::new();
        let wf = Uuid::now_v7();

        let d1 = store.create_drop(code_drop(wf, "same")).await.unwrap();
        let d2 = store.create_drop(code_drop(wf, "same")).await.unwrap();

        assert_eq!(d1.id, d2.id);
        assert_eq!(d2.version, 1);
        assert_eq!(store.total_drops(), 1);
    }

    #[tokio::test]
    async fn get_latest_returns_newest_live_version() {
        let store = InMemoryDropStore::new();
        let wf = Uuid::now_v7();

        store.create_drop(code_drop(wf, "v1")).await.unwrap();
        store.create_drop(code_drop(wf, "v2")).await.unwrap();

        let latest = store.get_latest(wf, Stage::CodeGeneration).await.unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.artifact, "v2");

        let err = store.get_latest(wf, Stage::TestPlan).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_orders_by_stage_then_version() {
        let store = InMemoryDropStore::new();
        let wf = Uuid::now_v7();

        store
            .create_drop(NewDrop::new(wf, Stage::TestPlan, DropType::Docs, "plan"))
            .await
            .unwrap();
        store.create_drop(code_drop(wf, "v1")).await.unwrap();
        store.create_drop(code_drop(wf, "v2")).await.unwrap();
        store
            .create_drop(NewDrop::new(
                wf,
                Stage::PromptEnhancement,
                DropType::Prompt,
                "p",
            ))
            .await
            .unwrap();

        let drops = store.list_drops(wf, DropFilter::default()).await.unwrap();
        let keys: Vec<(u8, i32)> = drops.iter().map(|d| (d.stage.order(), d.version)).collect();
        assert_eq!(keys, vec![(1, 1), (5, 1), (5, 2), (8, 1)]);
    }

    #[tokio::test]
    async fn rollback_supersedes_but_retains() {
        let store = InMemoryDropStore::new();
        let wf = Uuid::now_v7();

        store
            .create_drop(NewDrop::new(
                wf,
                Stage::PromptEnhancement,
                DropType::Prompt,
                "p",
            ))
            .await
            .unwrap();
        store.create_drop(code_drop(wf, "v1")).await.unwrap();
        store
            .create_drop(NewDrop::new(wf, Stage::TestPlan, DropType::Docs, "plan"))
            .await
            .unwrap();

        let superseded = store.rollback(wf, Stage::CodeGeneration).await.unwrap();
        assert_eq!(superseded, 1);

        // Live view hides the superseded test plan.
        let live = store.list_drops(wf, DropFilter::default()).await.unwrap();
        assert_eq!(live.len(), 2);
        assert!(store.get_latest(wf, Stage::TestPlan).await.is_err());

        // Full view retains it.
        let all = store
            .list_drops(wf, DropFilter::default().with_superseded())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn search_matches_artifact_and_metadata() {
        let store = InMemoryDropStore::new();
        let wf = Uuid::now_v7();

        store
            .create_drop(
                code_drop(wf, "def handler(): pass")
                    .with_metadata("language", serde_json::json!("python")),
            )
            .await
            .unwrap();
        store
            .create_drop(NewDrop::new(wf, Stage::TestPlan, DropType::Docs, "plan"))
            .await
            .unwrap();

        let by_body = store
            .search_drops("handler", DropFilter::default())
            .await
            .unwrap();
        assert_eq!(by_body.len(), 1);

        let by_meta = store
            .search_drops("python", DropFilter::default())
            .await
            .unwrap();
        assert_eq!(by_meta.len(), 1);

        let none = store
            .search_drops("golang", DropFilter::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn filters_by_stage_and_type() {
        let store = InMemoryDropStore::new();
        let wf = Uuid::now_v7();

        store.create_drop(code_drop(wf, "code")).await.unwrap();
        store
            .create_drop(NewDrop::new(
                wf,
                Stage::CodeGeneration,
                DropType::Error,
                "boom",
            ))
            .await
            .unwrap();

        let errors = store
            .list_drops(wf, DropFilter::drop_type(DropType::Error))
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].artifact, "boom");

        let staged = store
            .list_drops(wf, DropFilter::stage(Stage::CodeGeneration))
            .await
            .unwrap();
        assert_eq!(staged.len(), 2);
    }
}

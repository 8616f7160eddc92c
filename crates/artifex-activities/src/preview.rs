//! Preview publication and its compensation
//!
//! Publishing a preview is the pipeline's one destructive side effect: it
//! makes the workflow output reachable from outside. The workflow registers
//! [`RevokePreviewActivity`] as compensation so a failure after publication
//! withdraws the handle.

use std::time::Duration;

use artifex_durable::activity::error_types;
use artifex_durable::{Activity, ActivityContext, ActivityError};
use artifex_ledger::{DropType, NewDrop, Stage};
use artifex_preview::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::deps::ActivityDeps;

/// Input for preview publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPreviewInput {
    pub workflow_id: Uuid,
    /// TTL in seconds; None uses the manager default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// The issued handle, echoed into the workflow result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPreviewOutput {
    pub session_id: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Creates the preview session and records the reference drop.
pub struct PublishPreviewActivity {
    deps: ActivityDeps,
}

impl PublishPreviewActivity {
    pub const TYPE_NAME: &'static str = "publish_preview";

    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for PublishPreviewActivity {
    const TYPE: &'static str = PublishPreviewActivity::TYPE_NAME;
    type Input = PublishPreviewInput;
    type Output = PublishPreviewOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        // Idempotence under replay: reuse a live session for this workflow
        // instead of minting a second handle.
        if let Some(existing) = self
            .deps
            .sessions
            .resolve_workflow(input.workflow_id)
            .await
            .map_err(session_error)?
        {
            return Ok(PublishPreviewOutput {
                session_id: existing.id,
                expires_at: existing.expires_at,
            });
        }

        let session = self
            .deps
            .sessions
            .create_session(
                input.workflow_id,
                input.ttl_secs.map(Duration::from_secs),
                json!({ "source": "generation_pipeline" }),
            )
            .await
            .map_err(session_error)?;

        info!(workflow_id = %input.workflow_id, session_id = %session.id, "preview published");

        let drop = NewDrop::new(
            input.workflow_id,
            Stage::PreviewPublication,
            DropType::PreviewRef,
            format!("/p/{}", session.id),
        )
        .with_metadata("session_id", json!(session.id))
        .with_metadata("expires_at", json!(session.expires_at.to_rfc3339()));
        self.deps.write_drop(drop).await?;

        Ok(PublishPreviewOutput {
            session_id: session.id,
            expires_at: session.expires_at,
        })
    }
}

/// Input for preview revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokePreviewInput {
    pub workflow_id: Uuid,
    pub session_id: String,
}

/// Compensation for [`PublishPreviewActivity`].
pub struct RevokePreviewActivity {
    deps: ActivityDeps,
}

impl RevokePreviewActivity {
    pub const TYPE_NAME: &'static str = "revoke_preview";

    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for RevokePreviewActivity {
    const TYPE: &'static str = RevokePreviewActivity::TYPE_NAME;
    type Input = RevokePreviewInput;
    type Output = serde_json::Value;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let revoked = self
            .deps
            .sessions
            .revoke(&input.session_id)
            .await
            .map_err(session_error)?;

        info!(
            workflow_id = %input.workflow_id,
            session_id = %input.session_id,
            revoked,
            "preview compensation ran"
        );
        Ok(json!({ "revoked": revoked }))
    }
}

fn session_error(error: SessionError) -> ActivityError {
    match error {
        SessionError::InvalidInput(message) => {
            ActivityError::non_retryable(message).with_type(error_types::INVALID_INPUT)
        }
        other => ActivityError::retryable(other.to_string())
            .with_type(error_types::TRANSIENT_EXTERNAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test_support::sim_deps;
    use artifex_preview::Resolution;

    fn ctx(wf: Uuid) -> ActivityContext {
        ActivityContext::new(wf, "preview", 1, 3, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn publish_then_resolve_then_revoke() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        let output = PublishPreviewActivity::new(deps.clone())
            .execute(
                &ctx(wf),
                PublishPreviewInput {
                    workflow_id: wf,
                    ttl_secs: Some(60),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            deps.sessions.resolve(&output.session_id).await.unwrap(),
            Resolution::Active(_)
        ));

        // Reference drop landed.
        let drop = deps
            .ledger
            .get_latest(wf, Stage::PreviewPublication)
            .await
            .unwrap();
        assert_eq!(drop.drop_type, DropType::PreviewRef);
        assert!(drop.artifact.ends_with(&output.session_id));

        RevokePreviewActivity::new(deps.clone())
            .execute(
                &ctx(wf),
                RevokePreviewInput {
                    workflow_id: wf,
                    session_id: output.session_id.clone(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            deps.sessions.resolve(&output.session_id).await.unwrap(),
            Resolution::Expired
        );
    }

    #[tokio::test]
    async fn replay_reuses_live_session() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();
        let activity = PublishPreviewActivity::new(deps.clone());
        let input = PublishPreviewInput {
            workflow_id: wf,
            ttl_secs: Some(600),
        };

        let first = activity.execute(&ctx(wf), input.clone()).await.unwrap();
        let second = activity.execute(&ctx(wf), input).await.unwrap();
        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn zero_ttl_is_invalid() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        let err = PublishPreviewActivity::new(deps)
            .execute(
                &ctx(wf),
                PublishPreviewInput {
                    workflow_id: wf,
                    ttl_secs: Some(0),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_type.as_deref(), Some("InvalidInput"));
    }
}

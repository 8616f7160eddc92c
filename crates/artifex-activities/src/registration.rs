//! Worker registration for the full activity set.

use artifex_durable::{WorkerPool, WorkflowEventStore};

use crate::deps::ActivityDeps;
use crate::error_drop::RecordStageErrorActivity;
use crate::infra::{
    ComplianceReportActivity, ConfigBundleActivity, CostEstimateActivity, IacGenerationActivity,
};
use crate::preview::{PublishPreviewActivity, RevokePreviewActivity};
use crate::stages::{
    CodeGenerationActivity, DependencyResolutionActivity, DocumentationActivity,
    FrdGenerationActivity, PerformanceAnalysisActivity, ProjectStructureActivity,
    PromptEnhancementActivity, RequirementsParseActivity, SecurityScanActivity,
    SemanticValidationActivity, TestCodeGenerationActivity, TestPlanActivity,
};

/// Register every pipeline, infrastructure, and bookkeeping activity on a
/// worker pool.
pub fn register_all<S: WorkflowEventStore>(pool: &WorkerPool<S>, deps: &ActivityDeps) {
    // Pipeline stages 1..12.
    pool.register_activity(PromptEnhancementActivity::new(deps.clone()));
    pool.register_activity(FrdGenerationActivity::new(deps.clone()));
    pool.register_activity(ProjectStructureActivity::new(deps.clone()));
    pool.register_activity(RequirementsParseActivity::new(deps.clone()));
    pool.register_activity(CodeGenerationActivity::new(deps.clone()));
    pool.register_activity(SemanticValidationActivity::new(deps.clone()));
    pool.register_activity(DependencyResolutionActivity::new(deps.clone()));
    pool.register_activity(TestPlanActivity::new(deps.clone()));
    pool.register_activity(TestCodeGenerationActivity::new(deps.clone()));
    pool.register_activity(SecurityScanActivity::new(deps.clone()));
    pool.register_activity(PerformanceAnalysisActivity::new(deps.clone()));
    pool.register_activity(DocumentationActivity::new(deps.clone()));

    // Bookkeeping.
    pool.register_activity(RecordStageErrorActivity::new(deps.clone()));
    pool.register_activity(PublishPreviewActivity::new(deps.clone()));
    pool.register_activity(RevokePreviewActivity::new(deps.clone()));

    // Infrastructure sub-workflow.
    pool.register_activity(IacGenerationActivity::new(deps.clone()));
    pool.register_activity(ConfigBundleActivity::new(deps.clone()));
    pool.register_activity(ComplianceReportActivity::new(deps.clone()));
    pool.register_activity(CostEstimateActivity::new(deps.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test_support::sim_deps;
    use artifex_durable::{InMemoryWorkflowEventStore, WorkerPoolConfig, WorkflowExecutor};
    use std::sync::Arc;

    #[tokio::test]
    async fn registers_all_activity_types() {
        let executor = Arc::new(WorkflowExecutor::new(Arc::new(
            InMemoryWorkflowEventStore::new(),
        )));
        let pool = WorkerPool::new(executor, WorkerPoolConfig::default());

        register_all(&pool, &sim_deps());

        let types = pool.registered_types();
        assert_eq!(types.len(), 19);
        for expected in [
            "prompt_enhancement",
            "code_generation",
            "documentation",
            "record_stage_error",
            "publish_preview",
            "iac_generation",
            "cost_estimate",
        ] {
            assert!(types.contains(&expected.to_string()), "missing {expected}");
        }
    }
}

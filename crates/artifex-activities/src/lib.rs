//! # Activity Library
//!
//! The leaf operations scheduled by the generation and infrastructure
//! workflows. Every activity follows the same contract:
//!
//! - input is a structured value derived from the workflow request (prior
//!   stage outputs are fetched from the ledger, never passed through the
//!   workflow);
//! - output is a small [`StageOutput`] summary — artifact bytes stay in the
//!   ledger;
//! - the side effect is exactly one drop write, idempotent under replay
//!   because the ledger reuses versions for identical content.
//!
//! Dependencies (router, ledger, session manager, collaborators) are
//! injected through [`ActivityDeps`]; tests substitute in-memory doubles.

mod collaborators;
mod deps;
mod error_drop;
mod infra;
pub mod language;
mod preview;
mod registration;
mod stages;

pub use collaborators::{
    AstValidator, HeuristicAstValidator, HeuristicPerfAnalyzer, HeuristicScanner,
    SandboxExecutor, ShellOutSandbox, VulnerabilityScanner,
};
pub use deps::{ActivityDeps, StageOutput};
pub use error_drop::{RecordStageErrorActivity, RecordStageErrorInput};
pub use infra::{
    ComplianceReportActivity, ConfigBundleActivity, CostEstimateActivity, IacGenerationActivity,
    InfraStageInput,
};
pub use preview::{
    PublishPreviewActivity, PublishPreviewInput, PublishPreviewOutput, RevokePreviewActivity,
    RevokePreviewInput,
};
pub use registration::register_all;
pub use stages::{
    CodeGenerationActivity, DependencyResolutionActivity, DocumentationActivity,
    FrdGenerationActivity, PerformanceAnalysisActivity, ProjectStructureActivity,
    PromptEnhancementActivity, RequirementsParseActivity, SecurityScanActivity,
    SemanticValidationActivity, StageInput, TestCodeGenerationActivity, TestPlanActivity,
};

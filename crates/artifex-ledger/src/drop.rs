//! Drop model: pipeline stages, artifact types, and the drop record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The pipeline stages, in execution order.
///
/// Stage order is part of the ledger's sort contract: listings are ordered by
/// `(stage order, version)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PromptEnhancement,
    FrdGeneration,
    ProjectStructure,
    RequirementsParse,
    CodeGeneration,
    SemanticValidation,
    DependencyResolution,
    TestPlan,
    TestCodeGeneration,
    SecurityScan,
    PerformanceAnalysis,
    Documentation,
    // Infrastructure sub-workflow stages live in the same namespace so its
    // drops share the ledger contract.
    IacGeneration,
    ConfigBundle,
    ComplianceReport,
    CostEstimate,
    // Preview publication happens after the twelve stages; its reference
    // drop gets its own slot so it never shadows the documentation drop.
    PreviewPublication,
}

impl Stage {
    /// The twelve generation pipeline stages in order.
    pub const PIPELINE: [Stage; 12] = [
        Stage::PromptEnhancement,
        Stage::FrdGeneration,
        Stage::ProjectStructure,
        Stage::RequirementsParse,
        Stage::CodeGeneration,
        Stage::SemanticValidation,
        Stage::DependencyResolution,
        Stage::TestPlan,
        Stage::TestCodeGeneration,
        Stage::SecurityScan,
        Stage::PerformanceAnalysis,
        Stage::Documentation,
    ];

    /// The infrastructure sub-workflow stages in order.
    pub const INFRASTRUCTURE: [Stage; 4] = [
        Stage::IacGeneration,
        Stage::ConfigBundle,
        Stage::ComplianceReport,
        Stage::CostEstimate,
    ];

    /// Position used for ordering drops across stages.
    pub fn order(&self) -> u8 {
        match self {
            Stage::PromptEnhancement => 1,
            Stage::FrdGeneration => 2,
            Stage::ProjectStructure => 3,
            Stage::RequirementsParse => 4,
            Stage::CodeGeneration => 5,
            Stage::SemanticValidation => 6,
            Stage::DependencyResolution => 7,
            Stage::TestPlan => 8,
            Stage::TestCodeGeneration => 9,
            Stage::SecurityScan => 10,
            Stage::PerformanceAnalysis => 11,
            Stage::Documentation => 12,
            Stage::IacGeneration => 13,
            Stage::ConfigBundle => 14,
            Stage::ComplianceReport => 15,
            Stage::CostEstimate => 16,
            Stage::PreviewPublication => 17,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::PromptEnhancement => "prompt_enhancement",
            Stage::FrdGeneration => "frd_generation",
            Stage::ProjectStructure => "project_structure",
            Stage::RequirementsParse => "requirements_parse",
            Stage::CodeGeneration => "code_generation",
            Stage::SemanticValidation => "semantic_validation",
            Stage::DependencyResolution => "dependency_resolution",
            Stage::TestPlan => "test_plan",
            Stage::TestCodeGeneration => "test_code_generation",
            Stage::SecurityScan => "security_scan",
            Stage::PerformanceAnalysis => "performance_analysis",
            Stage::Documentation => "documentation",
            Stage::IacGeneration => "iac_generation",
            Stage::ConfigBundle => "config_bundle",
            Stage::ComplianceReport => "compliance_report",
            Stage::CostEstimate => "cost_estimate",
            Stage::PreviewPublication => "preview_publication",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let all = Self::PIPELINE
            .iter()
            .chain(Self::INFRASTRUCTURE.iter())
            .chain(std::iter::once(&Stage::PreviewPublication));
        for stage in all {
            if stage.name() == s {
                return Some(*stage);
            }
        }
        None
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What kind of artifact a drop holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropType {
    Prompt,
    Frd,
    Structure,
    Code,
    Tests,
    Docs,
    ValidationReport,
    ScanReport,
    PackageManifest,
    PreviewRef,
    Error,
}

impl DropType {
    pub fn name(&self) -> &'static str {
        match self {
            DropType::Prompt => "prompt",
            DropType::Frd => "frd",
            DropType::Structure => "structure",
            DropType::Code => "code",
            DropType::Tests => "tests",
            DropType::Docs => "docs",
            DropType::ValidationReport => "validation_report",
            DropType::ScanReport => "scan_report",
            DropType::PackageManifest => "package_manifest",
            DropType::PreviewRef => "preview_ref",
            DropType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "prompt" => Some(Self::Prompt),
            "frd" => Some(Self::Frd),
            "structure" => Some(Self::Structure),
            "code" => Some(Self::Code),
            "tests" => Some(Self::Tests),
            "docs" => Some(Self::Docs),
            "validation_report" => Some(Self::ValidationReport),
            "scan_report" => Some(Self::ScanReport),
            "package_manifest" => Some(Self::PackageManifest),
            "preview_ref" => Some(Self::PreviewRef),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for DropType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Scalar metadata attached to a drop (language, provider, token counts,
/// durations, confidence).
pub type DropMetadata = serde_json::Map<String, serde_json::Value>;

/// A persisted drop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Drop {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub stage: Stage,
    pub drop_type: DropType,
    /// Artifact body. Text for every current type; stored in a column sized
    /// for generated files (well past 10 MB).
    pub artifact: String,
    pub metadata: DropMetadata,
    /// Monotonic per (workflow, stage), contiguous from 1.
    pub version: i32,
    /// Set by rollback; superseded drops are retained but skipped by
    /// `get_latest`.
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a drop. The store assigns id, version, and timestamp.
#[derive(Debug, Clone)]
pub struct NewDrop {
    pub workflow_id: Uuid,
    pub stage: Stage,
    pub drop_type: DropType,
    pub artifact: String,
    pub metadata: DropMetadata,
}

impl NewDrop {
    pub fn new(
        workflow_id: Uuid,
        stage: Stage,
        drop_type: DropType,
        artifact: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            stage,
            drop_type,
            artifact: artifact.into(),
            metadata: DropMetadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_stage_order_is_contiguous() {
        for (i, stage) in Stage::PIPELINE.iter().enumerate() {
            assert_eq!(stage.order() as usize, i + 1);
        }
    }

    #[test]
    fn stage_name_round_trips() {
        for stage in Stage::PIPELINE.iter().chain(Stage::INFRASTRUCTURE.iter()) {
            assert_eq!(Stage::parse(stage.name()), Some(*stage));
        }
        assert_eq!(Stage::parse("nope"), None);
    }

    #[test]
    fn drop_type_round_trips() {
        for t in [
            DropType::Prompt,
            DropType::Code,
            DropType::Error,
            DropType::PreviewRef,
        ] {
            assert_eq!(DropType::parse(t.name()), Some(t));
        }
    }

    #[test]
    fn new_drop_builder() {
        let drop = NewDrop::new(
            Uuid::now_v7(),
            Stage::CodeGeneration,
            DropType::Code,
            "fn main() {}",
        )
        .with_metadata("language", serde_json::json!("rust"))
        .with_metadata("provider", serde_json::json!("openai"));

        assert_eq!(drop.metadata.len(), 2);
        assert_eq!(drop.metadata["language"], serde_json::json!("rust"));
    }

    #[test]
    fn stage_serde_uses_snake_case() {
        let json = serde_json::to_string(&Stage::CodeGeneration).unwrap();
        assert_eq!(json, "\"code_generation\"");
    }
}

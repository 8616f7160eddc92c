//! Infrastructure sub-workflow activities
//!
//! Consume a completed generation workflow's ledger and emit infrastructure
//! artifacts under the sub-workflow's own id, linked back through
//! `source_workflow` metadata.

use artifex_durable::activity::error_types;
use artifex_durable::{Activity, ActivityContext, ActivityError};
use artifex_ledger::{DropType, NewDrop, Stage};
use artifex_router::{ChatMessage, GenerateRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::deps::{ledger_error, router_error, ActivityDeps, StageOutput};

/// Input shared by the infrastructure stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraStageInput {
    /// The sub-workflow's own id; its drops land here.
    pub workflow_id: Uuid,

    /// The completed generation workflow whose ledger is consumed.
    pub source_workflow_id: Uuid,

    /// Cloud provider target ("aws", "gcp", "azure").
    pub provider: String,

    pub environment: String,

    /// Compliance frameworks to report against ("SOC2", "HIPAA", ...).
    #[serde(default)]
    pub compliance: Vec<String>,

    #[serde(default)]
    pub enable_golden_images: bool,

    #[serde(default)]
    pub enable_sop: bool,

    /// Recorded only; deployment itself is out of scope.
    #[serde(default)]
    pub auto_deploy: bool,

    #[serde(default)]
    pub dry_run: bool,
}

impl InfraStageInput {
    fn link_drop(&self, drop: NewDrop) -> NewDrop {
        drop.with_metadata("source_workflow", json!(self.source_workflow_id.to_string()))
            .with_metadata("dry_run", json!(self.dry_run))
            .with_metadata("provider", json!(self.provider))
    }
}

// Error drops are diagnostics, not evidence; skip them like the main
// pipeline does.
async fn source_artifact(
    deps: &ActivityDeps,
    source: Uuid,
    stage: Stage,
) -> Result<Option<String>, ActivityError> {
    match deps.ledger.get_latest(source, stage).await {
        Ok(drop) if drop.drop_type != DropType::Error => Ok(Some(drop.artifact)),
        Ok(_) => Ok(None),
        Err(artifex_ledger::LedgerError::NotFound { .. }) => Ok(None),
        Err(e) => Err(ledger_error(e)),
    }
}

// ============================================================================
// IaC generation (critical)
// ============================================================================

/// Generates the IaC text for the source workflow's artifact. Critical for
/// the sub-workflow, mirroring code generation in the main pipeline.
pub struct IacGenerationActivity {
    deps: ActivityDeps,
}

impl IacGenerationActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for IacGenerationActivity {
    const TYPE: &'static str = "iac_generation";
    type Input = InfraStageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let code = source_artifact(&self.deps, input.source_workflow_id, Stage::CodeGeneration)
            .await?
            .ok_or_else(|| {
                ActivityError::non_retryable("source workflow has no code artifact")
                    .with_type(error_types::INVALID_INPUT)
            })?;
        let manifest = source_artifact(
            &self.deps,
            input.source_workflow_id,
            Stage::DependencyResolution,
        )
        .await?;

        let mut user = format!(
            "Provider: {}\nEnvironment: {}\n\nApplication:\n{}\n",
            input.provider, input.environment, code
        );
        if let Some(manifest) = manifest {
            user.push_str(&format!("\nDependencies:\n{manifest}\n"));
        }

        let request = GenerateRequest::new(vec![
            ChatMessage::system(
                "Write Terraform for deploying the application: compute, networking, \
                 and a managed datastore, parameterized by environment. HCL only.",
            ),
            ChatMessage::user(user),
        ])
        .with_deadline(ctx.remaining().min(Duration::from_secs(120)));

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;

        let mut artifact = response.content.clone();
        if input.enable_golden_images {
            artifact.push_str(GOLDEN_IMAGE_BLOCK);
        }

        let drop = input
            .link_drop(NewDrop::new(
                input.workflow_id,
                Stage::IacGeneration,
                DropType::Code,
                artifact,
            ))
            .with_metadata("format", json!("terraform"))
            .with_metadata("provider_used", json!(response.provider));
        self.deps.write_drop(drop).await
    }
}

const GOLDEN_IMAGE_BLOCK: &str = r#"

# Golden image build
source "amazon-ebs" "service" {
  instance_type = "t3.small"
  ssh_username  = "ubuntu"
}

build {
  sources = ["source.amazon-ebs.service"]
  provisioner "shell" {
    inline = ["sudo apt-get update", "sudo apt-get install -y docker.io"]
  }
}
"#;

// ============================================================================
// Configuration bundle
// ============================================================================

/// Deterministic per-environment configuration bundle.
pub struct ConfigBundleActivity {
    deps: ActivityDeps,
}

impl ConfigBundleActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for ConfigBundleActivity {
    const TYPE: &'static str = "config_bundle";
    type Input = InfraStageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let manifest_file = self
            .deps
            .ledger
            .get_latest(input.source_workflow_id, Stage::DependencyResolution)
            .await
            .ok()
            .and_then(|d| {
                d.metadata
                    .get("filename")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| "requirements.txt".into());

        let replicas = match input.environment.as_str() {
            "production" | "prod" => 3,
            "staging" => 2,
            _ => 1,
        };

        let mut bundle = format!(
            "service:\n  environment: {}\n  replicas: {}\n  manifest: {}\nprovider:\n  name: {}\nlogging:\n  level: info\n  format: json\n",
            input.environment, replicas, manifest_file, input.provider
        );
        if input.enable_sop {
            bundle.push_str(
                "runbook:\n  oncall: platform\n  escalation:\n    - check service health endpoint\n    - inspect recent deploy\n    - roll back to previous image\n",
            );
        }

        let drop = input.link_drop(NewDrop::new(
            input.workflow_id,
            Stage::ConfigBundle,
            DropType::Structure,
            bundle,
        ));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Compliance report
// ============================================================================

/// Scores the generated artifact against requested compliance frameworks
/// using the evidence already in the source ledger.
pub struct ComplianceReportActivity {
    deps: ActivityDeps,
}

impl ComplianceReportActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for ComplianceReportActivity {
    const TYPE: &'static str = "compliance_report";
    type Input = InfraStageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let source = input.source_workflow_id;

        let scan = source_artifact(&self.deps, source, Stage::SecurityScan).await?;
        let validation = source_artifact(&self.deps, source, Stage::SemanticValidation).await?;
        let manifest = source_artifact(&self.deps, source, Stage::DependencyResolution).await?;
        let docs = source_artifact(&self.deps, source, Stage::Documentation).await?;

        let severe_findings = scan
            .as_deref()
            .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            .and_then(|v| {
                v.get("findings").and_then(|f| f.as_array()).map(|findings| {
                    findings
                        .iter()
                        .filter(|f| {
                            matches!(
                                f.get("severity").and_then(|s| s.as_str()),
                                Some("critical") | Some("high")
                            )
                        })
                        .count()
                })
            })
            .unwrap_or(0);

        // Evidence-based scoring, identical across frameworks; the controls
        // checklist differs per framework only in wording.
        let mut score = 0u32;
        if scan.is_some() && severe_findings == 0 {
            score += 40;
        } else if scan.is_some() {
            score += 10;
        }
        if validation.is_some() {
            score += 20;
        }
        if manifest.is_some() {
            score += 20;
        }
        if docs.is_some() {
            score += 20;
        }

        let frameworks: Vec<serde_json::Value> = input
            .compliance
            .iter()
            .map(|framework| {
                json!({
                    "framework": framework,
                    "score": score,
                    "controls": {
                        "vulnerability_scanning": scan.is_some(),
                        "no_severe_findings": severe_findings == 0,
                        "static_validation": validation.is_some(),
                        "dependency_inventory": manifest.is_some(),
                        "documented": docs.is_some(),
                    },
                })
            })
            .collect();

        let artifact = serde_json::to_string_pretty(&json!({
            "score": score,
            "severe_findings": severe_findings,
            "frameworks": frameworks,
        }))
        .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

        let drop = input
            .link_drop(NewDrop::new(
                input.workflow_id,
                Stage::ComplianceReport,
                DropType::ValidationReport,
                artifact,
            ))
            .with_metadata("score", json!(score));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Cost estimate
// ============================================================================

/// Deterministic monthly cost estimate by provider and environment.
pub struct CostEstimateActivity {
    deps: ActivityDeps,
}

impl CostEstimateActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }

    fn base_costs(provider: &str) -> (f64, f64, f64) {
        // (compute, datastore, networking) per instance-month.
        match provider {
            "aws" => (62.0, 45.0, 18.0),
            "gcp" => (58.0, 42.0, 15.0),
            "azure" => (65.0, 48.0, 20.0),
            _ => (60.0, 45.0, 17.0),
        }
    }
}

#[async_trait]
impl Activity for CostEstimateActivity {
    const TYPE: &'static str = "cost_estimate";
    type Input = InfraStageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let (compute, datastore, networking) = Self::base_costs(&input.provider);
        let replicas = match input.environment.as_str() {
            "production" | "prod" => 3.0,
            "staging" => 2.0,
            _ => 1.0,
        };

        let monthly_usd =
            (compute * replicas + datastore + networking + if input.enable_golden_images { 12.0 } else { 0.0 })
                .round();

        let artifact = serde_json::to_string_pretty(&json!({
            "monthly_usd": monthly_usd,
            "currency": "USD",
            "breakdown": {
                "compute": compute * replicas,
                "datastore": datastore,
                "networking": networking,
            },
            "assumptions": {
                "provider": input.provider,
                "environment": input.environment,
                "replicas": replicas,
            },
        }))
        .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

        let drop = input
            .link_drop(NewDrop::new(
                input.workflow_id,
                Stage::CostEstimate,
                DropType::ValidationReport,
                artifact,
            ))
            .with_metadata("monthly_usd", json!(monthly_usd));
        self.deps.write_drop(drop).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test_support::sim_deps;

    fn input(workflow_id: Uuid, source: Uuid) -> InfraStageInput {
        InfraStageInput {
            workflow_id,
            source_workflow_id: source,
            provider: "aws".into(),
            environment: "production".into(),
            compliance: vec!["SOC2".into()],
            enable_golden_images: true,
            enable_sop: true,
            auto_deploy: false,
            dry_run: true,
        }
    }

    fn ctx(wf: Uuid) -> ActivityContext {
        ActivityContext::new(wf, "infra", 1, 3, Duration::from_secs(60))
    }

    async fn seed_source(deps: &ActivityDeps, source: Uuid) {
        deps.ledger
            .create_drop(NewDrop::new(
                source,
                Stage::CodeGeneration,
                DropType::Code,
                "def handler():\n    return {\"ok\": True}\n",
            ))
            .await
            .unwrap();
        deps.ledger
            .create_drop(
                NewDrop::new(
                    source,
                    Stage::DependencyResolution,
                    DropType::PackageManifest,
                    "fastapi\n",
                )
                .with_metadata("filename", json!("requirements.txt")),
            )
            .await
            .unwrap();
        deps.ledger
            .create_drop(NewDrop::new(
                source,
                Stage::SecurityScan,
                DropType::ScanReport,
                serde_json::to_string(&json!({ "findings": [] })).unwrap(),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn iac_generation_links_to_source() {
        let deps = sim_deps();
        let (sub, source) = (Uuid::now_v7(), Uuid::now_v7());
        seed_source(&deps, source).await;

        IacGenerationActivity::new(deps.clone())
            .execute(&ctx(sub), input(sub, source))
            .await
            .unwrap();

        let drop = deps.ledger.get_latest(sub, Stage::IacGeneration).await.unwrap();
        assert_eq!(drop.metadata["source_workflow"], json!(source.to_string()));
        assert_eq!(drop.metadata["dry_run"], json!(true));
        // Golden image section appended.
        assert!(drop.artifact.contains("amazon-ebs"));
    }

    #[tokio::test]
    async fn iac_generation_requires_source_code() {
        let deps = sim_deps();
        let (sub, source) = (Uuid::now_v7(), Uuid::now_v7());

        let err = IacGenerationActivity::new(deps)
            .execute(&ctx(sub), input(sub, source))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn config_bundle_scales_with_environment() {
        let deps = sim_deps();
        let (sub, source) = (Uuid::now_v7(), Uuid::now_v7());
        seed_source(&deps, source).await;

        ConfigBundleActivity::new(deps.clone())
            .execute(&ctx(sub), input(sub, source))
            .await
            .unwrap();

        let drop = deps.ledger.get_latest(sub, Stage::ConfigBundle).await.unwrap();
        assert!(drop.artifact.contains("replicas: 3"));
        assert!(drop.artifact.contains("runbook:"));
    }

    #[tokio::test]
    async fn compliance_report_scores_clean_evidence() {
        let deps = sim_deps();
        let (sub, source) = (Uuid::now_v7(), Uuid::now_v7());
        seed_source(&deps, source).await;

        ComplianceReportActivity::new(deps.clone())
            .execute(&ctx(sub), input(sub, source))
            .await
            .unwrap();

        let drop = deps.ledger.get_latest(sub, Stage::ComplianceReport).await.unwrap();
        let score = drop.metadata["score"].as_u64().unwrap();
        // Scan clean + manifest present, but no validation/docs drops.
        assert_eq!(score, 60);

        let report: serde_json::Value = serde_json::from_str(&drop.artifact).unwrap();
        assert_eq!(report["frameworks"][0]["framework"], json!("SOC2"));
        assert!(report["frameworks"][0]["score"].is_number());
    }

    #[tokio::test]
    async fn cost_estimate_is_numeric_and_deterministic() {
        let deps = sim_deps();
        let (sub, source) = (Uuid::now_v7(), Uuid::now_v7());

        let activity = CostEstimateActivity::new(deps.clone());
        activity.execute(&ctx(sub), input(sub, source)).await.unwrap();
        let first = deps.ledger.get_latest(sub, Stage::CostEstimate).await.unwrap();
        assert!(first.metadata["monthly_usd"].is_number());

        // Re-running writes identical content, so the version is reused.
        activity.execute(&ctx(sub), input(sub, source)).await.unwrap();
        let second = deps.ledger.get_latest(sub, Stage::CostEstimate).await.unwrap();
        assert_eq!(first.version, second.version);
    }
}

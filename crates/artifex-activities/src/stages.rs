//! The twelve pipeline stage activities
//!
//! Each activity reads what it needs from the ledger (falling back down the
//! chain when an earlier warn-on-fail stage produced nothing), does its work
//! through the router or a collaborator, and writes exactly one drop.

use std::time::Duration;

use artifex_durable::activity::error_types;
use artifex_durable::{Activity, ActivityContext, ActivityError};
use artifex_ledger::{DropType, NewDrop, Stage};
use artifex_router::{ChatMessage, GenerateRequest, GenerateResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::HeuristicPerfAnalyzer;
use crate::deps::{ledger_error, router_error, ActivityDeps, StageOutput};
use crate::language;

/// Input shared by every pipeline stage: the frozen request plus the owning
/// workflow id. Prior stage outputs come from the ledger, not the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInput {
    pub workflow_id: Uuid,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Artifact kind hint ("api", "cli", "worker"...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl StageInput {
    fn language_or_default(&self) -> &str {
        self.language.as_deref().unwrap_or("python")
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Latest live artifact for a stage, or None when the stage produced
/// nothing usable. An error drop left behind by a warn-on-fail stage is
/// diagnostics, not an artifact, and must not flow downstream.
async fn latest_artifact(
    deps: &ActivityDeps,
    workflow_id: Uuid,
    stage: Stage,
) -> Result<Option<String>, ActivityError> {
    match deps.ledger.get_latest(workflow_id, stage).await {
        Ok(drop) if drop.drop_type != DropType::Error => Ok(Some(drop.artifact)),
        Ok(_) => Ok(None),
        Err(artifex_ledger::LedgerError::NotFound { .. }) => Ok(None),
        Err(e) => Err(ledger_error(e)),
    }
}

/// The working prompt: enhanced when stage 1 succeeded, original otherwise.
async fn working_prompt(deps: &ActivityDeps, input: &StageInput) -> Result<String, ActivityError> {
    Ok(
        latest_artifact(deps, input.workflow_id, Stage::PromptEnhancement)
            .await?
            .unwrap_or_else(|| input.prompt.clone()),
    )
}

/// The FRD, falling back to the working prompt as a stub.
async fn frd_or_stub(deps: &ActivityDeps, input: &StageInput) -> Result<String, ActivityError> {
    match latest_artifact(deps, input.workflow_id, Stage::FrdGeneration).await? {
        Some(frd) => Ok(frd),
        None => working_prompt(deps, input).await,
    }
}

/// The primary code artifact; required by every post-generation stage.
async fn code_artifact(deps: &ActivityDeps, workflow_id: Uuid) -> Result<String, ActivityError> {
    latest_artifact(deps, workflow_id, Stage::CodeGeneration)
        .await?
        .ok_or_else(|| {
            ActivityError::non_retryable("code artifact missing from ledger")
                .with_type(error_types::INVALID_INPUT)
        })
}

fn generation_request(
    ctx: &ActivityContext,
    messages: Vec<ChatMessage>,
    language: Option<&str>,
) -> GenerateRequest {
    let mut request = GenerateRequest::new(messages)
        .with_deadline(ctx.remaining().min(Duration::from_secs(120)));
    if let Some(language) = language {
        request = request.with_language(language);
    }
    request
}

fn drop_with_response_metadata(mut drop: NewDrop, response: &GenerateResponse) -> NewDrop {
    drop = drop
        .with_metadata("provider", json!(response.provider))
        .with_metadata("model", json!(response.model))
        .with_metadata("duration_ms", json!(response.latency_ms));
    if let Some(tokens) = response.prompt_tokens {
        drop = drop.with_metadata("prompt_tokens", json!(tokens));
    }
    if let Some(tokens) = response.completion_tokens {
        drop = drop.with_metadata("completion_tokens", json!(tokens));
    }
    drop
}

// ============================================================================
// Stage 1: prompt enhancement
// ============================================================================

/// Normalizes and decorates the raw request into a generation-ready prompt.
pub struct PromptEnhancementActivity {
    deps: ActivityDeps,
}

impl PromptEnhancementActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for PromptEnhancementActivity {
    const TYPE: &'static str = "prompt_enhancement";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        info!(workflow_id = %input.workflow_id, "enhancing prompt");

        let mut context_lines = vec![format!("Target language: {}", input.language_or_default())];
        if let Some(framework) = &input.framework {
            context_lines.push(format!("Framework: {framework}"));
        }
        if let Some(kind) = &input.kind {
            context_lines.push(format!("Artifact kind: {kind}"));
        }

        let request = generation_request(
            ctx,
            vec![
                ChatMessage::system(
                    "Rewrite the user's software request as a precise, complete build \
                     specification. Keep every stated requirement, make implicit ones \
                     explicit, and do not invent scope.",
                ),
                ChatMessage::user(format!(
                    "{}\n\nRequest:\n{}",
                    context_lines.join("\n"),
                    input.prompt
                )),
            ],
            None,
        );

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;

        let drop = drop_with_response_metadata(
            NewDrop::new(
                input.workflow_id,
                Stage::PromptEnhancement,
                DropType::Prompt,
                response.content.clone(),
            ),
            &response,
        );
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 2: FRD generation
// ============================================================================

/// Produces the functional-requirements document from the enhanced prompt.
pub struct FrdGenerationActivity {
    deps: ActivityDeps,
}

impl FrdGenerationActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for FrdGenerationActivity {
    const TYPE: &'static str = "frd_generation";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let prompt = working_prompt(&self.deps, &input).await?;

        let request = generation_request(
            ctx,
            vec![
                ChatMessage::system(
                    "Write a functional requirements document with numbered REQ items, \
                     each tagged functional or non-functional, plus an out-of-scope \
                     section. Plain markdown, no commentary.",
                ),
                ChatMessage::user(prompt),
            ],
            None,
        );

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;

        let drop = drop_with_response_metadata(
            NewDrop::new(
                input.workflow_id,
                Stage::FrdGeneration,
                DropType::Frd,
                response.content.clone(),
            ),
            &response,
        );
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 3: project structure
// ============================================================================

/// Plans the file/directory tree. Falls back to language defaults when the
/// provider output cannot be coerced into a tree.
pub struct ProjectStructureActivity {
    deps: ActivityDeps,
}

impl ProjectStructureActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }

    fn default_tree(language: &str, name: &str) -> serde_json::Value {
        let files: Vec<(&str, &str)> = match language {
            "rust" => vec![
                ("Cargo.toml", "file"),
                ("src", "dir"),
                ("src/main.rs", "file"),
                ("src/lib.rs", "file"),
                ("tests", "dir"),
            ],
            "go" => vec![
                ("go.mod", "file"),
                ("main.go", "file"),
                ("internal", "dir"),
            ],
            "javascript" | "typescript" => vec![
                ("package.json", "file"),
                ("src", "dir"),
                ("src/index.js", "file"),
                ("test", "dir"),
            ],
            _ => vec![
                ("requirements.txt", "file"),
                ("app", "dir"),
                ("app/main.py", "file"),
                ("app/models.py", "file"),
                ("tests", "dir"),
            ],
        };
        json!({
            "name": name,
            "files": files
                .into_iter()
                .map(|(path, kind)| json!({ "path": path, "kind": kind }))
                .collect::<Vec<_>>(),
        })
    }

    /// Accept either a JSON tree or an indented/bulleted listing.
    fn coerce_tree(content: &str, language: &str, name: &str) -> (serde_json::Value, bool) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(content.trim()) {
            if value.get("files").is_some_and(|f| f.is_array()) {
                return (value, false);
            }
        }

        let files: Vec<serde_json::Value> = content
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*', ' ']))
            .filter(|l| {
                !l.is_empty()
                    && !l.contains(' ')
                    && (l.contains('/') || l.contains('.'))
            })
            .map(|path| {
                let kind = if path.contains('.') { "file" } else { "dir" };
                json!({ "path": path, "kind": kind })
            })
            .collect();

        if files.len() >= 2 {
            (json!({ "name": name, "files": files }), false)
        } else {
            (Self::default_tree(language, name), true)
        }
    }
}

#[async_trait]
impl Activity for ProjectStructureActivity {
    const TYPE: &'static str = "project_structure";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let frd = frd_or_stub(&self.deps, &input).await?;
        let language = input.language_or_default().to_string();
        let name = input.name.clone().unwrap_or_else(|| "generated-service".into());

        let request = generation_request(
            ctx,
            vec![
                ChatMessage::system(
                    "Plan the project file tree for the described system. Respond with \
                     JSON only: {\"files\": [{\"path\": \"...\", \"kind\": \"file|dir\"}]}.",
                ),
                ChatMessage::user(format!("Language: {language}\n\n{frd}")),
            ],
            None,
        );

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;
        let (tree, defaulted) = Self::coerce_tree(&response.content, &language, &name);

        let mut drop = drop_with_response_metadata(
            NewDrop::new(
                input.workflow_id,
                Stage::ProjectStructure,
                DropType::Structure,
                serde_json::to_string_pretty(&tree)
                    .map_err(|e| ActivityError::non_retryable(e.to_string()))?,
            ),
            &response,
        )
        .with_metadata("language", json!(language));
        if defaulted {
            drop = drop.with_metadata("defaulted", json!(true));
        }
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 4: requirements parse
// ============================================================================

/// Extracts typed requirement items from the FRD. Pure text processing; no
/// provider call.
pub struct RequirementsParseActivity {
    deps: ActivityDeps,
}

impl RequirementsParseActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }

    fn classify(text: &str) -> &'static str {
        let lowered = text.to_lowercase();
        const NON_FUNCTIONAL: &[&str] = &[
            "performance", "latency", "throughput", "scale", "secure", "security",
            "availability", "reliab", "persist", "audit", "log", "observab",
        ];
        if NON_FUNCTIONAL.iter().any(|k| lowered.contains(k)) {
            "non_functional"
        } else {
            "functional"
        }
    }

    fn parse(frd: &str) -> Vec<serde_json::Value> {
        let mut items = vec![];
        for line in frd.lines() {
            let trimmed = line.trim();
            let body = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .or_else(|| {
                    trimmed
                        .split_once(". ")
                        .filter(|(n, _)| n.chars().all(|c| c.is_ascii_digit()))
                        .map(|(_, rest)| rest)
                });
            let Some(body) = body else { continue };
            if body.len() < 8 {
                continue;
            }
            items.push(json!({
                "id": format!("REQ-{}", items.len() + 1),
                "text": body,
                "kind": Self::classify(body),
            }));
        }
        items
    }
}

#[async_trait]
impl Activity for RequirementsParseActivity {
    const TYPE: &'static str = "requirements_parse";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let frd = frd_or_stub(&self.deps, &input).await?;
        let items = Self::parse(&frd);

        let artifact = serde_json::to_string_pretty(&json!({ "requirements": items }))
            .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

        let drop = NewDrop::new(
            input.workflow_id,
            Stage::RequirementsParse,
            DropType::Structure,
            artifact,
        )
        .with_metadata("item_count", json!(items.len()));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 5: code generation (critical)
// ============================================================================

/// Generates the primary source artifact. The only critical stage: its
/// exhaustion fails the workflow. Rotates the preferred provider across
/// attempts so a retry does not hammer the same endpoint.
pub struct CodeGenerationActivity {
    deps: ActivityDeps,
}

impl CodeGenerationActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for CodeGenerationActivity {
    const TYPE: &'static str = "code_generation";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let prompt = working_prompt(&self.deps, &input).await?;
        let structure =
            latest_artifact(&self.deps, input.workflow_id, Stage::ProjectStructure).await?;
        let language = input.language_or_default().to_string();

        let mut user = format!("Language: {language}\n");
        if let Some(framework) = &input.framework {
            user.push_str(&format!("Framework: {framework}\n"));
        }
        user.push_str(&format!("\n{prompt}\n"));
        if let Some(structure) = structure {
            user.push_str(&format!("\nPlanned layout:\n{structure}\n"));
        }

        let mut request = generation_request(
            ctx,
            vec![
                ChatMessage::system(
                    "Generate complete, runnable source code for the specification. \
                     Code only, no prose outside comments.",
                ),
                ChatMessage::user(user),
            ],
            Some(&language),
        );

        // Provider rotation across retry attempts.
        let providers = self.deps.router.provider_names();
        if !providers.is_empty() {
            let index = (ctx.attempt as usize - 1) % providers.len();
            request = request.with_preferred_provider(providers[index].clone());
        }

        info!(
            workflow_id = %input.workflow_id,
            attempt = ctx.attempt,
            preferred = request.preferred_provider.as_deref().unwrap_or("-"),
            "generating code"
        );

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;

        let drop = drop_with_response_metadata(
            NewDrop::new(
                input.workflow_id,
                Stage::CodeGeneration,
                DropType::Code,
                response.content.clone(),
            ),
            &response,
        )
        .with_metadata("language", json!(language));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 6: semantic validation
// ============================================================================

/// Runs the AST collaborator over the generated code, judging it by its
/// detected language rather than the declared one.
pub struct SemanticValidationActivity {
    deps: ActivityDeps,
}

impl SemanticValidationActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for SemanticValidationActivity {
    const TYPE: &'static str = "semantic_validation";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let code = code_artifact(&self.deps, input.workflow_id).await?;
        let detected = language::effective(&code, input.language.as_deref());
        let code_language = detected
            .as_deref()
            .filter(|l| language::is_code_language(l));

        let report = match code_language {
            Some(language) => self
                .deps
                .ast
                .parse_and_analyze(&code, language)
                .await
                .map_err(|e| {
                    ActivityError::retryable(e.to_string())
                        .with_type(error_types::TRANSIENT_EXTERNAL)
                })?,
            // Not code (or undetectable): nothing to validate.
            _ => Default::default(),
        };

        // Smoke-run through the sandbox when the artifact parsed cleanly;
        // its outcome is advisory and lands in the report only.
        let execution = match code_language {
            Some(language) if report.errors.is_empty() => self
                .deps
                .sandbox
                .execute(language, &code, ctx.remaining().min(Duration::from_secs(30)))
                .await
                .ok(),
            _ => None,
        };

        let artifact = serde_json::to_string_pretty(&json!({
            "errors": report.errors,
            "warnings": report.warnings,
            "metrics": report.metrics,
            "execution": execution,
        }))
        .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

        let mut drop = NewDrop::new(
            input.workflow_id,
            Stage::SemanticValidation,
            DropType::ValidationReport,
            artifact,
        )
        .with_metadata("error_count", json!(report.errors.len()))
        .with_metadata("warning_count", json!(report.warnings.len()));
        if let Some(language) = detected {
            drop = drop.with_metadata("language", json!(language));
        }
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 7: dependency resolution
// ============================================================================

/// Derives a package manifest from imports in the generated code; a minimal
/// manifest is always produced.
pub struct DependencyResolutionActivity {
    deps: ActivityDeps,
}

impl DependencyResolutionActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }

    fn python_imports(code: &str) -> Vec<String> {
        const STDLIB: &[&str] = &[
            "os", "sys", "json", "time", "math", "re", "typing", "dataclasses",
            "collections", "itertools", "functools", "pathlib", "datetime", "enum",
            "abc", "asyncio", "logging", "unittest", "uuid",
        ];
        let mut packages: Vec<String> = code
            .lines()
            .filter_map(|l| {
                let t = l.trim();
                t.strip_prefix("import ")
                    .or_else(|| t.strip_prefix("from "))
                    .map(|rest| {
                        rest.split([' ', '.', ','])
                            .next()
                            .unwrap_or_default()
                            .to_string()
                    })
            })
            .filter(|p| !p.is_empty() && !STDLIB.contains(&p.as_str()))
            .collect();
        packages.sort();
        packages.dedup();
        packages
    }

    fn manifest(language: &str, code: &str, name: &str, framework: Option<&str>) -> (String, String) {
        match language {
            "python" => {
                let mut packages = Self::python_imports(code);
                if let Some(framework) = framework {
                    let framework = framework.to_lowercase();
                    if !packages.contains(&framework) {
                        packages.push(framework);
                    }
                }
                if packages.is_empty() {
                    packages.push("fastapi".into());
                }
                ("requirements.txt".into(), packages.join("\n") + "\n")
            }
            "rust" => (
                "Cargo.toml".into(),
                format!(
                    "[package]\nname = \"{name}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[dependencies]\nserde = {{ version = \"1\", features = [\"derive\"] }}\nserde_json = \"1\"\n"
                ),
            ),
            "go" => ("go.mod".into(), format!("module {name}\n\ngo 1.22\n")),
            _ => (
                "package.json".into(),
                serde_json::to_string_pretty(&json!({
                    "name": name,
                    "version": "0.1.0",
                    "dependencies": { "express": "^4" },
                }))
                .unwrap_or_default(),
            ),
        }
    }
}

#[async_trait]
impl Activity for DependencyResolutionActivity {
    const TYPE: &'static str = "dependency_resolution";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let code = code_artifact(&self.deps, input.workflow_id).await?;
        let language = language::effective(&code, input.language.as_deref())
            .unwrap_or_else(|| "python".into());
        let name = input.name.clone().unwrap_or_else(|| "generated-service".into());

        let (filename, manifest) =
            Self::manifest(&language, &code, &name, input.framework.as_deref());

        let drop = NewDrop::new(
            input.workflow_id,
            Stage::DependencyResolution,
            DropType::PackageManifest,
            manifest,
        )
        .with_metadata("filename", json!(filename))
        .with_metadata("language", json!(language));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 8: test plan
// ============================================================================

/// Drafts the test plan from the FRD and generated code.
pub struct TestPlanActivity {
    deps: ActivityDeps,
}

impl TestPlanActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for TestPlanActivity {
    const TYPE: &'static str = "test_plan";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let frd = frd_or_stub(&self.deps, &input).await?;
        let code = code_artifact(&self.deps, input.workflow_id).await?;

        let request = generation_request(
            ctx,
            vec![
                ChatMessage::system(
                    "Write a test plan: happy paths, failure paths, and edge cases, \
                     one numbered case per line with the behavior under test.",
                ),
                ChatMessage::user(format!("Requirements:\n{frd}\n\nImplementation:\n{code}")),
            ],
            None,
        );

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;

        let drop = drop_with_response_metadata(
            NewDrop::new(
                input.workflow_id,
                Stage::TestPlan,
                DropType::Docs,
                response.content.clone(),
            ),
            &response,
        );
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 9: test code generation
// ============================================================================

/// Generates test source from the plan and the implementation.
pub struct TestCodeGenerationActivity {
    deps: ActivityDeps,
}

impl TestCodeGenerationActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for TestCodeGenerationActivity {
    const TYPE: &'static str = "test_code_generation";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let code = code_artifact(&self.deps, input.workflow_id).await?;
        let plan = latest_artifact(&self.deps, input.workflow_id, Stage::TestPlan)
            .await?
            .unwrap_or_else(|| "Cover create, read, update, delete, and error paths.".into());
        let language = language::effective(&code, input.language.as_deref())
            .unwrap_or_else(|| input.language_or_default().to_string());

        let request = generation_request(
            ctx,
            vec![
                ChatMessage::system(
                    "Generate a complete test suite for the implementation, following \
                     the plan. Test code only.",
                ),
                ChatMessage::user(format!(
                    "Language: {language}\n\nPlan:\n{plan}\n\nImplementation:\n{code}"
                )),
            ],
            Some(&language),
        );

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;

        let drop = drop_with_response_metadata(
            NewDrop::new(
                input.workflow_id,
                Stage::TestCodeGeneration,
                DropType::Tests,
                response.content.clone(),
            ),
            &response,
        )
        .with_metadata("language", json!(language));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 10: security scan
// ============================================================================

/// Scans code and manifest through the scanner collaborator.
pub struct SecurityScanActivity {
    deps: ActivityDeps,
}

impl SecurityScanActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for SecurityScanActivity {
    const TYPE: &'static str = "security_scan";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let code = code_artifact(&self.deps, input.workflow_id).await?;
        let manifest =
            latest_artifact(&self.deps, input.workflow_id, Stage::DependencyResolution).await?;
        let detected = language::effective(&code, input.language.as_deref());

        let mut findings = self
            .deps
            .scanner
            .scan(&code, detected.as_deref())
            .await
            .map_err(|e| {
                ActivityError::retryable(e.to_string()).with_type(error_types::TRANSIENT_EXTERNAL)
            })?;
        if let Some(manifest) = manifest {
            findings.extend(
                self.deps
                    .scanner
                    .scan(&manifest, None)
                    .await
                    .map_err(|e| ActivityError::retryable(e.to_string()))?,
            );
        }

        let severe = findings
            .iter()
            .filter(|f| f.severity == "critical" || f.severity == "high")
            .count();
        let artifact = serde_json::to_string_pretty(&json!({ "findings": findings }))
            .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

        let drop = NewDrop::new(
            input.workflow_id,
            Stage::SecurityScan,
            DropType::ScanReport,
            artifact,
        )
        .with_metadata("finding_count", json!(findings.len()))
        .with_metadata("severe_count", json!(severe));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 11: performance analysis
// ============================================================================

/// Heuristic performance review of the generated code.
pub struct PerformanceAnalysisActivity {
    deps: ActivityDeps,
}

impl PerformanceAnalysisActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for PerformanceAnalysisActivity {
    const TYPE: &'static str = "performance_analysis";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let code = code_artifact(&self.deps, input.workflow_id).await?;
        let findings = HeuristicPerfAnalyzer::analyze(&code);

        let artifact = serde_json::to_string_pretty(&json!({ "findings": findings }))
            .map_err(|e| ActivityError::non_retryable(e.to_string()))?;

        let drop = NewDrop::new(
            input.workflow_id,
            Stage::PerformanceAnalysis,
            DropType::ScanReport,
            artifact,
        )
        .with_metadata("finding_count", json!(findings.len()));
        self.deps.write_drop(drop).await
    }
}

// ============================================================================
// Stage 12: documentation
// ============================================================================

/// Writes the README from everything the pipeline produced.
pub struct DocumentationActivity {
    deps: ActivityDeps,
}

impl DocumentationActivity {
    pub fn new(deps: ActivityDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Activity for DocumentationActivity {
    const TYPE: &'static str = "documentation";
    type Input = StageInput;
    type Output = StageOutput;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let code = code_artifact(&self.deps, input.workflow_id).await?;
        let frd = frd_or_stub(&self.deps, &input).await?;
        let manifest =
            latest_artifact(&self.deps, input.workflow_id, Stage::DependencyResolution).await?;

        let mut user = format!("Requirements:\n{frd}\n\nImplementation:\n{code}\n");
        if let Some(manifest) = manifest {
            user.push_str(&format!("\nDependencies:\n{manifest}\n"));
        }

        let request = generation_request(
            ctx,
            vec![
                ChatMessage::system(
                    "Write the project README: overview, setup, usage, and API \
                     reference for the implementation below. Markdown only.",
                ),
                ChatMessage::user(user),
            ],
            None,
        );

        let response = self.deps.router.generate(&request).await.map_err(router_error)?;

        let drop = drop_with_response_metadata(
            NewDrop::new(
                input.workflow_id,
                Stage::Documentation,
                DropType::Docs,
                response.content.clone(),
            ),
            &response,
        );
        self.deps.write_drop(drop).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test_support::sim_deps;
    use artifex_ledger::DropFilter;

    fn input(workflow_id: Uuid) -> StageInput {
        StageInput {
            workflow_id,
            prompt: "Create a Python FastAPI service for a todo list with CRUD endpoints.".into(),
            language: Some("python".into()),
            framework: Some("fastapi".into()),
            kind: Some("api".into()),
            name: Some("todo-api".into()),
        }
    }

    fn ctx(workflow_id: Uuid, activity: &str) -> ActivityContext {
        ActivityContext::new(workflow_id, activity, 1, 3, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn prompt_enhancement_writes_prompt_drop() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        let output = PromptEnhancementActivity::new(deps.clone())
            .execute(&ctx(wf, "s1"), input(wf))
            .await
            .unwrap();

        assert_eq!(output.stage, Stage::PromptEnhancement);
        assert_eq!(output.version, 1);
        assert!(output.content_length > 0);

        let drop = deps.ledger.get_latest(wf, Stage::PromptEnhancement).await.unwrap();
        assert_eq!(drop.drop_type, DropType::Prompt);
        assert!(drop.metadata.contains_key("provider"));
    }

    #[tokio::test]
    async fn code_generation_records_language_and_provider() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        let output = CodeGenerationActivity::new(deps.clone())
            .execute(&ctx(wf, "s5"), input(wf))
            .await
            .unwrap();

        assert_eq!(output.language.as_deref(), Some("python"));
        assert_eq!(output.provider.as_deref(), Some("sim"));

        let drop = deps.ledger.get_latest(wf, Stage::CodeGeneration).await.unwrap();
        assert!(drop.artifact.matches("def ").count() >= 3);
    }

    #[tokio::test]
    async fn code_generation_is_idempotent_under_replay() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();
        let activity = CodeGenerationActivity::new(deps.clone());

        let first = activity.execute(&ctx(wf, "s5"), input(wf)).await.unwrap();
        let second = activity.execute(&ctx(wf, "s5"), input(wf)).await.unwrap();

        // Same content: the ledger reuses the version.
        assert_eq!(first.version, second.version);
        let drops = deps
            .ledger
            .list_drops(wf, DropFilter::stage(Stage::CodeGeneration))
            .await
            .unwrap();
        assert_eq!(drops.len(), 1);
    }

    #[tokio::test]
    async fn validation_uses_detected_language_not_declared() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        // The "code" drop is actually YAML; declared language is python.
        deps.ledger
            .create_drop(NewDrop::new(
                wf,
                Stage::CodeGeneration,
                DropType::Code,
                "service:\n  name: todo\n  replicas: 3\n",
            ))
            .await
            .unwrap();

        SemanticValidationActivity::new(deps.clone())
            .execute(&ctx(wf, "s6"), input(wf))
            .await
            .unwrap();

        let report = deps.ledger.get_latest(wf, Stage::SemanticValidation).await.unwrap();
        // YAML is not validated as python code, so the report is clean.
        assert_eq!(report.metadata["language"], json!("yaml"));
        assert_eq!(report.metadata["error_count"], json!(0));
    }

    #[tokio::test]
    async fn post_generation_stage_requires_code() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        let err = SemanticValidationActivity::new(deps)
            .execute(&ctx(wf, "s6"), input(wf))
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert_eq!(err.error_type.as_deref(), Some("InvalidInput"));
    }

    #[tokio::test]
    async fn dependency_resolution_emits_python_manifest() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        deps.ledger
            .create_drop(NewDrop::new(
                wf,
                Stage::CodeGeneration,
                DropType::Code,
                "import requests\nfrom fastapi import FastAPI\n\ndef main():\n    pass\n",
            ))
            .await
            .unwrap();

        DependencyResolutionActivity::new(deps.clone())
            .execute(&ctx(wf, "s7"), input(wf))
            .await
            .unwrap();

        let manifest = deps
            .ledger
            .get_latest(wf, Stage::DependencyResolution)
            .await
            .unwrap();
        assert_eq!(manifest.metadata["filename"], json!("requirements.txt"));
        assert!(manifest.artifact.contains("fastapi"));
        assert!(manifest.artifact.contains("requests"));
        // Stdlib imports are not dependencies.
        assert!(!manifest.artifact.contains("typing"));
    }

    #[tokio::test]
    async fn requirements_parse_extracts_typed_items() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        deps.ledger
            .create_drop(NewDrop::new(
                wf,
                Stage::FrdGeneration,
                DropType::Frd,
                "# FRD\n- create items with identifiers\n- respond within 100ms latency\n",
            ))
            .await
            .unwrap();

        RequirementsParseActivity::new(deps.clone())
            .execute(&ctx(wf, "s4"), input(wf))
            .await
            .unwrap();

        let drop = deps.ledger.get_latest(wf, Stage::RequirementsParse).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&drop.artifact).unwrap();
        let items = parsed["requirements"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["kind"], json!("functional"));
        assert_eq!(items[1]["kind"], json!("non_functional"));
    }

    #[tokio::test]
    async fn security_scan_reports_findings() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();

        deps.ledger
            .create_drop(NewDrop::new(
                wf,
                Stage::CodeGeneration,
                DropType::Code,
                "import os\n\ndef run(cmd):\n    password = \"hunter2\"\n    eval(cmd)\n",
            ))
            .await
            .unwrap();

        SecurityScanActivity::new(deps.clone())
            .execute(&ctx(wf, "s10"), input(wf))
            .await
            .unwrap();

        let report = deps.ledger.get_latest(wf, Stage::SecurityScan).await.unwrap();
        let count = report.metadata["finding_count"].as_u64().unwrap();
        assert!(count >= 2);
        assert!(report.metadata["severe_count"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn full_prose_stage_chain_runs_on_sim() {
        let deps = sim_deps();
        let wf = Uuid::now_v7();
        let input = input(wf);

        PromptEnhancementActivity::new(deps.clone())
            .execute(&ctx(wf, "s1"), input.clone())
            .await
            .unwrap();
        FrdGenerationActivity::new(deps.clone())
            .execute(&ctx(wf, "s2"), input.clone())
            .await
            .unwrap();
        ProjectStructureActivity::new(deps.clone())
            .execute(&ctx(wf, "s3"), input.clone())
            .await
            .unwrap();
        CodeGenerationActivity::new(deps.clone())
            .execute(&ctx(wf, "s5"), input.clone())
            .await
            .unwrap();
        DocumentationActivity::new(deps.clone())
            .execute(&ctx(wf, "s12"), input.clone())
            .await
            .unwrap();

        assert_eq!(deps.ledger.count_drops(wf).await.unwrap(), 5);
    }
}

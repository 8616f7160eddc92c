//! External collaborator seams
//!
//! The AST validator, sandbox executor, and vulnerability scanner are
//! external services; activities consume them behind traits. The heuristic
//! implementations here are in-process stand-ins good enough to run the
//! pipeline end to end and to exercise report plumbing in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of parsing and analyzing a source artifact.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AstReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Flat metrics (line_count, function_count, max_nesting...).
    pub metrics: serde_json::Map<String, serde_json::Value>,
}

/// Parses source and reports diagnostics and metrics.
#[async_trait]
pub trait AstValidator: Send + Sync + 'static {
    async fn parse_and_analyze(&self, source: &str, language: &str) -> anyhow::Result<AstReport>;
}

/// Output of a sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs source in an isolated sandbox.
#[async_trait]
pub trait SandboxExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        language: &str,
        source: &str,
        deadline: Duration,
    ) -> anyhow::Result<ExecutionResult>;
}

/// One security finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule: String,
    pub severity: String,
    pub message: String,
    pub line: Option<usize>,
}

/// Scans an artifact for vulnerabilities.
#[async_trait]
pub trait VulnerabilityScanner: Send + Sync + 'static {
    async fn scan(&self, artifact: &str, language: Option<&str>) -> anyhow::Result<Vec<Finding>>;
}

// ============================================================================
// Heuristic implementations
// ============================================================================

/// Brace/indent-level structural checks; no real parser behind it.
pub struct HeuristicAstValidator;

#[async_trait]
impl AstValidator for HeuristicAstValidator {
    async fn parse_and_analyze(&self, source: &str, language: &str) -> anyhow::Result<AstReport> {
        let mut report = AstReport::default();

        let line_count = source.lines().count();
        let function_count = source
            .lines()
            .filter(|l| {
                let t = l.trim_start();
                t.starts_with("def ")
                    || t.starts_with("fn ")
                    || t.starts_with("func ")
                    || t.starts_with("function ")
            })
            .count();

        let opens = source.matches(['{', '(', '[']).count();
        let closes = source.matches(['}', ')', ']']).count();
        if opens != closes {
            report.errors.push(format!(
                "unbalanced delimiters: {opens} opening vs {closes} closing"
            ));
        }

        if language == "python" {
            for (i, line) in source.lines().enumerate() {
                if line.trim_end().ends_with(':') && line.trim_start().starts_with("def ") {
                    continue;
                }
                if line.contains("\t") && line.contains("    ") {
                    report
                        .warnings
                        .push(format!("line {}: mixed tabs and spaces", i + 1));
                }
            }
        }
        if function_count == 0 && line_count > 5 {
            report
                .warnings
                .push("no function definitions found".to_string());
        }

        report
            .metrics
            .insert("line_count".into(), line_count.into());
        report
            .metrics
            .insert("function_count".into(), function_count.into());
        Ok(report)
    }
}

/// Echo sandbox: does not actually execute anything, reports as much.
pub struct ShellOutSandbox;

#[async_trait]
impl SandboxExecutor for ShellOutSandbox {
    async fn execute(
        &self,
        language: &str,
        source: &str,
        _deadline: Duration,
    ) -> anyhow::Result<ExecutionResult> {
        Ok(ExecutionResult {
            stdout: String::new(),
            stderr: format!(
                "sandbox execution unavailable for {language} ({} bytes submitted)",
                source.len()
            ),
            exit_code: 0,
        })
    }
}

/// Pattern-based scanner covering the obvious foot-guns.
pub struct HeuristicScanner;

const SCAN_RULES: &[(&str, &str, &str)] = &[
    ("eval-call", "high", "eval("),
    ("exec-call", "high", "exec("),
    ("hardcoded-password", "critical", "password = \""),
    ("hardcoded-secret", "critical", "secret = \""),
    ("hardcoded-api-key", "critical", "api_key = \""),
    ("sql-concat", "high", "\" + \" WHERE"),
    ("pickle-load", "medium", "pickle.load"),
    ("yaml-unsafe-load", "medium", "yaml.load("),
    ("subprocess-shell", "medium", "shell=True"),
    ("wildcard-cors", "low", "allow_origins=[\"*\"]"),
];

#[async_trait]
impl VulnerabilityScanner for HeuristicScanner {
    async fn scan(&self, artifact: &str, _language: Option<&str>) -> anyhow::Result<Vec<Finding>> {
        let mut findings = vec![];
        for (i, line) in artifact.lines().enumerate() {
            for (rule, severity, needle) in SCAN_RULES {
                if line.contains(needle) {
                    findings.push(Finding {
                        rule: rule.to_string(),
                        severity: severity.to_string(),
                        message: format!("pattern {needle:?} matched"),
                        line: Some(i + 1),
                    });
                }
            }
        }
        Ok(findings)
    }
}

/// Heuristic performance smell detector.
pub struct HeuristicPerfAnalyzer;

impl HeuristicPerfAnalyzer {
    /// Flat list of performance smells with line numbers.
    pub fn analyze(source: &str) -> Vec<Finding> {
        let mut findings = vec![];
        let mut loop_depth: usize = 0;
        let mut indent_stack: Vec<usize> = vec![];

        for (i, line) in source.lines().enumerate() {
            let indent = line.len() - line.trim_start().len();
            while indent_stack.last().is_some_and(|&d| indent <= d) {
                indent_stack.pop();
                loop_depth = loop_depth.saturating_sub(1);
            }

            let t = line.trim_start();
            let is_loop = t.starts_with("for ") || t.starts_with("while ") || t.contains(".for_each(");
            if is_loop {
                loop_depth += 1;
                indent_stack.push(indent);
                if loop_depth >= 3 {
                    findings.push(Finding {
                        rule: "deep-loop-nesting".into(),
                        severity: "medium".into(),
                        message: format!("loop nesting depth {loop_depth}"),
                        line: Some(i + 1),
                    });
                }
            }

            if t.contains("sleep(") && !t.contains("await") {
                findings.push(Finding {
                    rule: "blocking-sleep".into(),
                    severity: "medium".into(),
                    message: "blocking sleep in request path".into(),
                    line: Some(i + 1),
                });
            }
            if loop_depth >= 1 && (t.contains("SELECT ") || t.contains(".query(") || t.contains(".get(\"http")) {
                findings.push(Finding {
                    rule: "query-in-loop".into(),
                    severity: "high".into(),
                    message: "per-iteration I/O inside a loop".into(),
                    line: Some(i + 1),
                });
            }
            if t.contains("+ str(") && t.contains("for ") {
                findings.push(Finding {
                    rule: "string-concat-loop".into(),
                    severity: "low".into(),
                    message: "string concatenation inside loop".into(),
                    line: Some(i + 1),
                });
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ast_validator_counts_functions() {
        let report = HeuristicAstValidator
            .parse_and_analyze("def a():\n    pass\n\ndef b():\n    pass\n", "python")
            .await
            .unwrap();
        assert_eq!(report.metrics["function_count"], serde_json::json!(2));
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn ast_validator_flags_unbalanced_delimiters() {
        let report = HeuristicAstValidator
            .parse_and_analyze("fn main() { let x = (1;", "rust")
            .await
            .unwrap();
        assert!(!report.errors.is_empty());
    }

    #[tokio::test]
    async fn scanner_flags_hardcoded_credentials() {
        let source = "user = \"admin\"\npassword = \"hunter2\"\n";
        let findings = HeuristicScanner.scan(source, Some("python")).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, "hardcoded-password");
        assert_eq!(findings[0].line, Some(2));
    }

    #[tokio::test]
    async fn scanner_passes_clean_code() {
        let findings = HeuristicScanner
            .scan("def add(a, b):\n    return a + b\n", Some("python"))
            .await
            .unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn perf_analyzer_flags_query_in_loop() {
        let source = "for user in users:\n    row = db.query(user.id)\n";
        let findings = HeuristicPerfAnalyzer::analyze(source);
        assert!(findings.iter().any(|f| f.rule == "query-in-loop"));
    }

    #[test]
    fn perf_analyzer_flags_deep_nesting() {
        let source = "for a in x:\n  for b in y:\n    for c in z:\n      pass\n";
        let findings = HeuristicPerfAnalyzer::analyze(source);
        assert!(findings.iter().any(|f| f.rule == "deep-loop-nesting"));
    }
}

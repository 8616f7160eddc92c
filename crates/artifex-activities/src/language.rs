//! Language detection from artifact content
//!
//! Validation stages must judge a drop by what it actually is, not by the
//! language the request declared; an FRD or a YAML bundle must never be
//! parsed as Python. Structured-data signals are checked before
//! keyword-based language guesses.

/// Detect a language tag from content. Returns `None` when nothing matches.
pub fn detect(content: &str) -> Option<&'static str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Structured data first.
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some("json");
    }
    if is_dockerfile(trimmed) {
        return Some("dockerfile");
    }
    if is_sql(trimmed) {
        return Some("sql");
    }
    if is_yaml(trimmed) {
        return Some("yaml");
    }

    // Language keywords.
    if trimmed.contains("def ") && (trimmed.contains("import ") || trimmed.contains("self"))
        || trimmed.contains("from fastapi")
        || trimmed.contains("from flask")
    {
        return Some("python");
    }
    if trimmed.contains("fn ") && (trimmed.contains("let ") || trimmed.contains("impl ")) {
        return Some("rust");
    }
    if trimmed.contains("func ") && trimmed.contains("package ") {
        return Some("go");
    }
    if trimmed.contains("public class ") || trimmed.contains("private void ") {
        return Some("java");
    }
    if trimmed.contains("function ")
        || trimmed.contains("=> {")
        || trimmed.contains("const ") && trimmed.contains("require(")
        || trimmed.contains("interface ") && trimmed.contains(": string")
    {
        if trimmed.contains(": string") || trimmed.contains(": number") {
            return Some("typescript");
        }
        return Some("javascript");
    }

    None
}

/// Detected language, falling back to the declared one.
pub fn effective(content: &str, declared: Option<&str>) -> Option<String> {
    detect(content)
        .map(str::to_string)
        .or_else(|| declared.map(str::to_string))
}

/// Whether a tag names a programming language (as opposed to data formats).
pub fn is_code_language(tag: &str) -> bool {
    !matches!(tag, "json" | "yaml" | "sql" | "dockerfile" | "markdown")
}

fn is_dockerfile(content: &str) -> bool {
    let mut lines = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));
    matches!(lines.next(), Some(first) if first.starts_with("FROM "))
        && content.lines().any(|l| {
            let l = l.trim();
            l.starts_with("RUN ") || l.starts_with("COPY ") || l.starts_with("CMD ")
        })
}

fn is_sql(content: &str) -> bool {
    let upper = content.to_uppercase();
    (upper.contains("SELECT ") && upper.contains(" FROM "))
        || upper.contains("CREATE TABLE")
        || upper.contains("INSERT INTO")
}

fn is_yaml(content: &str) -> bool {
    let lines: Vec<&str> = content
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .collect();
    if lines.is_empty() {
        return false;
    }
    let keyish = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("- ")
                || t.split_once(':')
                    .is_some_and(|(k, _)| !k.is_empty() && !k.contains(' '))
        })
        .count();
    // YAML if most lines look like keys/items and nothing looks like code.
    keyish * 2 > lines.len() && !content.contains('{') && !content.contains(';')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_json_before_keywords() {
        let json = r#"{"files": [{"path": "src/main.py", "kind": "file"}]}"#;
        assert_eq!(detect(json), Some("json"));
    }

    #[test]
    fn detects_dockerfile() {
        let dockerfile = "FROM python:3.12-slim\nCOPY . /app\nRUN pip install -r requirements.txt\nCMD [\"python\", \"app.py\"]\n";
        assert_eq!(detect(dockerfile), Some("dockerfile"));
    }

    #[test]
    fn detects_sql() {
        assert_eq!(
            detect("SELECT id, title FROM items WHERE done = false;"),
            Some("sql")
        );
        assert_eq!(
            detect("CREATE TABLE items (id SERIAL PRIMARY KEY);"),
            Some("sql")
        );
    }

    #[test]
    fn detects_yaml() {
        let yaml = "service:\n  name: todo\n  replicas: 3\nports:\n  - 8080\n";
        assert_eq!(detect(yaml), Some("yaml"));
    }

    #[test]
    fn detects_python() {
        let python = "import os\n\ndef main():\n    print(os.getcwd())\n";
        assert_eq!(detect(python), Some("python"));
    }

    #[test]
    fn detects_rust() {
        let rust = "fn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n";
        assert_eq!(detect(rust), Some("rust"));
    }

    #[test]
    fn detects_go() {
        let go = "package main\n\nfunc main() {\n}\n";
        assert_eq!(detect(go), Some("go"));
    }

    #[test]
    fn prose_detects_nothing() {
        assert_eq!(detect("The quick brown fox jumps over the lazy dog."), None);
    }

    #[test]
    fn effective_prefers_detection_over_declaration() {
        let yaml = "service:\n  name: todo\n  replicas: 3\n";
        assert_eq!(effective(yaml, Some("python")), Some("yaml".to_string()));
        assert_eq!(effective("plain words here", Some("python")), Some("python".to_string()));
        assert_eq!(effective("plain words here", None), None);
    }

    #[test]
    fn code_language_classification() {
        assert!(is_code_language("python"));
        assert!(is_code_language("rust"));
        assert!(!is_code_language("yaml"));
        assert!(!is_code_language("json"));
    }
}

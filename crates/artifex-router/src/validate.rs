//! Response validation
//!
//! Post-conditions applied to provider output before it is accepted. A
//! failure counts as a transient error against the source provider and feeds
//! its quality ranking.

use regex::Regex;

/// Validation configuration.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub min_content_length: usize,

    /// Lowercased prefixes that mark a conversational non-answer.
    pub forbidden_prefixes: Vec<String>,

    /// Reject prose-only responses when the request carried a code-language
    /// hint.
    pub require_code_for_language_hint: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_content_length: 30,
            forbidden_prefixes: [
                "sure, ",
                "sure! ",
                "of course",
                "certainly",
                "i'm sorry",
                "i am sorry",
                "i cannot",
                "i can't",
                "as an ai",
                "great question",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            require_code_for_language_hint: true,
        }
    }
}

/// Why a response was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("response too short: {len} < {min} chars")]
    TooShort { len: usize, min: usize },

    #[error("response opens conversationally: {prefix:?}")]
    ConversationalPrefix { prefix: String },

    #[error("expected {language} code, got prose only")]
    ProseOnly { language: String },
}

/// Validates provider responses against configured post-conditions.
#[derive(Debug)]
pub struct ResponseValidator {
    config: ValidationConfig,
    sentence_re: Regex,
}

impl ResponseValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            // A prose sentence: words ending in a period, no code punctuation.
            sentence_re: Regex::new(r"(?m)^[A-Z][a-z][^{};=<>`#]*\.\s*$").expect("static regex"),
        }
    }

    pub fn validate(
        &self,
        content: &str,
        language_hint: Option<&str>,
    ) -> Result<(), ValidationFailure> {
        let trimmed = content.trim();

        if trimmed.len() < self.config.min_content_length {
            return Err(ValidationFailure::TooShort {
                len: trimmed.len(),
                min: self.config.min_content_length,
            });
        }

        let lowered = trimmed.to_lowercase();
        for prefix in &self.config.forbidden_prefixes {
            if lowered.starts_with(prefix.as_str()) {
                return Err(ValidationFailure::ConversationalPrefix {
                    prefix: prefix.clone(),
                });
            }
        }

        if self.config.require_code_for_language_hint {
            if let Some(language) = language_hint {
                if self.is_prose_only(trimmed) {
                    return Err(ValidationFailure::ProseOnly {
                        language: language.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Heuristic: content with no code punctuation, no indentation, and
    /// multiple prose sentences is not code.
    fn is_prose_only(&self, content: &str) -> bool {
        let has_code_signal = content.contains('{')
            || content.contains(';')
            || content.contains("```")
            || content.contains(" = ")
            || content.contains("=>")
            || content.contains("def ")
            || content.contains("fn ")
            || content.contains("func ")
            || content.contains("class ")
            || content.contains("import ")
            || content.contains("#include")
            || content.lines().any(|l| l.starts_with("    ") || l.starts_with('\t'));

        if has_code_signal {
            return false;
        }

        self.sentence_re.find_iter(content).count() >= 2
            || content.split(". ").count() >= 3
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_rejected() {
        let validator = ResponseValidator::default();
        let err = validator.validate("", None).unwrap_err();
        assert!(matches!(err, ValidationFailure::TooShort { .. }));
    }

    #[test]
    fn short_body_is_rejected() {
        let validator = ResponseValidator::default();
        let err = validator.validate("ok then", None).unwrap_err();
        assert!(matches!(err, ValidationFailure::TooShort { .. }));
    }

    #[test]
    fn conversational_greeting_is_rejected() {
        let validator = ResponseValidator::default();
        let err = validator
            .validate(
                "Sure, here is the code you asked for, I hope it helps you today!",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationFailure::ConversationalPrefix { .. }));
    }

    #[test]
    fn prose_answer_to_code_request_is_rejected() {
        let validator = ResponseValidator::default();
        let prose = "The service would read requests. It would store them in a table. \
                     Then it would return the results to the caller over the network.";
        let err = validator.validate(prose, Some("python")).unwrap_err();
        assert!(matches!(err, ValidationFailure::ProseOnly { .. }));
    }

    #[test]
    fn code_passes_with_language_hint() {
        let validator = ResponseValidator::default();
        let code = "def handler(request):\n    items = load_items()\n    return items\n";
        assert!(validator.validate(code, Some("python")).is_ok());
    }

    #[test]
    fn prose_passes_without_language_hint() {
        let validator = ResponseValidator::default();
        let prose = "The system ingests requests and persists them durably. \
                     Each stage emits an artifact. Results are assembled at the end.";
        assert!(validator.validate(prose, None).is_ok());
    }
}

//! Ingress content policy.
//!
//! The same policy object backs the orchestrator's validate stage and the
//! validator agent, so a request rejected at ingress is rejected for the
//! same reasons an explicit validation request would report.
//!
//! Screening is rule-based: each deny rule pairs a category label with a
//! compiled pattern, and rejections name the category that fired. Prompts
//! additionally go through a control-character scan and size cap before
//! being HTML-escaped for downstream display surfaces.

use crate::{AssistError, Result};
use html_escape::encode_text;
use regex::Regex;

/// Size cap for prompt-sized text blocks. 16 KiB holds several pages of
/// requirements; anything larger is a paste mistake or an attack.
pub const MAX_PROMPT_LENGTH: usize = 16 * 1024;

/// Context keys are identifiers, not prose.
pub const MAX_CONTEXT_KEY_LENGTH: usize = 64;

/// Size cap for a single string inside the request context.
pub const MAX_CONTEXT_VALUE_LENGTH: usize = 2 * 1024;

/// Deny rules by category. Patterns are matched case-insensitively where
/// the category calls for it; a hit rejects the content and reports the
/// label.
const DENY_RULES: &[(&str, &str)] = &[
    (
        "script injection",
        r"(?i)<\s*script\b|javascript\s*:|vbscript\s*:|data\s*:\s*text/html",
    ),
    (
        "shell command",
        r"(?i)[;&|]\s*(?:rm|del|mkfs)\b|\$\(\s*(?:rm|del)\b|`\s*(?:rm|del)\b",
    ),
    (
        "sql tampering",
        r"(?i)\b(?:union\s+(?:all\s+)?select|drop\s+table|truncate\s+table|delete\s+from)\b",
    ),
    ("path traversal", r"\.\.[/\\]"),
    (
        "sensitive file access",
        r"(?i)\bfile://|/etc/(?:passwd|shadow)\b|windows\\+system32",
    ),
];

struct DenyRule {
    label: &'static str,
    pattern: Regex,
}

#[derive(Debug)]
pub struct ContentPolicy {
    rules: Vec<DenyRule>,
}

impl std::fmt::Debug for DenyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenyRule").field("label", &self.label).finish()
    }
}

impl ContentPolicy {
    pub fn new() -> Result<Self> {
        let mut rules = Vec::with_capacity(DENY_RULES.len());
        for (label, pattern) in DENY_RULES {
            let pattern = Regex::new(pattern).map_err(|e| {
                AssistError::ConfigurationError(format!("deny rule '{label}' is invalid: {e}"))
            })?;
            rules.push(DenyRule { label, pattern });
        }
        Ok(Self { rules })
    }

    /// Screen text against every deny rule. The error names the category
    /// that fired, never the matched text.
    pub fn screen(&self, text: &str) -> Result<()> {
        for rule in &self.rules {
            if rule.pattern.is_match(text) {
                return Err(AssistError::Validation(format!(
                    "content rejected by the {} rule",
                    rule.label
                )));
            }
        }
        Ok(())
    }

    /// Validate a prompt-sized block of text and return the escaped form.
    pub fn sanitize_prompt(&self, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(AssistError::Validation(
                "content must not be empty".to_string(),
            ));
        }

        // Line breaks and tabs are legitimate in pasted code; every other
        // control character is not.
        if text
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        {
            return Err(AssistError::Validation(
                "content contains control characters".to_string(),
            ));
        }

        if text.len() > MAX_PROMPT_LENGTH {
            return Err(AssistError::Validation(format!(
                "content is {} bytes, over the {MAX_PROMPT_LENGTH}-byte limit",
                text.len()
            )));
        }

        self.screen(text)?;
        Ok(encode_text(text).into_owned())
    }

    /// Context keys are short identifiers: leading letter, then letters,
    /// digits or underscores.
    pub fn validate_context_key(&self, key: &str) -> Result<()> {
        if key.len() > MAX_CONTEXT_KEY_LENGTH {
            return Err(AssistError::Validation(format!(
                "context key is over {MAX_CONTEXT_KEY_LENGTH} characters"
            )));
        }

        let mut chars = key.chars();
        let valid = match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };
        if !valid {
            return Err(AssistError::Validation(format!(
                "context key '{key}' is not an identifier"
            )));
        }
        Ok(())
    }

    /// Walk a context value, screening every string it contains, however
    /// deeply nested.
    pub fn validate_context_value(&self, value: &serde_json::Value) -> Result<()> {
        match value {
            serde_json::Value::String(text) => {
                if text.len() > MAX_CONTEXT_VALUE_LENGTH {
                    return Err(AssistError::Validation(format!(
                        "context value is over {MAX_CONTEXT_VALUE_LENGTH} bytes"
                    )));
                }
                self.screen(text)
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.validate_context_value(item)?;
                }
                Ok(())
            }
            serde_json::Value::Object(fields) => {
                for field in fields.values() {
                    self.validate_context_value(field)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

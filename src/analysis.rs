//! Code-analysis collaborator boundary.
//!
//! The runtime never parses source itself; syntactic work goes through the
//! [`CodeAnalysis`] trait. [`HeuristicAnalyzer`] is the built-in
//! implementation: extension/content-based language detection plus a
//! pattern-driven issue scan. Language servers or tree-sitter backends plug
//! in behind the same trait.

use crate::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueSeverity::Info => "Info",
            IssueSeverity::Low => "Low",
            IssueSeverity::Medium => "Medium",
            IssueSeverity::High => "High",
            IssueSeverity::Critical => "Critical",
        }
    }
}

/// One issue reported against a piece of source code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    /// Category label, e.g. `SecurityIssue`, `PerformanceIssue`, `CodeSmell`.
    pub category: String,
    pub message: String,
    pub line: Option<usize>,
    pub confidence: f64,
}

/// Context around a position in a source file, for prompt augmentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeContext {
    pub language: String,
    pub snippet: String,
    pub line: usize,
    pub enclosing_symbol: Option<String>,
}

#[async_trait]
pub trait CodeAnalysis: Send + Sync {
    async fn detect_language(&self, content: &str, file_name: Option<&str>) -> String;
    async fn analyze_code(&self, content: &str, language: &str) -> Result<Vec<Issue>>;
    async fn extract_context(&self, code: &str, position: usize) -> CodeContext;
}

/// Extension-first language detection with content-pattern fallback.
pub fn language_from_extension(file_path: &str) -> Option<&'static str> {
    match file_path.rsplit('.').next().unwrap_or("") {
        "cs" => Some("csharp"),
        "py" => Some("python"),
        "js" | "jsx" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "rs" => Some("rust"),
        "go" => Some("go"),
        "java" => Some("java"),
        "cpp" | "cc" | "cxx" => Some("cpp"),
        "c" | "h" => Some("c"),
        "rb" => Some("ruby"),
        "php" => Some("php"),
        "sql" => Some("sql"),
        "md" => Some("markdown"),
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "html" => Some("html"),
        "css" => Some("css"),
        "xml" => Some("xml"),
        _ => None,
    }
}

fn language_from_content(content: &str) -> &'static str {
    let lower = content.to_lowercase();
    if lower.contains("using system") || lower.contains("namespace ") && lower.contains(";") {
        "csharp"
    } else if lower.contains("def ") || lower.contains("import numpy") {
        "python"
    } else if lower.contains("function ") || lower.contains("const ") || lower.contains("=>") {
        "javascript"
    } else if lower.contains("fn ") && lower.contains("let ") {
        "rust"
    } else {
        "text"
    }
}

/// Pattern-driven analyzer used when no external language service is wired.
pub struct HeuristicAnalyzer {
    rules: Vec<AnalysisRule>,
}

struct AnalysisRule {
    pattern: Regex,
    severity: IssueSeverity,
    category: &'static str,
    message: &'static str,
    confidence: f64,
}

impl HeuristicAnalyzer {
    pub fn new() -> Result<Self> {
        let rules = vec![
            rule(
                r#"(?i)(password|secret|api_key|apikey)\s*[:=]\s*["'][^"']+["']"#,
                IssueSeverity::Critical,
                "SecurityIssue",
                "Hardcoded credential",
                0.9,
            )?,
            rule(
                r"(?i)\beval\s*\(",
                IssueSeverity::High,
                "SecurityIssue",
                "Dynamic code evaluation",
                0.8,
            )?,
            rule(
                r#"(?i)select\s+\*\s+from\s+\w+.*\+"#,
                IssueSeverity::High,
                "SecurityIssue",
                "Possible SQL built by string concatenation",
                0.6,
            )?,
            rule(
                r"(?m)^\s*for\b.*\n(?:.*\n)?\s*for\b",
                IssueSeverity::Medium,
                "PerformanceIssue",
                "Nested loop; consider restructuring for large inputs",
                0.4,
            )?,
            rule(
                r"(?i)\.result\b|\.wait\(\)",
                IssueSeverity::Medium,
                "PerformanceIssue",
                "Blocking wait on asynchronous operation",
                0.5,
            )?,
            rule(
                r"(?i)//\s*(todo|fixme|hack)",
                IssueSeverity::Info,
                "CodeSmell",
                "Unresolved TODO/FIXME marker",
                0.9,
            )?,
            rule(
                r"(?i)catch\s*(\(\s*\))?\s*\{\s*\}",
                IssueSeverity::Medium,
                "CodeSmell",
                "Empty catch block swallows errors",
                0.8,
            )?,
        ];
        Ok(Self { rules })
    }
}

fn rule(
    pattern: &str,
    severity: IssueSeverity,
    category: &'static str,
    message: &'static str,
    confidence: f64,
) -> Result<AnalysisRule> {
    Ok(AnalysisRule {
        pattern: Regex::new(pattern).map_err(|e| {
            crate::AssistError::ConfigurationError(format!("invalid analysis rule: {e}"))
        })?,
        severity,
        category,
        message,
        confidence,
    })
}

#[async_trait]
impl CodeAnalysis for HeuristicAnalyzer {
    async fn detect_language(&self, content: &str, file_name: Option<&str>) -> String {
        if let Some(name) = file_name {
            if let Some(lang) = language_from_extension(name) {
                return lang.to_string();
            }
        }
        language_from_content(content).to_string()
    }

    async fn analyze_code(&self, content: &str, _language: &str) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        for rule in &self.rules {
            for m in rule.pattern.find_iter(content) {
                let line = content[..m.start()].lines().count();
                issues.push(Issue {
                    severity: rule.severity,
                    category: rule.category.to_string(),
                    message: rule.message.to_string(),
                    line: Some(line.max(1)),
                    confidence: rule.confidence,
                });
            }
        }
        Ok(issues)
    }

    async fn extract_context(&self, code: &str, position: usize) -> CodeContext {
        let position = position.min(code.len());
        let line = code[..position].lines().count().max(1);

        // Window of a few lines around the position.
        let lines: Vec<&str> = code.lines().collect();
        let start = line.saturating_sub(3);
        let end = (line + 2).min(lines.len());
        let snippet = lines[start..end].join("\n");

        let enclosing_symbol = lines[..line.min(lines.len())]
            .iter()
            .rev()
            .find_map(|l| {
                let trimmed = l.trim_start();
                ["fn ", "def ", "function ", "class ", "public ", "private "]
                    .iter()
                    .any(|kw| trimmed.starts_with(kw))
                    .then(|| trimmed.split('(').next().unwrap_or(trimmed).to_string())
            });

        CodeContext {
            language: self.detect_language(code, None).await,
            snippet,
            line,
            enclosing_symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_language_detection_prefers_extension() {
        let analyzer = HeuristicAnalyzer::new().unwrap();
        assert_eq!(
            analyzer.detect_language("def main():", Some("script.cs")).await,
            "csharp"
        );
        assert_eq!(
            analyzer.detect_language("def main(): pass", None).await,
            "python"
        );
    }

    #[tokio::test]
    async fn test_detects_hardcoded_credentials() {
        let analyzer = HeuristicAnalyzer::new().unwrap();
        let issues = analyzer
            .analyze_code(r#"var apiKey = "sk-123456";"#, "csharp")
            .await
            .unwrap();
        assert!(issues.iter().any(|i| i.category == "SecurityIssue"));
    }

    #[tokio::test]
    async fn test_clean_code_yields_no_issues() {
        let analyzer = HeuristicAnalyzer::new().unwrap();
        let issues = analyzer
            .analyze_code("let total = items.iter().sum();", "rust")
            .await
            .unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn test_extract_context_window() {
        let analyzer = HeuristicAnalyzer::new().unwrap();
        let code = "fn outer() {\n    let a = 1;\n    let b = 2;\n}\n";
        let ctx = analyzer.extract_context(code, code.find("b = 2").unwrap()).await;
        assert!(ctx.snippet.contains("let b = 2"));
        assert!(ctx.enclosing_symbol.unwrap().contains("fn outer"));
    }
}

use serde::{Deserialize, Serialize};

/// Target language for generated code. Closed set for the languages the
/// validator knows; everything else rides along as `Other`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    CSharp,
    Other(String),
}

impl Language {
    /// Parse a display name ("Python", "C#", ...). Unrecognized names are
    /// preserved as `Other` so the validator can still run its basic checks.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Python" => Self::Python,
            "JavaScript" => Self::JavaScript,
            "TypeScript" => Self::TypeScript,
            "Java" => Self::Java,
            "C#" => Self::CSharp,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::TypeScript => "TypeScript",
            Self::Java => "Java",
            Self::CSharp => "C#",
            Self::Other(name) => name,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one code-generation request, including the outcome of syntax
/// validation across all attempts. `tokens_used` sums every LLM call made,
/// including failed attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodeGenerationResult {
    pub code: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub syntax_valid: bool,
    pub validation_errors: Vec<String>,
    pub tokens_used: u64,
    /// Source URLs of the documentation excerpts fed into the prompt.
    pub documentation_sources: Vec<String>,
}

/// Outcome of validating one piece of code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub language: Language,
}

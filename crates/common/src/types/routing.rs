use serde::{Deserialize, Serialize};

/// The supervisor's classification of a prompt into a workflow path.
/// Closed set — every prompt maps to exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingDecision {
    /// Documentation lookup only; no code generation.
    SearchOnly,
    /// Code generation without documentation context.
    CodeOnly,
    /// Retrieve documentation first, then generate code against it.
    SearchThenCode,
}

impl RoutingDecision {
    /// The wire/classifier string for this decision.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchOnly => "SEARCH_ONLY",
            Self::CodeOnly => "CODE_ONLY",
            Self::SearchThenCode => "SEARCH_THEN_CODE",
        }
    }

    /// Whether this path starts with a documentation search.
    pub fn starts_with_search(&self) -> bool {
        matches!(self, Self::SearchOnly | Self::SearchThenCode)
    }
}

impl std::fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

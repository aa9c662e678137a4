//! The fixed catalog of improvement categories used by the ideation loop.
//!
//! Exactly 21 categories. Selection is weighted round-robin over this
//! catalog with per-category cooldown and failure backoff (see the ideation
//! service); the catalog itself is immutable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the 21 fixed improvement domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryTag {
    Optimization,
    Security,
    Testing,
    Documentation,
    Refactoring,
    ErrorHandling,
    Logging,
    Performance,
    Accessibility,
    Internationalization,
    DeveloperExperience,
    CodeQuality,
    DependencyHygiene,
    Observability,
    Resilience,
    Configuration,
    Tooling,
    ApiDesign,
    DataIntegrity,
    Usability,
    TechnicalDebt,
}

impl CategoryTag {
    /// The full catalog, in canonical round-robin order.
    pub const ALL: [Self; 21] = [
        Self::Optimization,
        Self::Security,
        Self::Testing,
        Self::Documentation,
        Self::Refactoring,
        Self::ErrorHandling,
        Self::Logging,
        Self::Performance,
        Self::Accessibility,
        Self::Internationalization,
        Self::DeveloperExperience,
        Self::CodeQuality,
        Self::DependencyHygiene,
        Self::Observability,
        Self::Resilience,
        Self::Configuration,
        Self::Tooling,
        Self::ApiDesign,
        Self::DataIntegrity,
        Self::Usability,
        Self::TechnicalDebt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optimization => "optimization",
            Self::Security => "security",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Refactoring => "refactoring",
            Self::ErrorHandling => "error-handling",
            Self::Logging => "logging",
            Self::Performance => "performance",
            Self::Accessibility => "accessibility",
            Self::Internationalization => "internationalization",
            Self::DeveloperExperience => "developer-experience",
            Self::CodeQuality => "code-quality",
            Self::DependencyHygiene => "dependency-hygiene",
            Self::Observability => "observability",
            Self::Resilience => "resilience",
            Self::Configuration => "configuration",
            Self::Tooling => "tooling",
            Self::ApiDesign => "api-design",
            Self::DataIntegrity => "data-integrity",
            Self::Usability => "usability",
            Self::TechnicalDebt => "technical-debt",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        let normalized = s.to_lowercase().replace('_', "-");
        Self::ALL.iter().copied().find(|c| c.as_str() == normalized)
    }

    /// Index of this category within [`Self::ALL`].
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|c| c == self)
            .unwrap_or_default()
    }

    /// The canned proposal prompt handed to an ideating agent.
    pub fn prompt(&self) -> String {
        format!(
            "Survey the repository for one concrete, self-contained improvement in the \
             {} domain. Produce a proposal with a short title, a problem statement \
             describing the current shortcoming, and two to four verifiable acceptance \
             criteria. Scope the work so a single agent can complete it in one session.",
            self.as_str()
        )
    }
}

impl fmt::Display for CategoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_has_21_distinct_categories() {
        let set: HashSet<&str> = CategoryTag::ALL.iter().map(CategoryTag::as_str).collect();
        assert_eq!(set.len(), 21);
    }

    #[test]
    fn test_round_trip() {
        for tag in CategoryTag::ALL {
            assert_eq!(CategoryTag::parse_str(tag.as_str()), Some(tag));
        }
        assert_eq!(CategoryTag::parse_str("error_handling"), Some(CategoryTag::ErrorHandling));
        assert_eq!(CategoryTag::parse_str("nope"), None);
    }

    #[test]
    fn test_index_matches_catalog_order() {
        for (i, tag) in CategoryTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), i);
        }
    }

    #[test]
    fn test_prompt_mentions_category() {
        assert!(CategoryTag::Security.prompt().contains("security"));
    }
}

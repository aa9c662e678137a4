//! Review records and verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::agent::AgentId;

/// Outcome of one review iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reviewer observation attached to a failed criterion or quality check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// The criterion or check the finding refers to
    pub subject: String,
    /// What the reviewer observed
    pub note: String,
}

impl Finding {
    pub fn new(subject: impl Into<String>, note: impl Into<String>) -> Self {
        Self { subject: subject.into(), note: note.into() }
    }
}

/// Persisted record of one review iteration. One per iteration, retained
/// for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Reviewed project
    pub project_number: u64,
    /// Agent that performed the review
    pub reviewer_agent_id: AgentId,
    /// 1-based iteration counter
    pub iteration: u32,
    /// Observations supporting a fail verdict
    pub findings: Vec<Finding>,
    /// Pass or fail
    pub verdict: Verdict,
    /// When the verdict was emitted
    pub created_at: DateTime<Utc>,
}

/// Raw review output from the model runtime, prior to verdict policy.
#[derive(Debug, Clone)]
pub struct ReviewAssessment {
    /// Per-criterion satisfaction, index-aligned with the project criteria
    pub criteria_satisfied: Vec<bool>,
    /// Lint check outcome
    pub lint_passed: bool,
    /// Test suite outcome
    pub tests_passed: bool,
    /// Type check outcome
    pub type_check_passed: bool,
    /// Observations for failed items
    pub findings: Vec<Finding>,
    /// Cost actuals for the review call
    pub usd: f64,
    /// Token actuals for the review call
    pub tokens: u64,
}

impl ReviewAssessment {
    /// An assessment with every criterion satisfied and all checks green.
    pub fn all_green(criteria_count: usize) -> Self {
        Self {
            criteria_satisfied: vec![true; criteria_count],
            lint_passed: true,
            tests_passed: true,
            type_check_passed: true,
            findings: Vec::new(),
            usd: 0.0,
            tokens: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_round_trip() {
        assert_eq!(Verdict::parse_str("pass"), Some(Verdict::Pass));
        assert_eq!(Verdict::parse_str("FAIL"), Some(Verdict::Fail));
        assert_eq!(Verdict::parse_str("maybe"), None);
    }

    #[test]
    fn test_all_green_assessment() {
        let a = ReviewAssessment::all_green(3);
        assert_eq!(a.criteria_satisfied, vec![true, true, true]);
        assert!(a.findings.is_empty());
    }
}

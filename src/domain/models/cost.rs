//! Cost ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::agent::AgentId;

/// Which budget window a threshold event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    Daily,
    Monthly,
}

impl BudgetScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only ledger row recording actual spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    /// Agent that incurred the cost
    pub agent_id: AgentId,
    /// Project the spend is attributed to, if any
    pub project_number: Option<u64>,
    /// Actual spend in USD
    pub usd: f64,
    /// Tokens consumed
    pub tokens: u64,
    /// When the spend was recorded
    pub at: DateTime<Utc>,
}

impl CostLedgerEntry {
    pub fn new(
        agent_id: AgentId,
        project_number: Option<u64>,
        usd: f64,
        tokens: u64,
        at: DateTime<Utc>,
    ) -> Self {
        Self { agent_id, project_number, usd, tokens, at }
    }
}

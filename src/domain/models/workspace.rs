//! Workspace domain model.
//!
//! One workspace per tenant; created once and mutated by the operator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant-level limits the orchestrator enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace identifier
    pub id: String,
    /// Hard cap on concurrently registered agents
    pub max_concurrent_agents: u32,
    /// Daily spend budget in USD
    pub daily_budget_usd: f64,
    /// Monthly spend budget in USD
    pub monthly_budget_usd: f64,
    /// Optional per-agent daily spend cap in USD
    pub per_agent_daily_cap_usd: Option<f64>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(
        id: impl Into<String>,
        max_concurrent_agents: u32,
        daily_budget_usd: f64,
        monthly_budget_usd: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            max_concurrent_agents,
            daily_budget_usd,
            monthly_budget_usd,
            per_agent_daily_cap_usd: None,
            created_at: now,
            updated_at: now,
        }
    }
}

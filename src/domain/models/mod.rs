//! Domain models for the orchestrator.

pub mod agent;
pub mod category;
pub mod claim;
pub mod config;
pub mod cost;
pub mod project;
pub mod proposal;
pub mod review;
pub mod workspace;

pub use agent::{Agent, AgentId, AgentStatus, WorkPhase};
pub use category::CategoryTag;
pub use claim::{ClaimKind, ClaimTicket, FenceToken};
pub use config::Config;
pub use cost::{BudgetScope, CostLedgerEntry};
pub use project::{AcceptanceCriterion, Project, ProjectState};
pub use proposal::{Proposal, ProposalDraft};
pub use review::{Finding, ReviewAssessment, ReviewRecord, Verdict};
pub use workspace::Workspace;

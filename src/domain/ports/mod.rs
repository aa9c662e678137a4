//! Ports: interfaces between the domain and the outside world.

pub mod agent_repository;
pub mod clock;
pub mod cost_ledger_repository;
pub mod issue_host;
pub mod model_runtime;
pub mod project_repository;
pub mod proposal_repository;
pub mod review_repository;

pub use agent_repository::AgentRepository;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cost_ledger_repository::CostLedgerRepository;
pub use issue_host::{CreatedIssue, IssueDraft, IssueHost, NullIssueHost};
pub use model_runtime::{ModelRuntime, PhaseOutcome};
pub use project_repository::ProjectRepository;
pub use proposal_repository::ProposalRepository;
pub use review_repository::ReviewRepository;

//! SQLite persistence layer.

pub mod agent_repo;
pub mod audit_repo;
pub mod connection;
pub mod cost_repo;
pub mod event_repo;
pub mod migrations;
pub mod project_repo;
pub mod proposal_repo;
pub mod review_repo;
pub mod utils;

pub use agent_repo::AgentRepositoryImpl;
pub use audit_repo::AuditRepositoryImpl;
pub use connection::DatabaseConnection;
pub use cost_repo::CostLedgerRepositoryImpl;
pub use event_repo::EventRepositoryImpl;
pub use project_repo::ProjectRepositoryImpl;
pub use proposal_repo::ProposalRepositoryImpl;
pub use review_repo::ReviewRepositoryImpl;

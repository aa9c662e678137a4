//! Foreman - autonomous multi-agent orchestration platform.
//!
//! A pool of long-running worker agents concurrently claims and executes
//! projects from a shared queue under fenced, leased claims; pushed work is
//! validated by a reviewer agent against acceptance criteria with an
//! iterative rework loop; when the queue drains, an ideation loop refills
//! it from a fixed catalog of improvement categories. A cost governor
//! gates every admission against daily and monthly budgets, a sequenced
//! event bus fans state changes out to subscribers with replay and
//! acknowledgement, and a fire-and-forget audit log keeps a durable record
//! of every orchestration event. The control plane is a REST + WebSocket
//! API plus an operator CLI.

pub mod adapters;
pub mod api;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::error::{DatabaseError, OrchestratorError};
pub use domain::models::Config;
pub use infrastructure::database::DatabaseConnection;

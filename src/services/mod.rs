//! Orchestration services.

pub mod audit_log;
pub mod cost_governor;
pub mod dispatcher;
pub mod event_bus;
pub mod ideation_loop;
pub mod orchestrator;
pub mod review_engine;
pub mod supervisor;

pub use audit_log::{AuditLog, AuditLogConfig, AuditOperation, AuditQuery, AuditRecord, AuditStore};
pub use cost_governor::{CostGovernor, CostGovernorConfig, CostSnapshot};
pub use dispatcher::{Dispatcher, DispatcherConfig, ReleasedClaim};
pub use event_bus::{
    Event, EventBus, EventBusConfig, EventPayload, EventStore, GapTooLarge, SequenceNumber,
};
pub use ideation_loop::{CategoryPicker, IdeationLoop, IdeationLoopConfig};
pub use orchestrator::{Orchestrator, OrchestratorConfig, StatusSnapshot};
pub use review_engine::{ReviewEngine, ReviewEngineConfig};
pub use supervisor::{
    AgentCommand, AgentHandle, AgentSupervisor, SupervisorConfig, SupervisorDeps, TickOutcome,
};

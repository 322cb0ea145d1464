//! Agent lifecycle and run execution.
//!
//! [`AgentLifecycle`] drives agents through the status table in
//! [`state_machine`]; [`ExecutionOrchestrator`] turns tasks into runs on a
//! bounded [`WorkerPool`]. Both share one [`EngineContext`].

pub mod briefing;
pub mod budget;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod locks;
pub mod orchestrator;
pub mod pool;
pub mod state_machine;

pub use briefing::{BriefingError, BriefingLoader, StaticBriefingLoader};
pub use budget::{BudgetCheck, BudgetGuard};
pub use engine::{Engine, EngineContext};
pub use error::OrchestratorError;
pub use events::{EngineEvent, EventBus};
pub use lifecycle::AgentLifecycle;
pub use orchestrator::{CredentialSource, ExecutionOrchestrator, TenantCredential};
pub use pool::{PoolError, WorkerPool};
pub use state_machine::TransitionError;

//! 核心编排层：错误与恢复、阶段机、会话监管、编排器、构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::{OrchestratorError, RecoveryAction, Severity};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use recovery::RecoveryEngine;
pub use session_supervisor::{SessionSupervisor, TurnLease};
pub use state::{ApprovalDecision, SessionPhase, TurnMachine, TurnReply};

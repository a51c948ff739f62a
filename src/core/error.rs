//! 编排错误类型与严重级别
//!
//! 与 RecoveryEngine 配合：可恢复错误写回对话（让助手自行修正），调用方错误直接返回，
//! 结构性错误（路由表 / 委派栈违规）终止本轮，会话停留在最近一次检查点。

use thiserror::Error;

use crate::dialog::HandlerKind;
use crate::session::StoreError;

/// 编排过程中可能出现的全部错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Delegation stack underflow: cannot escalate out of the primary assistant")]
    EmptyStackUnderflow,

    /// 委派深度超过 orchestrator.max_delegation_depth
    #[error("Delegation stack overflow: depth limit {0} reached")]
    StackOverflow(usize),

    #[error("No valid response from {handler} after {attempts} attempts")]
    NoValidResponse { handler: HandlerKind, attempts: usize },

    #[error("Invalid route from {handler}: {reason}")]
    InvalidRoute { handler: HandlerKind, reason: String },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Missing context: {0}")]
    MissingContext(String),

    #[error("Action handler failure: {0}")]
    ActionHandlerFailure(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("No checkpoint found for session {0}")]
    NotFound(String),

    /// 重复提交审批（pending_action 已被清空）
    #[error("No pending action for session {0}")]
    NoPendingAction(String),

    /// 会话挂起等待审批时又收到普通用户消息
    #[error("Session {0} is awaiting approval")]
    ApprovalPending(String),

    #[error("Turn exceeded {0} steps")]
    StepLimitExceeded(usize),

    /// 单轮内反复 push/pop
    #[error("Delegation loop: {0} handoffs in one turn")]
    DelegationLoop(usize),

    #[error("Cancelled")]
    Cancelled,

    #[error("Checkpoint store error: {0}")]
    Store(#[from] StoreError),

    /// 启动装配失败（配置、数据库、政策文件）
    #[error("Setup error: {0}")]
    Setup(String),
}

/// 错误严重级别，决定错误的传播方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// 写回对话，由当前助手在下一步自行处理
    Recoverable,
    /// 直接返回调用方，由上层重试
    Caller,
    /// 配置或路由表错误：终止本轮，提示运维
    Fatal,
}

/// 恢复引擎根据错误给出的处理动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 以带错误信息的 tool 消息写回对话
    AppendToTranscript(String),
    /// 返回调用方
    SurfaceToCaller,
    /// 终止本轮，不写检查点
    AbortTurn,
}

impl OrchestratorError {
    pub fn severity(&self) -> Severity {
        match self {
            OrchestratorError::ActionHandlerFailure(_)
            | OrchestratorError::MissingContext(_)
            | OrchestratorError::Timeout(_) => Severity::Recoverable,
            OrchestratorError::ModelUnavailable(_)
            | OrchestratorError::SessionBusy(_)
            | OrchestratorError::NotFound(_)
            | OrchestratorError::NoPendingAction(_)
            | OrchestratorError::ApprovalPending(_)
            | OrchestratorError::Cancelled => Severity::Caller,
            OrchestratorError::Store(StoreError::NotFound(_)) => Severity::Caller,
            OrchestratorError::UnknownAction(_)
            | OrchestratorError::EmptyStackUnderflow
            | OrchestratorError::StackOverflow(_)
            | OrchestratorError::NoValidResponse { .. }
            | OrchestratorError::InvalidRoute { .. }
            | OrchestratorError::StepLimitExceeded(_)
            | OrchestratorError::DelegationLoop(_)
            | OrchestratorError::Store(_)
            | OrchestratorError::Setup(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// 面向终端用户的文案：结构性错误不暴露细节
    pub fn user_message(&self) -> String {
        match self.severity() {
            Severity::Fatal => "internal error, please retry".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_errors_are_fatal() {
        assert!(OrchestratorError::EmptyStackUnderflow.is_fatal());
        assert!(OrchestratorError::UnknownAction("fly_me".into()).is_fatal());
        assert!(OrchestratorError::InvalidRoute {
            handler: HandlerKind::BookHotel,
            reason: "x".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_fatal_user_message_is_generic() {
        let err = OrchestratorError::InvalidRoute {
            handler: HandlerKind::Primary,
            reason: "cancel_ticket not permitted".into(),
        };
        assert_eq!(err.user_message(), "internal error, please retry");
    }

    #[test]
    fn test_caller_errors_keep_details() {
        let err = OrchestratorError::SessionBusy("s1".into());
        assert_eq!(err.severity(), Severity::Caller);
        assert!(err.user_message().contains("s1"));
    }

    #[test]
    fn test_store_not_found_is_caller_error() {
        let err = OrchestratorError::from(StoreError::NotFound("s1".into()));
        assert_eq!(err.severity(), Severity::Caller);
    }
}

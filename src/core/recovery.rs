//! 错误恢复引擎
//!
//! 根据 OrchestratorError 的严重级别返回 RecoveryAction：可恢复错误写回对话让助手修正，
//! 调用方错误原样返回，结构性错误终止本轮。

use crate::core::{OrchestratorError, RecoveryAction, Severity};

/// 工具失败写回对话时的统一格式
pub fn transcript_error(err: &OrchestratorError) -> String {
    let reason = match err {
        OrchestratorError::ActionHandlerFailure(msg) => msg.clone(),
        other => other.to_string(),
    };
    format!("Error: {reason}\n please fix your mistakes.")
}

/// 语义化错误恢复：将错误映射为编排器可执行的动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &OrchestratorError) -> RecoveryAction {
        match err.severity() {
            Severity::Recoverable => RecoveryAction::AppendToTranscript(transcript_error(err)),
            Severity::Caller => RecoveryAction::SurfaceToCaller,
            Severity::Fatal => RecoveryAction::AbortTurn,
        }
    }
}

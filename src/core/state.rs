//! 状态定义：会话阶段、阶段迁移校验、调用方可见的回复
//!
//! SessionPhase 对应编排状态机的各个阶段；只有 SuspendedForApproval 会跨越进程边界
//! （通过检查点）。TurnMachine 在每次迁移时校验合法性，非法迁移视为编排器自身的缺陷。

use std::fmt;

use serde::Serialize;

use crate::dialog::HandlerKind;
use crate::session::ActionRequest;

/// 编排阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    AwaitingModel,
    ExecutingSafeActions,
    SuspendedForApproval,
    Delegating,
    Escalating,
    TurnComplete,
}

impl SessionPhase {
    /// 迁移表
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::{
            AwaitingModel, Delegating, Escalating, ExecutingSafeActions, Idle,
            SuspendedForApproval, TurnComplete,
        };
        matches!(
            (self, next),
            (Idle, AwaitingModel)
                // 审批恢复：先执行被批准的动作，再回到模型
                | (Idle, ExecutingSafeActions)
                | (AwaitingModel, ExecutingSafeActions)
                | (AwaitingModel, SuspendedForApproval)
                | (AwaitingModel, Delegating)
                | (AwaitingModel, Escalating)
                | (AwaitingModel, TurnComplete)
                | (ExecutingSafeActions, AwaitingModel)
                // 排队的批次中又遇到敏感动作
                | (ExecutingSafeActions, SuspendedForApproval)
                | (Delegating, AwaitingModel)
                | (Escalating, AwaitingModel)
                | (SuspendedForApproval, Idle)
                | (TurnComplete, Idle)
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::AwaitingModel => "awaiting_model",
            SessionPhase::ExecutingSafeActions => "executing_safe_actions",
            SessionPhase::SuspendedForApproval => "suspended_for_approval",
            SessionPhase::Delegating => "delegating",
            SessionPhase::Escalating => "escalating",
            SessionPhase::TurnComplete => "turn_complete",
        };
        f.write_str(s)
    }
}

/// 单次调用内的阶段机
#[derive(Debug)]
pub struct TurnMachine {
    phase: SessionPhase,
    trail: Vec<SessionPhase>,
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            trail: vec![SessionPhase::Idle],
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// 本次调用经历过的阶段（测试与日志用）
    pub fn trail(&self) -> &[SessionPhase] {
        &self.trail
    }

    /// 迁移到下一阶段；非法迁移返回 Err(当前阶段)
    pub fn advance(&mut self, next: SessionPhase) -> Result<(), SessionPhase> {
        if !self.phase.can_transition_to(next) {
            return Err(self.phase);
        }
        tracing::trace!(from = %self.phase, to = %next, "phase");
        self.phase = next;
        self.trail.push(next);
        Ok(())
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 调用方看到的一轮结果
#[derive(Clone, Debug, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    /// 助手最后一条回复文本（挂起时为请求审批前助手的说明，可能为空）
    pub assistant_text: String,
    pub awaiting_approval: bool,
    pub pending_action: Option<ActionRequest>,
    /// 本轮结束时栈顶的助手
    pub active_handler: HandlerKind,
}

/// 人工审批结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject { reason: String },
}

impl ApprovalDecision {
    /// 对应 submitApproval(approved, rejectionReason?)
    pub fn from_flag(approved: bool, reason: Option<String>) -> Self {
        if approved {
            ApprovalDecision::Approve
        } else {
            ApprovalDecision::Reject {
                reason: reason.unwrap_or_default(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_machine_happy_path() {
        let mut m = TurnMachine::new();
        m.advance(SessionPhase::AwaitingModel).unwrap();
        m.advance(SessionPhase::ExecutingSafeActions).unwrap();
        m.advance(SessionPhase::AwaitingModel).unwrap();
        m.advance(SessionPhase::TurnComplete).unwrap();
        m.advance(SessionPhase::Idle).unwrap();
        assert_eq!(m.trail().len(), 6);
    }

    #[test]
    fn test_turn_machine_rejects_skipping_model() {
        let mut m = TurnMachine::new();
        assert_eq!(m.advance(SessionPhase::Delegating), Err(SessionPhase::Idle));
        assert_eq!(m.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_suspended_only_returns_to_idle() {
        assert!(SessionPhase::SuspendedForApproval.can_transition_to(SessionPhase::Idle));
        assert!(!SessionPhase::SuspendedForApproval.can_transition_to(SessionPhase::AwaitingModel));
    }

    #[test]
    fn test_approval_from_flag() {
        assert_eq!(ApprovalDecision::from_flag(true, None), ApprovalDecision::Approve);
        assert_eq!(
            ApprovalDecision::from_flag(false, Some("changed my mind".into())),
            ApprovalDecision::Reject { reason: "changed my mind".into() }
        );
    }
}

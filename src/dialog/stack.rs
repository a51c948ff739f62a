//! 委派栈：栈底恒为 Primary，栈顶为当前活跃角色

use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;
use crate::dialog::HandlerKind;

/// 委派栈；反序列化时同样校验栈底为 Primary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<HandlerKind>", into = "Vec<HandlerKind>")]
pub struct DelegationStack {
    frames: Vec<HandlerKind>,
}

impl DelegationStack {
    pub fn new() -> Self {
        Self {
            frames: vec![HandlerKind::Primary],
        }
    }

    pub fn push(&mut self, kind: HandlerKind) -> Result<(), OrchestratorError> {
        if kind == HandlerKind::Primary {
            return Err(OrchestratorError::InvalidRoute {
                handler: self.top(),
                reason: "cannot delegate to the primary assistant".to_string(),
            });
        }
        self.frames.push(kind);
        Ok(())
    }

    /// 弹出栈顶并返回；仅剩 Primary 时失败
    pub fn pop(&mut self) -> Result<HandlerKind, OrchestratorError> {
        if self.frames.len() <= 1 {
            return Err(OrchestratorError::EmptyStackUnderflow);
        }
        self.frames
            .pop()
            .ok_or(OrchestratorError::EmptyStackUnderflow)
    }

    pub fn top(&self) -> HandlerKind {
        self.frames.last().copied().unwrap_or(HandlerKind::Primary)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_delegated(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn frames(&self) -> &[HandlerKind] {
        &self.frames
    }
}

impl Default for DelegationStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Vec<HandlerKind>> for DelegationStack {
    type Error = String;

    fn try_from(frames: Vec<HandlerKind>) -> Result<Self, Self::Error> {
        match frames.first() {
            Some(HandlerKind::Primary) => {}
            Some(other) => return Err(format!("delegation stack must start with primary, found {other}")),
            None => return Err("delegation stack is empty".to_string()),
        }
        if frames.iter().skip(1).any(|k| *k == HandlerKind::Primary) {
            return Err("primary may only appear at the bottom of the delegation stack".to_string());
        }
        Ok(Self { frames })
    }
}

impl From<DelegationStack> for Vec<HandlerKind> {
    fn from(stack: DelegationStack) -> Self {
        stack.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stack_is_primary() {
        let stack = DelegationStack::new();
        assert_eq!(stack.top(), HandlerKind::Primary);
        assert_eq!(stack.depth(), 1);
        assert!(!stack.is_delegated());
    }

    #[test]
    fn test_push_pop() {
        let mut stack = DelegationStack::new();
        stack.push(HandlerKind::UpdateFlight).unwrap();
        assert_eq!(stack.top(), HandlerKind::UpdateFlight);
        assert_eq!(stack.pop().unwrap(), HandlerKind::UpdateFlight);
        assert_eq!(stack.top(), HandlerKind::Primary);
    }

    #[test]
    fn test_pop_at_primary_underflows() {
        let mut stack = DelegationStack::new();
        assert!(matches!(stack.pop(), Err(OrchestratorError::EmptyStackUnderflow)));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_push_primary_rejected() {
        let mut stack = DelegationStack::new();
        assert!(stack.push(HandlerKind::Primary).is_err());
    }

    #[test]
    fn test_deserialize_rejects_invalid_stacks() {
        assert!(serde_json::from_str::<DelegationStack>("[]").is_err());
        assert!(serde_json::from_str::<DelegationStack>("[\"book_hotel\"]").is_err());
        let stack: DelegationStack =
            serde_json::from_str("[\"primary\",\"book_hotel\"]").unwrap();
        assert_eq!(stack.top(), HandlerKind::BookHotel);
    }
}

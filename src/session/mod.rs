//! 会话数据与检查点存储
//!
//! - **message**: Message / ActionRequest / Role
//! - **checkpoint**: Checkpoint、CheckpointStore trait、内存实现、历史流
//! - **sqlite**: SQLite 检查点存储（跨进程恢复）

pub mod checkpoint;
pub mod message;
pub mod sqlite;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dialog::DelegationStack;

pub use checkpoint::{
    history, Boundary, Checkpoint, CheckpointStore, InMemoryCheckpointStore, StoreError,
};
pub use message::{ActionRequest, Content, ContentPart, Message, Role};
pub use sqlite::SqliteCheckpointStore;

/// 一个会话的完整状态
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub message_log: Vec<Message>,
    pub delegation_stack: DelegationStack,
    #[serde(default)]
    pub user_context: BTreeMap<String, Value>,
    #[serde(default)]
    pub pending_action: Option<ActionRequest>,
    /// 与 pending_action 同批、尚未处理的请求
    #[serde(default)]
    pub queued_actions: Vec<ActionRequest>,
    /// 最近一次检查点的序号；0 表示从未保存
    #[serde(default)]
    pub version: u64,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_log: Vec::new(),
            delegation_stack: DelegationStack::new(),
            user_context: BTreeMap::new(),
            pending_action: None,
            queued_actions: Vec::new(),
            version: 0,
        }
    }

    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.user_context = context;
        self
    }

    pub fn is_suspended(&self) -> bool {
        self.pending_action.is_some()
    }

    /// 最后一条助手消息的文本
    pub fn last_assistant_text(&self) -> String {
        self.message_log
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .unwrap_or_default()
    }

    pub fn append(&mut self, message: Message) {
        self.message_log.push(message);
    }

    /// 生成下一个检查点并推进 version
    pub fn checkpoint(&mut self, boundary: Boundary) -> Checkpoint {
        self.version += 1;
        Checkpoint::new(self.version, boundary, self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::HandlerKind;

    #[test]
    fn test_checkpoint_bumps_version() {
        let mut session = Session::new("s1");
        let cp1 = session.checkpoint(Boundary::TurnComplete);
        let cp2 = session.checkpoint(Boundary::TurnComplete);
        assert_eq!((cp1.seq, cp2.seq), (1, 2));
        assert_eq!(cp2.state.version, 2);
        assert_eq!(session.version, 2);
    }

    #[test]
    fn test_session_serde_round_trip() {
        let mut session = Session::new("s1");
        session.delegation_stack.push(HandlerKind::UpdateFlight).unwrap();
        session.append(Message::user("cancel my ticket"));
        session.pending_action = Some(ActionRequest::from_json(
            "cancel_ticket",
            serde_json::json!({"ticket_no": "7240005432906569"}),
        ));
        session
            .user_context
            .insert("passenger_id".into(), Value::String("3442 587242".into()));
        let bytes = serde_json::to_vec(&session).unwrap();
        let back: Session = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, session);
        assert_eq!(serde_json::to_vec(&back).unwrap(), bytes);
    }

    #[test]
    fn test_last_assistant_text() {
        let mut session = Session::new("s1");
        session.append(Message::user("hi"));
        session.append(Message::assistant("hello"));
        session.append(Message::tool_result("c", "x"));
        assert_eq!(session.last_assistant_text(), "hello");
    }
}

//! Mock 推理后端（用于测试与离线运行，无需 API）
//!
//! - MockReasoner：回显最后一条用户消息，始终直接回复（不调用动作）
//! - ScriptedReasoner：按预置脚本依次返回，并记录每次调用看到的角色与日志长度

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::dialog::{HandlerContext, HandlerKind};
use crate::llm::{LlmError, Reasoner};
use crate::session::{Message, Role};

/// 回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockReasoner;

#[async_trait]
impl Reasoner for MockReasoner {
    async fn invoke(&self, messages: &[Message], context: &HandlerContext) -> Result<Message, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "(no input)".to_string());
        Ok(Message::assistant(format!(
            "Echo from Mock ({}): {}",
            context.kind.display_name(),
            last_user
        )))
    }
}

/// 一次调用的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub handler: HandlerKind,
    pub log_len: usize,
}

/// 按脚本返回预置回复
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<Message, LlmError>>>,
    calls: Mutex<Vec<ScriptedCall>>,
    delay: Option<Duration>,
}

impl ScriptedReasoner {
    pub fn new(responses: Vec<Message>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(results: Vec<Result<Message, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 每次调用前等待，模拟慢后端
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 追加脚本（多轮测试中按轮补充）
    pub fn push(&self, message: Message) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(message));
        }
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn invoked_handlers(&self) -> Vec<HandlerKind> {
        self.calls().into_iter().map(|c| c.handler).collect()
    }

    pub fn seen_log_lengths(&self) -> Vec<usize> {
        self.calls().into_iter().map(|c| c.log_len).collect()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn invoke(&self, messages: &[Message], context: &HandlerContext) -> Result<Message, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ScriptedCall {
                handler: context.kind,
                log_len: messages.len(),
            });
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::InvalidResponse("script lock poisoned".to_string()))?
            .pop_front();
        next.unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())))
    }
}

//! 推理能力抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / 脚本化）实现 Reasoner：给定完整对话日志与角色上下文，
//! 返回一条助手消息（文本或动作请求）。失败不在此层重试。

use async_trait::async_trait;
use thiserror::Error;

use crate::dialog::HandlerContext;
use crate::session::Message;

#[derive(Error, Debug)]
pub enum LlmError {
    /// 网络 / 鉴权 / 限流等，编排器映射为 ModelUnavailable
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// 推理 trait：一次调用产出一条助手消息
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn invoke(&self, messages: &[Message], context: &HandlerContext) -> Result<Message, LlmError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

//! 推理层：Reasoner 抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_reasoner, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::{MockReasoner, ScriptedCall, ScriptedReasoner};
pub use openai::{OpenAiReasoner, TokenUsage};
pub use traits::{LlmError, Reasoner};

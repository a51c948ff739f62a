//! Concierge - 航空客服多助手对话编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器状态机、错误与恢复、会话监管、构建器
//! - **dialog**: 动作目录、助手角色、委派栈、单步推理、路由、提示词、事件
//! - **llm**: 推理后端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）
//! - **observability**: tracing 日志初始化
//! - **session**: 消息、会话状态与检查点存储（内存 / SQLite）
//! - **tools**: 动作处理器注册表、执行器（超时 + 审计）、旅行动作

pub mod config;
pub mod core;
pub mod dialog;
pub mod llm;
pub mod observability;
pub mod session;
pub mod tools;

pub use crate::core::{ApprovalDecision, Orchestrator, OrchestratorBuilder, OrchestratorError, TurnReply};
pub use crate::dialog::{DialogEvent, HandlerKind};

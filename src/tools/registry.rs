//! 动作处理器注册表
//!
//! 所有外部动作实现 ActionHandler（kind / description / parameters_schema / invoke），
//! 由 ActionRegistry 按 ActionKind 注册与查找；ActionExecutor 在调用时加超时并统一转 OrchestratorError。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::dialog::ActionKind;
use crate::session::Session;

#[derive(Error, Debug)]
pub enum ActionError {
    /// 调用方上下文缺少必需字段（如 passenger_id）
    #[error("missing context: {0}")]
    MissingContext(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// 动作调用时可见的会话级身份信息
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub session_id: String,
    pub values: BTreeMap<String, Value>,
}

impl CallerContext {
    pub fn new(session_id: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            session_id: session_id.into(),
            values,
        }
    }

    pub fn from_session(session: &Session) -> Self {
        Self::new(session.session_id.clone(), session.user_context.clone())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ActionError> {
        self.get_str(key)
            .ok_or_else(|| ActionError::MissingContext(format!("No {key} configured.")))
    }
}

/// 把 JSON 参数解析为具体的参数结构
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ActionError> {
    serde_json::from_value(args).map_err(|e| ActionError::InvalidArguments(e.to_string()))
}

/// 结果序列化为 JSON 文本写回对话
pub fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String, ActionError> {
    serde_json::to_string(value).map_err(|e| ActionError::Failed(e.to_string()))
}

/// 外部动作处理器
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// 动作描述（供推理后端理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn invoke(&self, args: Value, caller: &CallerContext) -> Result<String, ActionError>;
}

/// 每轮开始时刷新会话的 user_context（如乘客当前机票）
#[async_trait]
pub trait UserContextProvider: Send + Sync {
    async fn refresh(&self, session: &Session) -> Result<BTreeMap<String, Value>, ActionError>;
}

/// 按 ActionKind 存储 Arc<dyn ActionHandler>
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: impl ActionHandler + 'static) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        let mut kinds: Vec<ActionKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        fn kind(&self) -> ActionKind {
            ActionKind::LookupPolicy
        }

        fn description(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, args: Value, _caller: &CallerContext) -> Result<String, ActionError> {
            Ok(args.to_string())
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ActionRegistry::new();
        registry.register(Echo);
        assert!(registry.contains(ActionKind::LookupPolicy));
        assert!(registry.get(ActionKind::BookHotel).is_none());
        assert_eq!(registry.kinds(), vec![ActionKind::LookupPolicy]);
    }

    #[test]
    fn test_require_str() {
        let mut values = BTreeMap::new();
        values.insert("passenger_id".to_string(), Value::String("3442 587242".into()));
        let caller = CallerContext::new("s1", values);
        assert_eq!(caller.require_str("passenger_id").unwrap(), "3442 587242");
        let err = caller.require_str("email").unwrap_err();
        assert!(matches!(err, ActionError::MissingContext(m) if m == "No email configured."));
    }
}

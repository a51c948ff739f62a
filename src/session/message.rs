//! 对话消息与动作请求
//!
//! Message 一经追加即不可变；tool 消息通过 correlation_id 回应某个 ActionRequest。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// 结构化内容片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Data { value: Value },
}

/// 消息内容：纯文本或片段列表
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// 拼接全部文本片段
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Data { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

/// 推理后端提出的一次动作调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    pub correlation_id: String,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            correlation_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// 测试与脚本化推理中常用：从 json! 对象构造
    pub fn from_json(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// 对话日志中的一条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_requests: Vec<ActionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Message {
    fn build(role: Role, content: Content) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            action_requests: Vec::new(),
            correlation_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::build(Role::User, Content::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::build(Role::Assistant, Content::Text(text.into()))
    }

    pub fn assistant_with_actions(text: impl Into<String>, requests: Vec<ActionRequest>) -> Self {
        let mut msg = Self::assistant(text);
        msg.action_requests = requests;
        msg
    }

    pub fn assistant_parts(parts: Vec<ContentPart>) -> Self {
        Self::build(Role::Assistant, Content::Parts(parts))
    }

    /// 回应某个动作请求的 tool 消息
    pub fn tool_result(correlation_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut msg = Self::build(Role::Tool, Content::Text(text.into()));
        msg.correlation_id = Some(correlation_id.into());
        msg
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }

    pub fn has_action_requests(&self) -> bool {
        !self.action_requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_carries_correlation() {
        let msg = Message::tool_result("call_1", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.correlation_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_parts_text_skips_data() {
        let msg = Message::assistant_parts(vec![
            ContentPart::Text { text: "Hello ".into() },
            ContentPart::Data { value: serde_json::json!({"x": 1}) },
            ContentPart::Text { text: "there".into() },
        ]);
        assert_eq!(msg.text(), "Hello there");
    }

    #[test]
    fn test_action_request_ids_are_unique() {
        let a = ActionRequest::from_json("search_flights", serde_json::json!({}));
        let b = ActionRequest::from_json("search_flights", serde_json::json!({}));
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(a.correlation_id.starts_with("call_"));
    }

    #[test]
    fn test_message_json_omits_empty_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert!(json.get("action_requests").is_none());
        assert!(json.get("correlation_id").is_none());
        assert_eq!(json["content"], "hi");
    }
}

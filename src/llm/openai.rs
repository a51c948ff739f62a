//! OpenAI 兼容 API 推理后端（function calling）
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）：系统提示 + 对话日志 + 当前角色可用动作（tools），
//! 返回的 tool_calls 转为 ActionRequest。支持 DeepSeek、OpenAI、自建代理等。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::dialog::HandlerContext;
use crate::llm::{LlmError, Reasoner};
use crate::session::{ActionRequest, Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 请求构造失败（本地数据问题），不是后端不可用
fn build_error(e: OpenAIError) -> LlmError {
    LlmError::InvalidResponse(format!("request build failed: {e}"))
}

/// OpenAI 兼容后端：持有 Client 与 model 名
pub struct OpenAiReasoner {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiReasoner {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client: Client::with_config(config).with_http_client(http),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 系统提示在前，其后是完整对话日志；tool 消息按 correlation_id 对应 tool_call_id
    fn to_openai_messages(
        context: &HandlerContext,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(context.system_prompt.clone())
                .build()
                .map_err(build_error)?,
        ));
        for m in messages {
            let message = match m.role {
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.text())
                        .build()
                        .map_err(build_error)?,
                ),
                Role::Tool => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(m.text())
                        .tool_call_id(m.correlation_id.clone().unwrap_or_default())
                        .build()
                        .map_err(build_error)?,
                ),
                Role::Assistant => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    let text = m.text();
                    if !text.is_empty() {
                        args.content(text);
                    }
                    if m.has_action_requests() {
                        let calls: Vec<ChatCompletionMessageToolCalls> = m
                            .action_requests
                            .iter()
                            .map(|r| {
                                ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                                    id: r.correlation_id.clone(),
                                    function: FunctionCall {
                                        name: r.name.clone(),
                                        arguments: r.arguments_value().to_string(),
                                    },
                                })
                            })
                            .collect();
                        args.tool_calls(calls);
                    }
                    ChatCompletionRequestMessage::Assistant(args.build().map_err(build_error)?)
                }
            };
            out.push(message);
        }
        Ok(out)
    }

    fn to_openai_tools(context: &HandlerContext) -> Result<Vec<ChatCompletionTools>, LlmError> {
        context
            .actions
            .iter()
            .map(|spec| {
                let function = FunctionObjectArgs::default()
                    .name(spec.name.clone())
                    .description(spec.description.clone())
                    .parameters(spec.parameters.clone())
                    .build()
                    .map_err(build_error)?;
                Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
            })
            .collect()
    }

    /// tool_calls 缺失或为 null 时视为纯文本回复
    fn from_response(message: ChatCompletionResponseMessage) -> Result<Message, LlmError> {
        let calls = message.tool_calls.unwrap_or_default();
        let mut requests = Vec::with_capacity(calls.len());
        for call in calls {
            let ChatCompletionMessageToolCalls::Function(call) = call else {
                return Err(LlmError::InvalidResponse("unsupported tool call type".to_string()));
            };
            let arguments: Map<String, Value> = if call.function.arguments.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|e| {
                    LlmError::InvalidResponse(format!(
                        "arguments of {} are not a JSON object: {e}",
                        call.function.name
                    ))
                })?
            };
            requests.push(ActionRequest::new(call.function.name, arguments).with_correlation_id(call.id));
        }
        Ok(Message::assistant_with_actions(
            message.content.unwrap_or_default(),
            requests,
        ))
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn invoke(&self, messages: &[Message], context: &HandlerContext) -> Result<Message, LlmError> {
        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(&self.model)
            .messages(Self::to_openai_messages(context, messages)?);
        let tools = Self::to_openai_tools(context)?;
        if !tools.is_empty() {
            request.tools(tools);
        }
        let request = request.build().map_err(build_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| match e {
                OpenAIError::JSONDeserialize(..) => LlmError::InvalidResponse(e.to_string()),
                other => LlmError::Unavailable(other.to_string()),
            })?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices".to_string()))?;
        Self::from_response(choice.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::HandlerKind;
    use crate::tools::ActionSpec;
    use serde_json::json;

    fn context() -> HandlerContext {
        HandlerContext {
            kind: HandlerKind::BookHotel,
            system_prompt: "You are a hotel assistant.".into(),
            actions: vec![ActionSpec {
                name: "search_hotels".into(),
                description: "Search hotels".into(),
                parameters: json!({"type": "object"}),
            }],
        }
    }

    fn response(raw: Value) -> ChatCompletionResponseMessage {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_messages_keep_tool_correlation() {
        let call = ActionRequest::from_json("search_hotels", json!({"location": "Zurich"}))
            .with_correlation_id("call_1");
        let log = vec![
            Message::user("hotel in zurich"),
            Message::assistant_with_actions("", vec![call]),
            Message::tool_result("call_1", "[]"),
        ];
        let messages = OpenAiReasoner::to_openai_messages(&context(), &log).unwrap();
        let wire = serde_json::to_value(&messages).unwrap();
        assert_eq!(wire.as_array().unwrap().len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["name"], "search_hotels");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_tools_from_action_specs() {
        let tools = OpenAiReasoner::to_openai_tools(&context()).unwrap();
        let wire = serde_json::to_value(&tools).unwrap();
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "search_hotels");
    }

    #[test]
    fn test_response_tool_calls_become_requests() {
        let msg = OpenAiReasoner::from_response(response(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_9",
                "type": "function",
                "function": {"name": "book_hotel", "arguments": "{\"hotel_id\": 3}"}
            }]
        })))
        .unwrap();
        assert_eq!(msg.action_requests[0].correlation_id, "call_9");
        assert_eq!(msg.action_requests[0].arguments["hotel_id"], 3);
    }

    #[test]
    fn test_null_tool_calls_is_plain_text() {
        let msg = OpenAiReasoner::from_response(response(json!({
            "role": "assistant",
            "content": "Which city?",
            "tool_calls": null
        })))
        .unwrap();
        assert!(!msg.has_action_requests());
        assert_eq!(msg.text(), "Which city?");
    }

    #[test]
    fn test_token_usage_accumulates() {
        let reasoner = OpenAiReasoner::new(None, "gpt-4o-mini", Some("sk-test"), Duration::from_secs(5));
        reasoner.usage.add(120, 30);
        reasoner.usage.add(80, 20);
        assert_eq!(reasoner.token_usage(), (200, 50, 250));
    }

    #[test]
    fn test_bad_arguments_rejected() {
        let result = OpenAiReasoner::from_response(response(json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{"id": "c", "type": "function", "function": {"name": "book_hotel", "arguments": "not json"}}]
        })));
        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }
}

//! 单步推理：调用当前角色的推理后端，空回复时附加纠正提示重试（有上限）
//!
//! 纠正提示只加在本地日志副本上，不进入会话的持久日志。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;
use crate::dialog::events::DialogEvent;
use crate::dialog::HandlerContext;
use crate::llm::Reasoner;
use crate::session::{Content, ContentPart, Message, Session};

/// 空回复时追加的纠正消息
pub const CORRECTIVE_PROMPT: &str = "Respond with a real output.";

/// 回复是否可用
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseValidity {
    Valid,
    Empty,
}

impl ResponseValidity {
    pub fn of(message: &Message) -> Self {
        if message.has_action_requests() {
            return ResponseValidity::Valid;
        }
        let empty = match &message.content {
            Content::Text(text) => text.trim().is_empty(),
            // 结构化内容只看第一段
            Content::Parts(parts) => match parts.first() {
                Some(ContentPart::Text { text }) => text.trim().is_empty(),
                _ => true,
            },
        };
        if empty {
            ResponseValidity::Empty
        } else {
            ResponseValidity::Valid
        }
    }
}

pub struct TurnExecutor {
    reasoner: Arc<dyn Reasoner>,
    max_attempts: usize,
    timeout: Duration,
    events: Option<mpsc::UnboundedSender<DialogEvent>>,
}

impl TurnExecutor {
    pub fn new(reasoner: Arc<dyn Reasoner>, max_attempts: usize, timeout: Duration) -> Self {
        Self {
            reasoner,
            max_attempts: max_attempts.max(1),
            timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<mpsc::UnboundedSender<DialogEvent>>) -> Self {
        self.events = events;
        self
    }

    pub fn reasoner(&self) -> &Arc<dyn Reasoner> {
        &self.reasoner
    }

    /// 取得当前角色的一条有效回复
    pub async fn execute(
        &self,
        context: &HandlerContext,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Message, OrchestratorError> {
        let handler = context.kind;
        let mut log: Vec<Message> = session.message_log.clone();

        for attempt in 1..=self.max_attempts {
            let call = self.reasoner.invoke(&log, context);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                r = tokio::time::timeout(self.timeout, call) => r,
            };
            let message = match outcome {
                Err(_) => {
                    return Err(OrchestratorError::Timeout(format!(
                        "{handler} did not respond within {}s",
                        self.timeout.as_secs()
                    )))
                }
                Ok(Err(e)) => return Err(OrchestratorError::ModelUnavailable(e.to_string())),
                Ok(Ok(message)) => message,
            };

            match ResponseValidity::of(&message) {
                ResponseValidity::Valid => {
                    tracing::debug!(%handler, attempt, requests = message.action_requests.len(), "model responded");
                    return Ok(message);
                }
                ResponseValidity::Empty => {
                    tracing::warn!(%handler, attempt, "empty model response, retrying with corrective prompt");
                    if let Some(tx) = &self.events {
                        let _ = tx.send(DialogEvent::ModelRetry { handler, attempt });
                    }
                    log.push(Message::user(CORRECTIVE_PROMPT));
                }
            }
        }

        Err(OrchestratorError::NoValidResponse {
            handler,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::HandlerKind;
    use crate::llm::{LlmError, ScriptedReasoner};
    use crate::session::ActionRequest;

    fn context() -> HandlerContext {
        HandlerContext {
            kind: HandlerKind::Primary,
            system_prompt: String::new(),
            actions: Vec::new(),
        }
    }

    #[test]
    fn test_validity() {
        assert_eq!(ResponseValidity::of(&Message::assistant("")), ResponseValidity::Empty);
        assert_eq!(ResponseValidity::of(&Message::assistant("   ")), ResponseValidity::Empty);
        assert_eq!(ResponseValidity::of(&Message::assistant("hi")), ResponseValidity::Valid);
        let call = ActionRequest::from_json("search_flights", serde_json::json!({}));
        assert_eq!(
            ResponseValidity::of(&Message::assistant_with_actions("", vec![call])),
            ResponseValidity::Valid
        );
        let parts = Message::assistant_parts(vec![ContentPart::Data { value: serde_json::json!(1) }]);
        assert_eq!(ResponseValidity::of(&parts), ResponseValidity::Empty);
    }

    #[tokio::test]
    async fn test_retries_empty_then_succeeds() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Message::assistant(""),
            Message::assistant("Here you go."),
        ]));
        let exec = TurnExecutor::new(reasoner.clone(), 3, Duration::from_secs(5));
        let mut session = Session::new("s1");
        session.message_log.push(Message::user("hello"));
        let msg = exec.execute(&context(), &session, &CancellationToken::new()).await.unwrap();
        assert_eq!(msg.text(), "Here you go.");
        // 第二次调用看到了纠正提示，但会话日志未被修改
        let seen = reasoner.seen_log_lengths();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(session.message_log.len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_retry() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![
            Message::assistant(""),
            Message::assistant(""),
            Message::assistant(""),
        ]));
        let exec = TurnExecutor::new(reasoner, 3, Duration::from_secs(5));
        let err = exec
            .execute(&context(), &Session::new("s1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoValidResponse { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_backend_failure_is_model_unavailable() {
        let reasoner = Arc::new(ScriptedReasoner::from_results(vec![Err(LlmError::Unavailable(
            "503".into(),
        ))]));
        let exec = TurnExecutor::new(reasoner, 3, Duration::from_secs(5));
        let err = exec
            .execute(&context(), &Session::new("s1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_response() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![Message::assistant("late")]).with_delay(Duration::from_secs(5)));
        let exec = TurnExecutor::new(reasoner, 3, Duration::from_secs(10));
        let token = CancellationToken::new();
        token.cancel();
        let err = exec.execute(&context(), &Session::new("s1"), &token).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let reasoner = Arc::new(ScriptedReasoner::new(vec![Message::assistant("late")]).with_delay(Duration::from_millis(200)));
        let exec = TurnExecutor::new(reasoner, 3, Duration::from_millis(20));
        let err = exec
            .execute(&context(), &Session::new("s1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
    }
}

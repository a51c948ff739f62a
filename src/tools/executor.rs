//! 动作执行器
//!
//! 持有 ActionRegistry 与全局超时，execute(request, caller) 在超时内调用处理器，
//! 超时或失败时转为 OrchestratorError（Timeout / MissingContext / ActionHandlerFailure）；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;
use crate::dialog::ActionKind;
use crate::session::ActionRequest;
use crate::tools::{ActionError, ActionRegistry, ActionSpec, CallerContext};

pub struct ActionExecutor {
    registry: ActionRegistry,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(registry: ActionRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ActionRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// 执行一个动作请求；输出 JSON 审计日志
    pub async fn execute(
        &self,
        request: &ActionRequest,
        caller: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<String, OrchestratorError> {
        let name = request.name.as_str();
        let handler = ActionKind::from_name(name)
            .and_then(|kind| self.registry.get(kind))
            .ok_or_else(|| OrchestratorError::ActionHandlerFailure(format!("No handler registered for {name}")))?;

        let start = Instant::now();
        let call = handler.invoke(request.arguments_value(), caller);
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            r = timeout(self.timeout, call) => r,
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "session_id": caller.session_id,
            "action": name,
            "correlation_id": request.correlation_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&request.arguments_value()),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(ActionError::MissingContext(m))) => Err(OrchestratorError::MissingContext(m)),
            Ok(Err(e)) => Err(OrchestratorError::ActionHandlerFailure(e.to_string())),
            Err(_) => Err(OrchestratorError::Timeout(format!(
                "{name} did not complete within {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    pub fn spec_for(&self, kind: ActionKind) -> Option<ActionSpec> {
        self.registry.get(kind).map(|h| ActionSpec {
            name: kind.name().to_string(),
            description: h.description().to_string(),
            parameters: h.parameters_schema(),
        })
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

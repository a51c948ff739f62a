//! 路由：根据当前角色与最后一条助手消息决定下一步迁移
//!
//! 纯函数，无隐藏状态：相同输入总得到相同的 Transition。

use std::sync::Arc;

use crate::core::OrchestratorError;
use crate::dialog::catalog::{ActionCatalog, ActionKind, Control, SideEffect};
use crate::dialog::HandlerKind;
use crate::session::{ActionRequest, Message};

/// 路由结果
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    /// 助手直接回复用户
    EndTurn,
    /// 回退到上一级；request 为触发的 CompleteOrEscalate 请求
    Escalate { request: Option<ActionRequest> },
    ExecuteSafe(Vec<ActionRequest>),
    SuspendForApproval(Vec<ActionRequest>),
    Delegate {
        target: HandlerKind,
        request: ActionRequest,
        /// 委派请求中的 request 字段
        note: String,
    },
}

impl Transition {
    pub fn label(&self) -> &'static str {
        match self {
            Transition::EndTurn => "end_turn",
            Transition::Escalate { .. } => "escalate",
            Transition::ExecuteSafe(_) => "execute_safe",
            Transition::SuspendForApproval(_) => "suspend_for_approval",
            Transition::Delegate { .. } => "delegate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Router {
    catalog: Arc<ActionCatalog>,
}

impl Router {
    pub fn new(catalog: Arc<ActionCatalog>) -> Self {
        Self { catalog }
    }

    pub fn route(&self, handler: HandlerKind, message: &Message) -> Result<Transition, OrchestratorError> {
        let requests = &message.action_requests;

        if handler == HandlerKind::Primary {
            for request in requests {
                let kind = self.catalog.resolve(&request.name)?;
                if let Some(Control::Delegate(target)) = kind.control() {
                    let note = request.argument_str("request").unwrap_or_default().to_string();
                    return Ok(Transition::Delegate {
                        target,
                        request: request.clone(),
                        note,
                    });
                }
            }
        }

        if requests.is_empty() {
            return Ok(Transition::EndTurn);
        }

        if let Some(request) = requests
            .iter()
            .find(|r| r.name == ActionKind::CompleteOrEscalate.name())
        {
            return Ok(Transition::Escalate {
                request: Some(request.clone()),
            });
        }

        let mut sensitive = false;
        for request in requests {
            match self.catalog.classify_for(handler, &request.name)? {
                Some(SideEffect::Safe) => {}
                Some(SideEffect::Sensitive) => sensitive = true,
                // 包括专项助手调用委派动作
                None => {
                    return Err(OrchestratorError::InvalidRoute {
                        handler,
                        reason: format!("{} is not permitted here", request.name),
                    })
                }
            }
        }

        if sensitive {
            Ok(Transition::SuspendForApproval(requests.clone()))
        } else {
            Ok(Transition::ExecuteSafe(requests.clone()))
        }
    }
}

//! 编排过程事件：供 CLI / 前端展示当前助手、动作调用、委派与审批

use serde::Serialize;

use crate::dialog::HandlerKind;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DialogEvent {
    /// 即将调用某个助手推理
    HandlerActive { session_id: String, handler: HandlerKind },
    /// 空回复，附加纠正提示后重试
    ModelRetry { handler: HandlerKind, attempt: usize },
    ActionRequested {
        handler: HandlerKind,
        action: String,
        args: serde_json::Value,
    },
    /// 动作返回（预览，避免过长）
    ActionCompleted {
        action: String,
        ok: bool,
        preview: String,
    },
    Delegated {
        from: HandlerKind,
        to: HandlerKind,
        note: String,
    },
    Escalated { from: HandlerKind, to: HandlerKind },
    /// 敏感动作等待审批
    Suspended { session_id: String, action: String },
    ApprovalResolved { action: String, approved: bool },
    TurnComplete { session_id: String, handler: HandlerKind },
    Error { text: String },
}

/// 过长文本截断为预览
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_tag() {
        let ev = DialogEvent::Delegated {
            from: HandlerKind::Primary,
            to: HandlerKind::BookHotel,
            note: "near the lake".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "delegated");
        assert_eq!(json["to"], "book_hotel");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("苏黎世湖畔酒店", 3), "苏黎世...");
        assert_eq!(preview("ok", 10), "ok");
    }
}

//! 对话层：角色、动作目录、委派栈、单步推理、路由、提示模板、过程事件

pub mod catalog;
pub mod events;
pub mod handler;
pub mod prompts;
pub mod router;
pub mod stack;
pub mod turn;

pub use catalog::{ActionCatalog, ActionKind, Control, SideEffect};
pub use events::DialogEvent;
pub use handler::{control_spec, Capabilities, HandlerContext, HandlerKind};
pub use router::{Router, Transition};
pub use stack::DelegationStack;
pub use turn::{ResponseValidity, TurnExecutor, CORRECTIVE_PROMPT};

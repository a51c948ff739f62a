//! 对话编排器：会话状态机主循环
//!
//! 每次调用（用户消息 / 审批决定）取得会话租约，从最近检查点加载会话，
//! 驱动「推理 → 路由 → 执行 / 委派 / 回退 / 挂起」循环，直到本轮结束或等待审批；
//! 在挂起、已批准动作执行完毕与本轮结束处写检查点，结构性错误直接返回，会话停留在上一检查点。

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    ApprovalDecision, OrchestratorError, RecoveryAction, RecoveryEngine, SessionPhase,
    SessionSupervisor, TurnMachine, TurnReply,
};
use crate::dialog::events::preview;
use crate::dialog::prompts::{self, ESCALATION_ACK, NOT_EXECUTED_NOTE};
use crate::dialog::{
    control_spec, ActionCatalog, ActionKind, DialogEvent, HandlerContext, HandlerKind, Router,
    SideEffect, Transition, TurnExecutor,
};
use crate::session::{
    history, ActionRequest, Boundary, Checkpoint, CheckpointStore, Message, Session, StoreError,
};
use crate::tools::{ActionExecutor, ActionSpec, CallerContext, UserContextProvider};

/// 每轮的上限与超时
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 空回复重试上限（含首次）
    pub max_invalid_responses: usize,
    /// 单轮推理次数上限
    pub max_steps_per_turn: usize,
    /// 单轮委派 + 回退次数上限
    pub max_handoffs_per_turn: usize,
    /// 委派栈深度上限（含底部主助手）
    pub max_delegation_depth: usize,
    pub reasoning_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_invalid_responses: 3,
            max_steps_per_turn: 25,
            max_handoffs_per_turn: 4,
            max_delegation_depth: 2,
            reasoning_timeout: Duration::from_secs(60),
        }
    }
}

/// 单轮计数
#[derive(Debug, Default)]
struct TurnBudget {
    steps: usize,
    handoffs: usize,
}

pub struct Orchestrator {
    catalog: Arc<ActionCatalog>,
    router: Router,
    turns: TurnExecutor,
    actions: ActionExecutor,
    store: Arc<dyn CheckpointStore>,
    supervisor: SessionSupervisor,
    context_provider: Option<Arc<dyn UserContextProvider>>,
    recovery: RecoveryEngine,
    settings: OrchestratorSettings,
    events: Option<mpsc::UnboundedSender<DialogEvent>>,
}

impl Orchestrator {
    pub(crate) fn new(
        catalog: Arc<ActionCatalog>,
        turns: TurnExecutor,
        actions: ActionExecutor,
        store: Arc<dyn CheckpointStore>,
        context_provider: Option<Arc<dyn UserContextProvider>>,
        settings: OrchestratorSettings,
        events: Option<mpsc::UnboundedSender<DialogEvent>>,
    ) -> Self {
        Self {
            router: Router::new(Arc::clone(&catalog)),
            catalog,
            turns,
            actions,
            store,
            supervisor: SessionSupervisor::new(),
            context_provider,
            recovery: RecoveryEngine::new(),
            settings,
            events,
        }
    }

    /// 推理后端累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.turns.reasoner().token_usage()
    }

    /// 打开会话：已有检查点则恢复，否则新建（新会话在第一次检查点前不落盘）
    pub async fn open_session(&self, session_id: Option<&str>) -> Result<Session, OrchestratorError> {
        match session_id {
            Some(id) => self.load_or_new(id).await,
            None => Ok(Session::new(uuid::Uuid::new_v4().to_string())),
        }
    }

    /// 最近一次检查点中的会话状态
    pub async fn session_snapshot(&self, session_id: &str) -> Result<Session, OrchestratorError> {
        self.load(session_id).await
    }

    /// 会话检查点历史（按序号升序，惰性读取；重新调用即可重放）
    pub fn history(&self, session_id: &str) -> BoxStream<'static, Result<Checkpoint, StoreError>> {
        history(Arc::clone(&self.store), session_id)
    }

    /// 把较早的检查点复制为新的最新检查点；历史本身不变
    pub async fn rewind(&self, session_id: &str, seq: u64) -> Result<Checkpoint, OrchestratorError> {
        let _lease = self.supervisor.acquire(session_id)?;
        let target = self.store.load_at(session_id, seq).await.map_err(not_found)?;
        let latest = self.store.load(session_id).await.map_err(not_found)?;
        let mut state = target.state;
        state.version = latest.seq;
        let checkpoint = state.checkpoint(Boundary::Restored);
        self.store.save(&checkpoint).await?;
        tracing::info!(session_id, from_seq = seq, new_seq = checkpoint.seq, "session rewound");
        Ok(checkpoint)
    }

    /// 取消会话的在途调用；无在途调用时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        self.supervisor.cancel(session_id)
    }

    /// 进程退出时取消全部在途调用
    pub fn shutdown(&self) {
        self.supervisor.cancel_all();
    }

    /// 处理一条用户消息，直到本轮结束或挂起等待审批
    pub async fn submit_user_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<TurnReply, OrchestratorError> {
        let lease = self.supervisor.acquire(session_id)?;
        let mut session = self.load_or_new(session_id).await?;
        if session.is_suspended() {
            return Err(OrchestratorError::ApprovalPending(session_id.to_string()));
        }
        self.settle_interrupted_batch(&mut session);
        self.refresh_context(&mut session).await;
        session.append(Message::user(text));
        tracing::info!(session_id, handler = %session.delegation_stack.top(), "user message");

        let mut machine = TurnMachine::new();
        self.run(&mut session, &mut machine, lease.token()).await
    }

    /// 处理挂起动作的审批决定；没有挂起动作时返回 NoPendingAction
    pub async fn submit_approval(
        &self,
        session_id: &str,
        decision: ApprovalDecision,
    ) -> Result<TurnReply, OrchestratorError> {
        let lease = self.supervisor.acquire(session_id)?;
        let cancel = lease.token();
        let mut session = self.load(session_id).await?;
        let pending = session
            .pending_action
            .take()
            .ok_or_else(|| OrchestratorError::NoPendingAction(session_id.to_string()))?;
        let queued = std::mem::take(&mut session.queued_actions);
        let handler = session.delegation_stack.top();
        let mut machine = TurnMachine::new();

        match decision {
            ApprovalDecision::Approve => {
                tracing::info!(session_id, action = %pending.name, "action approved");
                self.emit(DialogEvent::ApprovalResolved {
                    action: pending.name.clone(),
                    approved: true,
                });
                advance(&mut machine, handler, SessionPhase::ExecutingSafeActions)?;
                let result = self.execute_action(&session, handler, &pending, cancel).await?;
                session.append(result);
                // 已执行的动作先落盘，此后重复审批只会得到 NoPendingAction
                session.queued_actions = queued.clone();
                self.save_progress(&mut session).await?;

                if let Some(reply) = self
                    .run_batch(&mut session, &mut machine, handler, queued, true, cancel)
                    .await?
                {
                    return Ok(reply);
                }
            }
            ApprovalDecision::Reject { reason } => {
                tracing::info!(session_id, action = %pending.name, %reason, "action rejected");
                self.emit(DialogEvent::ApprovalResolved {
                    action: pending.name.clone(),
                    approved: false,
                });
                session.append(Message::tool_result(
                    pending.correlation_id.clone(),
                    prompts::rejection_note(&reason),
                ));
                for request in &queued {
                    session.append(Message::tool_result(request.correlation_id.clone(), NOT_EXECUTED_NOTE));
                }
            }
        }

        self.run(&mut session, &mut machine, cancel).await
    }

    /// 主循环：从当前栈顶助手开始推理，直到结束本轮或挂起
    async fn run(
        &self,
        session: &mut Session,
        machine: &mut TurnMachine,
        cancel: &CancellationToken,
    ) -> Result<TurnReply, OrchestratorError> {
        let mut budget = TurnBudget::default();

        loop {
            let handler = session.delegation_stack.top();
            budget.steps += 1;
            if budget.steps > self.settings.max_steps_per_turn {
                return Err(OrchestratorError::StepLimitExceeded(self.settings.max_steps_per_turn));
            }
            advance(machine, handler, SessionPhase::AwaitingModel)?;
            self.emit(DialogEvent::HandlerActive {
                session_id: session.session_id.clone(),
                handler,
            });

            let context = self.handler_context(handler, session);
            let message = match self.turns.execute(&context, session, cancel).await {
                Ok(message) => message,
                Err(err) => match self.recovery.handle(&err) {
                    // 推理超时：以助手消息告知用户并结束本轮
                    RecoveryAction::AppendToTranscript(text) => {
                        tracing::warn!(session_id = %session.session_id, %handler, error = %err, "reasoning step failed");
                        self.emit(DialogEvent::Error { text: err.to_string() });
                        session.append(Message::assistant(text));
                        advance(machine, handler, SessionPhase::TurnComplete)?;
                        return self.complete(session).await;
                    }
                    _ => return Err(err),
                },
            };

            let transition = self.router.route(handler, &message)?;
            tracing::info!(
                session_id = %session.session_id,
                %handler,
                transition = transition.label(),
                step = budget.steps,
                "routed"
            );
            let request_ids: Vec<String> = message
                .action_requests
                .iter()
                .map(|r| r.correlation_id.clone())
                .collect();
            session.append(message);

            match transition {
                Transition::EndTurn => {
                    advance(machine, handler, SessionPhase::TurnComplete)?;
                    return self.complete(session).await;
                }
                Transition::ExecuteSafe(requests) => {
                    advance(machine, handler, SessionPhase::ExecutingSafeActions)?;
                    for request in &requests {
                        let result = self.execute_action(session, handler, request, cancel).await?;
                        session.append(result);
                    }
                }
                Transition::SuspendForApproval(requests) => {
                    if let Some(reply) = self.run_batch(session, machine, handler, requests, false, cancel).await? {
                        return Ok(reply);
                    }
                }
                Transition::Delegate { target, request, note } => {
                    advance(machine, handler, SessionPhase::Delegating)?;
                    self.count_handoff(&mut budget)?;
                    if session.delegation_stack.depth() >= self.settings.max_delegation_depth {
                        return Err(OrchestratorError::StackOverflow(self.settings.max_delegation_depth));
                    }
                    session.delegation_stack.push(target)?;
                    answer_batch(
                        session,
                        &request_ids,
                        &request.correlation_id,
                        prompts::handoff_note(target),
                    );
                    tracing::info!(session_id = %session.session_id, from = %handler, to = %target, "delegated");
                    self.emit(DialogEvent::Delegated {
                        from: handler,
                        to: target,
                        note,
                    });
                }
                Transition::Escalate { request } => {
                    advance(machine, handler, SessionPhase::Escalating)?;
                    self.count_handoff(&mut budget)?;
                    session.delegation_stack.pop()?;
                    if let Some(request) = request {
                        answer_batch(session, &request_ids, &request.correlation_id, ESCALATION_ACK.to_string());
                    }
                    let to = session.delegation_stack.top();
                    tracing::info!(session_id = %session.session_id, from = %handler, %to, "escalated");
                    self.emit(DialogEvent::Escalated { from: handler, to });
                }
            }
        }
    }

    fn count_handoff(&self, budget: &mut TurnBudget) -> Result<(), OrchestratorError> {
        budget.handoffs += 1;
        if budget.handoffs > self.settings.max_handoffs_per_turn {
            return Err(OrchestratorError::DelegationLoop(budget.handoffs));
        }
        Ok(())
    }

    /// 按顺序处理一批请求：安全动作直接执行，遇到第一个敏感动作即挂起，其后的请求排队。
    /// `persist` 为真时每执行完一个动作写一次 ActionApplied 检查点。
    /// 挂起时返回 Some(reply)，整批执行完返回 None
    async fn run_batch(
        &self,
        session: &mut Session,
        machine: &mut TurnMachine,
        handler: HandlerKind,
        requests: Vec<ActionRequest>,
        persist: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnReply>, OrchestratorError> {
        let mut queue = requests.into_iter();
        while let Some(request) = queue.next() {
            match self.catalog.classify_for(handler, &request.name)? {
                Some(SideEffect::Safe) => {
                    if machine.phase() != SessionPhase::ExecutingSafeActions {
                        advance(machine, handler, SessionPhase::ExecutingSafeActions)?;
                    }
                    let result = self.execute_action(session, handler, &request, cancel).await?;
                    session.append(result);
                    if persist {
                        session.queued_actions = queue.as_slice().to_vec();
                        self.save_progress(session).await?;
                    }
                }
                Some(SideEffect::Sensitive) => {
                    advance(machine, handler, SessionPhase::SuspendedForApproval)?;
                    let mut rest = vec![request];
                    rest.extend(queue);
                    return self.suspend(session, rest).await.map(Some);
                }
                None => {
                    return Err(OrchestratorError::InvalidRoute {
                        handler,
                        reason: format!("{} is outside the handler's capabilities", request.name),
                    })
                }
            }
        }
        session.queued_actions.clear();
        Ok(None)
    }

    /// 已批准动作的结果落盘（ActionApplied）
    async fn save_progress(&self, session: &mut Session) -> Result<(), OrchestratorError> {
        let checkpoint = session.checkpoint(Boundary::ActionApplied);
        self.store.save(&checkpoint).await?;
        tracing::info!(
            session_id = %session.session_id,
            queued = session.queued_actions.len(),
            seq = checkpoint.seq,
            "action applied"
        );
        Ok(())
    }

    /// 审批后排队动作执行中断（推理失败 / 取消）时，剩余请求在下一条用户消息前标为未执行
    fn settle_interrupted_batch(&self, session: &mut Session) {
        if session.queued_actions.is_empty() {
            return;
        }
        tracing::warn!(
            session_id = %session.session_id,
            queued = session.queued_actions.len(),
            "dropping queued actions from an interrupted batch"
        );
        for request in std::mem::take(&mut session.queued_actions) {
            session.append(Message::tool_result(request.correlation_id, NOT_EXECUTED_NOTE));
        }
    }

    /// 执行一个动作；可恢复错误转为带错误信息的 tool 消息
    async fn execute_action(
        &self,
        session: &Session,
        handler: HandlerKind,
        request: &ActionRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, OrchestratorError> {
        self.emit(DialogEvent::ActionRequested {
            handler,
            action: request.name.clone(),
            args: request.arguments_value(),
        });
        let caller = CallerContext::from_session(session);
        let (ok, text) = match self.actions.execute(request, &caller, cancel).await {
            Ok(output) => (true, output),
            Err(err) => match self.recovery.handle(&err) {
                RecoveryAction::AppendToTranscript(text) => {
                    tracing::warn!(session_id = %session.session_id, action = %request.name, error = %err, "action failed");
                    (false, text)
                }
                _ => return Err(err),
            },
        };
        self.emit(DialogEvent::ActionCompleted {
            action: request.name.clone(),
            ok,
            preview: preview(&text, 200),
        });
        Ok(Message::tool_result(request.correlation_id.clone(), text))
    }

    /// 挂起：第一个请求等待审批，其余排队；写 Suspended 检查点
    async fn suspend(
        &self,
        session: &mut Session,
        requests: Vec<ActionRequest>,
    ) -> Result<TurnReply, OrchestratorError> {
        let mut requests = requests.into_iter();
        let pending = requests.next().ok_or_else(|| OrchestratorError::InvalidRoute {
            handler: session.delegation_stack.top(),
            reason: "suspension without an action".to_string(),
        })?;
        session.pending_action = Some(pending.clone());
        session.queued_actions = requests.collect();

        let checkpoint = session.checkpoint(Boundary::Suspended);
        self.store.save(&checkpoint).await?;
        tracing::info!(
            session_id = %session.session_id,
            action = %pending.name,
            queued = session.queued_actions.len(),
            seq = checkpoint.seq,
            "awaiting approval"
        );
        self.emit(DialogEvent::Suspended {
            session_id: session.session_id.clone(),
            action: pending.name.clone(),
        });
        Ok(self.reply(session, true))
    }

    /// 本轮结束：写 TurnComplete 检查点
    async fn complete(&self, session: &mut Session) -> Result<TurnReply, OrchestratorError> {
        let checkpoint = session.checkpoint(Boundary::TurnComplete);
        self.store.save(&checkpoint).await?;
        let handler = session.delegation_stack.top();
        tracing::info!(session_id = %session.session_id, %handler, seq = checkpoint.seq, "turn complete");
        self.emit(DialogEvent::TurnComplete {
            session_id: session.session_id.clone(),
            handler,
        });
        Ok(self.reply(session, false))
    }

    fn reply(&self, session: &Session, awaiting_approval: bool) -> TurnReply {
        TurnReply {
            session_id: session.session_id.clone(),
            assistant_text: session.last_assistant_text(),
            awaiting_approval,
            pending_action: session.pending_action.clone(),
            active_handler: session.delegation_stack.top(),
        }
    }

    /// 当前助手的系统提示与可见动作
    pub(crate) fn handler_context(&self, handler: HandlerKind, session: &Session) -> HandlerContext {
        let actions: Vec<ActionSpec> = handler
            .visible_actions()
            .into_iter()
            .filter_map(|kind| self.action_spec(kind))
            .collect();
        HandlerContext {
            kind: handler,
            system_prompt: prompts::render(handler, session.user_context.get("user_info"), Local::now()),
            actions,
        }
    }

    fn action_spec(&self, kind: ActionKind) -> Option<ActionSpec> {
        if kind.control().is_some() {
            return control_spec(kind);
        }
        let spec = self.actions.spec_for(kind);
        if spec.is_none() {
            tracing::debug!(action = %kind, "no handler registered, hidden from model");
        }
        spec
    }

    /// 每条用户消息前刷新 user_context；失败时保留旧值
    async fn refresh_context(&self, session: &mut Session) {
        let Some(provider) = &self.context_provider else {
            return;
        };
        match provider.refresh(session).await {
            Ok(values) => session.user_context.extend(values),
            Err(e) => tracing::warn!(session_id = %session.session_id, error = %e, "user context refresh failed"),
        }
    }

    async fn load(&self, session_id: &str) -> Result<Session, OrchestratorError> {
        let checkpoint = self.store.load(session_id).await.map_err(not_found)?;
        Ok(checkpoint.state)
    }

    async fn load_or_new(&self, session_id: &str) -> Result<Session, OrchestratorError> {
        match self.store.load(session_id).await {
            Ok(checkpoint) => Ok(checkpoint.state),
            Err(StoreError::NotFound(_)) => Ok(Session::new(session_id)),
            Err(e) => Err(e.into()),
        }
    }

    fn emit(&self, event: DialogEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn advance(machine: &mut TurnMachine, handler: HandlerKind, next: SessionPhase) -> Result<(), OrchestratorError> {
    machine.advance(next).map_err(|from| OrchestratorError::InvalidRoute {
        handler,
        reason: format!("illegal phase change {from} -> {next}"),
    })
}

fn not_found(err: StoreError) -> OrchestratorError {
    match err {
        StoreError::NotFound(id) => OrchestratorError::NotFound(id),
        other => OrchestratorError::Store(other),
    }
}

/// 控制动作的结果写给触发它的请求，同批其它请求标为未执行
fn answer_batch(session: &mut Session, request_ids: &[String], handled: &str, note: String) {
    for id in request_ids {
        let text = if id == handled { note.clone() } else { NOT_EXECUTED_NOTE.to_string() };
        session.append(Message::tool_result(id.clone(), text));
    }
}

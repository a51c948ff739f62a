//! 编排器构建器：统一的初始化逻辑
//!
//! CLI 与测试共用同一套装配：推理后端、动作注册表、检查点存储、用户上下文来源。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{Orchestrator, OrchestratorError, OrchestratorSettings};
use crate::dialog::{ActionCatalog, DialogEvent, HandlerKind, TurnExecutor};
use crate::llm::{create_deepseek_reasoner, MockReasoner, OpenAiReasoner, Reasoner};
use crate::session::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
use crate::tools::travel::{self, FlightInfoProvider, LookupPolicy, PolicyLookup, TravelDb};
use crate::tools::{ActionExecutor, ActionRegistry, UserContextProvider, WebSearch};

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct OrchestratorBuilder {
    reasoner: Arc<dyn Reasoner>,
    store: Arc<dyn CheckpointStore>,
    registry: ActionRegistry,
    settings: OrchestratorSettings,
    action_timeout: Duration,
    context_provider: Option<Arc<dyn UserContextProvider>>,
    events: Option<mpsc::UnboundedSender<DialogEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(reasoner: Arc<dyn Reasoner>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            reasoner,
            store,
            registry: ActionRegistry::new(),
            settings: OrchestratorSettings::default(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            context_provider: None,
            events: None,
        }
    }

    /// 按配置装配：推理后端、检查点后端、旅行动作与政策查询
    pub fn from_config(cfg: &AppConfig) -> Result<Self, OrchestratorError> {
        let store: Arc<dyn CheckpointStore> = match cfg.checkpoint.backend.to_lowercase().as_str() {
            "sqlite" => {
                if let Some(dir) = cfg.checkpoint.path.parent() {
                    std::fs::create_dir_all(dir).map_err(|e| OrchestratorError::Setup(e.to_string()))?;
                }
                tracing::info!(path = %cfg.checkpoint.path.display(), "Using SQLite checkpoint store");
                Arc::new(SqliteCheckpointStore::open(&cfg.checkpoint.path)?)
            }
            "memory" => Arc::new(InMemoryCheckpointStore::new()),
            other => {
                return Err(OrchestratorError::Setup(format!("unknown checkpoint backend: {other}")));
            }
        };

        let mut builder = Self::new(create_reasoner_from_config(cfg), store)
            .with_settings(settings_from_config(cfg))
            .with_action_timeout(Duration::from_secs(cfg.actions.timeout_secs));

        if let Some(db_path) = &cfg.travel.db_path {
            let db = TravelDb::new(db_path);
            if cfg.travel.refresh_dates {
                let backup = cfg.travel.backup_path.as_ref().ok_or_else(|| {
                    OrchestratorError::Setup("travel.refresh_dates requires travel.backup_path".to_string())
                })?;
                db.refresh_dates(backup).map_err(|e| OrchestratorError::Setup(e.to_string()))?;
            }
            travel::register_all(&mut builder.registry, &db);
            builder = builder.with_context_provider(Arc::new(FlightInfoProvider::new(
                db,
                cfg.app.passenger_id.clone(),
            )));
            tracing::info!(db = %db_path.display(), actions = builder.registry.len(), "travel actions registered");
        }

        if let Some(api_key) = cfg.actions.web_search_api_key.as_deref().filter(|k| !k.is_empty()) {
            builder.registry.register(WebSearch::new(
                &cfg.actions.web_search_url,
                api_key,
                Duration::from_secs(cfg.actions.timeout_secs),
                cfg.actions.web_search_max_chars,
            ));
            tracing::info!("web search registered");
        }

        if let Some(policy_path) = &cfg.travel.policy_path {
            let policies = PolicyLookup::load(policy_path)
                .map_err(|e| OrchestratorError::Setup(format!("{}: {e}", policy_path.display())))?;
            tracing::info!(sections = policies.len(), "policy lookup loaded");
            builder.registry.register(LookupPolicy::new(Arc::new(policies)));
        }

        Ok(builder)
    }

    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn UserContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    /// 订阅 DialogEvent（CLI 打印进度用）
    pub fn with_event_sink(mut self, events: mpsc::UnboundedSender<DialogEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let catalog = Arc::new(ActionCatalog::from_handlers(&HandlerKind::ALL)?);
        for kind in self.registry.kinds() {
            if catalog.handlers_of(kind).next().is_none() {
                tracing::warn!(action = %kind, "registered action is not reachable from any handler");
            }
        }
        let turns = TurnExecutor::new(
            self.reasoner,
            self.settings.max_invalid_responses,
            self.settings.reasoning_timeout,
        )
        .with_events(self.events.clone());
        let actions = ActionExecutor::with_timeout(self.registry, self.action_timeout);
        Ok(Orchestrator::new(
            catalog,
            turns,
            actions,
            self.store,
            self.context_provider,
            self.settings,
            self.events,
        ))
    }
}

fn settings_from_config(cfg: &AppConfig) -> OrchestratorSettings {
    OrchestratorSettings {
        max_invalid_responses: cfg.orchestrator.max_invalid_responses,
        max_steps_per_turn: cfg.orchestrator.max_steps_per_turn,
        max_handoffs_per_turn: cfg.orchestrator.max_handoffs_per_turn,
        max_delegation_depth: cfg.orchestrator.max_delegation_depth,
        reasoning_timeout: Duration::from_secs(cfg.orchestrator.reasoning_timeout_secs),
    }
}

/// 根据配置与环境变量选择推理后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_reasoner_from_config(cfg: &AppConfig) -> Arc<dyn Reasoner> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_deepseek_key || has_openai_key => {
            let reasoner = create_deepseek_reasoner(cfg.llm.model.as_deref(), timeout);
            tracing::info!("Using DeepSeek reasoner ({})", reasoner.model());
            Arc::new(reasoner)
        }
        "openai" if has_openai_key => {
            let model = cfg.llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI reasoner ({})", model);
            Arc::new(OpenAiReasoner::new(cfg.llm.base_url.as_deref(), &model, None, timeout))
        }
        "mock" => Arc::new(MockReasoner),
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using mock reasoner");
            Arc::new(MockReasoner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::ActionKind;
    use crate::tools::travel::db::fixtures::seeded_db;

    #[test]
    fn test_mock_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        let builder = OrchestratorBuilder::from_config(&cfg).unwrap();
        assert!(builder.registry.is_empty());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_unknown_checkpoint_backend() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.checkpoint.backend = "redis".into();
        assert!(matches!(
            OrchestratorBuilder::from_config(&cfg),
            Err(OrchestratorError::Setup(_))
        ));
    }

    #[test]
    fn test_travel_and_policy_registered() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let policy = dir.path().join("policy.md");
        std::fs::write(&policy, "# FAQ\n## Changes\nTickets can be changed.").unwrap();

        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.checkpoint.backend = "sqlite".into();
        cfg.checkpoint.path = dir.path().join("cp").join("checkpoints.sqlite");
        cfg.travel.db_path = Some(db.path().to_path_buf());
        cfg.travel.policy_path = Some(policy);

        let builder = OrchestratorBuilder::from_config(&cfg).unwrap();
        assert_eq!(builder.registry.len(), 16);
        assert!(builder.registry.contains(ActionKind::LookupPolicy));
        assert!(builder.context_provider.is_some());
        assert!(cfg.checkpoint.path.exists());
    }

    #[test]
    fn test_web_search_registered_only_with_key() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        let builder = OrchestratorBuilder::from_config(&cfg).unwrap();
        assert!(!builder.registry.contains(ActionKind::SearchAndContents));

        cfg.actions.web_search_api_key = Some("exa-test".into());
        let builder = OrchestratorBuilder::from_config(&cfg).unwrap();
        assert!(builder.registry.contains(ActionKind::SearchAndContents));
        let orch = builder.build().unwrap();
        let ctx = orch.handler_context(HandlerKind::Primary, &crate::session::Session::new("s1"));
        assert_eq!(ctx.actions[0].name, "search_and_contents");
    }

    #[test]
    fn test_refresh_dates_requires_backup() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.travel.db_path = Some("travel.sqlite".into());
        cfg.travel.refresh_dates = true;
        assert!(matches!(
            OrchestratorBuilder::from_config(&cfg),
            Err(OrchestratorError::Setup(_))
        ));
    }
}

//! Run控制器：同一时间只允许一个Run，负责启动、取消与进度订阅

use anyhow::Result;
use chrono::Local;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::config::{Config, ConfigError, LLMConfig, ModelStore, ResolvedModel, RunRequest};
use crate::generator::context::{GeneratorContext, Services};
use crate::generator::outlet::Archive;
use crate::generator::workflow::state::{RunState, StateTracker};
use crate::generator::workflow::{self, RunMeta};
use crate::llm::client::LLMClient;

pub mod events;

use events::{EventHub, ProgressEvent};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("a run is already active")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to set up run: {0}")]
    Setup(String),
}

/// 根据选中的模型创建LLM客户端
pub type LlmFactory = Arc<dyn Fn(&ResolvedModel, &LLMConfig) -> Result<LLMClient> + Send + Sync>;

fn default_llm_client(model: &ResolvedModel, config: &LLMConfig) -> Result<LLMClient> {
    LLMClient::new(model, config.clone())
}

type ActiveRun = Arc<Mutex<Option<Uuid>>>;

/// 占用中的Run槽位，drop时释放（worker异常退出时同样会释放）
struct SlotGuard {
    slot: ActiveRun,
    id: Uuid,
}

impl SlotGuard {
    fn acquire(slot: &ActiveRun, id: Uuid) -> Result<Self, ControllerError> {
        let mut active = slot
            .lock()
            .map_err(|_| ControllerError::Setup("run slot is poisoned".to_string()))?;
        if active.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }
        *active = Some(id);
        Ok(Self {
            slot: slot.clone(),
            id,
        })
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.slot.lock()
            && *active == Some(self.id)
        {
            *active = None;
        }
    }
}

/// 已启动的Run
#[derive(Clone)]
pub struct RunHandle {
    id: Uuid,
    cancel: CancellationToken,
    state_rx: watch::Receiver<RunState>,
    hub: Arc<EventHub>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 设置取消标记。已在进行中的网络调用会先完成或超时
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 订阅进度事件；迟到的订阅者会先收到历史事件
    pub async fn subscribe(&self) -> mpsc::Receiver<ProgressEvent> {
        self.hub.subscribe().await
    }

    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// 等待Run进入终止状态。返回时归档已写完，槽位已释放
    pub async fn wait(&self) -> RunState {
        let mut rx = self.state_rx.clone();
        if let Ok(state) = rx.wait_for(|state| state.is_terminal()).await {
            return *state;
        }
        // worker异常退出时发送端已被drop
        let state = *rx.borrow();
        state
    }
}

pub struct RunController {
    config: Config,
    models: ModelStore,
    services: Services,
    llm_factory: LlmFactory,
    active: ActiveRun,
}

impl RunController {
    pub fn new(config: Config, models: ModelStore, services: Services) -> Self {
        Self {
            config,
            models,
            services,
            llm_factory: Arc::new(default_llm_client),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// 替换LLM客户端的创建方式
    pub fn with_llm_factory(mut self, factory: LlmFactory) -> Self {
        self.llm_factory = factory;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(true)
    }

    /// 校验请求并在后台启动Run
    ///
    /// 配置错误在占用槽位之前返回，不会创建归档
    pub fn start(&self, request: RunRequest) -> Result<RunHandle, ControllerError> {
        request.validate()?;
        let model_key = ModelStore::select_key(request.model_key.as_deref());
        let model = self.models.resolve(&model_key)?;

        let id = Uuid::new_v4();
        let slot = SlotGuard::acquire(&self.active, id)?;

        let llm_client = (self.llm_factory)(&model, &self.config.llm)
            .map_err(|e| ControllerError::Setup(format!("{:#}", e)))?;

        let cancel = CancellationToken::new();
        let hub = Arc::new(EventHub::new());
        let (tracker, state_rx) = StateTracker::new();
        let meta = RunMeta {
            run_id: id,
            model_key: model.key.clone(),
            started_at: Local::now(),
        };

        let worker = RunWorker {
            config: self.config.clone(),
            request: Arc::new(request),
            model,
            services: self.services.clone(),
            llm_client,
            hub: hub.clone(),
            cancel: cancel.clone(),
        };
        tracing::info!(run_id = %id, model = %meta.model_key, "run started");
        tokio::spawn(worker.run(tracker, meta, slot));

        Ok(RunHandle {
            id,
            cancel,
            state_rx,
            hub,
        })
    }

    pub fn cancel(&self, handle: &RunHandle) {
        handle.cancel();
    }

    pub async fn subscribe(&self, handle: &RunHandle) -> mpsc::Receiver<ProgressEvent> {
        handle.subscribe().await
    }
}

struct RunWorker {
    config: Config,
    request: Arc<RunRequest>,
    model: ResolvedModel,
    services: Services,
    llm_client: LLMClient,
    hub: Arc<EventHub>,
    cancel: CancellationToken,
}

impl RunWorker {
    async fn run(self, tracker: StateTracker, meta: RunMeta, slot: SlotGuard) {
        let archive = match Archive::create(
            &self.config.archive.archive_dir,
            meta.started_at,
            &self.request.topic,
        )
        .await
        {
            Ok(archive) => Arc::new(archive),
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!(run_id = %meta.run_id, error = %message, "failed to create archive");
                self.hub.publish(ProgressEvent::Error(message)).await;
                drop(slot);
                if let Err(e) = tracker.advance(RunState::Failed) {
                    tracing::error!(error = %e, "failed to mark run as failed");
                }
                return;
            }
        };

        let context = GeneratorContext {
            llm_client: self.llm_client,
            cache_manager: Arc::new(CacheManager::new(self.config.cache.clone())),
            config: self.config,
            request: self.request,
            model: Arc::new(self.model.config),
            services: self.services,
            archive,
            events: self.hub.clone(),
            cancel: self.cancel,
        };

        let outcome = workflow::execute(&context, &tracker, &meta).await;
        tracing::info!(run_id = %meta.run_id, state = %outcome.state, "run finished");

        let event = match outcome.state {
            RunState::Completed => ProgressEvent::Complete(outcome.files.clone()),
            _ => ProgressEvent::Error(
                outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| outcome.state.to_string()),
            ),
        };
        self.hub.publish(event).await;

        // 先释放槽位再发布终止状态，wait() 返回后即可开始下一个Run
        drop(slot);
        if let Err(e) = tracker.advance(outcome.state) {
            tracing::error!(error = %e, "failed to publish terminal run state");
        }
    }
}

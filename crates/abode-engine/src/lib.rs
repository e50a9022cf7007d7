/// Abode Engine
///
/// Visit lifecycle and notification scheduling:
/// - VisitStateMachine: who may move a visit where, and the side effects
/// - ConversationAuthorizer / ChatService: derived chat access per visit
/// - ReminderScheduler / ReminderDispatcher: five fixed offsets before a
///   confirmed visit, delivered by a non-reentrant periodic pass
///
/// Storage and push delivery are reached through the traits in [`ports`].

pub mod chat;
pub mod clock;
pub mod conversation;
pub mod error;
pub mod notify;
pub mod ports;
pub mod reminders;
pub mod store;
pub mod task;
pub mod visits;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use abode_db::Database;
use abode_types::UserId;
use abode_types::models::{Platform, PushToken};

pub use chat::{ChatService, ReadReceipt, SentMessage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::{ChatAccess, ChatRole, ConversationAuthorizer, FallbackPolicy, provisional_access};
pub use error::{EngineError, Result};
pub use notify::{FanOut, Notifier};
pub use ports::{
    DirectoryLookup, HousingLookup, MessageStore, Notification, PushDeliverer, PushTokenStore,
    ReminderStore, TokenOutcome, TokenResult, VisitStore,
};
pub use reminders::{DispatchReport, ReminderDispatcher, ReminderScheduler};
pub use task::PeriodicTask;
pub use visits::{NewVisit, VisitStateMachine, plan_transition};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dispatch_interval: Duration,
    pub dispatch_tolerance: Duration,
    pub push_timeout: Duration,
    pub chat_fallback: FallbackPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_secs(300),
            dispatch_tolerance: Duration::from_secs(300),
            push_timeout: Duration::from_secs(10),
            chat_fallback: FallbackPolicy::Permissive,
        }
    }
}

/// Every port the engine needs, so tests can swap single pieces.
#[derive(Clone)]
pub struct Ports {
    pub visits: Arc<dyn VisitStore>,
    pub messages: Arc<dyn MessageStore>,
    pub reminders: Arc<dyn ReminderStore>,
    pub tokens: Arc<dyn PushTokenStore>,
    pub directory: Arc<dyn DirectoryLookup>,
    pub housing: Arc<dyn HousingLookup>,
    pub push: Arc<dyn PushDeliverer>,
}

impl Ports {
    /// All stores and lookups backed by one SQLite database.
    pub fn from_database(db: Arc<Database>, push: Arc<dyn PushDeliverer>) -> Self {
        Self {
            visits: db.clone(),
            messages: db.clone(),
            reminders: db.clone(),
            tokens: db.clone(),
            directory: db.clone(),
            housing: db,
            push,
        }
    }
}

pub struct Engine {
    pub visits: VisitStateMachine,
    pub chat: ChatService,
    dispatcher: ReminderDispatcher,
    dispatch_task: Arc<PeriodicTask>,
    tokens: Arc<dyn PushTokenStore>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(ports: Ports, clock: Arc<dyn Clock>, config: &EngineConfig) -> Result<Self> {
        let tolerance = chrono::Duration::from_std(config.dispatch_tolerance)
            .map_err(|e| EngineError::Validation(format!("dispatch tolerance out of range: {e}")))?;
        let notifier = Notifier::new(ports.tokens.clone(), ports.push.clone(), config.push_timeout);

        let visits = VisitStateMachine::new(
            ports.visits.clone(),
            ports.housing.clone(),
            ports.directory.clone(),
            ReminderScheduler::new(ports.reminders.clone()),
            notifier.clone(),
            clock.clone(),
        );
        let chat = ChatService::new(
            ports.visits.clone(),
            ports.messages.clone(),
            ConversationAuthorizer::new(ports.housing.clone(), ports.messages.clone(), config.chat_fallback),
            notifier.clone(),
            clock.clone(),
        );
        let dispatcher = ReminderDispatcher::new(ports.reminders, ports.visits, notifier, tolerance);

        Ok(Self {
            visits,
            chat,
            dispatcher,
            dispatch_task: Arc::new(PeriodicTask::new("reminder dispatcher", config.dispatch_interval)),
            tokens: ports.tokens,
            clock,
        })
    }

    pub fn from_database(
        db: Arc<Database>,
        push: Arc<dyn PushDeliverer>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self> {
        Self::new(Ports::from_database(db, push), clock, config)
    }

    /// Replaces any earlier registration of the same token for this user.
    pub fn register_push_token(&self, user_id: &UserId, platform: Platform, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(EngineError::Validation("push token is empty".into()));
        }
        self.tokens.register(
            &PushToken {
                user_id: *user_id,
                platform,
                token: token.to_string(),
            },
            &self.clock.now(),
        )?;
        info!("Registered {:?} push token for {}", platform, user_id);
        Ok(())
    }

    /// One dispatch pass, or `None` if the periodic pass is still running.
    pub async fn dispatch_due_reminders(&self) -> Option<DispatchReport> {
        self.dispatch_task
            .try_run(|| self.dispatcher.run_pass(self.clock.now()))
            .await
    }

    /// Runs a dispatch pass every tick until `shutdown` fires. Shares the
    /// run guard with [`Engine::dispatch_due_reminders`].
    pub fn spawn_dispatch_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        self.dispatch_task.clone().spawn(shutdown, move || {
            let engine = engine.clone();
            async move {
                engine.dispatcher.run_pass(engine.clock.now()).await;
            }
        })
    }
}

//! Process-wide runtime context.
//!
//! All per-process state (store handle, resolved handler, signal queue,
//! watcher, process UUID, defaults) lives in one explicit [`MutexContext`]
//! built by [`setup`](MutexContext::setup). Every mutex instance carries an
//! `Arc` to its context; there are no hidden globals, and a test can run
//! several "processes" side by side by building several contexts over one
//! shared store.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use remutex_core::LockStore;
use remutex_redis::RedisLockStore;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::SIGNAL_CHANNEL;
use crate::config::Config;
use crate::config::HandlerKind;
use crate::config::Retries;
use crate::error::MutexError;
use crate::handler::Handler;
use crate::handler::OptimisticHandler;
use crate::handler::ScriptedHandler;
use crate::names::NameGenerator;
use crate::owner;
use crate::signal::SignalQueue;
use crate::watcher::Watcher;

/// Handle passed to the scripting-support probe; any well-formed handle will
/// do, only the error shape matters.
const SCRIPT_PROBE: &str = "0000000000000000000000000000000000000000";

/// Shared runtime state for every mutex of one process.
pub struct MutexContext {
    store: Arc<dyn LockStore>,
    handler: Arc<dyn Handler>,
    handler_kind: HandlerKind,
    signals: Arc<SignalQueue>,
    watcher: Mutex<Option<Watcher>>,
    watching: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    has_watcher: AtomicBool,
    process_uuid: Uuid,
    default_expire: Duration,
    default_ns: Option<String>,
    reconnect_max: Retries,
    names: NameGenerator,
}

impl MutexContext {
    /// Build the runtime: validate the configuration, connect or adopt the
    /// store, resolve the handler, and establish the watcher subscription.
    ///
    /// Fails with [`MutexError::Protocol`] when the watcher cannot subscribe.
    /// To reconfigure a process, stop this context's watcher and set up a
    /// fresh context.
    pub async fn setup(config: Config) -> Result<Arc<Self>, MutexError> {
        config.validate()?;

        let store: Arc<dyn LockStore> = match &config.store {
            Some(adopted) => Arc::clone(adopted),
            None => Arc::new(RedisLockStore::connect(&config.connection_url(), config.size)?),
        };

        let handler_kind = resolve_handler(&store, config.handler).await;
        let signals = Arc::new(SignalQueue::new());
        let handler: Arc<dyn Handler> = match handler_kind {
            HandlerKind::Optimistic => Arc::new(OptimisticHandler::new(
                Arc::clone(&store),
                Arc::clone(&signals),
                SIGNAL_CHANNEL.to_string(),
            )),
            _ => Arc::new(ScriptedHandler::new(
                Arc::clone(&store),
                Arc::clone(&signals),
                SIGNAL_CHANNEL.to_string(),
            )),
        };

        let watching = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let watcher = Watcher::start(
            Arc::clone(&store),
            Arc::clone(&signals),
            SIGNAL_CHANNEL.to_string(),
            config.reconnect_max,
            Arc::clone(&watching),
            Arc::clone(&stopped),
        )
        .await?;

        info!(handler = %handler_kind, "mutex runtime ready");
        Ok(Arc::new(Self {
            store,
            handler,
            handler_kind,
            signals,
            watcher: Mutex::new(Some(watcher)),
            watching,
            stopped,
            has_watcher: AtomicBool::new(true),
            process_uuid: Uuid::new_v4(),
            default_expire: config.expire,
            default_ns: config.ns,
            reconnect_max: config.reconnect_max,
            names: NameGenerator::new(),
        }))
    }

    /// (Re)start the watcher after an explicit stop, after it gave up
    /// reconnecting, or in a forked child.
    ///
    /// A process-id change is taken as a fork: the signal queue is cleared
    /// (the child inherits no local waiters) and the subscription is rebuilt.
    /// A no-op while a healthy watcher is running.
    pub async fn start_watcher(&self) -> Result<(), MutexError> {
        let mut watcher = self.watcher.lock().await;
        if let Some(existing) = watcher.take() {
            if existing.pid() == std::process::id() && !self.stopped.load(Ordering::SeqCst) {
                *watcher = Some(existing);
                return Ok(());
            }
            if existing.pid() != std::process::id() {
                debug!("process id changed, clearing inherited waiters");
                self.signals.clear();
                // The task handle belongs to the parent's runtime; do not
                // wait on it here.
                existing.abandon();
            } else {
                existing.shutdown().await;
            }
        }

        let fresh = Watcher::start(
            Arc::clone(&self.store),
            Arc::clone(&self.signals),
            SIGNAL_CHANNEL.to_string(),
            self.reconnect_max,
            Arc::clone(&self.watching),
            Arc::clone(&self.stopped),
        )
        .await?;
        *watcher = Some(fresh);
        self.has_watcher.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop the watcher. Refuses while waiters are queued unless `force`,
    /// since they would only ever wake again by timeout.
    pub async fn stop_watcher(&self, force: bool) -> Result<(), MutexError> {
        let waiting = self.signals.waiting();
        if !force && waiting > 0 {
            return Err(MutexError::Configuration {
                reason: format!("{waiting} waiters still queued; pass force to stop anyway"),
            });
        }
        let mut watcher = self.watcher.lock().await;
        if let Some(active) = watcher.take() {
            active.shutdown().await;
        }
        self.has_watcher.store(false, Ordering::SeqCst);
        self.watching.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the runtime has a watcher that has not given up.
    pub fn ready(&self) -> bool {
        self.has_watcher.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Whether the watcher subscription is currently established.
    pub fn watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// The protocol handler resolved at setup.
    pub fn handler_kind(&self) -> HandlerKind {
        self.handler_kind
    }

    /// Whether the resolved handler can reclaim an expired-but-still-owned
    /// lease on refresh.
    pub fn can_refresh_expired(&self) -> bool {
        self.handler.can_refresh_expired()
    }

    /// The per-process UUID component of owner identities.
    pub fn process_uuid(&self) -> Uuid {
        self.process_uuid
    }

    /// Default lease duration for mutexes that do not override it.
    pub fn default_expire(&self) -> Duration {
        self.default_expire
    }

    /// Default namespace for lock names.
    pub fn default_ns(&self) -> Option<&str> {
        self.default_ns.as_deref()
    }

    /// Reset the auto-generated name seed (tests).
    pub fn reset_name_seed(&self) {
        self.names.reset();
    }

    pub(crate) fn generate_name(&self) -> String {
        self.names.next()
    }

    pub(crate) fn owner_identity(&self, task_override: Option<&str>) -> String {
        owner::identity(&self.process_uuid, task_override)
    }

    pub(crate) fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub(crate) fn signals(&self) -> &Arc<SignalQueue> {
        &self.signals
    }
}

/// Resolve `Auto` by probing for scripting support; any probe error means the
/// store (or an intermediary proxy) cannot run scripts.
async fn resolve_handler(store: &Arc<dyn LockStore>, requested: HandlerKind) -> HandlerKind {
    match requested {
        HandlerKind::Auto => match store.script_exists(SCRIPT_PROBE).await {
            Ok(_) => HandlerKind::Scripted,
            Err(e) => {
                debug!(error = %e, "scripting probe failed, falling back to optimistic handler");
                HandlerKind::Optimistic
            }
        },
        explicit => explicit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remutex_core::MemoryLockStore;
    use tokio::sync::oneshot;

    fn memory_config() -> Config {
        Config::from_store(Arc::new(MemoryLockStore::new()))
    }

    #[tokio::test]
    async fn setup_resolves_auto_to_scripted_when_supported() {
        let ctx = MutexContext::setup(memory_config()).await.unwrap();
        assert_eq!(ctx.handler_kind(), HandlerKind::Scripted);
        assert!(ctx.can_refresh_expired());
        assert!(ctx.ready());
        assert!(ctx.watching());
    }

    #[tokio::test]
    async fn explicit_handler_choice_is_honored() {
        let config = Config {
            handler: HandlerKind::Optimistic,
            ..memory_config()
        };
        let ctx = MutexContext::setup(config).await.unwrap();
        assert_eq!(ctx.handler_kind(), HandlerKind::Optimistic);
        assert!(!ctx.can_refresh_expired());
    }

    #[tokio::test]
    async fn setup_rejects_zero_expire() {
        let config = Config {
            expire: Duration::ZERO,
            ..memory_config()
        };
        assert!(matches!(
            MutexContext::setup(config).await,
            Err(MutexError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn watcher_stop_and_restart() {
        let ctx = MutexContext::setup(memory_config()).await.unwrap();
        ctx.stop_watcher(false).await.unwrap();
        assert!(!ctx.ready());
        assert!(!ctx.watching());

        ctx.start_watcher().await.unwrap();
        assert!(ctx.ready());
        assert!(ctx.watching());
    }

    #[tokio::test]
    async fn stop_refuses_while_waiters_queued() {
        let ctx = MutexContext::setup(memory_config()).await.unwrap();
        let (tx, _rx) = oneshot::channel();
        ctx.signals().register("r", tx);

        assert!(matches!(
            ctx.stop_watcher(false).await,
            Err(MutexError::Configuration { .. })
        ));
        ctx.stop_watcher(true).await.unwrap();
    }

    #[tokio::test]
    async fn start_watcher_is_idempotent_while_running() {
        let ctx = MutexContext::setup(memory_config()).await.unwrap();
        ctx.start_watcher().await.unwrap();
        assert!(ctx.watching());
    }

    #[tokio::test]
    async fn generated_names_advance_and_reset() {
        let ctx = MutexContext::setup(memory_config()).await.unwrap();
        assert_eq!(ctx.generate_name(), "__@a.lock");
        assert_eq!(ctx.generate_name(), "__@b.lock");
        ctx.reset_name_seed();
        assert_eq!(ctx.generate_name(), "__@a.lock");
    }
}

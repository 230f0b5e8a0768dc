//! The user-facing mutex.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::debug;

use crate::context::MutexContext;
use crate::error::MutexError;
use crate::handler::read_lease;
use crate::owner;
use crate::timer;

/// Options accepted by [`DistributedMutex::with_options`].
#[derive(Debug, Clone, Default)]
pub struct MutexOptions {
    /// Resource names to cover; one is auto-generated when empty.
    pub names: Vec<String>,
    /// Default block timeout for [`lock`](DistributedMutex::lock)
    /// (`None` = wait forever).
    pub block: Option<Duration>,
    /// Lease duration override; the context default applies when unset.
    pub expire: Option<Duration>,
    /// Namespace override; the context default applies when unset.
    pub ns: Option<String>,
    /// Override for the task component of the owner identity, for sharing
    /// ownership across a task group. The process UUID and pid components
    /// always remain.
    pub owner: Option<String>,
}

impl MutexOptions {
    /// Add a resource name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Set the default block timeout.
    pub fn block(mut self, block: Duration) -> Self {
        self.block = Some(block);
        self
    }

    /// Set the lease duration.
    pub fn expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    /// Set the namespace prefix.
    pub fn ns(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    /// Override the task component of the owner identity.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// A distributed advisory mutex over one or more named resources.
///
/// Multi-name instances acquire all of their names atomically, which avoids
/// the deadlocks incremental acquisition would invite. Instances are cheap
/// handles: dropping one does **not** release a held lock (the lease expiry
/// does, eventually); pair every `lock` with an `unlock` or use
/// [`synchronize`](DistributedMutex::synchronize).
///
/// Within one process, waiters on a name are served in registration order.
/// Across processes no order is guaranteed: the first retry to win the store
/// claim wins.
pub struct DistributedMutex {
    ctx: Arc<MutexContext>,
    names: Vec<String>,
    ns: Option<String>,
    expire: Duration,
    block: Option<Duration>,
    owner_override: Option<String>,
    sleepers: StdMutex<HashMap<String, oneshot::Sender<()>>>,
}

impl DistributedMutex {
    /// A mutex over the given names with default options.
    pub fn new<I, S>(ctx: &Arc<MutexContext>, names: I) -> Result<Self, MutexError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = MutexOptions {
            names: names.into_iter().map(Into::into).collect(),
            ..MutexOptions::default()
        };
        Self::with_options(ctx, options)
    }

    /// A mutex configured by `options`.
    ///
    /// Auto-generates a name when none is given. Fails with
    /// [`MutexError::Configuration`] on a non-positive lease duration.
    pub fn with_options(ctx: &Arc<MutexContext>, options: MutexOptions) -> Result<Self, MutexError> {
        let expire = options.expire.unwrap_or_else(|| ctx.default_expire());
        if expire.is_zero() {
            return Err(MutexError::Configuration {
                reason: "expire must be positive".to_string(),
            });
        }

        let ns = options.ns.or_else(|| ctx.default_ns().map(str::to_string));
        let bare = if options.names.is_empty() {
            vec![ctx.generate_name()]
        } else {
            options.names
        };

        let mut names = Vec::with_capacity(bare.len());
        for name in bare {
            let full = match &ns {
                Some(prefix) => format!("{prefix}:{name}"),
                None => name,
            };
            // Duplicates would make multi-name claims trip over themselves.
            if !names.contains(&full) {
                names.push(full);
            }
        }

        Ok(Self {
            ctx: Arc::clone(ctx),
            names,
            ns,
            expire,
            block: options.block,
            owner_override: options.owner,
            sleepers: StdMutex::new(HashMap::new()),
        })
    }

    /// The full (namespaced) names this mutex covers.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The namespace in effect, if any.
    pub fn ns(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    /// The lease duration applied on acquisition and refresh.
    pub fn expire_timeout(&self) -> Duration {
        self.expire
    }

    /// The default block timeout (`None` = wait forever).
    pub fn block_timeout(&self) -> Option<Duration> {
        self.block
    }

    /// The owner identity this mutex acquires under. The task component is
    /// the calling task's id unless overridden at construction; the process
    /// UUID and pid components are always the context's.
    pub fn owner(&self) -> String {
        self.ctx.owner_identity(self.owner_override.as_deref())
    }

    /// Acquire, waiting up to `block` (falling back to the instance default,
    /// then to waiting forever). Returns false on timeout.
    ///
    /// Fails with [`MutexError::Deadlock`] when this owner already holds any
    /// of the names.
    pub async fn lock(&self, block: Option<Duration>) -> Result<bool, MutexError> {
        let effective = block.or(self.block);
        self.ctx.handler().lock(&self.names, &self.owner(), self.expire, effective).await
    }

    /// One-shot acquisition attempt; never blocks.
    pub async fn try_lock(&self) -> Result<bool, MutexError> {
        self.ctx.handler().try_lock(&self.names, &self.owner(), self.expire).await
    }

    /// Release. A no-op when this owner holds nothing; store errors still
    /// surface.
    pub async fn unlock(&self) -> Result<(), MutexError> {
        self.unlock_released().await?;
        Ok(())
    }

    /// Release, reporting which names were actually released (`None` when
    /// nothing was held by this owner).
    pub async fn unlock_released(&self) -> Result<Option<Vec<String>>, MutexError> {
        self.ctx.handler().unlock(&self.names, &self.owner()).await
    }

    /// Whether any of the names is currently held by anyone, per the store.
    pub async fn locked(&self) -> Result<bool, MutexError> {
        let store = self.ctx.store();
        let now = store.now_ms().await?;
        for name in &self.names {
            if let Some((_, lease)) = read_lease(store, name).await?
                && !lease.is_expired(now)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether *all* of the names are held by this mutex's owner with
    /// unexpired leases.
    pub async fn owned(&self) -> Result<bool, MutexError> {
        let store = self.ctx.store();
        let owner = self.owner();
        let now = store.now_ms().await?;
        for name in &self.names {
            match read_lease(store, name).await? {
                Some((_, lease)) if lease.owner == owner && !lease.is_expired(now) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Extend the lease deadline by `new_expire` (or the instance lease
    /// duration). Returns false once ownership has been lost; the optimistic
    /// handler additionally refuses when any lease has already expired (see
    /// [`MutexContext::can_refresh_expired`]).
    pub async fn refresh(&self, new_expire: Option<Duration>) -> Result<bool, MutexError> {
        let expire = new_expire.unwrap_or(self.expire);
        if expire.is_zero() {
            return Err(MutexError::Configuration {
                reason: "expire must be positive".to_string(),
            });
        }
        self.ctx.handler().refresh(&self.names, &self.owner(), expire).await
    }

    /// Acquire, run `body`, release on the way out.
    ///
    /// Fails with [`MutexError::Timeout`] when acquisition times out. If the
    /// body's future panics the lock is not released here; the lease expiry
    /// bounds the damage.
    pub async fn synchronize<T, F, Fut>(&self, block: Option<Duration>, body: F) -> Result<T, MutexError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let started = Instant::now();
        if !self.lock(block).await? {
            return Err(MutexError::Timeout {
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        let outcome = body().await;
        self.unlock().await?;
        Ok(outcome)
    }

    /// Release the lock and suspend until `timeout` elapses or another task
    /// calls [`wakeup`](DistributedMutex::wakeup) with this task's id, then
    /// reacquire.
    ///
    /// Together with `wakeup` this is the full surface a condition-variable
    /// type needs. Fails with [`MutexError::Timeout`] when reacquisition
    /// times out (under the instance block timeout).
    pub async fn sleep(&self, timeout: Option<Duration>) -> Result<(), MutexError> {
        let task = owner::current_task_id();
        let (sender, receiver) = oneshot::channel();
        self.park(task.clone(), sender);

        if let Err(e) = self.unlock().await {
            self.unpark(&task);
            return Err(e);
        }

        match timeout {
            Some(limit) => {
                tokio::select! {
                    _ = receiver => debug!(%task, "woken explicitly"),
                    _ = timer::sleep(limit) => debug!(%task, "sleep timer elapsed"),
                }
            }
            None => {
                let _ = receiver.await;
            }
        }
        self.unpark(&task);

        let started = Instant::now();
        if self.lock(None).await? {
            Ok(())
        } else {
            Err(MutexError::Timeout {
                waited_ms: started.elapsed().as_millis() as u64,
            })
        }
    }

    /// Wake a task suspended in this instance's
    /// [`sleep`](DistributedMutex::sleep). Returns whether a sleeper was
    /// found and resumed.
    pub fn wakeup(&self, task: &str) -> bool {
        let sender = self.sleepers.lock().unwrap_or_else(PoisonError::into_inner).remove(task);
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    fn park(&self, task: String, sender: oneshot::Sender<()>) {
        self.sleepers.lock().unwrap_or_else(PoisonError::into_inner).insert(task, sender);
    }

    fn unpark(&self, task: &str) {
        self.sleepers.lock().unwrap_or_else(PoisonError::into_inner).remove(task);
    }
}

//! Process-wide configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use remutex_core::LockStore;

use crate::error::MutexError;

/// Default lease duration: one day.
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(86_400);
/// Default cap on consecutive watcher reconnect failures.
pub const DEFAULT_RECONNECT_MAX: u32 = 10;

/// Which protocol handler to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Probe the store for scripting support at setup; fall back to
    /// [`Optimistic`](HandlerKind::Optimistic) when the probe fails.
    Auto,
    /// Primitive-command handler for stores without server-side scripting.
    Optimistic,
    /// Server-side script handler: one round trip per operation.
    Scripted,
}

impl HandlerKind {
    /// Stable lowercase name, as accepted in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Auto => "auto",
            HandlerKind::Optimistic => "optimistic",
            HandlerKind::Scripted => "scripted",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Watcher reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retries {
    /// Give up after this many consecutive failures.
    Limit(u32),
    /// Keep retrying for the life of the process.
    Forever,
}

/// Configuration consumed by [`MutexContext::setup`](crate::MutexContext::setup).
///
/// Either point `url` / `host` / `port` at a store (Unix sockets go through
/// `url` with a `redis+unix` scheme) or adopt a pre-built backend via
/// `store`, which takes precedence and subsumes every connection option.
#[derive(Clone)]
pub struct Config {
    /// Full connection URL; overrides `host`/`port`/`db`/`password`.
    pub url: Option<String>,
    /// Store host, used when `url` is unset.
    pub host: String,
    /// Store port, used when `url` is unset.
    pub port: u16,
    /// Database index.
    pub db: i64,
    /// Optional password.
    pub password: Option<String>,
    /// Connection-pool size for store commands.
    pub size: usize,
    /// Default lease duration for mutexes that do not override it.
    pub expire: Duration,
    /// Default namespace prefix for lock names.
    pub ns: Option<String>,
    /// Protocol handler selection.
    pub handler: HandlerKind,
    /// Watcher reconnect policy.
    pub reconnect_max: Retries,
    /// Pre-built store to adopt instead of connecting.
    pub store: Option<Arc<dyn LockStore>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
            size: 1,
            expire: DEFAULT_EXPIRE,
            ns: None,
            handler: HandlerKind::Auto,
            reconnect_max: Retries::Limit(DEFAULT_RECONNECT_MAX),
            store: None,
        }
    }
}

impl Config {
    /// Configuration for the store at `url`.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Configuration adopting a pre-built store.
    pub fn from_store(store: Arc<dyn LockStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// The effective connection URL.
    pub(crate) fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => match &self.password {
                Some(password) => format!("redis://:{password}@{}:{}/{}", self.host, self.port, self.db),
                None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
            },
        }
    }

    /// Reject configurations the protocol cannot honor.
    pub(crate) fn validate(&self) -> Result<(), MutexError> {
        if self.expire.is_zero() {
            return Err(MutexError::Configuration {
                reason: "default expire must be positive".to_string(),
            });
        }
        if self.size == 0 {
            return Err(MutexError::Configuration {
                reason: "connection pool size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("size", &self.size)
            .field("expire", &self.expire)
            .field("ns", &self.ns)
            .field("handler", &self.handler)
            .field("reconnect_max", &self.reconnect_max)
            .field("store", &self.store.as_ref().map(|_| "<adopted>"))
            .finish()
    }
}

//! Redis-backed [`LockStore`] implementation.

use async_trait::async_trait;
use redis::Client;
use redis::Cmd;
use redis::ErrorKind;
use redis::FromRedisValue;
use redis::RedisError;
use redis::RedisResult;
use redis::Value;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use remutex_core::LockStore;
use remutex_core::ScriptReply;
use remutex_core::StoreError;
use remutex_core::Subscription;

use crate::pool::ConnectionPool;
use crate::subscription::RedisSubscription;

/// A [`LockStore`] over a Redis server (or protocol-compatible proxy).
///
/// Plain commands run on pooled multiplexed connections held exclusively per
/// operation; the guarded operations use `WATCH`/`MULTI`/`EXEC` on the same
/// checked-out connection, which the exclusivity makes sound. Subscriptions
/// each own a dedicated connection, since subscribe mode precludes other
/// commands.
pub struct RedisLockStore {
    client: Client,
    pool: ConnectionPool,
}

impl RedisLockStore {
    /// Connect to the store at `url` (`redis://[:password@]host:port/db`).
    ///
    /// Validates the URL only; connections are established lazily on first
    /// use, up to `pool_size` concurrently.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Connection {
            reason: format!("invalid store url: {e}"),
        })?;
        Ok(Self::from_client(client, pool_size))
    }

    /// Adopt a pre-built client.
    pub fn from_client(client: Client, pool_size: usize) -> Self {
        let pool = ConnectionPool::new(client.clone(), pool_size);
        Self { client, pool }
    }

    async fn run<T: FromRedisValue>(&self, op: &'static str, cmd: Cmd) -> Result<T, StoreError> {
        let mut conn = self.pool.checkout().await?;
        let result: Result<T, RedisError> = cmd.query_async(&mut *conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                conn.discard();
                Err(store_error(op, e))
            }
        }
    }
}

fn store_error(op: &str, err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_timeout() || err.is_connection_refusal() || err.is_connection_dropped() {
        StoreError::Connection {
            reason: format!("{op}: {err}"),
        }
    } else if err.kind() == ErrorKind::ResponseError && err.to_string().contains("unknown command") {
        StoreError::Unsupported {
            operation: op.to_string(),
        }
    } else {
        StoreError::Protocol {
            reason: format!("{op}: {err}"),
        }
    }
}

fn convert_reply(value: Value) -> Result<ScriptReply, StoreError> {
    match value {
        Value::Nil => Ok(ScriptReply::Nil),
        Value::Int(n) => Ok(ScriptReply::Int(n)),
        Value::BulkString(bytes) => Ok(ScriptReply::Data(bytes)),
        Value::SimpleString(s) => Ok(ScriptReply::Data(s.into_bytes())),
        Value::Okay => Ok(ScriptReply::Data(b"OK".to_vec())),
        Value::Array(items) => Ok(ScriptReply::List(
            items.into_iter().map(convert_reply).collect::<Result<_, _>>()?,
        )),
        other => Err(StoreError::Protocol {
            reason: format!("unexpected script reply: {other:?}"),
        }),
    }
}

/// Guarded swap: `WATCH`ed read-compare-set, aborted by the server when the
/// key changes between the read and `EXEC`.
async fn guarded_swap(
    conn: &mut MultiplexedConnection,
    key: &str,
    expected: &str,
    value: &str,
) -> RedisResult<bool> {
    let _: () = redis::cmd("WATCH").arg(key).query_async(conn).await?;
    let current: Option<String> = redis::cmd("GET").arg(key).query_async(conn).await?;
    if current.as_deref() != Some(expected) {
        let _: () = redis::cmd("UNWATCH").query_async(conn).await?;
        return Ok(false);
    }
    // A nil EXEC reply means the watched key changed under us.
    let exec: Option<(String,)> = redis::pipe().atomic().cmd("SET").arg(key).arg(value).query_async(conn).await?;
    Ok(exec.is_some())
}

async fn guarded_delete(conn: &mut MultiplexedConnection, key: &str, expected: &str) -> RedisResult<bool> {
    let _: () = redis::cmd("WATCH").arg(key).query_async(conn).await?;
    let current: Option<String> = redis::cmd("GET").arg(key).query_async(conn).await?;
    if current.as_deref() != Some(expected) {
        let _: () = redis::cmd("UNWATCH").query_async(conn).await?;
        return Ok(false);
    }
    let exec: Option<(i64,)> = redis::pipe().atomic().cmd("DEL").arg(key).query_async(conn).await?;
    Ok(exec.is_some())
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run("get", cmd).await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        // Nil when the key was taken, OK when claimed.
        self.run("set_if_absent", cmd).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.checkout().await?;
        match guarded_swap(&mut conn, key, expected, value).await {
            Ok(swapped) => Ok(swapped),
            Err(e) => {
                conn.discard();
                Err(store_error("compare_and_swap", e))
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.checkout().await?;
        match guarded_delete(&mut conn, key, expected).await {
            Ok(deleted) => Ok(deleted),
            Err(e) => {
                conn.discard();
                Err(store_error("compare_and_delete", e))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let removed: i64 = self.run("delete", cmd).await?;
        Ok(removed > 0)
    }

    async fn expire_at(&self, key: &str, deadline_ms: u64) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("PEXPIREAT");
        cmd.arg(key).arg(deadline_ms);
        self.run("expire_at", cmd).await
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(payload);
        let receivers: i64 = self.run("publish", cmd).await?;
        debug!(channel, receivers, "published release message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| store_error("subscribe", e))?;
        pubsub.subscribe(channel).await.map_err(|e| store_error("subscribe", e))?;
        Ok(Box::new(RedisSubscription::new(pubsub)))
    }

    async fn now_ms(&self) -> Result<u64, StoreError> {
        let (secs, micros): (u64, u64) = self.run("now_ms", redis::cmd("TIME")).await?;
        Ok(secs * 1000 + micros / 1000)
    }

    async fn script_load(&self, source: &str) -> Result<String, StoreError> {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("LOAD").arg(source);
        self.run("script_load", cmd).await
    }

    async fn script_exists(&self, handle: &str) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SCRIPT");
        cmd.arg("EXISTS").arg(handle);
        let flags: Vec<bool> = self.run("script_exists", cmd).await?;
        Ok(flags.first().copied().unwrap_or(false))
    }

    async fn eval(&self, handle: &str, keys: &[String], args: &[String]) -> Result<ScriptReply, StoreError> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(handle).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }
        let mut conn = self.pool.checkout().await?;
        let result: Result<Value, RedisError> = cmd.query_async(&mut *conn).await;
        match result {
            Ok(value) => convert_reply(value),
            Err(e) if e.kind() == ErrorKind::NoScriptError => Err(StoreError::ScriptMissing {
                handle: handle.to_string(),
            }),
            Err(e) => {
                conn.discard();
                Err(store_error("eval", e))
            }
        }
    }
}

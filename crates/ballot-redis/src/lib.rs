//! ballot-redis
//!
//! Redis list backed [`VoteQueue`]. Producers `LPUSH`, the worker `BRPOP`s, so
//! the list tail is the head of the queue. `requeue` uses `RPUSH` to put a
//! payload back where the next `BRPOP` will find it.

use std::time::Duration;

use async_trait::async_trait;
use ballot_core::ports::{QueueError, VoteQueue};
use deadpool_redis::redis::{self, RedisError};
use deadpool_redis::{Pool, PoolError};
use tracing::{debug, info};

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub pool_size: usize,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            pool_size: 8,
        }
    }
}

impl RedisSettings {
    fn pool_config(&self) -> deadpool_redis::Config {
        deadpool_redis::Config {
            connection: Some(deadpool_redis::ConnectionInfo {
                addr: deadpool_redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
                redis: deadpool_redis::RedisConnectionInfo {
                    db: self.db,
                    username: None,
                    password: self.password.clone().filter(|p| !p.is_empty()),
                    protocol: deadpool_redis::ProtocolVersion::RESP2,
                },
            }),
            pool: Some(deadpool_redis::PoolConfig {
                max_size: self.pool_size,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct RedisVoteQueue {
    pool: Pool,
}

impl RedisVoteQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool without touching the network.
    pub fn from_settings(settings: &RedisSettings) -> Result<Self, QueueError> {
        let pool = settings
            .pool_config()
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| QueueError::Unavailable(format!("invalid redis config: {e}")))?;
        Ok(Self::new(pool))
    }

    /// `redis://[:password@]host:port/db`
    pub fn from_url(url: &str) -> Result<Self, QueueError> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| QueueError::Unavailable(format!("invalid redis config: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Build the pool and make sure the server answers.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, QueueError> {
        let queue = Self::from_settings(settings)?;
        queue.ping().await?;
        info!(host = %settings.host, port = settings.port, db = settings.db, "Connected to Redis");
        Ok(queue)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, QueueError> {
        self.pool.get().await.map_err(pool_error)
    }
}

fn pool_error(e: PoolError) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

fn redis_error(e: RedisError) -> QueueError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        QueueError::Unavailable(e.to_string())
    } else {
        QueueError::OperationFailed(e.to_string())
    }
}

#[async_trait]
impl VoteQueue for RedisVoteQueue {
    async fn push(&self, key: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn requeue(&self, key: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        debug!(key, "Requeued payload at the head");
        Ok(())
    }

    async fn pop(&self, key: &str, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn().await?;
        // BRPOP returns [key, value] or nil on timeout
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn len(&self, key: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let depth: u64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(depth)
    }

    async fn clear(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }
}

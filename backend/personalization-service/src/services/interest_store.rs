// ============================================
// Interest Vector Store (興趣向量持久化)
// ============================================
//
// Keyed JSON storage for the finalized interest vector so it survives
// process restarts. Two backends:
// - PersistentCache: one JSON file per store name, rewritten atomically
// - RedisInterestVectorStore: string keys "{name}:{key}"

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{PersonalizationError, Result};

/// Store name, and the key the provider writes the vector under.
pub const INTEREST_VECTOR_STORE: &str = "interest-vector";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InterestVectorStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

fn store_error(action: &str, path: &Path, err: std::io::Error) -> PersonalizationError {
    PersonalizationError::Store(format!("failed to {} {}: {}", action, path.display(), err))
}

/// File-backed cache at `{dir}/{name}.json`.
pub struct PersistentCache {
    path: PathBuf,
    /// `None` until the file has been read
    data: RwLock<Option<Map<String, Value>>>,
}

impl PersistentCache {
    /// Open the cache; with `preload` the file is read immediately.
    pub async fn open(dir: impl AsRef<Path>, name: &str, preload: bool) -> Result<Self> {
        let cache = Self {
            path: dir.as_ref().join(format!("{}.json", name)),
            data: RwLock::new(None),
        };

        if preload {
            let data = cache.load().await?;
            debug!(path = %cache.path.display(), entries = data.len(), "Preloaded persistent cache");
            *cache.data.write().await = Some(data);
        }

        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes)? {
                Value::Object(data) => Ok(data),
                _ => Err(PersonalizationError::Store(format!(
                    "{} does not hold a JSON object",
                    self.path.display()
                ))),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(store_error("read", &self.path, e)),
        }
    }

    async fn persist(&self, data: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_error("create", parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(data)?)
            .await
            .map_err(|e| store_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| store_error("replace", &self.path, e))
    }
}

#[async_trait]
impl InterestVectorStore for PersistentCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(data) = self.data.read().await.as_ref() {
            return Ok(data.get(key).cloned());
        }

        let mut guard = self.data.write().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|data| data.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut guard = self.data.write().await;
        let mut data = match guard.as_ref() {
            Some(data) => data.clone(),
            None => self.load().await?,
        };
        data.insert(key.to_string(), value);

        // Memory only follows a successful write
        self.persist(&data).await?;
        *guard = Some(data);
        Ok(())
    }
}

/// Redis-backed store; values are JSON strings under `{name}:{key}`.
pub struct RedisInterestVectorStore {
    redis: ConnectionManager,
    name: String,
    ttl_secs: Option<u64>,
}

impl RedisInterestVectorStore {
    pub fn new(redis: ConnectionManager, name: &str, ttl_secs: Option<u64>) -> Self {
        Self {
            redis,
            name: name.to_string(),
            ttl_secs,
        }
    }

    fn redis_key(&self, key: &str) -> String {
        redis_key(&self.name, key)
    }
}

fn redis_key(name: &str, key: &str) -> String {
    format!("{}:{}", name, key)
}

#[async_trait]
impl InterestVectorStore for RedisInterestVectorStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(self.redis_key(key)).await?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(PersonalizationError::from))
            .transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut conn = self.redis.clone();
        let redis_key = self.redis_key(key);
        let payload = serde_json::to_string(&value)?;

        match self.ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(&redis_key, payload, ttl).await?;
            }
            None => {
                let _: () = conn.set(&redis_key, payload).await?;
            }
        }

        info!(key = %redis_key, "Stored interest vector in Redis");
        Ok(())
    }
}

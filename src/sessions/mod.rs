use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{MaestroError, Result};

/// 会话存储 trait：角色键 → 会话 id 的持久化
///
/// 运行开始时整体读取，之后每次更新增量落盘，
/// 使后续运行可以续接曲目中途的会话。
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, String>>;
    async fn save(&self, key: &str, session_id: &str) -> Result<()>;
}

pub type DynSessionStore = Arc<dyn SessionStore>;

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_all(&self) -> Result<HashMap<String, String>> {
        Ok(self.inner.read().clone())
    }

    async fn save(&self, key: &str, session_id: &str) -> Result<()> {
        self.inner
            .write()
            .insert(key.to_string(), session_id.to_string());
        Ok(())
    }
}

/// 文件会话存储：整张表序列化为 JSON，每次保存都重写
pub struct FileSessionStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl FileSessionStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| MaestroError::SessionStore(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(MaestroError::SessionStore(e.to_string())),
        };
        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load_all(&self) -> Result<HashMap<String, String>> {
        Ok(self.cache.read().clone())
    }

    async fn save(&self, key: &str, session_id: &str) -> Result<()> {
        let serialized = {
            let mut cache = self.cache.write();
            cache.insert(key.to_string(), session_id.to_string());
            serde_json::to_vec_pretty(&*cache)
                .map_err(|e| MaestroError::SessionStore(e.to_string()))?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MaestroError::SessionStore(e.to_string()))?;
        }
        tokio::fs::write(&self.path, serialized)
            .await
            .map_err(|e| MaestroError::SessionStore(e.to_string()))?;
        Ok(())
    }
}

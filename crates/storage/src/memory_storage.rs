use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{Script, ScriptRepository, StorageError, StorageResult};

/// In-memory script repository
pub struct MemoryScriptRepository {
    scripts: RwLock<HashMap<Uuid, Script>>,
}

impl MemoryScriptRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryScriptRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptRepository for MemoryScriptRepository {
    async fn add(&self, script: Script) -> StorageResult<Script> {
        let mut scripts = self.scripts.write().await;
        if scripts.contains_key(&script.id) {
            return Err(StorageError::AlreadyExists(script.id.to_string()));
        }
        debug!(script_id = %script.id, name = %script.name, "storing script");
        scripts.insert(script.id, script.clone());
        Ok(script)
    }

    async fn get_by_id(&self, id: Uuid) -> StorageResult<Option<Script>> {
        let scripts = self.scripts.read().await;
        Ok(scripts.get(&id).cloned())
    }

    async fn get_by_user(&self, user_id: &str) -> StorageResult<Vec<Script>> {
        let scripts = self.scripts.read().await;
        let mut visible: Vec<Script> = scripts
            .values()
            .filter(|s| s.is_visible_to(user_id))
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(visible)
    }

    async fn update(&self, mut script: Script) -> StorageResult<Script> {
        let mut scripts = self.scripts.write().await;
        if !scripts.contains_key(&script.id) {
            return Err(StorageError::KeyNotFound(script.id.to_string()));
        }
        script.updated_at = Utc::now();
        scripts.insert(script.id, script.clone());
        Ok(script)
    }

    async fn delete(&self, id: Uuid) -> StorageResult<()> {
        let mut scripts = self.scripts.write().await;
        if scripts.remove(&id).is_none() {
            return Err(StorageError::KeyNotFound(id.to_string()));
        }
        Ok(())
    }
}

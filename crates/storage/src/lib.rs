//! Script library storage
//!
//! This crate provides the boundary the job runtime uses to load saved
//! scripts:
//! - the `Script` entity
//! - the `ScriptRepository` trait
//! - an in-memory repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod memory_storage;

pub use memory_storage::MemoryScriptRepository;

/// Storage-related errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A saved mission script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub description: String,
    pub created_by_user_id: String,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Script {
    /// Create a new private script owned by `user_id`
    pub fn new(
        name: impl Into<String>,
        content: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            content: content.into(),
            description: String::new(),
            created_by_user_id: user_id.into(),
            is_public: false,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `user_id` may read and run this script
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.is_public || self.created_by_user_id == user_id
    }
}

/// Persistence contract for saved scripts
#[async_trait]
pub trait ScriptRepository: Send + Sync + 'static {
    /// Store a new script
    async fn add(&self, script: Script) -> StorageResult<Script>;

    /// Fetch a script by id
    async fn get_by_id(&self, id: Uuid) -> StorageResult<Option<Script>>;

    /// Scripts owned by `user_id` plus every public script, sorted by name
    async fn get_by_user(&self, user_id: &str) -> StorageResult<Vec<Script>>;

    /// Replace an existing script
    async fn update(&self, script: Script) -> StorageResult<Script>;

    /// Remove a script
    async fn delete(&self, id: Uuid) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_visibility() {
        let private = Script::new("LEO transfer", "Create Spacecraft Sat", "alice");
        assert!(private.is_visible_to("alice"));
        assert!(!private.is_visible_to("bob"));

        let shared = private.clone().public();
        assert!(shared.is_visible_to("bob"));
    }

    #[test]
    fn test_script_builder() {
        let script = Script::new("GEO", "Create Spacecraft Geo", "alice")
            .with_description("Station keeping")
            .with_tags(["geo", "demo"]);
        assert_eq!(script.description, "Station keeping");
        assert_eq!(script.tags, vec!["geo".to_string(), "demo".to_string()]);
        assert!(!script.is_public);
    }
}

//! Memory record, keys, and content-addressed ids.
//!
//! A memory id is the lowercase hex SHA-256 of the memory text plus its sorted
//! topics, so identical facts collapse to one row regardless of topic order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::memory::service::MemoryError;

/// One extracted fact: text, optional topic labels, and when it last changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub text: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn new(text: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            text: text.into(),
            topics,
            last_updated: Some(Utc::now()),
        }
    }
}

/// Stored memory row. `(app_name, user_id, id)` is unique per backend.
///
/// A set `deleted_at` hides the row from every read while soft delete is on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub memory: Memory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    /// New live entry for the given user, stamped now.
    pub fn new(key: &UserKey, memory: Memory) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(&memory),
            app_name: key.app_name.clone(),
            user_id: key.user_id.clone(),
            memory,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// True when the row is visible to reads (not soft-deleted).
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Identifies one user's memory space within an app.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserKey {
    pub app_name: String,
    pub user_id: String,
}

impl UserKey {
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
        }
    }

    /// Fails with [`MemoryError::InvalidKey`] naming the first missing field.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.app_name.is_empty() {
            return Err(MemoryError::InvalidKey("app_name required".into()));
        }
        if self.user_id.is_empty() {
            return Err(MemoryError::InvalidKey("user_id required".into()));
        }
        Ok(())
    }
}

/// Identifies one stored memory: user key plus memory id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryKey {
    pub app_name: String,
    pub user_id: String,
    pub memory_id: String,
}

impl MemoryKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        memory_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            memory_id: memory_id.into(),
        }
    }

    pub fn from_user(key: &UserKey, memory_id: impl Into<String>) -> Self {
        Self {
            app_name: key.app_name.clone(),
            user_id: key.user_id.clone(),
            memory_id: memory_id.into(),
        }
    }

    pub fn user_key(&self) -> UserKey {
        UserKey {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.app_name.is_empty() {
            return Err(MemoryError::InvalidKey("app_name required".into()));
        }
        if self.user_id.is_empty() {
            return Err(MemoryError::InvalidKey("user_id required".into()));
        }
        if self.memory_id.is_empty() {
            return Err(MemoryError::InvalidKey("memory_id required".into()));
        }
        Ok(())
    }
}

/// Content-addressed id: 64-hex SHA-256 over `memory:<text>` and, when topics
/// are present, `|topics:<sorted topics joined by comma>`. Topic order never
/// changes identity; the input memory is not mutated.
pub fn generate_id(memory: &Memory) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"memory:");
    hasher.update(memory.text.as_bytes());
    if !memory.topics.is_empty() {
        let mut topics = memory.topics.clone();
        topics.sort();
        hasher.update(b"|topics:");
        hasher.update(topics.join(",").as_bytes());
    }
    hex_lower(&hasher.finalize())
}

/// Id salted by app and user, for backends that scope identity per user.
pub fn generate_scoped_id(memory: &Memory, app_name: &str, user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("app:{}|user:{}|", app_name, user_id).as_bytes());
    hasher.update(b"memory:");
    hasher.update(memory.text.as_bytes());
    if !memory.topics.is_empty() {
        let mut topics = memory.topics.clone();
        topics.sort();
        hasher.update(b"|topics:");
        hasher.update(topics.join(",").as_bytes());
    }
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

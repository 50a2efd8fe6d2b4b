/// Session storage: signed-in user info and bearer token
use crate::error::{ChatError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

/// Key holding the JSON user info written by the sign-in flow
pub const USER_INFO_KEY: &str = "user_info";
/// Key holding the raw bearer token
pub const CREDENTIAL_KEY: &str = "access_token";

/// Key-value capability injected into the chat context
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<bool>;
}

/// Session store persisted in sled DB
pub struct SledSessionStore {
    db: sled::Db,
}

impl SledSessionStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(ChatError::Io)?;
        let db = sled::open(data_dir.join("session.db"))
            .map_err(|e| ChatError::Storage(format!("session DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl SessionStore for SledSessionStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| ChatError::Storage(format!("get {}: {}", key, e)))?
        {
            Some(val) => {
                let s = String::from_utf8(val.to_vec())
                    .map_err(|e| ChatError::Storage(format!("{} is not UTF-8: {}", key, e)))?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value.as_bytes())
            .map_err(|e| ChatError::Storage(format!("set {}: {}", key, e)))?;
        self.db
            .flush()
            .map_err(|e| ChatError::Storage(format!("flush: {}", e)))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .db
            .remove(key.as_bytes())
            .map_err(|e| ChatError::Storage(format!("remove {}: {}", key, e)))?;
        Ok(removed.is_some())
    }
}

impl Clone for SledSessionStore {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}

/// In-process store, for tests and embedding hosts that own the sign-in state
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: RwLock::new(map),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ChatError::Storage("session map poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ChatError::Storage("session map poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ChatError::Storage("session map poisoned".to_string()))?;
        Ok(entries.remove(key).is_some())
    }
}

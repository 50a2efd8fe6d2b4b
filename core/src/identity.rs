/// Signed-in user identity, resolved from the session store
use crate::error::{ChatError, Result};
use crate::session_store::{SessionStore, CREDENTIAL_KEY, USER_INFO_KEY};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nickname plus bearer credential. Immutable for a conversation's lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    nickname: String,
    credential: Option<String>,
}

/// What the sign-in flow stores under `user_info`
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredUserInfo {
    pub nickname: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    pub fn new(nickname: impl Into<String>, credential: Option<String>) -> Result<Self> {
        let nickname = nickname.into();
        if nickname.trim().is_empty() {
            return Err(ChatError::AuthMissing("nickname is empty".to_string()));
        }
        Ok(Self {
            nickname,
            credential: credential.filter(|c| !c.trim().is_empty()),
        })
    }

    /// Read the identity once from the store. A missing or unreadable user info is `AuthMissing`;
    /// a missing token is not (only translation needs it, and reads it at call time).
    pub fn load(store: &dyn SessionStore) -> Result<Self> {
        let raw = store
            .get(USER_INFO_KEY)?
            .ok_or_else(|| ChatError::AuthMissing("no user info in session".to_string()))?;
        let info: StoredUserInfo = serde_json::from_str(&raw)
            .map_err(|e| ChatError::AuthMissing(format!("unreadable user info: {}", e)))?;
        let credential = store.get(CREDENTIAL_KEY)?;
        Self::new(info.nickname, credential)
    }

    /// Write a signed-in user into the store (what the external sign-in flow does)
    pub fn save(&self, store: &dyn SessionStore) -> Result<()> {
        let info = StoredUserInfo {
            nickname: self.nickname.clone(),
            extra: serde_json::Map::new(),
        };
        store.set(USER_INFO_KEY, &serde_json::to_string(&info)?)?;
        match &self.credential {
            Some(token) => store.set(CREDENTIAL_KEY, token)?,
            None => {
                store.remove(CREDENTIAL_KEY)?;
            }
        }
        Ok(())
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}

// Keep the token out of logs
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("nickname", &self.nickname)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

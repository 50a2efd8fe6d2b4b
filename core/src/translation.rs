/// Translation gateway: bearer-authenticated form POST, first candidate wins
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::session_store::{SessionStore, CREDENTIAL_KEY};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_lang: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct TranslationResponse {
    #[serde(default)]
    translations: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    text: String,
}

/// `POST {api}/api/translations` with `text` and `target_lang`
#[derive(Clone)]
pub struct HttpTranslator {
    client: Client,
    url: String,
    session: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl HttpTranslator {
    pub fn new(client: Client, config: &Config, session: Arc<dyn SessionStore>) -> Self {
        Self {
            client,
            url: config.translation_url(),
            session,
            timeout: config.request_timeout,
        }
    }

    fn credential(&self) -> Result<String> {
        self.session
            .get(CREDENTIAL_KEY)
            .map_err(|e| ChatError::Translation(format!("cannot read credential: {}", e)))?
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ChatError::Translation("no access token in session".to_string()))
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, target_lang: &str) -> Result<String> {
        // Read at call time: the sign-in flow may have refreshed it
        let token = self.credential()?;

        debug!("Translating {} chars to {}", text.chars().count(), target_lang);
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .form(&[("text", text), ("target_lang", target_lang)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ChatError::Translation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChatError::Translation(format!(
                "translation API error ({}): {}",
                status, body
            )));
        }

        let parsed: TranslationResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Translation(format!("malformed response: {}", e)))?;

        first_candidate(parsed)
    }
}

fn first_candidate(response: TranslationResponse) -> Result<String> {
    match response.translations.into_iter().next() {
        Some(candidate) if !candidate.text.trim().is_empty() => Ok(candidate.text),
        Some(_) => Err(ChatError::Translation("empty translation".to_string())),
        None => Err(ChatError::Translation("no translation candidates".to_string())),
    }
}

/// Configuration management
use crate::error::{ChatError, Result};
use crate::realtime::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://mixmix2.store";
const DEFAULT_WS_URL: &str = "wss://mixmix2.store/ws/chat";
const DEFAULT_TARGET_LANG: &str = "JA";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Conversation partner (positional argument of the terminal client)
    pub recipient: Option<String>,

    /// Base URL of the request/response API (history, translation)
    pub api_base_url: String,

    /// Streaming endpoint
    pub ws_url: String,

    /// Language every draft is translated into
    pub target_lang: String,

    /// Directory holding the session store (defaults to `.mixchat`)
    pub data_dir: Option<PathBuf>,

    /// Upper bound for history and translation requests
    pub request_timeout: Duration,

    /// Upper bound for a single connection attempt
    pub connect_timeout: Duration,

    /// Retry policy for establishing the streaming connection
    pub reconnect: ReconnectPolicy,

    /// Capacity of the conversation event channel
    pub event_buffer: usize,

    /// Capacity of each connection's inbound queue
    pub inbound_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recipient: None,
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            target_lang: DEFAULT_TARGET_LANG.to_string(),
            data_dir: None,
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            event_buffer: 256,
            inbound_buffer: 256,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--api-url" => {
                    config.api_base_url = flag_value(args, i, "--api-url")?.to_string();
                    i += 2;
                }
                "--ws-url" => {
                    config.ws_url = flag_value(args, i, "--ws-url")?.to_string();
                    i += 2;
                }
                "--target-lang" => {
                    config.target_lang = flag_value(args, i, "--target-lang")?.to_uppercase();
                    i += 2;
                }
                "--data-dir" => {
                    config.data_dir = Some(PathBuf::from(flag_value(args, i, "--data-dir")?));
                    i += 2;
                }
                "--timeout-secs" => {
                    let secs = flag_value(args, i, "--timeout-secs")?
                        .parse::<u64>()
                        .map_err(|_| {
                            ChatError::Config("--timeout-secs must be a whole number".to_string())
                        })?;
                    config.request_timeout = Duration::from_secs(secs);
                    i += 2;
                }
                "--retries" => {
                    let attempts = flag_value(args, i, "--retries")?
                        .parse::<u32>()
                        .map_err(|_| {
                            ChatError::Config("--retries must be a whole number".to_string())
                        })?;
                    config.reconnect.max_attempts = attempts.max(1);
                    i += 2;
                }
                other if other.starts_with("--") => {
                    return Err(ChatError::Config(format!("Unknown flag: {}", other)));
                }
                other => {
                    if config.recipient.is_some() {
                        return Err(ChatError::Config(format!(
                            "Unexpected argument: {}",
                            other
                        )));
                    }
                    config.recipient = Some(other.to_string());
                    i += 1;
                }
            }
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Env overrides (nice for scripts)
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("MIXCHAT_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = std::env::var("MIXCHAT_WS_URL") {
            self.ws_url = url;
        }
        if let Ok(lang) = std::env::var("MIXCHAT_TARGET_LANG") {
            self.target_lang = lang.to_uppercase();
        }
        if let Ok(dir) = std::env::var("MIXCHAT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ChatError::Config(format!(
                "API URL must be http(s): {}",
                self.api_base_url
            )));
        }
        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            return Err(ChatError::Config(format!(
                "Streaming URL must be ws(s): {}",
                self.ws_url
            )));
        }
        if self.target_lang.trim().is_empty() {
            return Err(ChatError::Config("Target language is empty".to_string()));
        }
        Ok(())
    }

    /// `GET` endpoint for the message history with `recipient`
    pub fn history_url(&self, recipient: &str) -> String {
        format!(
            "{}/api/chat-rooms?{}",
            self.api_base_url.trim_end_matches('/'),
            urlencoding::encode(recipient)
        )
    }

    pub fn translation_url(&self) -> String {
        format!("{}/api/translations", self.api_base_url.trim_end_matches('/'))
    }

    /// Streaming endpoint routed by the local user's nickname
    pub fn stream_url(&self, nickname: &str) -> String {
        let sep = if self.ws_url.contains('?') { '&' } else { '?' };
        format!("{}{}userId={}", self.ws_url, sep, urlencoding::encode(nickname))
    }

    pub fn session_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".mixchat"))
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| ChatError::Config(format!("{} requires a value", flag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_recipient_and_flags() {
        let config = Config::from_args(&args(&[
            "mixchat",
            "bob",
            "--api-url",
            "http://127.0.0.1:8080",
            "--target-lang",
            "en",
            "--retries",
            "0",
        ]))
        .unwrap();

        assert_eq!(config.recipient.as_deref(), Some("bob"));
        assert_eq!(config.api_base_url, "http://127.0.0.1:8080");
        assert_eq!(config.target_lang, "EN");
        assert_eq!(config.reconnect.max_attempts, 1);
    }

    #[test]
    fn rejects_missing_flag_value() {
        let err = Config::from_args(&args(&["mixchat", "--ws-url"])).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn builds_endpoint_urls() {
        let config = Config {
            api_base_url: "http://localhost:9000/".to_string(),
            ws_url: "ws://localhost:9001/ws".to_string(),
            ..Default::default()
        };

        assert_eq!(
            config.history_url("kim min"),
            "http://localhost:9000/api/chat-rooms?kim%20min"
        );
        assert_eq!(
            config.translation_url(),
            "http://localhost:9000/api/translations"
        );
        assert_eq!(
            config.stream_url("alice"),
            "ws://localhost:9001/ws?userId=alice"
        );
    }
}

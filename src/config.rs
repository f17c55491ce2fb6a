//! Configuration for chat-realtime
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::time::Duration;
use url::Url;

use crate::account::AccountConfig;
use crate::chat::ChatClientConfig;
use crate::conversation::MatchStrategy;
use crate::credentials::DEFAULT_CREDENTIAL_TTL;
use crate::identity::DEFAULT_LOOKUP_URL;
use crate::realtime::{ReconnectPolicy, SocketConfig};

/// chat-realtime - terminal client for the realtime chat backend
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-realtime")]
#[command(about = "Realtime chat client with automatic reconnection")]
pub struct Args {
    /// Chat backend URL (http, https, ws or wss)
    #[arg(long, env = "CHAT_SERVER_URL", default_value = "http://localhost:3002")]
    pub server_url: String,

    /// Socket.IO endpoint path
    #[arg(long, env = "CHAT_SOCKET_PATH", default_value = "/socket.io/")]
    pub socket_path: String,

    /// Socket.IO namespace to join
    #[arg(long, env = "CHAT_NAMESPACE", default_value = "/")]
    pub namespace: String,

    /// Event name for chat messages in both directions
    #[arg(long, env = "CHAT_EVENT_NAME", default_value = "message")]
    pub event_name: String,

    /// Account API base URL (login, signup, password reset)
    #[arg(long, env = "CHAT_API_URL", default_value = "http://localhost:3000")]
    pub api_url: String,

    /// Public address lookup endpoint, expected to return {"ip": "..."}
    #[arg(long, env = "ORIGIN_LOOKUP_URL", default_value = DEFAULT_LOOKUP_URL)]
    pub origin_lookup_url: String,

    /// Fixed public address; skips the lookup when set
    #[arg(long, env = "ORIGIN_ADDRESS")]
    pub origin_address: Option<String>,

    /// Reconnection attempts after a drop (0 = never reconnect)
    #[arg(long, env = "RECONNECT_ATTEMPTS", default_value = "10")]
    pub reconnect_attempts: u32,

    /// Delay before each reconnection attempt in milliseconds
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value = "5000")]
    pub reconnect_delay_ms: u64,

    /// Socket handshake timeout in milliseconds
    #[arg(long, env = "HANDSHAKE_TIMEOUT_MS", default_value = "20000")]
    pub handshake_timeout_ms: u64,

    /// HTTP request timeout in milliseconds
    #[arg(long, env = "HTTP_TIMEOUT_MS", default_value = "10000")]
    pub http_timeout_ms: u64,

    /// Credential lifetime in seconds
    #[arg(long, env = "CREDENTIAL_TTL_SECONDS", default_value_t = DEFAULT_CREDENTIAL_TTL.as_secs())]
    pub credential_ttl_seconds: u64,

    /// How responses are matched to pending messages
    #[arg(
        long,
        env = "MATCH_STRATEGY",
        value_enum,
        ignore_case = true,
        default_value_t = MatchStrategy::FirstPending
    )]
    pub match_strategy: MatchStrategy,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Sign in with this email on startup
    #[arg(long, env = "CHAT_EMAIL")]
    pub email: Option<String>,

    /// Password for the startup sign-in
    #[arg(long, env = "CHAT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [("CHAT_SERVER_URL", &self.server_url), ("CHAT_API_URL", &self.api_url)] {
            let url = Url::parse(value).map_err(|e| format!("{} is not a valid URL: {}", name, e))?;
            if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
                return Err(format!("{} has unsupported scheme '{}'", name, url.scheme()));
            }
        }

        if self.origin_address.is_none() {
            Url::parse(&self.origin_lookup_url)
                .map_err(|e| format!("ORIGIN_LOOKUP_URL is not a valid URL: {}", e))?;
        }

        if !self.socket_path.starts_with('/') {
            return Err("CHAT_SOCKET_PATH must start with '/'".to_string());
        }

        if !self.namespace.starts_with('/') {
            return Err("CHAT_NAMESPACE must start with '/'".to_string());
        }

        if self.event_name.trim().is_empty() {
            return Err("CHAT_EVENT_NAME must not be empty".to_string());
        }

        if self.handshake_timeout_ms == 0 {
            return Err("HANDSHAKE_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.email.is_some() != self.password.is_some() {
            return Err("CHAT_EMAIL and CHAT_PASSWORD must be set together".to_string());
        }

        Ok(())
    }

    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig {
            server_url: self.server_url.clone(),
            path: self.socket_path.clone(),
            namespace: self.namespace.clone(),
            event_name: self.event_name.clone(),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn chat_config(&self) -> ChatClientConfig {
        ChatClientConfig {
            reconnect: self.reconnect_policy(),
            match_strategy: self.match_strategy,
            ..Default::default()
        }
    }

    pub fn account_config(&self) -> AccountConfig {
        AccountConfig {
            base_url: self.api_url.trim_end_matches('/').to_string(),
            request_timeout: self.http_timeout(),
            credential_ttl: Duration::from_secs(self.credential_ttl_seconds),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["chat-realtime"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&["--server-url", "http://localhost:3002", "--api-url", "http://localhost:3000"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(args.match_strategy, MatchStrategy::FirstPending);
    }

    #[test]
    fn test_rejects_bad_server_url() {
        let args = parse(&["--server-url", "ftp://chat.example.com"]);
        assert!(args.validate().unwrap_err().contains("CHAT_SERVER_URL"));

        let args = parse(&["--server-url", "not a url"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let err = Args::try_parse_from(["chat-realtime", "--match-strategy", "newest"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);

        let args = parse(&["--match-strategy", "FIFO"]);
        assert_eq!(args.match_strategy, MatchStrategy::FirstPending);
    }

    #[test]
    fn test_email_requires_password() {
        let args = parse(&["--email", "a@example.com"]);
        assert!(args.validate().unwrap_err().contains("CHAT_PASSWORD"));
    }

    #[test]
    fn test_conversions() {
        let args = parse(&[
            "--reconnect-attempts",
            "3",
            "--reconnect-delay-ms",
            "250",
            "--namespace",
            "/chat",
            "--match-strategy",
            "current-text",
            "--api-url",
            "https://api.example.com/",
        ]);

        let policy = args.reconnect_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(250));
        assert_eq!(args.socket_config().namespace, "/chat");
        assert_eq!(args.chat_config().match_strategy, MatchStrategy::CurrentText);
        assert_eq!(args.account_config().base_url, "https://api.example.com");
    }
}

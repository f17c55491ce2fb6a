//! Account Service
//!
//! HTTP calls for login, signup and password reset against the chat
//! backend's REST API. A successful login writes the credential store,
//! which in turn makes the identity resolver rebuild the realtime
//! connection with the new token.
//!
//! | Operation            | Endpoint                      |
//! |----------------------|-------------------------------|
//! | `login`              | `POST /auth/login`            |
//! | `sign_up`            | `POST /users`                 |
//! | `send_reset_code`    | `POST /auth/forgot-password`  |
//! | `verify_reset_code`  | `POST /auth/verify-otp`       |
//! | `reset_password`     | `POST /auth/reset-password`   |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::credentials::{MemoryCredentialStore, UserProfile, DEFAULT_CREDENTIAL_TTL};
use crate::error::ChatError;

/// Configuration for the account service.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Base URL of the REST API
    pub base_url: String,
    /// Timeout for individual requests
    pub request_timeout: Duration,
    /// Lifetime of a credential obtained by login
    pub credential_ttl: Duration,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(10),
            credential_ttl: DEFAULT_CREDENTIAL_TTL,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    user: Option<UserProfile>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordRequest<'a> {
    new_password: &'a str,
    email: &'a str,
}

/// Client for the backend's account endpoints.
pub struct AccountService {
    config: AccountConfig,
    credentials: Arc<MemoryCredentialStore>,
    http_client: reqwest::Client,
}

impl AccountService {
    pub fn new(config: AccountConfig, credentials: Arc<MemoryCredentialStore>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("chat-realtime/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            config,
            credentials,
            http_client,
        }
    }

    /// Log in and store the returned credential.
    ///
    /// The user is only marked authenticated when the backend also returns
    /// a profile.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<UserProfile>, ChatError> {
        let body = self
            .post("/auth/login", &json!({ "email": email, "password": password }))
            .await?;
        let login: LoginResponse = serde_json::from_value(body)?;

        match login.user {
            Some(user) => {
                info!(user_id = user.id, "Login successful");
                self.credentials.sign_in(
                    login.access_token,
                    Some(user.clone()),
                    Some(self.config.credential_ttl),
                );
                Ok(Some(user))
            }
            None => {
                warn!("Login returned no user profile; token stored unauthenticated");
                self.credentials
                    .save_token(login.access_token, Some(self.config.credential_ttl));
                Ok(None)
            }
        }
    }

    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<(), ChatError> {
        self.post(
            "/users",
            &json!({ "name": name, "email": email, "password": password }),
        )
        .await?;
        info!("Signup successful");
        Ok(())
    }

    /// Ask the backend to email a one-time reset code.
    pub async fn send_reset_code(&self, email: &str) -> Result<(), ChatError> {
        self.post("/auth/forgot-password", &json!({ "email": email }))
            .await?;
        info!("Reset code sent");
        Ok(())
    }

    pub async fn verify_reset_code(&self, otp: &str, email: &str) -> Result<(), ChatError> {
        self.post("/auth/verify-otp", &json!({ "otp": otp, "email": email }))
            .await?;
        info!("Reset code verified");
        Ok(())
    }

    pub async fn reset_password(&self, new_password: &str, email: &str) -> Result<(), ChatError> {
        self.post(
            "/auth/reset-password",
            &ResetPasswordRequest {
                new_password,
                email,
            },
        )
        .await?;
        info!("Password changed");
        Ok(())
    }

    /// Clear the stored credential.
    pub fn logout(&self) {
        self.credentials.sign_out();
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        debug!(url = %url, "Account request");

        let response = self.http_client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            return Err(ChatError::Account {
                status: status.as_u16(),
                message: error_message(&value)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("failed").to_string()),
            });
        }
        Ok(value)
    }
}

/// Pull a human-readable message out of an error body.
///
/// The backend reports either `{"message": "..."}` or, for validation
/// failures, `{"message": ["...", "..."]}`.
fn error_message(body: &Value) -> Option<String> {
    match body.get("message")? {
        Value::String(message) => Some(message.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

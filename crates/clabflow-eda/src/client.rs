//! EDA REST client

use crate::auth;
use crate::error::{EdaError, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;

/// Connection settings for an EDA instance
#[derive(Clone)]
pub struct EdaConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Keycloak secret of the `eda` client; fetched with admin credentials
    /// when unset
    pub client_secret: Option<String>,
    pub verify_tls: bool,
    /// Per-request timeout in seconds
    pub timeout: u64,
}

impl Default for EdaConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            client_secret: None,
            verify_tls: true,
            timeout: 30,
        }
    }
}

impl std::fmt::Debug for EdaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdaConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EdaConfig {
    /// Create EdaConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("EDA_URL")
            .map_err(|_| EdaError::MissingEnvVar("EDA_URL".to_string()))?;
        let defaults = Self::default();
        Ok(Self {
            url,
            username: std::env::var("EDA_USER").unwrap_or(defaults.username),
            password: std::env::var("EDA_PASSWORD").unwrap_or(defaults.password),
            client_secret: std::env::var("EDA_CLIENT_SECRET").ok(),
            verify_tls: std::env::var("EDA_INSECURE").map_or(true, |v| v != "true" && v != "1"),
            timeout: defaults.timeout,
        })
    }
}

/// Body of a successful call; `None` for 404
pub(crate) type Reply = Option<Value>;

/// Authenticated EDA API client
pub struct EdaClient {
    http: reqwest::Client,
    base: String,
    config: EdaConfig,
    token: RwLock<Option<String>>,
    client_secret: RwLock<Option<String>>,
}

impl EdaClient {
    pub fn new(config: EdaConfig) -> Result<Self> {
        let base = config.url.trim_end_matches('/').to_string();
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(EdaError::InvalidConfig(format!(
                "EDA URL must start with http:// or https://: '{}'",
                config.url
            )));
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(config.timeout.min(10)))
            .build()?;
        Ok(Self {
            http,
            base,
            client_secret: RwLock::new(config.client_secret.clone()),
            config,
            token: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.base
    }

    /// Acquire a fresh access token
    pub async fn login(&self) -> Result<()> {
        let secret = match self.client_secret.read().await.clone() {
            Some(secret) => secret,
            None => {
                let secret = auth::fetch_client_secret(
                    &self.http,
                    &self.base,
                    &self.config.username,
                    &self.config.password,
                )
                .await?;
                *self.client_secret.write().await = Some(secret.clone());
                secret
            }
        };
        let token = auth::user_token(
            &self.http,
            &self.base,
            &self.config.username,
            &self.config.password,
            &secret,
        )
        .await?;
        *self.token.write().await = Some(token);
        tracing::info!(url = %self.base, "Logged in to EDA");
        Ok(())
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await?;
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| EdaError::AuthenticationFailed("no access token after login".into()))
    }

    /// Whether EDA reports itself healthy
    pub async fn is_up(&self) -> Result<bool> {
        let response = self
            .http
            .get(format!("{}/core/about/health", self.base))
            .send()
            .await?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let body: Value = response.json().await?;
        Ok(body.get("status").and_then(Value::as_str) == Some("UP"))
    }

    /// EDA version without the build suffix (`25.4.1-1234` → `25.4.1`)
    pub async fn version(&self) -> Result<String> {
        let body = self
            .request(Method::GET, "core/about/version", None)
            .await?
            .ok_or_else(|| EdaError::UnexpectedResponse("version endpoint not found".into()))?;
        parse_version(&body)
    }

    /// Authenticated call. A 401 triggers one re-login.
    pub(crate) async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Reply> {
        let token = self.access_token().await?;
        let response = self.send(method.clone(), path, body, &token).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(path, "Access token rejected, logging in again");
            self.login().await?;
            let token = self.access_token().await?;
            self.send(method, path, body, &token).await?
        } else {
            response
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EdaError::Api {
                status: status.as_u16(),
                path: path.to_string(),
                message: error_message(&text),
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<reqwest::Response> {
        tracing::debug!("{} {}/{}", method, self.base, path);
        let mut builder = self
            .http
            .request(method, format!("{}/{}", self.base, path))
            .bearer_auth(token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }
}

fn parse_version(body: &Value) -> Result<String> {
    let full = body
        .get("eda")
        .and_then(|eda| eda.get("version"))
        .and_then(Value::as_str)
        .ok_or_else(|| EdaError::UnexpectedResponse("missing eda.version".into()))?;
    let version = full.split('-').next().unwrap_or(full);
    Ok(version.trim_start_matches('v').to_string())
}

/// `message` of a Kubernetes-style status body, else the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

//! Keycloak login through the EDA HTTP proxy
//!
//! Users log in with the resource-owner password flow in realm `eda`.
//! When no client secret is configured, the same credentials are used as
//! Keycloak admin in realm `master` to read the `eda` client's secret.

use crate::error::{EdaError, Result, is_transient_status};
use serde::Deserialize;

const KEYCLOAK_PREFIX: &str = "core/httpproxy/v1/keycloak";
const EDA_REALM: &str = "eda";
const EDA_CLIENT_ID: &str = "eda";
const ADMIN_REALM: &str = "master";
const ADMIN_CLIENT_ID: &str = "admin-cli";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct KeycloakClient {
    id: String,
    #[serde(rename = "clientId")]
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

fn token_url(base: &str, realm: &str) -> String {
    format!(
        "{}/{}/realms/{}/protocol/openid-connect/token",
        base, KEYCLOAK_PREFIX, realm
    )
}

/// Error for a failed Keycloak call. Throttling and server errors stay
/// retryable; anything else means the credentials or the realm are wrong.
fn keycloak_error(status: u16, url: &str, what: &str, body: &str) -> EdaError {
    if is_transient_status(status) {
        EdaError::Api {
            status,
            path: url.to_string(),
            message: format!("{} login: {}", what, body.trim()),
        }
    } else {
        EdaError::AuthenticationFailed(format!(
            "{} login returned {}: {}",
            what,
            status,
            body.trim()
        ))
    }
}

async fn request_token(
    http: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
    what: &str,
) -> Result<String> {
    let response = http.post(url).form(form).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(keycloak_error(status.as_u16(), url, what, &body));
    }
    let token: TokenResponse = response.json().await?;
    Ok(token.access_token)
}

/// Access token for the EDA API
pub async fn user_token(
    http: &reqwest::Client,
    base: &str,
    username: &str,
    password: &str,
    client_secret: &str,
) -> Result<String> {
    tracing::debug!(realm = EDA_REALM, user = username, "Requesting EDA access token");
    request_token(
        http,
        &token_url(base, EDA_REALM),
        &[
            ("grant_type", "password"),
            ("client_id", EDA_CLIENT_ID),
            ("client_secret", client_secret),
            ("scope", "openid"),
            ("username", username),
            ("password", password),
        ],
        "user",
    )
    .await
}

/// Secret of the `eda` client, read with Keycloak admin credentials
pub async fn fetch_client_secret(
    http: &reqwest::Client,
    base: &str,
    username: &str,
    password: &str,
) -> Result<String> {
    tracing::info!("No client secret configured, fetching it through the Keycloak admin API");
    let admin_token = request_token(
        http,
        &token_url(base, ADMIN_REALM),
        &[
            ("grant_type", "password"),
            ("client_id", ADMIN_CLIENT_ID),
            ("username", username),
            ("password", password),
        ],
        "Keycloak admin",
    )
    .await?;

    let clients_url = format!("{}/{}/admin/realms/{}/clients", base, KEYCLOAK_PREFIX, EDA_REALM);
    let clients: Vec<KeycloakClient> = admin_get(http, &clients_url, &admin_token).await?;
    let client = clients
        .into_iter()
        .find(|c| c.client_id == EDA_CLIENT_ID)
        .ok_or_else(|| {
            EdaError::AuthenticationFailed(format!(
                "client '{}' not found in realm '{}'",
                EDA_CLIENT_ID, EDA_REALM
            ))
        })?;

    let secret: ClientSecret = admin_get(
        http,
        &format!("{}/{}/client-secret", clients_url, client.id),
        &admin_token,
    )
    .await?;
    Ok(secret.value)
}

async fn admin_get<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    token: &str,
) -> Result<T> {
    let response = http.get(url).bearer_auth(token).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(keycloak_error(status.as_u16(), url, "Keycloak admin API", &body));
    }
    Ok(response.json().await?)
}

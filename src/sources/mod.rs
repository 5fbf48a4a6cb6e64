pub mod github;
pub mod jenkins;
pub mod storage;

use std::time::Duration;

use log::warn;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::auth::Token;
use crate::error::{CiPulseError, Result};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 2;

pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("cipulse/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CiPulseError::Config(format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn auth_request(request: RequestBuilder, token: Option<&Token>) -> RequestBuilder {
    if let Some(token) = token {
        request.bearer_auth(token.as_str())
    } else {
        request
    }
}

/// Executes a GET with bounded retry on transient network errors, rate
/// limits and server errors, then returns the raw response body.
///
/// 401/403 map to `Unauthenticated` so credential-gated views can surface
/// a blocking message while everything else keeps working.
pub(crate) async fn get_with_retry(
    client: &Client,
    url: url::Url,
    token: Option<&Token>,
) -> Result<String> {
    let mut retry_count = 0;
    loop {
        let request = auth_request(client.get(url.clone()), token);

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                if retry_count >= MAX_RETRIES {
                    return Err(e.into());
                }
                warn!(
                    "Network error ({}), retrying in {}s ({}/{})...",
                    e,
                    RETRY_DELAY_SECONDS,
                    retry_count + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                retry_count += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();

        if status == 429 || status.is_server_error() {
            if retry_count >= MAX_RETRIES {
                return Err(CiPulseError::ApiErrorAfterRetries {
                    status: status.as_u16(),
                    retries: MAX_RETRIES,
                });
            }
            warn!(
                "API error (status {status}). Waiting {RETRY_DELAY_SECONDS}s before retry {}/{}...",
                retry_count + 1,
                MAX_RETRIES
            );
            tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
            retry_count += 1;
            continue;
        }

        if status == 401 || status == 403 {
            return Err(CiPulseError::Unauthenticated(format!(
                "{url} returned status {status}"
            )));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(CiPulseError::Api(format!("{url}: {status}: {error_text}")));
        }

        return Ok(response.text().await?);
    }
}

/// GET a JSON document and deserialize it.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: url::Url,
    token: Option<&Token>,
) -> Result<T> {
    let body = get_with_retry(client, url, token).await?;
    serde_json::from_str(&body).map_err(CiPulseError::from)
}

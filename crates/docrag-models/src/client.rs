//! Shared HTTP plumbing for the model clients.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use docrag_core::{RagError, Result};

/// Build a client whose requests time out after `timeout_secs`.
pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Join a base URL and an endpoint path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// POST a JSON body and decode a JSON response, mapping every failure to `ExternalService`.
pub(crate) async fn post_json<B, R>(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    body: &B,
) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| RagError::external(service, format!("request to {} failed: {}", url, e)))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(RagError::external(
            service,
            format!("{} returned {}: {}", url, status, body.trim()),
        ));
    }

    resp.json::<R>()
        .await
        .map_err(|e| RagError::external(service, format!("malformed response from {}: {}", url, e)))
}

// pRPC client: one round trip per call, no retries here (retry policy lives
// in the backoff scheduler and coordinator).

use crate::models::{NodeStats, PeerEntry};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const METHOD_LIST_PEERS: &str = "get-pods";
const METHOD_GET_STATS: &str = "get-stats";

/// Failures at the telemetry boundary. Both variants are non-fatal to the
/// caller and fold into per-peer/per-seed failure counters.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection refused, timeout, or non-2xx status.
    #[error("pRPC transport failure for {method} at {url}: {reason}")]
    Transport {
        method: &'static str,
        url: String,
        reason: String,
    },
    /// Malformed JSON, RPC-level error object, or missing result field.
    #[error("pRPC protocol failure for {method} at {url}: {reason}")]
    Protocol {
        method: &'static str,
        url: String,
        reason: String,
    },
}

// No `#[serde(default)]` on the Option fields: it would put a `T: Default`
// bound on the derived impl, and missing fields decode to None anyway.
#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Peer listings arrive either as a bare array or wrapped in {pods, count};
/// decoded once here and normalized before anything downstream sees it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PeerListing {
    Plain(Vec<PeerEntry>),
    Wrapped {
        #[serde(default)]
        pods: Option<Vec<PeerEntry>>,
        #[serde(default)]
        #[allow(dead_code)]
        count: Option<u64>,
    },
}

impl PeerListing {
    fn normalize(self) -> Vec<PeerEntry> {
        match self {
            PeerListing::Plain(entries) => entries,
            PeerListing::Wrapped { pods, .. } => pods.unwrap_or_default(),
        }
    }
}

pub struct PrpcClient {
    http: reqwest::Client,
}

impl PrpcClient {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http })
    }

    /// List the peers a seed (or any pod) knows about.
    pub async fn list_peers(&self, base_url: &str) -> Result<Vec<PeerEntry>, ClientError> {
        let listing: PeerListing = self.call(base_url, METHOD_LIST_PEERS).await?;
        Ok(listing.normalize())
    }

    /// Fetch live stats from one pod endpoint.
    pub async fn get_stats(&self, base_url: &str) -> Result<NodeStats, ClientError> {
        self.call(base_url, METHOD_GET_STATS).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        base_url: &str,
        method: &'static str,
    ) -> Result<T, ClientError> {
        let url = rpc_url(base_url);
        debug!(method, url = %url, "pRPC call");

        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "id": 1,
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                method,
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport {
                method,
                url,
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let envelope: RpcEnvelope<T> =
            response.json().await.map_err(|e| ClientError::Protocol {
                method,
                url: url.clone(),
                reason: format!("malformed response: {e}"),
            })?;

        if let Some(err) = envelope.error {
            return Err(ClientError::Protocol {
                method,
                url,
                reason: format!("rpc error {}: {}", err.code, err.message),
            });
        }

        envelope.result.ok_or(ClientError::Protocol {
            method,
            url,
            reason: "missing result".into(),
        })
    }
}

/// The well-known RPC sub-path on a pod's base address.
fn rpc_url(base_url: &str) -> String {
    format!("{}/rpc", base_url.trim().trim_end_matches('/'))
}

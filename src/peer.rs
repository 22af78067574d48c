//! Replication peer client.
//!
//! The peer is the external collaborator that stores blobs, accepts
//! transactions, and gossips them onward (gossip itself is out of scope
//! here). The client surface is three operations: challenge/response
//! authorization, content-addressed blob upload, and transaction put.

use crate::commit::Transaction;
use crate::error::SyncError;
use crate::identity::Identity;
use crate::types::{ContentDigest, DigestAlgorithm};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Client surface of the replication peer.
#[async_trait]
pub trait ReplicationPeer: Send + Sync {
    /// Prove our identity to the peer before publishing.
    async fn authorize(&self) -> Result<(), SyncError>;

    /// Store a blob, returning its content digest. Idempotent: identical
    /// bytes always yield the same digest, though the bytes may be
    /// transferred again.
    async fn store_ref(&self, bytes: Vec<u8>) -> Result<ContentDigest, SyncError>;

    /// Submit a transaction. An error means the transaction was not
    /// acknowledged; the caller decides recovery.
    async fn put(&self, tx: &Transaction) -> Result<(), SyncError>;
}

/// Blob store response: digests of the stored bytes.
#[derive(Debug, Deserialize)]
struct StoreBlobResponse {
    #[allow(dead_code)]
    sha1: Option<String>,
    sha3: String,
}

/// HTTP implementation of the peer surface.
///
/// Blob upload is a multipart POST (form field `blob`) answered with a JSON
/// digest object. Transactions go out as a PUT with the id, parents, state
/// URI, and signature carried in headers and the patch lines as the body.
pub struct HttpPeer {
    client: Client,
    endpoint: Url,
    identity: Arc<Identity>,
}

impl HttpPeer {
    pub fn new(
        endpoint: &str,
        identity: Arc<Identity>,
        request_timeout: Duration,
    ) -> Result<Self, SyncError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| SyncError::Config(format!("Invalid peer endpoint: {}", e)))?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            identity,
        })
    }
}

#[async_trait]
impl ReplicationPeer for HttpPeer {
    async fn authorize(&self) -> Result<(), SyncError> {
        let authorize = Method::from_bytes(b"AUTHORIZE")
            .map_err(|e| SyncError::Config(format!("Invalid method: {}", e)))?;

        // Fetch a challenge, sign it, send the signature back.
        let challenge_hex = self
            .client
            .request(authorize.clone(), self.endpoint.clone())
            .send()
            .await
            .map_err(map_http_error)?
            .error_for_status()
            .map_err(map_http_error)?
            .text()
            .await
            .map_err(map_http_error)?;

        let challenge = hex::decode(challenge_hex.trim())
            .map_err(|e| SyncError::Validation(format!("Bad challenge from peer: {}", e)))?;
        let response_hex = self.identity.sign_hex(&challenge);

        self.client
            .request(authorize, self.endpoint.clone())
            .header("Response", response_hex)
            .send()
            .await
            .map_err(map_http_error)?
            .error_for_status()
            .map_err(map_http_error)?;

        info!(address = %self.identity.address(), "Authorized with peer");
        Ok(())
    }

    async fn store_ref(&self, bytes: Vec<u8>) -> Result<ContentDigest, SyncError> {
        let byte_count = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes).file_name("blob");
        let form = reqwest::multipart::Form::new().part("blob", part);

        let response: StoreBlobResponse = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(map_http_error)?
            .error_for_status()
            .map_err(map_http_error)?
            .json()
            .await
            .map_err(map_http_error)?;

        let digest = ContentDigest::from_hex(DigestAlgorithm::Sha3, &response.sha3)
            .ok_or_else(|| {
                SyncError::Validation(format!("Bad digest from peer: {:?}", response.sha3))
            })?;
        debug!(bytes = byte_count, digest = %digest, "Stored blob");
        Ok(digest)
    }

    async fn put(&self, tx: &Transaction) -> Result<(), SyncError> {
        let parents = tx
            .parents
            .iter()
            .map(|p| p.to_hex())
            .collect::<Vec<_>>()
            .join(",");
        let body = tx.patch_lines().join("\n");
        let signature = self.identity.sign_hex(&tx.id.0);

        let response = self
            .client
            .put(self.endpoint.clone())
            .header("Version", tx.id.to_hex())
            .header("Parents", parents)
            .header("State-URI", tx.state_uri.as_str())
            .header("Signature", signature)
            .body(body)
            .send()
            .await
            .map_err(map_http_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(SyncError::Conflict {
                state_uri: tx.state_uri.clone(),
                parents: tx.parents.clone(),
            }),
            StatusCode::BAD_REQUEST => {
                let detail = response.text().await.unwrap_or_default();
                Err(SyncError::Validation(format!(
                    "Peer rejected transaction: {}",
                    detail
                )))
            }
            status => Err(SyncError::Transient(format!(
                "Peer returned {} for transaction put",
                status
            ))),
        }
    }
}

/// Map transport-level failures into the sync error taxonomy.
fn map_http_error(error: reqwest::Error) -> SyncError {
    if let Some(status) = error.status() {
        if status == StatusCode::BAD_REQUEST {
            return SyncError::Validation(format!("Peer rejected request: {}", error));
        }
    }
    SyncError::Transient(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_endpoint() {
        let identity = Arc::new(Identity::from_seed([1u8; 32]));
        let result = HttpPeer::new("not a url", identity, Duration::from_secs(5));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_new_accepts_http_endpoint() {
        let identity = Arc::new(Identity::from_seed([1u8; 32]));
        assert!(HttpPeer::new("http://localhost:8080", identity, Duration::from_secs(5)).is_ok());
    }
}

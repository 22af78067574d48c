//! Shared test utilities: a scripted in-process replication peer.

// Each test binary compiles its own copy of this module and uses a
// different subset of the helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use segsync::commit::Transaction;
use segsync::error::SyncError;
use segsync::types::{ContentDigest, DigestAlgorithm, StateUri, TxId};
use std::collections::HashSet;
use std::sync::Mutex;

/// Scripted response for one `put` call.
#[derive(Debug, Clone, Copy)]
pub enum PutResponse {
    Ack,
    Conflict,
    Transient,
}

#[derive(Default)]
struct MockPeerState {
    authorized: bool,
    uploads: Vec<Vec<u8>>,
    failing_uploads: Vec<Vec<u8>>,
    put_script: Vec<PutResponse>,
    accepted: Vec<Transaction>,
    rejected: Vec<Transaction>,
    acked: HashSet<TxId>,
}

/// In-process replication peer with scriptable failures.
///
/// Enforces the causal invariant on every accepted transaction: each
/// parent must be the genesis id or a previously acknowledged id for the
/// peer. A violation panics the test immediately.
#[derive(Default)]
pub struct MockPeer {
    state: Mutex<MockPeerState>,
}

impl MockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `id` as already acknowledged (e.g. a frontier restored from a
    /// previous run).
    pub fn prime_acked(&self, id: TxId) {
        self.state.lock().unwrap().acked.insert(id);
    }

    /// Queue responses for upcoming `put` calls; once drained, puts ack.
    pub fn script_put(&self, responses: Vec<PutResponse>) {
        let mut state = self.state.lock().unwrap();
        state.put_script = responses;
    }

    /// Fail the next uploads of exactly these bytes.
    pub fn fail_upload_of(&self, bytes: Vec<u8>) {
        self.state.lock().unwrap().failing_uploads.push(bytes);
    }

    pub fn clear_upload_failures(&self) {
        self.state.lock().unwrap().failing_uploads.clear();
    }

    pub fn authorized(&self) -> bool {
        self.state.lock().unwrap().authorized
    }

    /// All uploads seen, in order.
    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn upload_count_of(&self, bytes: &[u8]) -> usize {
        self.state
            .lock()
            .unwrap()
            .uploads
            .iter()
            .filter(|u| u.as_slice() == bytes)
            .count()
    }

    /// Transactions accepted, in order.
    pub fn accepted(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().accepted.clone()
    }

    /// Transactions rejected or lost, in order.
    pub fn rejected(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().rejected.clone()
    }

    pub fn put_attempts(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.accepted.len() + state.rejected.len()
    }
}

#[async_trait]
impl segsync::peer::ReplicationPeer for MockPeer {
    async fn authorize(&self) -> Result<(), SyncError> {
        self.state.lock().unwrap().authorized = true;
        Ok(())
    }

    async fn store_ref(&self, bytes: Vec<u8>) -> Result<ContentDigest, SyncError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.failing_uploads.iter().position(|b| *b == bytes) {
            state.failing_uploads.remove(pos);
            return Err(SyncError::Transient("mock upload failure".to_string()));
        }
        // Content addressing: equal bytes, equal digest.
        let digest = ContentDigest::new(DigestAlgorithm::Sha3, *blake3::hash(&bytes).as_bytes());
        state.uploads.push(bytes);
        Ok(digest)
    }

    async fn put(&self, tx: &Transaction) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        let response = if state.put_script.is_empty() {
            PutResponse::Ack
        } else {
            state.put_script.remove(0)
        };

        match response {
            PutResponse::Ack => {
                for parent in &tx.parents {
                    assert!(
                        parent.is_genesis() || state.acked.contains(parent),
                        "transaction {} references unacknowledged parent {}",
                        tx.id,
                        parent
                    );
                }
                state.acked.insert(tx.id);
                state.accepted.push(tx.clone());
                Ok(())
            }
            PutResponse::Conflict => {
                state.rejected.push(tx.clone());
                Err(SyncError::Conflict {
                    state_uri: tx.state_uri.clone(),
                    parents: tx.parents.clone(),
                })
            }
            PutResponse::Transient => {
                state.rejected.push(tx.clone());
                Err(SyncError::Transient("mock network failure".to_string()))
            }
        }
    }
}

/// The digest the mock peer returns for `bytes`.
pub fn digest_of(bytes: &[u8]) -> ContentDigest {
    ContentDigest::new(DigestAlgorithm::Sha3, *blake3::hash(bytes).as_bytes())
}

/// Convenience: the state URI used across the integration tests.
pub fn test_uri() -> StateUri {
    StateUri::new("demo.local/video")
}

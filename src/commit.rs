//! Causal commit client.
//!
//! Assembles transactions from patch batches plus the current causal
//! frontier, submits them to the replication peer, and advances or recovers
//! the frontier based on the outcome. Recovery is an explicit two-attempt
//! state machine (Commit → on failure → FallbackCommit → Ok | Dropped)
//! rather than nested error handlers.

use crate::error::SyncError;
use crate::patch::Patch;
use crate::peer::ReplicationPeer;
use crate::session::Session;
use crate::types::{StateUri, TxId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A causally ordered state-tree update.
///
/// Immutable once created. The id is derived from the content (state URI,
/// sorted parents, patch lines), so re-submitting an identical transaction
/// carries an identical id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub state_uri: StateUri,
    pub parents: Vec<TxId>,
    pub patches: Vec<Patch>,
}

impl Transaction {
    /// Build a transaction, sorting and deduplicating parents and deriving
    /// the id from the content.
    pub fn new(state_uri: StateUri, mut parents: Vec<TxId>, patches: Vec<Patch>) -> Self {
        parents.sort();
        parents.dedup();
        let id = compute_tx_id(&state_uri, &parents, &patches);
        Self {
            id,
            state_uri,
            parents,
            patches,
        }
    }

    /// Validate the transaction before submission.
    ///
    /// Parents must be non-empty (the genesis id stands in on a fresh
    /// tree) and every patch path must be syntactically valid.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.parents.is_empty() {
            return Err(SyncError::Validation(
                "Transaction must reference at least one parent".to_string(),
            ));
        }
        if self.patches.is_empty() {
            return Err(SyncError::Validation(
                "Transaction must contain at least one patch".to_string(),
            ));
        }
        for patch in &self.patches {
            patch.validate()?;
        }
        Ok(())
    }

    /// Patch lines in application order, as sent to the peer.
    pub fn patch_lines(&self) -> Vec<String> {
        self.patches.iter().map(Patch::to_line).collect()
    }
}

/// Deterministic transaction id: BLAKE3 over the state URI, sorted parents,
/// and length-prefixed patch lines.
fn compute_tx_id(state_uri: &StateUri, parents: &[TxId], patches: &[Patch]) -> TxId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"tx");
    let uri = state_uri.as_str().as_bytes();
    hasher.update(&(uri.len() as u64).to_be_bytes());
    hasher.update(uri);
    hasher.update(&(parents.len() as u64).to_be_bytes());
    for parent in parents {
        hasher.update(&parent.0);
    }
    hasher.update(&(patches.len() as u64).to_be_bytes());
    for patch in patches {
        let line = patch.to_line();
        hasher.update(&(line.len() as u64).to_be_bytes());
        hasher.update(line.as_bytes());
    }
    TxId(*hasher.finalize().as_bytes())
}

/// One cycle's worth of patches, in primary commit order.
#[derive(Debug, Clone)]
pub struct PatchBatch {
    pub patches: Vec<Patch>,
    /// Key (filename) of the patch for the most recently written file.
    /// The fallback transaction leads with this patch.
    pub most_recent_key: Option<String>,
}

impl PatchBatch {
    pub fn new(patches: Vec<Patch>, most_recent_key: Option<String>) -> Self {
        Self {
            patches,
            most_recent_key,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Patch order for the fallback transaction: the most-recent single-file
    /// patch first, then all still-pending ordinary patches in their
    /// original order.
    pub fn fallback_order(&self) -> Vec<Patch> {
        let Some(key) = &self.most_recent_key else {
            return self.patches.clone();
        };
        let mut ordered = Vec::with_capacity(self.patches.len());
        for patch in &self.patches {
            if &patch.path.key == key {
                ordered.insert(0, patch.clone());
            } else {
                ordered.push(patch.clone());
            }
        }
        ordered
    }
}

/// Commit client state, tracked explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitState {
    Idle,
    Committing,
    Conflicted,
}

/// Outcome of one batch submission.
#[derive(Debug)]
pub enum CommitOutcome {
    /// The primary or fallback transaction was acknowledged and the
    /// frontier advanced.
    Committed { tx: Transaction, recovered: bool },
    /// Both attempts failed. The frontier is unchanged and this cycle's
    /// changes are dropped; the next cycle re-publishes anything whose
    /// upload was not finalized.
    Dropped {
        primary: SyncError,
        fallback: SyncError,
    },
}

/// Submits transactions for one state URI, serialized: at most one commit
/// is in flight, and a new batch snapshots the frontier only from Idle.
pub struct CommitClient {
    peer: Arc<dyn ReplicationPeer>,
    state_uri: StateUri,
    timeout: Option<Duration>,
    state: CommitState,
}

impl CommitClient {
    pub fn new(peer: Arc<dyn ReplicationPeer>, state_uri: StateUri) -> Self {
        Self {
            peer,
            state_uri,
            timeout: None,
            state: CommitState::Idle,
        }
    }

    /// Bound every peer submission by `timeout`. A timed-out submission is
    /// treated like any other transient failure.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Submit one patch batch, parented on the session's current frontier.
    ///
    /// On acknowledgement the frontier advances to the new id and is
    /// persisted before returning. On a recoverable failure (conflict or
    /// network error) exactly one fallback transaction is built, parented
    /// on the last known-good frontier, and submitted; if that also fails
    /// the frontier is left unchanged and the batch is dropped.
    ///
    /// Cancellation safety: the frontier is only mutated after a peer
    /// acknowledgement has been received, so dropping this future at a
    /// suspension point never leaves a partial frontier update behind.
    pub async fn commit_batch(
        &mut self,
        session: &mut Session,
        batch: &PatchBatch,
    ) -> Result<CommitOutcome, SyncError> {
        if self.state != CommitState::Idle {
            return Err(SyncError::Validation(format!(
                "Commit already in flight for {}",
                self.state_uri
            )));
        }

        let parents = session.frontier();
        let tx = Transaction::new(self.state_uri.clone(), parents.clone(), batch.patches.clone());
        tx.validate()?;

        self.state = CommitState::Committing;
        debug!(
            state_uri = %self.state_uri,
            tx_id = %tx.id,
            parents = ?tx.parents,
            patch_count = tx.patches.len(),
            "Submitting transaction"
        );

        let primary_err = match self.submit(&tx).await {
            Ok(()) => {
                session.advance_frontier(tx.id)?;
                self.state = CommitState::Idle;
                info!(state_uri = %self.state_uri, tx_id = %tx.id, "Transaction committed");
                return Ok(CommitOutcome::Committed {
                    tx,
                    recovered: false,
                });
            }
            Err(e) if e.is_commit_recoverable() => e,
            Err(e) => {
                self.state = CommitState::Idle;
                return Err(e);
            }
        };

        // Recovery: one fallback transaction, parented on the last
        // known-good frontier (unchanged, since the frontier only moves on
        // acknowledgement).
        self.state = CommitState::Conflicted;
        warn!(
            state_uri = %self.state_uri,
            error = %primary_err,
            "Primary commit failed, attempting fallback"
        );

        let fallback = Transaction::new(
            self.state_uri.clone(),
            session.frontier(),
            batch.fallback_order(),
        );
        fallback.validate()?;

        let outcome = match self.submit(&fallback).await {
            Ok(()) => {
                session.advance_frontier(fallback.id)?;
                info!(
                    state_uri = %self.state_uri,
                    tx_id = %fallback.id,
                    "Fallback transaction committed"
                );
                CommitOutcome::Committed {
                    tx: fallback,
                    recovered: true,
                }
            }
            Err(fallback_err) => {
                warn!(
                    state_uri = %self.state_uri,
                    primary_error = %primary_err,
                    fallback_error = %fallback_err,
                    "Fallback commit failed, dropping batch for this cycle"
                );
                CommitOutcome::Dropped {
                    primary: primary_err,
                    fallback: fallback_err,
                }
            }
        };

        self.state = CommitState::Idle;
        Ok(outcome)
    }

    async fn submit(&self, tx: &Transaction) -> Result<(), SyncError> {
        match self.timeout {
            Some(duration) => tokio::time::timeout(duration, self.peer.put(tx))
                .await
                .map_err(|_| {
                    SyncError::Transient(format!("Commit timed out after {:?}", duration))
                })?,
            None => self.peer.put(tx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::stream_patch;
    use crate::types::{ContentDigest, DigestAlgorithm};

    fn patch(filename: &str, byte: u8) -> Patch {
        stream_patch(
            "addr0",
            filename,
            ContentDigest::new(DigestAlgorithm::Sha3, [byte; 32]),
        )
    }

    #[test]
    fn test_tx_id_deterministic_for_identical_content() {
        let uri = StateUri::new("demo.local/video");
        let patches = vec![patch("index.m3u8", 1), patch("segment1.ts", 2)];
        let a = Transaction::new(uri.clone(), vec![TxId::GENESIS], patches.clone());
        let b = Transaction::new(uri, vec![TxId::GENESIS], patches);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_tx_id_sensitive_to_patch_order_and_parents() {
        let uri = StateUri::new("demo.local/video");
        let forward = vec![patch("index.m3u8", 1), patch("segment1.ts", 2)];
        let reversed = vec![patch("segment1.ts", 2), patch("index.m3u8", 1)];

        let a = Transaction::new(uri.clone(), vec![TxId::GENESIS], forward.clone());
        let b = Transaction::new(uri.clone(), vec![TxId::GENESIS], reversed);
        assert_ne!(a.id, b.id);

        let c = Transaction::new(uri, vec![TxId([5u8; 32])], forward);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_parents_sorted_and_deduplicated() {
        let uri = StateUri::new("demo.local/video");
        let p1 = TxId([9u8; 32]);
        let p2 = TxId([1u8; 32]);
        let tx = Transaction::new(uri, vec![p1, p2, p1], vec![patch("a.ts", 1)]);
        assert_eq!(tx.parents, vec![p2, p1]);
    }

    #[test]
    fn test_validate_rejects_empty_parents_and_patches() {
        let uri = StateUri::new("demo.local/video");
        let no_parents = Transaction::new(uri.clone(), vec![], vec![patch("a.ts", 1)]);
        assert!(no_parents.validate().is_err());

        let no_patches = Transaction::new(uri, vec![TxId::GENESIS], vec![]);
        assert!(no_patches.validate().is_err());
    }

    #[test]
    fn test_fallback_order_leads_with_most_recent() {
        let batch = PatchBatch::new(
            vec![
                patch("index.m3u8", 1),
                patch("segment1.ts", 2),
                patch("segment2.ts", 3),
            ],
            Some("index.m3u8".to_string()),
        );
        let ordered = batch.fallback_order();
        assert_eq!(ordered[0].path.key, "index.m3u8");
        assert_eq!(ordered[1].path.key, "segment1.ts");
        assert_eq!(ordered[2].path.key, "segment2.ts");
    }

    #[test]
    fn test_fallback_order_without_most_recent_is_unchanged() {
        let patches = vec![patch("a.ts", 1), patch("b.ts", 2)];
        let batch = PatchBatch::new(patches.clone(), None);
        assert_eq!(batch.fallback_order(), patches);
    }
}

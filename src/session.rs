//! Per-stateURI sync session: frontier and uploaded-set tracking.
//!
//! The frontier (most-recent committed transaction ids) and the uploaded
//! set (which filenames are finalized) are owned by exactly one session per
//! state URI, mutated only by that session's processing cycle, and
//! persisted to local storage so a restart neither re-uploads finalized
//! segments nor forks causal history.

use crate::error::StorageError;
use crate::types::{StateUri, TxId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// The set of most-recent committed transaction ids for a state URI.
///
/// Used as the parents of the next transaction; mutated only after a
/// confirmed commit. Starts as the genesis id on a fresh tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier {
    ids: BTreeSet<TxId>,
}

impl Default for Frontier {
    fn default() -> Self {
        Self::genesis()
    }
}

impl Frontier {
    pub fn genesis() -> Self {
        let mut ids = BTreeSet::new();
        ids.insert(TxId::GENESIS);
        Self { ids }
    }

    pub fn ids(&self) -> Vec<TxId> {
        self.ids.iter().copied().collect()
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.ids.contains(id)
    }

    /// Replace the frontier with the newly committed id.
    pub fn advance(&mut self, id: TxId) {
        self.ids.clear();
        self.ids.insert(id);
    }
}

/// Filename → finalized flag.
///
/// A file appears with `false` once uploaded but still mutable (the index
/// artifact, or the most recently written segment); `true` once known
/// immutable. Finalized files are never re-uploaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedSet {
    entries: HashMap<String, bool>,
}

impl UploadedSet {
    pub fn is_finalized(&self, filename: &str) -> bool {
        self.entries.get(filename).copied().unwrap_or(false)
    }

    /// Record an upload without finalizing.
    pub fn mark_uploaded(&mut self, filename: &str) {
        self.entries.entry(filename.to_string()).or_insert(false);
    }

    pub fn mark_finalized(&mut self, filename: &str) {
        self.entries.insert(filename.to_string(), true);
    }

    pub fn finalized_count(&self) -> usize {
        self.entries.values().filter(|v| **v).count()
    }
}

/// Serialized session state, as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub frontier: Frontier,
    pub uploaded: UploadedSet,
}

/// Sled-backed store of session state, keyed by state URI.
pub struct SledSessionStore {
    db: sled::Db,
}

impl SledSessionStore {
    /// Open (or create) the session database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn load(&self, state_uri: &StateUri) -> Result<Option<SessionState>, StorageError> {
        match self.db.get(state_uri.as_str().as_bytes())? {
            Some(bytes) => {
                let state: SessionState = bincode::deserialize(&bytes)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, state_uri: &StateUri, state: &SessionState) -> Result<(), StorageError> {
        let bytes = bincode::serialize(state)?;
        self.db.insert(state_uri.as_str().as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }
}

/// A live session for one state URI.
///
/// Owned by the single processing-cycle execution context; no concurrent
/// mutation is permitted or possible through this API.
pub struct Session {
    state_uri: StateUri,
    state: SessionState,
    store: Option<Arc<SledSessionStore>>,
}

impl Session {
    /// Load the persisted session for `state_uri`, or start a fresh one at
    /// the genesis frontier.
    pub fn load_or_create(
        store: Arc<SledSessionStore>,
        state_uri: StateUri,
    ) -> Result<Self, StorageError> {
        let state = store.load(&state_uri)?.unwrap_or_default();
        debug!(
            state_uri = %state_uri,
            frontier = ?state.frontier.ids(),
            finalized = state.uploaded.finalized_count(),
            "Loaded session"
        );
        Ok(Self {
            state_uri,
            state,
            store: Some(store),
        })
    }

    /// A session with no backing storage. Used by tests.
    pub fn in_memory(state_uri: StateUri) -> Self {
        Self {
            state_uri,
            state: SessionState::default(),
            store: None,
        }
    }

    pub fn state_uri(&self) -> &StateUri {
        &self.state_uri
    }

    /// Current frontier ids, the parents of the next transaction.
    pub fn frontier(&self) -> Vec<TxId> {
        self.state.frontier.ids()
    }

    pub fn frontier_contains(&self, id: &TxId) -> bool {
        self.state.frontier.contains(id)
    }

    /// Advance the frontier after a confirmed commit and persist it.
    pub fn advance_frontier(&mut self, id: TxId) -> Result<(), StorageError> {
        self.state.frontier.advance(id);
        self.persist()
    }

    pub fn is_finalized(&self, filename: &str) -> bool {
        self.state.uploaded.is_finalized(filename)
    }

    pub fn mark_uploaded(&mut self, filename: &str) {
        self.state.uploaded.mark_uploaded(filename);
    }

    pub fn mark_finalized(&mut self, filename: &str) {
        self.state.uploaded.mark_finalized(filename);
    }

    /// Write the current state through to storage, if any.
    pub fn persist(&self) -> Result<(), StorageError> {
        if let Some(store) = &self.store {
            store.save(&self.state_uri, &self.state)?;
        }
        Ok(())
    }
}

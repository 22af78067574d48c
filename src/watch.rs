//! Segment directory watcher.
//!
//! Watches the live output directory, coalesces filesystem event bursts
//! into one processing cycle per quiescence window, and drives the
//! upload → build → commit pipeline. One watcher task exists per state
//! URI, so cycles are serialized and the session is exclusively owned.

use crate::builder::build_stream_patches;
use crate::commit::{CommitClient, CommitOutcome, PatchBatch};
use crate::error::SyncError;
use crate::identity::Identity;
use crate::peer::ReplicationPeer;
use crate::reader::StateReader;
use crate::session::Session;
use crate::types::ContentDigest;
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory holding the live segments and index artifact.
    pub watch_dir: PathBuf,
    /// The mutable index artifact: re-uploaded every cycle, never finalized.
    pub index_file: String,
    /// Quiescence window: events within it collapse into one cycle.
    pub debounce_ms: u64,
    /// Upper bound on each upload and commit network call.
    pub network_timeout_ms: Option<u64>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("."),
            index_file: "index.m3u8".to_string(),
            debounce_ms: 500,
            network_timeout_ms: Some(30_000),
        }
    }
}

impl WatchConfig {
    fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_ms.map(Duration::from_millis)
    }
}

/// Quiescence-window scheduler: a burst of events collapses into one
/// cycle, fired at (time of last event + window).
///
/// Modeled as an explicit re-armed deadline rather than a chain of delayed
/// callbacks, so the watch loop can select on it alongside events and
/// shutdown.
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Push the deadline out to (now + window).
    pub fn record_event(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm after the cycle fires.
    pub fn clear(&mut self) {
        self.deadline = None;
    }
}

/// Watches one directory and publishes its files into one state URI.
pub struct SegmentWatcher {
    config: WatchConfig,
    peer: Arc<dyn ReplicationPeer>,
    identity: Arc<Identity>,
    session: Session,
    commit: CommitClient,
    reader: Option<Arc<StateReader>>,
}

impl SegmentWatcher {
    pub fn new(
        config: WatchConfig,
        peer: Arc<dyn ReplicationPeer>,
        identity: Arc<Identity>,
        session: Session,
    ) -> Self {
        let mut commit = CommitClient::new(Arc::clone(&peer), session.state_uri().clone());
        if let Some(timeout) = config.network_timeout() {
            commit = commit.with_timeout(timeout);
        }
        Self {
            config,
            peer,
            identity,
            session,
            commit,
            reader: None,
        }
    }

    /// Mirror committed transactions into a read view for subscribers.
    pub fn with_reader(mut self, reader: Arc<StateReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the watch loop until `shutdown` flips to true.
    ///
    /// Filesystem events re-arm a single debounce deadline; when it fires,
    /// one processing cycle runs. Events arriving while a cycle is
    /// suspended on the network accumulate and re-arm the deadline for the
    /// next cycle. No error from a cycle terminates the loop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        self.peer.authorize().await?;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |result| {
            // A send error means the watch loop is gone; nothing to deliver to.
            let _ = event_tx.send(result);
        })
        .map_err(|e| SyncError::Transient(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&self.config.watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                SyncError::Config(format!(
                    "Failed to watch {:?}: {}",
                    self.config.watch_dir, e
                ))
            })?;

        info!(
            dir = ?self.config.watch_dir,
            state_uri = %self.session.state_uri(),
            debounce_ms = self.config.debounce_ms,
            "Watching segment directory"
        );

        let mut debounce = Debounce::new(self.config.debounce());

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe_event = event_rx.recv() => {
                    match maybe_event {
                        Some(Ok(event)) if event_relevant(&event.kind) => {
                            debounce.record_event();
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "Watch error, continuing");
                        }
                        None => {
                            error!("Watcher channel closed");
                            break;
                        }
                    }
                }
                _ = sleep_until(debounce.deadline().unwrap_or_else(Instant::now)), if debounce.armed() => {
                    debounce.clear();
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                info!("Shutdown requested, cancelling in-flight cycle");
                                break;
                            }
                        }
                        result = self.run_cycle() => {
                            if let Err(e) = result {
                                warn!(error = %e, "Processing cycle failed, will retry on next events");
                            }
                        }
                    }
                }
            }
        }

        info!(state_uri = %self.session.state_uri(), "Watcher stopped");
        Ok(())
    }

    /// Run one processing cycle against the current directory listing.
    ///
    /// 1. Enumerate the directory.
    /// 2. Skip already-finalized files.
    /// 3. Upload the rest, isolating per-file failures; finalize everything
    ///    except the index artifact and the most recently written segment.
    /// 4. Build patches and commit, index patch first.
    pub async fn run_cycle(&mut self) -> Result<(), SyncError> {
        let listing = self.list_directory()?;
        let pending: Vec<(String, SystemTime)> = listing
            .into_iter()
            .filter(|(name, _)| !self.session.is_finalized(name))
            .collect();

        if pending.is_empty() {
            debug!("Nothing to upload this cycle");
            return Ok(());
        }

        // The newest segment may still be appended to; hold it back from
        // finalization until a later cycle confirms it has settled.
        let newest_segment = pending
            .iter()
            .filter(|(name, _)| *name != self.config.index_file)
            .max_by_key(|(_, mtime)| *mtime)
            .map(|(name, _)| name.clone());

        let mut uploads: BTreeMap<String, ContentDigest> = BTreeMap::new();
        let mut most_recent: Option<(String, SystemTime)> = None;

        for (name, mtime) in &pending {
            let digest = match self.upload_file(name).await {
                Ok(digest) => digest,
                Err(e) => {
                    // Isolated: this file stays unfinalized and is retried
                    // on the next cycle; the rest of the batch proceeds.
                    warn!(file = %name, error = %e, "Upload failed, excluding file from cycle");
                    continue;
                }
            };

            let hold_back =
                *name == self.config.index_file || Some(name) == newest_segment.as_ref();
            if hold_back {
                self.session.mark_uploaded(name);
            } else {
                self.session.mark_finalized(name);
            }

            if most_recent.as_ref().map_or(true, |(_, t)| mtime > t) {
                most_recent = Some((name.clone(), *mtime));
            }
            uploads.insert(name.clone(), digest);
        }
        self.session.persist()?;

        if uploads.is_empty() {
            debug!("No uploads succeeded this cycle, skipping commit");
            return Ok(());
        }

        let mut patches = build_stream_patches(self.identity.address(), &uploads)?;
        if let Some(pos) = patches
            .iter()
            .position(|p| p.path.key == self.config.index_file)
        {
            let index_patch = patches.remove(pos);
            patches.insert(0, index_patch);
        }

        let batch = PatchBatch::new(patches, most_recent.map(|(name, _)| name));
        let outcome = self.commit.commit_batch(&mut self.session, &batch).await?;

        match outcome {
            CommitOutcome::Committed { tx, recovered } => {
                info!(
                    tx_id = %tx.id,
                    patch_count = tx.patches.len(),
                    recovered,
                    "Cycle committed"
                );
                if let Some(reader) = &self.reader {
                    reader.apply(&tx);
                }
            }
            CommitOutcome::Dropped { primary, fallback } => {
                error!(
                    primary = %primary,
                    fallback = %fallback,
                    "Both commit attempts failed, batch dropped for this cycle"
                );
            }
        }

        Ok(())
    }

    /// Flat listing of the watched directory: regular files with their
    /// modification times.
    fn list_directory(&self) -> Result<Vec<(String, SystemTime)>, SyncError> {
        let entries = std::fs::read_dir(&self.config.watch_dir)
            .map_err(|e| SyncError::Transient(format!("Failed to list directory: {}", e)))?;

        let mut listing = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = ?entry.path(), error = %e, "Skipping entry without metadata");
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                warn!(path = ?entry.path(), "Skipping non-UTF-8 filename");
                continue;
            };
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            listing.push((name, mtime));
        }
        listing.sort();
        Ok(listing)
    }

    /// Read and upload one file, bounding the network call.
    async fn upload_file(&self, name: &str) -> Result<ContentDigest, SyncError> {
        let path = self.config.watch_dir.join(name);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SyncError::NotFound(path.clone())
            } else {
                SyncError::Transient(format!("Failed to read {:?}: {}", path, e))
            }
        })?;

        match self.config.network_timeout() {
            Some(duration) => tokio::time::timeout(duration, self.peer.store_ref(bytes))
                .await
                .map_err(|_| {
                    SyncError::Transient(format!("Upload of {} timed out after {:?}", name, duration))
                })?,
            None => self.peer.store_ref(bytes).await,
        }
    }
}

/// Only content-affecting events re-arm the debounce.
fn event_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_config_default() {
        let config = WatchConfig::default();
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.index_file, "index.m3u8");
        assert_eq!(config.network_timeout_ms, Some(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_burst_collapses_to_one_deadline() {
        let mut debounce = Debounce::new(Duration::from_millis(500));
        let start = Instant::now();

        // Events at t=0, 100, 200, 300ms.
        for _ in 0..4 {
            debounce.record_event();
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        // One deadline, at (last event + window) = 800ms.
        let deadline = debounce.deadline().expect("armed");
        assert_eq!(deadline.duration_since(start), Duration::from_millis(800));

        sleep_until(deadline).await;
        assert_eq!(
            Instant::now().duration_since(start),
            Duration::from_millis(800)
        );
        debounce.clear();
        assert!(!debounce.armed());
    }

    #[test]
    fn test_event_relevance() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};

        assert!(event_relevant(&EventKind::Create(CreateKind::File)));
        assert!(event_relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(event_relevant(&EventKind::Remove(RemoveKind::File)));
        assert!(!event_relevant(&EventKind::Access(
            notify::event::AccessKind::Any
        )));
    }
}

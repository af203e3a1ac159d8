pub mod entry;
pub mod header;
pub mod packer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::Sender;
use tracing::{debug, trace};

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use crate::repo::Repository;
use crate::snapshot::header::{Header, StatCounters, Statistics};
use crate::snapshot::packer::{PackerMsg, PackerShared};
use crate::state::{BlobKind, State};

/// Receipt returned by a successful commit.
#[derive(Debug, Clone, Copy)]
pub struct CommitReceipt {
    pub snapshot_id: Mac,
    pub state_mac: Mac,
}

/// An in-progress snapshot: a packer pipeline, a state delta, and the
/// header under construction.
///
/// A session is mutated by Put* calls from a single producer plus the
/// packer workers it owns, and becomes immutable at commit. The
/// repository is shared and outlives the session.
pub struct Snapshot {
    repo: Arc<Repository>,
    delta: Arc<State>,
    shared: Arc<PackerShared>,
    stats: Arc<StatCounters>,
    /// Root document, filled in by the scanner before commit.
    pub header: Header,
    tx: Option<Sender<PackerMsg>>,
    workers: Vec<JoinHandle<()>>,
    started: Instant,
}

impl Snapshot {
    /// Open a new session against the repository, with one packer worker
    /// per logical CPU.
    pub fn new(repo: Arc<Repository>) -> Self {
        Self::with_worker_count(repo, packer::worker_count())
    }

    /// Open a session with an explicit worker count. Useful for tests and
    /// tools that need deterministic packfile grouping.
    pub fn with_worker_count(repo: Arc<Repository>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let snapshot_id = repo.new_snapshot_id();
        let delta = Arc::new(State::new());
        delta.set_extends(repo.state().extends_list());

        let stats = Arc::new(StatCounters::default());
        let shared = Arc::new(PackerShared {
            repo: Arc::clone(&repo),
            delta: Arc::clone(&delta),
            stats: Arc::clone(&stats),
            first_error: Mutex::new(None),
            poisoned: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        });

        let (tx, rx) = crossbeam_channel::bounded(packer::channel_capacity(worker_count));
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            workers.push(std::thread::spawn(move || packer::run_worker(&shared, rx)));
        }

        let mut header = Header::new(snapshot_id);
        header.extends = delta.extends_list();

        debug!(snapshot = %header.short_id(), workers = worker_count, "new snapshot session");
        Self {
            repo,
            delta,
            shared,
            stats,
            header,
            tx: Some(tx),
            workers,
            started: Instant::now(),
        }
    }

    /// Load a committed snapshot's header back from the repository.
    pub fn load(repo: &Repository, snapshot_id: Mac) -> Result<Header> {
        let serialized = repo.get_blob(BlobKind::Snapshot, snapshot_id)?;
        Header::from_bytes(&serialized)
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn snapshot_id(&self) -> Mac {
        self.header.snapshot_id
    }

    /// Seal a payload and hand it to the packer. Returns as soon as the
    /// enqueue succeeds, possibly blocking on channel capacity.
    fn enqueue(&self, kind: BlobKind, mac: Mac, data: &[u8]) -> Result<()> {
        if self.shared.is_aborted() {
            return Err(StrataError::Canceled);
        }
        if self.shared.is_poisoned() {
            return Err(StrataError::SessionClosed);
        }
        let tx = self.tx.as_ref().ok_or(StrataError::SessionClosed)?;

        let sealed = self.repo.codec().seal(data)?;
        tx.send(PackerMsg {
            kind,
            mac,
            sealed,
            enqueued: Instant::now(),
        })
        .map_err(|_| StrataError::SessionClosed)
    }

    pub fn put_chunk(&self, mac: Mac, data: &[u8]) -> Result<()> {
        trace!(snapshot = %self.header.short_id(), %mac, "put chunk");
        StatCounters::bump(
            &self.stats.chunks_count,
            &self.stats.chunks_size,
            data.len() as u64,
        );
        self.enqueue(BlobKind::Chunk, mac, data)
    }

    pub fn put_object(&self, mac: Mac, data: &[u8]) -> Result<()> {
        trace!(snapshot = %self.header.short_id(), %mac, "put object");
        StatCounters::bump(
            &self.stats.objects_count,
            &self.stats.objects_size,
            data.len() as u64,
        );
        self.enqueue(BlobKind::Object, mac, data)
    }

    pub fn put_file(&self, mac: Mac, data: &[u8]) -> Result<()> {
        trace!(snapshot = %self.header.short_id(), %mac, "put file");
        StatCounters::bump(
            &self.stats.files_count,
            &self.stats.files_size,
            data.len() as u64,
        );
        self.enqueue(BlobKind::File, mac, data)
    }

    pub fn put_directory(&self, mac: Mac, data: &[u8]) -> Result<()> {
        trace!(snapshot = %self.header.short_id(), %mac, "put directory");
        StatCounters::bump(
            &self.stats.directories_count,
            &self.stats.directories_size,
            data.len() as u64,
        );
        self.enqueue(BlobKind::Directory, mac, data)
    }

    pub fn put_data(&self, mac: Mac, data: &[u8]) -> Result<()> {
        trace!(snapshot = %self.header.short_id(), %mac, "put data");
        StatCounters::bump(
            &self.stats.data_count,
            &self.stats.data_size,
            data.len() as u64,
        );
        self.enqueue(BlobKind::Data, mac, data)
    }

    pub fn get_chunk(&self, mac: Mac) -> Result<Vec<u8>> {
        self.repo.get_blob(BlobKind::Chunk, mac)
    }

    pub fn get_object(&self, mac: Mac) -> Result<Vec<u8>> {
        self.repo.get_blob(BlobKind::Object, mac)
    }

    pub fn get_file(&self, mac: Mac) -> Result<Vec<u8>> {
        self.repo.get_blob(BlobKind::File, mac)
    }

    pub fn get_directory(&self, mac: Mac) -> Result<Vec<u8>> {
        self.repo.get_blob(BlobKind::Directory, mac)
    }

    pub fn get_data(&self, mac: Mac) -> Result<Vec<u8>> {
        self.repo.get_blob(BlobKind::Data, mac)
    }

    pub fn check_chunk(&self, mac: Mac) -> bool {
        self.repo.has_blob(BlobKind::Chunk, mac)
    }

    pub fn check_object(&self, mac: Mac) -> bool {
        self.repo.has_blob(BlobKind::Object, mac)
    }

    pub fn check_file(&self, mac: Mac) -> bool {
        self.repo.has_blob(BlobKind::File, mac)
    }

    pub fn check_directory(&self, mac: Mac) -> bool {
        self.repo.has_blob(BlobKind::Directory, mac)
    }

    pub fn check_data(&self, mac: Mac) -> bool {
        self.repo.has_blob(BlobKind::Data, mac)
    }

    /// Request cancellation. The producer and workers observe the flag
    /// between records; nothing further is persisted and the state delta
    /// is discarded.
    pub fn abort(&self) {
        self.shared.aborted.store(true, Ordering::SeqCst);
    }

    /// Finalize the snapshot: store the statistics blob, pack the header
    /// as the last blob, drain the pipeline, then persist the state delta.
    ///
    /// After commit the session is terminal. Worker failures recorded
    /// during the session surface here.
    pub fn commit(mut self) -> Result<CommitReceipt> {
        // Statistics blob first: the header references its MAC. The header
        // itself goes through the channel last.
        let mut pending: Result<()> = Ok(());
        if !self.shared.is_aborted() && !self.shared.is_poisoned() {
            pending = self.write_statistics();
        }
        if pending.is_ok() {
            self.header.creation_duration_ms = self.started.elapsed().as_millis() as u64;
            pending = self.header.serialize().and_then(|serialized| {
                self.enqueue(BlobKind::Snapshot, self.header.snapshot_id, &serialized)
            });
        }

        // Close the channel and wait for workers to flush residuals,
        // even on the error paths above.
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        if self.shared.is_aborted() {
            debug!(snapshot = %self.header.short_id(), "commit canceled");
            return Err(StrataError::Canceled);
        }
        // A recorded worker error outranks whatever the producer saw.
        if let Some(err) = self.shared.first_error.lock().unwrap().take() {
            return Err(err);
        }
        pending?;

        let serialized_delta = self.delta.serialize()?;
        let state_mac = self.repo.put_state(&serialized_delta)?;
        debug!(
            snapshot = %self.header.short_id(),
            %state_mac,
            duration_ms = self.header.creation_duration_ms,
            "commit"
        );
        Ok(CommitReceipt {
            snapshot_id: self.header.snapshot_id,
            state_mac,
        })
    }

    fn write_statistics(&mut self) -> Result<()> {
        let statistics: Statistics = self.stats.snapshot();
        let serialized = statistics.serialize()?;
        let stats_mac = self.repo.blob_mac(&serialized)?;
        self.put_data(stats_mac, &serialized)?;
        self.header.statistics = stats_mac;
        Ok(())
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        // An un-committed session must not leave workers parked on the
        // channel. Closing the sender lets them drain and exit.
        self.abort();
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::{debug, trace, warn};

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use crate::packfile::{BlobType, IndexEntry, PackFile};
use crate::repo::Repository;
use crate::snapshot::header::StatCounters;
use crate::state::{BlobKind, State, BLOB_KINDS};

/// Typed message carried on the packer channel. Carrying `BlobKind`
/// (not the wider on-disk tag set) means a worker cannot receive a
/// payload it has no kind map for.
pub struct PackerMsg {
    pub kind: BlobKind,
    pub mac: Mac,
    /// Codec-sealed payload; the packer treats it as opaque bytes.
    pub sealed: Vec<u8>,
    pub enqueued: Instant,
}

fn kind_slot(kind: BlobKind) -> usize {
    match kind {
        BlobKind::Chunk => 0,
        BlobKind::Object => 1,
        BlobKind::File => 2,
        BlobKind::Directory => 3,
        BlobKind::Data => 4,
        BlobKind::Snapshot => 5,
    }
}

/// Context shared between a session and its packer workers.
pub(crate) struct PackerShared {
    pub repo: Arc<Repository>,
    pub delta: Arc<State>,
    pub stats: Arc<StatCounters>,
    /// First worker error; commit reports it.
    pub first_error: Mutex<Option<StrataError>>,
    /// Set on worker error; workers drain without packing.
    pub poisoned: AtomicBool,
    /// Caller-requested abort; in-flight builders are dropped.
    pub aborted: AtomicBool,
}

impl PackerShared {
    pub fn record_error(&self, err: StrataError) {
        warn!(error = %err, "packer worker failed, poisoning session");
        let mut slot = self.first_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.poisoned.store(true, Ordering::SeqCst);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Packer worker count: one per logical CPU.
pub(crate) fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Bounded capacity of the producer → workers channel. Producers block
/// when workers fall behind.
pub(crate) fn channel_capacity(workers: usize) -> usize {
    2 * workers + 1
}

/// Consume packer messages until the channel closes, grouping blobs into
/// size-bounded packfiles.
///
/// Each worker owns its current builder and six per-kind seen-sets; blobs
/// never move between workers. On error the session is poisoned and the
/// worker keeps draining so the producer unblocks.
pub(crate) fn run_worker(shared: &PackerShared, rx: Receiver<PackerMsg>) {
    let threshold = shared.repo.config().packfile_size;
    let mut pack: Option<PackFile> = None;
    let mut seen: [HashSet<Mac>; 6] = Default::default();

    for msg in rx.iter() {
        if shared.is_aborted() {
            // Drop any in-flight builder: its packfile is never written
            // and no state update occurs.
            pack = None;
            continue;
        }
        if shared.is_poisoned() {
            continue;
        }

        if pack.is_none() {
            for set in seen.iter_mut() {
                set.clear();
            }
        }
        let current = pack.get_or_insert_with(PackFile::new);

        trace!(
            mac = %msg.mac,
            kind = ?msg.kind,
            queued_ms = msg.enqueued.elapsed().as_millis() as u64,
            "packing blob"
        );

        let slot = kind_slot(msg.kind);
        if seen[slot].contains(&msg.mac) {
            continue;
        }
        // The same MAC may already sit in this packfile under another
        // kind; the payload is identical by content-addressing, so only
        // the registration below differs.
        if !current.contains(&msg.mac) {
            if let Err(e) = current.add(BlobType::from_kind(msg.kind), msg.mac, &msg.sealed) {
                shared.record_error(e);
                pack = None;
                continue;
            }
        }
        seen[slot].insert(msg.mac);

        if current.size() > threshold {
            if let Some(full) = pack.take() {
                if let Err(e) = write_packfile(shared, full, &mut seen) {
                    shared.record_error(e);
                }
            }
        }
    }

    // Channel closed and drained: flush the residual builder.
    if let Some(residual) = pack.take() {
        if !shared.is_aborted() && !shared.is_poisoned() && !residual.is_empty() {
            if let Err(e) = write_packfile(shared, residual, &mut seen) {
                shared.record_error(e);
            }
        }
    }
}

/// Serialize a full builder, write it to the backend, and register every
/// blob's location in both the shared repository state and the session's
/// delta.
///
/// The packfile MAC is known only after full serialization, so a failure
/// part-way leaves no index entry referencing the write: the object (if
/// any) is safely orphaned.
fn write_packfile(
    shared: &PackerShared,
    pack: PackFile,
    seen: &mut [HashSet<Mac>; 6],
) -> Result<()> {
    let index: Vec<IndexEntry> = pack.index().to_vec();
    let bytes = pack.finalize(shared.repo.codec())?;
    let packfile_mac = shared.repo.mac(&bytes);

    shared.repo.backend().put_packfile(packfile_mac, &bytes)?;
    StatCounters::bump(
        &shared.stats.packfiles_count,
        &shared.stats.packfiles_size,
        bytes.len() as u64,
    );
    debug!(
        %packfile_mac,
        blobs = index.len(),
        bytes = bytes.len(),
        "wrote packfile"
    );

    for kind in BLOB_KINDS {
        for mac in seen[kind_slot(kind)].drain() {
            if let Some(entry) = index.iter().find(|e| e.mac == mac) {
                shared
                    .repo
                    .state()
                    .set_location(kind, mac, packfile_mac, entry.offset, entry.length);
                shared
                    .delta
                    .set_location(kind, mac, packfile_mac, entry.offset, entry.length);
            }
        }
    }
    Ok(())
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_types::error::Result;
use strata_types::mac::Mac;

/// Header document format version.
pub const HEADER_VERSION: u32 = 1;

/// The root document of a snapshot, packed as the last blob of a commit.
///
/// Once the header's MAC is visible in a state, every blob it references
/// transitively is already locatable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Snapshot identity, assigned at session creation from a random seed
    /// hashed through the repository key. Also the MAC the header blob is
    /// stored under.
    pub snapshot_id: Mac,
    pub version: u32,
    pub creation_time: DateTime<Utc>,
    pub creation_duration_ms: u64,
    /// State MACs this snapshot's delta extends.
    pub extends: Vec<Mac>,

    pub hostname: String,
    pub username: String,
    pub operating_system: String,
    pub architecture: String,
    pub command_line: String,
    pub tags: Vec<String>,

    /// Source roots handed to the scanner.
    pub scanned_roots: Vec<String>,
    pub scan_size: u64,
    pub scan_processed_size: u64,

    pub files_count: u64,
    pub directories_count: u64,

    /// Category roll-ups maintained by the scanner.
    pub file_kind: HashMap<String, u64>,
    pub file_type: HashMap<String, u64>,
    pub file_extension: HashMap<String, u64>,
    pub file_percent_kind: HashMap<String, f64>,
    pub file_percent_type: HashMap<String, f64>,
    pub file_percent_extension: HashMap<String, f64>,

    /// Root directory entry of the snapshot tree.
    pub root: Mac,
    /// Metadata blob attached to the snapshot.
    pub metadata: Mac,
    /// Statistics blob written at commit.
    pub statistics: Mac,
}

impl Header {
    pub fn new(snapshot_id: Mac) -> Self {
        Self {
            snapshot_id,
            version: HEADER_VERSION,
            creation_time: Utc::now(),
            creation_duration_ms: 0,
            extends: Vec::new(),
            hostname: String::new(),
            username: String::new(),
            operating_system: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            command_line: String::new(),
            tags: Vec::new(),
            scanned_roots: Vec::new(),
            scan_size: 0,
            scan_processed_size: 0,
            files_count: 0,
            directories_count: 0,
            file_kind: HashMap::new(),
            file_type: HashMap::new(),
            file_extension: HashMap::new(),
            file_percent_kind: HashMap::new(),
            file_percent_type: HashMap::new(),
            file_percent_extension: HashMap::new(),
            root: Mac([0u8; 32]),
            metadata: Mac([0u8; 32]),
            statistics: Mac([0u8; 32]),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(serialized: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(serialized)?)
    }

    /// Abbreviated id for log lines.
    pub fn short_id(&self) -> String {
        self.snapshot_id.to_hex()[..8].to_string()
    }
}

/// Transfer statistics accumulated over a session, persisted as a Data
/// blob referenced from the header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub chunks_count: u64,
    pub chunks_size: u64,
    pub objects_count: u64,
    pub objects_size: u64,
    pub files_count: u64,
    pub files_size: u64,
    pub directories_count: u64,
    pub directories_size: u64,
    pub data_count: u64,
    pub data_size: u64,
    pub packfiles_count: u64,
    pub packfiles_size: u64,
}

impl Statistics {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(serialized: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(serialized)?)
    }
}

/// Lock-free counters shared between the producer and the packer workers.
#[derive(Debug, Default)]
pub struct StatCounters {
    pub chunks_count: AtomicU64,
    pub chunks_size: AtomicU64,
    pub objects_count: AtomicU64,
    pub objects_size: AtomicU64,
    pub files_count: AtomicU64,
    pub files_size: AtomicU64,
    pub directories_count: AtomicU64,
    pub directories_size: AtomicU64,
    pub data_count: AtomicU64,
    pub data_size: AtomicU64,
    pub packfiles_count: AtomicU64,
    pub packfiles_size: AtomicU64,
}

impl StatCounters {
    pub fn bump(counter_count: &AtomicU64, counter_size: &AtomicU64, bytes: u64) {
        counter_count.fetch_add(1, Ordering::Relaxed);
        counter_size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Materialize the counters into the persisted form.
    pub fn snapshot(&self) -> Statistics {
        Statistics {
            chunks_count: self.chunks_count.load(Ordering::Relaxed),
            chunks_size: self.chunks_size.load(Ordering::Relaxed),
            objects_count: self.objects_count.load(Ordering::Relaxed),
            objects_size: self.objects_size.load(Ordering::Relaxed),
            files_count: self.files_count.load(Ordering::Relaxed),
            files_size: self.files_size.load(Ordering::Relaxed),
            directories_count: self.directories_count.load(Ordering::Relaxed),
            directories_size: self.directories_size.load(Ordering::Relaxed),
            data_count: self.data_count.load(Ordering::Relaxed),
            data_size: self.data_size.load(Ordering::Relaxed),
            packfiles_count: self.packfiles_count.load(Ordering::Relaxed),
            packfiles_size: self.packfiles_size.load(Ordering::Relaxed),
        }
    }
}

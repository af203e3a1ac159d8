use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

/// State format version, written as a 4-byte LE trailer after the body.
pub const STATE_VERSION: u32 = 1;

/// The six addressable blob kinds, each with its own location map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Chunk,
    Object,
    File,
    Directory,
    Data,
    Snapshot,
}

pub const BLOB_KINDS: [BlobKind; 6] = [
    BlobKind::Chunk,
    BlobKind::Object,
    BlobKind::File,
    BlobKind::Directory,
    BlobKind::Data,
    BlobKind::Snapshot,
];

/// Where a blob lives: packfile (as an interned id), offset into the
/// packfile's data area, and sealed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub packfile: u64,
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u32,
    pub creation_time: DateTime<Utc>,
    pub extends: Vec<Mac>,
}

/// Intern table assigning monotonically increasing ids to MACs.
/// `id_to_mac` is the authoritative persisted form; the reverse map is
/// rebuilt on load.
#[derive(Debug, Default)]
struct Intern {
    id_to_mac: Vec<Mac>,
    mac_to_id: HashMap<Mac, u64>,
}

impl Intern {
    fn get_or_create(&mut self, mac: Mac) -> u64 {
        if let Some(&id) = self.mac_to_id.get(&mac) {
            return id;
        }
        let id = self.id_to_mac.len() as u64;
        self.id_to_mac.push(mac);
        self.mac_to_id.insert(mac, id);
        id
    }
}

/// Content-addressed repository index: maps blob MACs to their packfile
/// locations, one map per kind.
///
/// All operations are thread-safe. The intern table and each kind map have
/// their own mutex; locks are taken intern-first and never nested, so
/// readers hold any single lock for the minimum window.
#[derive(Debug)]
pub struct State {
    intern: Mutex<Intern>,
    chunks: Mutex<HashMap<u64, Location>>,
    objects: Mutex<HashMap<u64, Location>>,
    files: Mutex<HashMap<u64, Location>>,
    directories: Mutex<HashMap<u64, Location>>,
    datas: Mutex<HashMap<u64, Location>>,
    snapshots: Mutex<HashMap<u64, Location>>,
    metadata: Mutex<Metadata>,
    dirty: AtomicBool,
}

/// Persisted fields of a state object. `mac_to_id` is derived and not
/// stored.
#[derive(Serialize, Deserialize)]
struct StateWire {
    id_to_mac: Vec<Mac>,
    chunks: HashMap<u64, Location>,
    objects: HashMap<u64, Location>,
    files: HashMap<u64, Location>,
    directories: HashMap<u64, Location>,
    datas: HashMap<u64, Location>,
    snapshots: HashMap<u64, Location>,
    metadata: Metadata,
}

impl State {
    pub fn new() -> Self {
        Self {
            intern: Mutex::new(Intern::default()),
            chunks: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            directories: Mutex::new(HashMap::new()),
            datas: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
            metadata: Mutex::new(Metadata {
                version: STATE_VERSION,
                creation_time: Utc::now(),
                extends: Vec::new(),
            }),
            dirty: AtomicBool::new(false),
        }
    }

    fn map(&self, kind: BlobKind) -> &Mutex<HashMap<u64, Location>> {
        match kind {
            BlobKind::Chunk => &self.chunks,
            BlobKind::Object => &self.objects,
            BlobKind::File => &self.files,
            BlobKind::Directory => &self.directories,
            BlobKind::Data => &self.datas,
            BlobKind::Snapshot => &self.snapshots,
        }
    }

    /// Return the existing id for a MAC or assign the next one.
    /// Monotonic, never removes.
    pub fn intern(&self, mac: Mac) -> u64 {
        self.intern.lock().unwrap().get_or_create(mac)
    }

    /// Record the location of a blob under its kind map, first-writer-wins.
    /// Re-registering an existing blob is a no-op and does not mark the
    /// state dirty.
    pub fn set_location(
        &self,
        kind: BlobKind,
        mac: Mac,
        packfile_mac: Mac,
        offset: u32,
        length: u32,
    ) {
        let (packfile_id, blob_id) = {
            let mut intern = self.intern.lock().unwrap();
            (intern.get_or_create(packfile_mac), intern.get_or_create(mac))
        };

        let mut map = self.map(kind).lock().unwrap();
        if !map.contains_key(&blob_id) {
            map.insert(
                blob_id,
                Location {
                    packfile: packfile_id,
                    offset,
                    length,
                },
            );
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Resolve a blob to `(packfile_mac, offset, length)`.
    pub fn location(&self, kind: BlobKind, mac: Mac) -> Option<(Mac, u32, u32)> {
        let id = self.intern(mac);
        let loc = { self.map(kind).lock().unwrap().get(&id).copied() }?;
        let packfile_mac = {
            let intern = self.intern.lock().unwrap();
            intern.id_to_mac[loc.packfile as usize]
        };
        Some((packfile_mac, loc.offset, loc.length))
    }

    /// Key-only existence check, used for dedup.
    pub fn exists(&self, kind: BlobKind, mac: Mac) -> bool {
        let id = self.intern(mac);
        self.map(kind).lock().unwrap().contains_key(&id)
    }

    /// Number of blobs recorded under a kind.
    pub fn count(&self, kind: BlobKind) -> usize {
        self.map(kind).lock().unwrap().len()
    }

    /// All MACs recorded under a kind (snapshot enumeration).
    pub fn macs(&self, kind: BlobKind) -> Vec<Mac> {
        let ids: Vec<u64> = { self.map(kind).lock().unwrap().keys().copied().collect() };
        let intern = self.intern.lock().unwrap();
        ids.into_iter()
            .map(|id| intern.id_to_mac[id as usize])
            .collect()
    }

    /// Fold another state's entries into this one. Ids are translated back
    /// to MACs through the other state's intern table; first-writer-wins
    /// makes the merge commutative for duplicate blobs.
    pub fn merge(&self, other: &State) {
        for kind in BLOB_KINDS {
            let entries: Vec<(Mac, Mac, u32, u32)> = {
                let other_intern = other.intern.lock().unwrap();
                let map = other.map(kind).lock().unwrap();
                map.iter()
                    .map(|(&id, loc)| {
                        (
                            other_intern.id_to_mac[id as usize],
                            other_intern.id_to_mac[loc.packfile as usize],
                            loc.offset,
                            loc.length,
                        )
                    })
                    .collect()
            };
            for (mac, packfile_mac, offset, length) in entries {
                self.set_location(kind, mac, packfile_mac, offset, length);
            }
        }
        trace!("merged state delta");
    }

    /// Record a parent state in the delta lineage.
    pub fn extends(&self, parent: Mac) {
        self.metadata.lock().unwrap().extends.push(parent);
    }

    pub fn extends_list(&self) -> Vec<Mac> {
        self.metadata.lock().unwrap().extends.clone()
    }

    pub fn set_extends(&self, parents: Vec<Mac>) {
        self.metadata.lock().unwrap().extends = parents;
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.metadata.lock().unwrap().creation_time
    }

    pub fn dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn reset_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Serialize the persisted fields: msgpack body plus a 4-byte LE
    /// version trailer.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let wire = StateWire {
            id_to_mac: self.intern.lock().unwrap().id_to_mac.clone(),
            chunks: self.chunks.lock().unwrap().clone(),
            objects: self.objects.lock().unwrap().clone(),
            files: self.files.lock().unwrap().clone(),
            directories: self.directories.lock().unwrap().clone(),
            datas: self.datas.lock().unwrap().clone(),
            snapshots: self.snapshots.lock().unwrap().clone(),
            metadata: self.metadata.lock().unwrap().clone(),
        };
        let mut serialized = rmp_serde::to_vec(&wire)?;
        serialized.extend_from_slice(&STATE_VERSION.to_le_bytes());
        Ok(serialized)
    }

    /// Decode a state object, rebuild the reverse intern map, and re-check
    /// the load invariants.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(StrataError::CorruptState(format!(
                "state too small: {} bytes",
                data.len()
            )));
        }
        let (body, version_bytes) = data.split_at(data.len() - 4);
        let version = u32::from_le_bytes(version_bytes.try_into().unwrap());
        if version != STATE_VERSION {
            return Err(StrataError::CorruptState(format!(
                "unsupported state version: {version}"
            )));
        }

        let wire: StateWire = rmp_serde::from_slice(body)
            .map_err(|e| StrataError::CorruptState(format!("decode: {e}")))?;

        let mut mac_to_id = HashMap::with_capacity(wire.id_to_mac.len());
        for (id, mac) in wire.id_to_mac.iter().enumerate() {
            if mac_to_id.insert(*mac, id as u64).is_some() {
                return Err(StrataError::CorruptState(format!(
                    "duplicate MAC in intern table: {mac}"
                )));
            }
        }

        let table_len = wire.id_to_mac.len() as u64;
        for (name, map) in [
            ("chunks", &wire.chunks),
            ("objects", &wire.objects),
            ("files", &wire.files),
            ("directories", &wire.directories),
            ("datas", &wire.datas),
            ("snapshots", &wire.snapshots),
        ] {
            for (&id, loc) in map {
                if id >= table_len {
                    return Err(StrataError::CorruptState(format!(
                        "{name}: key id {id} outside intern table of {table_len}"
                    )));
                }
                if loc.packfile >= table_len {
                    return Err(StrataError::CorruptState(format!(
                        "{name}: packfile id {} outside intern table of {table_len}",
                        loc.packfile
                    )));
                }
            }
        }

        Ok(Self {
            intern: Mutex::new(Intern {
                id_to_mac: wire.id_to_mac,
                mac_to_id,
            }),
            chunks: Mutex::new(wire.chunks),
            objects: Mutex::new(wire.objects),
            files: Mutex::new(wire.files),
            directories: Mutex::new(wire.directories),
            datas: Mutex::new(wire.datas),
            snapshots: Mutex::new(wire.snapshots),
            metadata: Mutex::new(wire.metadata),
            dirty: AtomicBool::new(false),
        })
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

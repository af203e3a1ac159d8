pub mod lock;

use chrono::Utc;
use rand::RngCore;
use tracing::{debug, trace};

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use crate::codec::Codec;
use crate::config::RepositoryConfig;
use crate::packfile::{self, Footer, IndexEntry};
use crate::state::{BlobKind, State};
use crate::storage::Backend;

/// An open repository: a backend, the codec derived from its
/// configuration, and the aggregate state merged from all persisted
/// deltas.
///
/// The repository outlives every snapshot session; sessions reach it
/// through a shared reference (`Arc`).
pub struct Repository {
    backend: Box<dyn Backend>,
    codec: Codec,
    config: RepositoryConfig,
    state: State,
}

impl Repository {
    /// Initialize a new repository on the backend and open it.
    pub fn create(
        backend: Box<dyn Backend>,
        config: RepositoryConfig,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        config.validate()?;
        let codec = Codec::from_config(&config, passphrase)?;
        backend.create(&config.serialize()?)?;
        debug!(repository_id = %config.repository_id, "created repository");
        Ok(Self {
            backend,
            codec,
            config,
            state: State::new(),
        })
    }

    /// Open an existing repository: read the configuration, derive the
    /// codec, then load and merge every persisted state delta, oldest
    /// first.
    pub fn open(backend: Box<dyn Backend>, passphrase: Option<&str>) -> Result<Self> {
        let config = RepositoryConfig::from_bytes(&backend.open()?)?;
        let codec = Codec::from_config(&config, passphrase)?;

        let mut deltas = Vec::new();
        for mac in backend.states()? {
            let delta = State::deserialize(&backend.get_state(mac)?)?;
            deltas.push((mac, delta));
        }
        deltas.sort_by_key(|(_, delta)| delta.creation_time());

        let state = State::new();
        for (mac, delta) in &deltas {
            state.merge(delta);
            state.extends(*mac);
        }
        state.reset_dirty();
        debug!(
            repository_id = %config.repository_id,
            deltas = deltas.len(),
            "opened repository"
        );

        Ok(Self {
            backend,
            codec,
            config,
            state,
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    /// Compute the repository MAC of a byte string.
    pub fn mac(&self, data: &[u8]) -> Mac {
        self.codec.mac_of(data)
    }

    /// Compute the content address of a blob: the MAC of its sealed form.
    /// Sealing is deterministic, so scanners can use this for dedup checks
    /// before deciding to put.
    pub fn blob_mac(&self, data: &[u8]) -> Result<Mac> {
        Ok(self.mac(&self.codec.seal(data)?))
    }

    /// Assign a fresh snapshot id: a random seed plus the current time,
    /// hashed through the repository key.
    pub fn new_snapshot_id(&self) -> Mac {
        let mut seed = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut seed[..16]);
        seed[16..].copy_from_slice(&Utc::now().timestamp_micros().to_le_bytes());
        self.mac(&seed)
    }

    /// Read `[offset, offset+length)` from a packfile, enforcing the
    /// exact-length contract.
    pub fn get_packfile_blob(&self, packfile_mac: Mac, offset: u32, length: u32) -> Result<Vec<u8>> {
        let data = self.backend.get_packfile_blob(packfile_mac, offset, length)?;
        if data.len() != length as usize {
            return Err(StrataError::CorruptPackfile(format!(
                "short read from packfile {packfile_mac}: wanted {length} bytes at {offset}, got {}",
                data.len()
            )));
        }
        Ok(data)
    }

    /// Fetch one blob through the state's location map and unseal it.
    pub fn get_blob(&self, kind: BlobKind, mac: Mac) -> Result<Vec<u8>> {
        trace!(%mac, ?kind, "get blob");
        let (packfile_mac, offset, length) = self
            .state
            .location(kind, mac)
            .ok_or_else(|| StrataError::NotFound(format!("blob {mac}")))?;
        let sealed = self.get_packfile_blob(packfile_mac, offset, length)?;
        self.codec.unseal(&sealed)
    }

    /// Key-only existence check against the state.
    pub fn has_blob(&self, kind: BlobKind, mac: Mac) -> bool {
        self.state.exists(kind, mac)
    }

    /// Persist a serialized state delta under its own MAC.
    pub fn put_state(&self, serialized: &[u8]) -> Result<Mac> {
        let mac = self.mac(serialized);
        self.backend.put_state(mac, serialized)?;
        debug!(%mac, bytes = serialized.len(), "wrote state");
        Ok(mac)
    }

    /// MACs of every snapshot header recorded in the state.
    pub fn snapshots(&self) -> Vec<Mac> {
        self.state.macs(BlobKind::Snapshot)
    }

    /// Fetch a packfile wholesale and parse its footer and index.
    pub fn parse_packfile(&self, mac: Mac) -> Result<(Footer, Vec<IndexEntry>)> {
        let data = self.backend.get_packfile(mac)?;
        packfile::parse(&data, &self.codec)
    }

    /// Release the backend. Sessions must be committed or dropped first;
    /// the borrow checker enforces that.
    pub fn close(self) -> Result<()> {
        self.backend.close()
    }
}

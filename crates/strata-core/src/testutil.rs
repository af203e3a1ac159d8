use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use crate::config::{CompressionAlgorithm, EncryptionAlgorithm, RepositoryConfig};
use crate::repo::Repository;
use crate::storage::Backend;

/// In-memory storage backend for testing. Thread-safe via Mutex.
pub struct MemoryBackend {
    config: Mutex<Option<Vec<u8>>>,
    states: Mutex<HashMap<Mac, Vec<u8>>>,
    packfiles: Mutex<HashMap<Mac, Vec<u8>>>,
    locks: Mutex<HashMap<Mac, Vec<u8>>>,
    /// When set, every packfile put fails. Exercises worker poisoning.
    fail_packfile_puts: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(None),
            states: Mutex::new(HashMap::new()),
            packfiles: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            fail_packfile_puts: AtomicBool::new(false),
        }
    }

    pub fn set_fail_packfile_puts(&self, fail: bool) {
        self.fail_packfile_puts.store(fail, Ordering::SeqCst);
    }

    pub fn packfile_count(&self) -> usize {
        self.packfiles.lock().unwrap().len()
    }

    pub fn state_count(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    /// Flip one byte of a stored packfile at `pos` from the end.
    pub fn corrupt_packfile_tail(&self, mac: Mac, pos_from_end: usize) {
        let mut packfiles = self.packfiles.lock().unwrap();
        let data = packfiles.get_mut(&mac).expect("packfile present");
        let idx = data.len() - 1 - pos_from_end;
        data[idx] ^= 0xFF;
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn create(&self, config: &[u8]) -> Result<()> {
        let mut slot = self.config.lock().unwrap();
        if slot.is_some() {
            return Err(StrataError::Config("repository already exists".into()));
        }
        *slot = Some(config.to_vec());
        Ok(())
    }

    fn open(&self) -> Result<Vec<u8>> {
        self.config
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| StrataError::NotFound("repository configuration".into()))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn put_state(&self, mac: Mac, data: &[u8]) -> Result<()> {
        self.states.lock().unwrap().insert(mac, data.to_vec());
        Ok(())
    }

    fn get_state(&self, mac: Mac) -> Result<Vec<u8>> {
        self.states
            .lock()
            .unwrap()
            .get(&mac)
            .cloned()
            .ok_or_else(|| StrataError::NotFound(format!("state {mac}")))
    }

    fn delete_state(&self, mac: Mac) -> Result<()> {
        self.states.lock().unwrap().remove(&mac);
        Ok(())
    }

    fn states(&self) -> Result<Vec<Mac>> {
        Ok(self.states.lock().unwrap().keys().copied().collect())
    }

    fn put_packfile(&self, mac: Mac, data: &[u8]) -> Result<()> {
        if self.fail_packfile_puts.load(Ordering::SeqCst) {
            return Err(StrataError::BackendIo(std::io::Error::other(
                "injected packfile put failure",
            )));
        }
        self.packfiles.lock().unwrap().insert(mac, data.to_vec());
        Ok(())
    }

    fn get_packfile(&self, mac: Mac) -> Result<Vec<u8>> {
        self.packfiles
            .lock()
            .unwrap()
            .get(&mac)
            .cloned()
            .ok_or_else(|| StrataError::NotFound(format!("packfile {mac}")))
    }

    fn get_packfile_blob(&self, mac: Mac, offset: u32, length: u32) -> Result<Vec<u8>> {
        let packfiles = self.packfiles.lock().unwrap();
        let data = packfiles
            .get(&mac)
            .ok_or_else(|| StrataError::NotFound(format!("packfile {mac}")))?;
        let start = (offset as usize).min(data.len());
        let end = (start + length as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn delete_packfile(&self, mac: Mac) -> Result<()> {
        self.packfiles.lock().unwrap().remove(&mac);
        Ok(())
    }

    fn packfiles(&self) -> Result<Vec<Mac>> {
        Ok(self.packfiles.lock().unwrap().keys().copied().collect())
    }

    fn put_lock(&self, mac: Mac, data: &[u8]) -> Result<()> {
        self.locks.lock().unwrap().insert(mac, data.to_vec());
        Ok(())
    }

    fn get_lock(&self, mac: Mac) -> Result<Vec<u8>> {
        self.locks
            .lock()
            .unwrap()
            .get(&mac)
            .cloned()
            .ok_or_else(|| StrataError::NotFound(format!("lock {mac}")))
    }

    fn delete_lock(&self, mac: Mac) -> Result<()> {
        self.locks.lock().unwrap().remove(&mac);
        Ok(())
    }

    fn locks(&self) -> Result<Vec<Mac>> {
        Ok(self.locks.lock().unwrap().keys().copied().collect())
    }
}

/// Create a plaintext repository backed by MemoryBackend. The backend is
/// returned alongside so tests can inspect or sabotage stored objects.
pub fn test_repo_plaintext() -> (std::sync::Arc<MemoryBackend>, Repository) {
    let backend = std::sync::Arc::new(MemoryBackend::new());
    let config = RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::Lz4);
    let repo = Repository::create(Box::new(std::sync::Arc::clone(&backend)), config, None)
        .expect("failed to init test repo");
    (backend, repo)
}

/// Create a plaintext repository with a specific packfile size threshold.
pub fn test_repo_with_packfile_size(
    packfile_size: u32,
) -> (std::sync::Arc<MemoryBackend>, Repository) {
    let backend = std::sync::Arc::new(MemoryBackend::new());
    let mut config = RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::None);
    config.packfile_size = packfile_size;
    let repo = Repository::create(Box::new(std::sync::Arc::clone(&backend)), config, None)
        .expect("failed to init test repo");
    (backend, repo)
}

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use super::Backend;

const CONFIG_FILE: &str = "CONFIG";
const STATES_DIR: &str = "states";
const PACKFILES_DIR: &str = "packfiles";
const LOCKS_DIR: &str = "locks";

/// Filesystem backend using `std::fs` directly.
///
/// Layout under the root: `CONFIG`, `states/<hex>`, `locks/<hex>`, and
/// `packfiles/<byte0_hex>/<hex>` sharded by the MAC's first byte.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn state_path(&self, mac: Mac) -> PathBuf {
        self.root.join(STATES_DIR).join(mac.to_hex())
    }

    fn packfile_path(&self, mac: Mac) -> PathBuf {
        self.root
            .join(PACKFILES_DIR)
            .join(mac.shard_prefix())
            .join(mac.to_hex())
    }

    fn lock_path(&self, mac: Mac) -> PathBuf {
        self.root.join(LOCKS_DIR).join(mac.to_hex())
    }

    /// Write via a temp file in the same directory plus rename, so a
    /// failed write never leaves a visible object.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| StrataError::Config(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(parent)?;

        let tmp = parent.join(format!(".tmp-{:016x}", rand::thread_rng().next_u64()));
        let result = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn read(path: &Path, what: &str) -> Result<Vec<u8>> {
        match fs::read(path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StrataError::NotFound(what.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List the MAC-named files directly under `dir` (missing dir is empty).
    fn list_macs(dir: &Path) -> Result<Vec<Mac>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut macs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(mac) = Mac::from_hex(name) {
                    macs.push(mac);
                }
            }
        }
        Ok(macs)
    }
}

impl Backend for LocalBackend {
    fn create(&self, config: &[u8]) -> Result<()> {
        if self.root.join(CONFIG_FILE).exists() {
            return Err(StrataError::Config(format!(
                "repository already exists at '{}'",
                self.root.display()
            )));
        }
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.root.join(STATES_DIR))?;
        fs::create_dir_all(self.root.join(PACKFILES_DIR))?;
        fs::create_dir_all(self.root.join(LOCKS_DIR))?;
        self.write_atomic(&self.root.join(CONFIG_FILE), config)
    }

    fn open(&self) -> Result<Vec<u8>> {
        Self::read(&self.root.join(CONFIG_FILE), "repository configuration")
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn put_state(&self, mac: Mac, data: &[u8]) -> Result<()> {
        self.write_atomic(&self.state_path(mac), data)
    }

    fn get_state(&self, mac: Mac) -> Result<Vec<u8>> {
        Self::read(&self.state_path(mac), &format!("state {mac}"))
    }

    fn delete_state(&self, mac: Mac) -> Result<()> {
        Self::delete(&self.state_path(mac))
    }

    fn states(&self) -> Result<Vec<Mac>> {
        Self::list_macs(&self.root.join(STATES_DIR))
    }

    fn put_packfile(&self, mac: Mac, data: &[u8]) -> Result<()> {
        self.write_atomic(&self.packfile_path(mac), data)
    }

    fn get_packfile(&self, mac: Mac) -> Result<Vec<u8>> {
        Self::read(&self.packfile_path(mac), &format!("packfile {mac}"))
    }

    fn get_packfile_blob(&self, mac: Mac, offset: u32, length: u32) -> Result<Vec<u8>> {
        let path = self.packfile_path(mac);
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StrataError::NotFound(format!("packfile {mac}")));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; length as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn delete_packfile(&self, mac: Mac) -> Result<()> {
        Self::delete(&self.packfile_path(mac))
    }

    fn packfiles(&self) -> Result<Vec<Mac>> {
        let dir = self.root.join(PACKFILES_DIR);
        let shards = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut macs = Vec::new();
        for shard in shards {
            let shard = shard?;
            if shard.file_type()?.is_dir() {
                macs.extend(Self::list_macs(&shard.path())?);
            }
        }
        Ok(macs)
    }

    fn put_lock(&self, mac: Mac, data: &[u8]) -> Result<()> {
        self.write_atomic(&self.lock_path(mac), data)
    }

    fn get_lock(&self, mac: Mac) -> Result<Vec<u8>> {
        Self::read(&self.lock_path(mac), &format!("lock {mac}"))
    }

    fn delete_lock(&self, mac: Mac) -> Result<()> {
        Self::delete(&self.lock_path(mac))
    }

    fn locks(&self) -> Result<Vec<Mac>> {
        Self::list_macs(&self.root.join(LOCKS_DIR))
    }
}

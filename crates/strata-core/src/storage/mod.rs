pub mod local_backend;

use strata_types::error::Result;
use strata_types::mac::Mac;

/// Abstract key-value storage for repository objects, over four
/// namespaces: the singleton `config`, `states/<hex>`, `packfiles/<hex>`
/// and the advisory `locks/<hex>`.
///
/// Writes are atomic at key granularity: a failed write leaves no visible
/// object. Reads of a missing key return `StrataError::NotFound`, which
/// callers distinguish from transport errors. Ranged packfile reads
/// return at most `length` bytes; callers treat a short read as
/// corruption, not truncation.
pub trait Backend: Send + Sync {
    /// One-time repository initialization: persist the configuration
    /// object. Fails if the repository already exists.
    fn create(&self, config: &[u8]) -> Result<()>;

    /// Open an existing repository and return its configuration bytes.
    fn open(&self) -> Result<Vec<u8>>;

    /// Release any resources held by the backend.
    fn close(&self) -> Result<()>;

    fn put_state(&self, mac: Mac, data: &[u8]) -> Result<()>;
    fn get_state(&self, mac: Mac) -> Result<Vec<u8>>;
    fn delete_state(&self, mac: Mac) -> Result<()>;
    fn states(&self) -> Result<Vec<Mac>>;

    fn put_packfile(&self, mac: Mac, data: &[u8]) -> Result<()>;
    fn get_packfile(&self, mac: Mac) -> Result<Vec<u8>>;
    /// Read `[offset, offset+length)` from a packfile.
    fn get_packfile_blob(&self, mac: Mac, offset: u32, length: u32) -> Result<Vec<u8>>;
    fn delete_packfile(&self, mac: Mac) -> Result<()>;
    fn packfiles(&self) -> Result<Vec<Mac>>;

    fn put_lock(&self, mac: Mac, data: &[u8]) -> Result<()>;
    fn get_lock(&self, mac: Mac) -> Result<Vec<u8>>;
    fn delete_lock(&self, mac: Mac) -> Result<()>;
    fn locks(&self) -> Result<Vec<Mac>>;
}

impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn create(&self, config: &[u8]) -> Result<()> {
        (**self).create(config)
    }
    fn open(&self) -> Result<Vec<u8>> {
        (**self).open()
    }
    fn close(&self) -> Result<()> {
        (**self).close()
    }
    fn put_state(&self, mac: Mac, data: &[u8]) -> Result<()> {
        (**self).put_state(mac, data)
    }
    fn get_state(&self, mac: Mac) -> Result<Vec<u8>> {
        (**self).get_state(mac)
    }
    fn delete_state(&self, mac: Mac) -> Result<()> {
        (**self).delete_state(mac)
    }
    fn states(&self) -> Result<Vec<Mac>> {
        (**self).states()
    }
    fn put_packfile(&self, mac: Mac, data: &[u8]) -> Result<()> {
        (**self).put_packfile(mac, data)
    }
    fn get_packfile(&self, mac: Mac) -> Result<Vec<u8>> {
        (**self).get_packfile(mac)
    }
    fn get_packfile_blob(&self, mac: Mac, offset: u32, length: u32) -> Result<Vec<u8>> {
        (**self).get_packfile_blob(mac, offset, length)
    }
    fn delete_packfile(&self, mac: Mac) -> Result<()> {
        (**self).delete_packfile(mac)
    }
    fn packfiles(&self) -> Result<Vec<Mac>> {
        (**self).packfiles()
    }
    fn put_lock(&self, mac: Mac, data: &[u8]) -> Result<()> {
        (**self).put_lock(mac, data)
    }
    fn get_lock(&self, mac: Mac) -> Result<Vec<u8>> {
        (**self).get_lock(mac)
    }
    fn delete_lock(&self, mac: Mac) -> Result<()> {
        (**self).delete_lock(mac)
    }
    fn locks(&self) -> Result<Vec<Mac>> {
        (**self).locks()
    }
}

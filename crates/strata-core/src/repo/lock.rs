use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use crate::storage::Backend;

const DEFAULT_STALE_LOCK_SECS: i64 = 6 * 60 * 60; // 6 hours

/// An advisory lock blob stored under `locks/<mac>`.
#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: DateTime<Utc>,
}

/// Handle to an acquired lock.
#[derive(Debug)]
pub struct LockGuard {
    mac: Mac,
}

impl LockGuard {
    pub fn mac(&self) -> Mac {
        self.mac
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Acquire an advisory writer-intent lock on the repository.
///
/// The lock is a blob under a random MAC; after writing, every lock blob
/// is read back and the deterministic winner is the entry with the oldest
/// timestamp (ties broken by MAC). Losing the race removes our blob and
/// reports the holder.
pub fn acquire_lock(backend: &dyn Backend) -> Result<LockGuard> {
    cleanup_stale_locks(backend, Duration::seconds(DEFAULT_STALE_LOCK_SECS))?;

    let mac = Mac::random();
    let entry = LockEntry {
        hostname: hostname(),
        pid: std::process::id(),
        time: Utc::now(),
    };
    backend.put_lock(mac, &rmp_serde::to_vec(&entry)?)?;

    let mut candidates: Vec<(DateTime<Utc>, Mac)> = Vec::new();
    for lock_mac in backend.locks()? {
        match read_lock(backend, lock_mac) {
            Ok(Some(other)) => candidates.push((other.time, lock_mac)),
            Ok(None) => {}
            Err(e) => {
                let _ = backend.delete_lock(mac);
                return Err(e);
            }
        }
    }
    candidates.sort();

    if candidates.first().map(|(_, m)| *m) != Some(mac) {
        let _ = backend.delete_lock(mac);
        let holder = candidates
            .first()
            .map(|(_, m)| m.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(StrataError::Locked(holder));
    }

    debug!(%mac, "acquired repository lock");
    Ok(LockGuard { mac })
}

/// Release an advisory lock.
pub fn release_lock(backend: &dyn Backend, guard: LockGuard) -> Result<()> {
    backend.delete_lock(guard.mac)
}

/// Forcibly remove all advisory locks. Recovery mechanism for locks left
/// by killed processes. Returns the number of locks removed.
pub fn break_lock(backend: &dyn Backend) -> Result<usize> {
    let mut removed = 0;
    for mac in backend.locks()? {
        backend.delete_lock(mac)?;
        removed += 1;
    }
    Ok(removed)
}

/// Read and decode a lock blob. A concurrently deleted lock is `None`.
fn read_lock(backend: &dyn Backend, mac: Mac) -> Result<Option<LockEntry>> {
    match backend.get_lock(mac) {
        Ok(data) => {
            let entry: LockEntry = rmp_serde::from_slice(&data)?;
            Ok(Some(entry))
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove lock blobs older than `max_age`.
fn cleanup_stale_locks(backend: &dyn Backend, max_age: Duration) -> Result<()> {
    let cutoff = Utc::now() - max_age;
    for mac in backend.locks()? {
        if let Some(entry) = read_lock(backend, mac)? {
            if entry.time < cutoff {
                debug!(%mac, host = %entry.hostname, pid = entry.pid, "removing stale lock");
                backend.delete_lock(mac)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryBackend;

    #[test]
    fn acquire_and_release() {
        let backend = MemoryBackend::new();
        let guard = acquire_lock(&backend).unwrap();
        assert_eq!(backend.locks().unwrap().len(), 1);
        release_lock(&backend, guard).unwrap();
        assert!(backend.locks().unwrap().is_empty());
    }

    #[test]
    fn second_acquire_loses() {
        let backend = MemoryBackend::new();
        let _guard = acquire_lock(&backend).unwrap();
        let err = acquire_lock(&backend).unwrap_err();
        assert!(matches!(err, StrataError::Locked(_)));
        // The loser's blob must not linger.
        assert_eq!(backend.locks().unwrap().len(), 1);
    }

    #[test]
    fn stale_lock_is_cleaned_up() {
        let backend = MemoryBackend::new();
        let stale = LockEntry {
            hostname: "elsewhere".into(),
            pid: 1,
            time: Utc::now() - Duration::hours(48),
        };
        backend
            .put_lock(Mac::random(), &rmp_serde::to_vec(&stale).unwrap())
            .unwrap();

        let guard = acquire_lock(&backend).unwrap();
        assert_eq!(backend.locks().unwrap(), vec![guard.mac()]);
    }

    #[test]
    fn break_lock_removes_everything() {
        let backend = MemoryBackend::new();
        let _a = acquire_lock(&backend).unwrap();
        assert_eq!(break_lock(&backend).unwrap(), 1);
        assert!(backend.locks().unwrap().is_empty());
    }
}

use std::sync::Arc;

use strata_core::config::{CompressionAlgorithm, EncryptionAlgorithm, RepositoryConfig};
use strata_core::repo::{lock, Repository};
use strata_core::snapshot::entry::{DirectoryEntry, FileEntry, FileInfo, Object, RecordType};
use strata_core::snapshot::Snapshot;
use strata_core::state::BlobKind;
use strata_core::storage::local_backend::LocalBackend;
use strata_core::storage::Backend;
use strata_core::{Mac, StrataError};

fn cheap_kdf(config: &mut RepositoryConfig) {
    config.encryption.key_derivation.time_cost = 1;
    config.encryption.key_derivation.memory_cost = 8192;
    config.encryption.key_derivation.parallelism = 1;
}

fn init_local_repo(dir: &std::path::Path) -> Repository {
    let storage = Box::new(LocalBackend::new(dir));
    let config = RepositoryConfig::new(EncryptionAlgorithm::None, CompressionAlgorithm::Lz4);
    Repository::create(storage, config, None).unwrap()
}

fn open_local_repo(dir: &std::path::Path) -> Repository {
    Repository::open(Box::new(LocalBackend::new(dir)), None).unwrap()
}

fn file_info(name: &str, size: u64) -> FileInfo {
    FileInfo {
        name: name.to_string(),
        size,
        mode: 0o644,
        mod_time: chrono::Utc::now(),
        uid: 1000,
        gid: 1000,
        nlink: 1,
    }
}

/// Store one file's content as a chunk, its object, and its entry.
/// Returns the MAC of the file entry blob.
fn put_small_file(session: &Snapshot, parent: &str, name: &str, content: &[u8]) -> Mac {
    let repo = session.repository();

    let chunk_mac = repo.blob_mac(content).unwrap();
    if !session.check_chunk(chunk_mac) {
        session.put_chunk(chunk_mac, content).unwrap();
    }

    let mut object = Object::new(chunk_mac);
    object.chunks = vec![chunk_mac];
    object.content_type = "application/octet-stream".into();
    let object_bytes = object.serialize().unwrap();
    let object_mac = repo.blob_mac(&object_bytes).unwrap();
    session.put_object(object_mac, &object_bytes).unwrap();

    let mut entry = FileEntry::new(parent, RecordType::File, file_info(name, content.len() as u64));
    entry.object = Some(object_mac);
    let entry_bytes = entry.serialize().unwrap();
    let entry_mac = repo.blob_mac(&entry_bytes).unwrap();
    session.put_file(entry_mac, &entry_bytes).unwrap();
    entry_mac
}

fn put_directory(session: &Snapshot, parent: &str, name: &str, children: Vec<Mac>) -> Mac {
    let repo = session.repository();
    let mut dir = DirectoryEntry::new(parent, file_info(name, 0));
    dir.children = children;
    let dir_bytes = dir.serialize().unwrap();
    let dir_mac = repo.blob_mac(&dir_bytes).unwrap();
    session.put_directory(dir_mac, &dir_bytes).unwrap();
    dir_mac
}

#[test]
fn commit_reopen_resolve_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");

    let receipt = {
        let repo = Arc::new(init_local_repo(&dir));
        let mut session = Snapshot::with_worker_count(Arc::clone(&repo), 2);

        let file_b = put_small_file(&session, "/a", "b.txt", b"x");
        let file_c = put_small_file(&session, "/a", "c.txt", b"y");
        let dir_a = put_directory(&session, "/", "a", vec![file_b, file_c]);
        let root = put_directory(&session, "", "/", vec![dir_a]);

        session.header.root = root;
        session.header.scanned_roots = vec!["/a".into()];
        session.header.files_count = 2;
        session.header.directories_count = 2;
        session.commit().unwrap()
    };

    // Reopen from disk and resolve the tree back down to the bytes.
    let repo = open_local_repo(&dir);
    assert_eq!(repo.snapshots(), vec![receipt.snapshot_id]);

    let header = Snapshot::load(&repo, receipt.snapshot_id).unwrap();
    assert_eq!(header.files_count, 2);

    let root = DirectoryEntry::from_bytes(
        &repo.get_blob(BlobKind::Directory, header.root).unwrap(),
    )
    .unwrap();
    assert_eq!(root.children.len(), 1);

    let dir_a =
        DirectoryEntry::from_bytes(&repo.get_blob(BlobKind::Directory, root.children[0]).unwrap())
            .unwrap();
    assert_eq!(dir_a.name(), "a");
    assert_eq!(dir_a.children.len(), 2);

    let mut contents = Vec::new();
    for child in &dir_a.children {
        let entry =
            FileEntry::from_bytes(&repo.get_blob(BlobKind::File, *child).unwrap()).unwrap();
        let object = Object::from_bytes(
            &repo.get_blob(BlobKind::Object, entry.object.unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(object.chunks.len(), 1);
        let data = repo.get_blob(BlobKind::Chunk, object.chunks[0]).unwrap();
        contents.push((entry.path(), data));
    }
    contents.sort();
    assert_eq!(
        contents,
        vec![
            ("/a/b.txt".to_string(), b"x".to_vec()),
            ("/a/c.txt".to_string(), b"y".to_vec()),
        ]
    );
}

#[test]
fn dedup_across_sequential_commits() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");

    let content = b"shared content between commits";
    let first_state;
    {
        let repo = Arc::new(init_local_repo(&dir));
        let session = Snapshot::with_worker_count(Arc::clone(&repo), 1);
        put_small_file(&session, "/", "one.txt", content);
        first_state = session.commit().unwrap().state_mac;
    }

    {
        let repo = Arc::new(open_local_repo(&dir));
        let chunk_mac = repo.blob_mac(content).unwrap();
        // Dedup: the merged state already knows this chunk.
        assert!(repo.has_blob(BlobKind::Chunk, chunk_mac));

        let session = Snapshot::with_worker_count(Arc::clone(&repo), 1);
        assert!(session.check_chunk(chunk_mac));
        assert!(session.header.extends.contains(&first_state));
        // Scanner skips the chunk put entirely; only the new entry blobs
        // go in (put_small_file's dedup guard sees check_chunk == true).
        let entry_mac = put_small_file(&session, "/", "two.txt", content);
        let receipt = session.commit().unwrap();

        let reopened = open_local_repo(&dir);
        assert!(reopened.has_blob(BlobKind::File, entry_mac));
        assert!(reopened.has_blob(BlobKind::Snapshot, receipt.snapshot_id));
        assert_eq!(
            reopened.get_blob(BlobKind::Chunk, chunk_mac).unwrap(),
            content
        );
        // Still exactly one chunk entry after both commits.
        assert_eq!(reopened.state().count(BlobKind::Chunk), 1);
    }
}

fn packfile_path_on_disk(repo_dir: &std::path::Path, mac: Mac) -> std::path::PathBuf {
    repo_dir
        .join("packfiles")
        .join(mac.shard_prefix())
        .join(mac.to_hex())
}

#[test]
fn corruption_is_detected_and_contained() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");

    let storage = Box::new(LocalBackend::new(&dir));
    let mut config =
        RepositoryConfig::new(EncryptionAlgorithm::Aes256Gcm, CompressionAlgorithm::Lz4);
    cheap_kdf(&mut config);
    let repo = Repository::create(storage, config, Some("secret")).unwrap();
    let repo = Arc::new(repo);

    // Two commits, so the two chunks live in two different packfiles.
    let chunk_a = {
        let data = b"victim chunk".to_vec();
        let mac = repo.blob_mac(&data).unwrap();
        let session = Snapshot::with_worker_count(Arc::clone(&repo), 1);
        session.put_chunk(mac, &data).unwrap();
        session.commit().unwrap();
        mac
    };
    let repo = Arc::new(
        Repository::open(Box::new(LocalBackend::new(&dir)), Some("secret")).unwrap(),
    );
    let chunk_b = {
        let data = b"bystander chunk".to_vec();
        let mac = repo.blob_mac(&data).unwrap();
        let session = Snapshot::with_worker_count(Arc::clone(&repo), 1);
        session.put_chunk(mac, &data).unwrap();
        session.commit().unwrap();
        mac
    };

    let repo =
        Repository::open(Box::new(LocalBackend::new(&dir)), Some("secret")).unwrap();
    let (packfile_a, offset_a, length_a) = repo.state().location(BlobKind::Chunk, chunk_a).unwrap();
    let (packfile_b, _, _) = repo.state().location(BlobKind::Chunk, chunk_b).unwrap();
    assert_ne!(packfile_a, packfile_b);

    // Flip one byte inside packfile A's footer.
    let path_a = packfile_path_on_disk(&dir, packfile_a);
    let mut bytes = std::fs::read(&path_a).unwrap();
    let footer_len = bytes[bytes.len() - 1] as usize;
    let footer_at = bytes.len() - 5 - footer_len / 2;
    bytes[footer_at] ^= 0xFF;
    std::fs::write(&path_a, &bytes).unwrap();

    let err = repo.parse_packfile(packfile_a).unwrap_err();
    assert!(matches!(err, StrataError::CorruptPackfile(_)), "{err}");

    // Unrelated packfiles remain readable.
    assert!(repo.parse_packfile(packfile_b).is_ok());
    assert_eq!(repo.get_blob(BlobKind::Chunk, chunk_b).unwrap(), b"bystander chunk");

    // Flip one byte inside the blob area: the authenticated codec refuses
    // the sealed bytes.
    let mut bytes = std::fs::read(&path_a).unwrap();
    bytes[offset_a as usize + length_a as usize / 2] ^= 0xFF;
    std::fs::write(&path_a, &bytes).unwrap();
    let err = repo.get_blob(BlobKind::Chunk, chunk_a).unwrap_err();
    assert!(matches!(err, StrataError::Codec { .. }), "{err}");
}

#[test]
fn truncated_packfile_is_a_short_read() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");
    let repo = Arc::new(init_local_repo(&dir));

    let data = b"chunk that will be truncated away".to_vec();
    let mac = repo.blob_mac(&data).unwrap();
    let session = Snapshot::with_worker_count(Arc::clone(&repo), 1);
    session.put_chunk(mac, &data).unwrap();
    session.commit().unwrap();

    let repo = open_local_repo(&dir);
    let (packfile_mac, offset, _) = repo.state().location(BlobKind::Chunk, mac).unwrap();
    let path = packfile_path_on_disk(&dir, packfile_mac);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..offset as usize + 4]).unwrap();

    let err = repo.get_blob(BlobKind::Chunk, mac).unwrap_err();
    assert!(matches!(err, StrataError::CorruptPackfile(_)), "{err}");
}

#[test]
fn wrong_passphrase_is_rejected_on_read() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");

    let storage = Box::new(LocalBackend::new(&dir));
    let mut config =
        RepositoryConfig::new(EncryptionAlgorithm::Chacha20Poly1305, CompressionAlgorithm::None);
    cheap_kdf(&mut config);
    let repo = Arc::new(Repository::create(storage, config, Some("right")).unwrap());

    let data = b"secret data".to_vec();
    let mac = repo.blob_mac(&data).unwrap();
    let session = Snapshot::with_worker_count(Arc::clone(&repo), 1);
    session.put_chunk(mac, &data).unwrap();
    session.commit().unwrap();

    // Opening derives a wrong key; blob reads fail authentication.
    let wrong =
        Repository::open(Box::new(LocalBackend::new(&dir)), Some("wrong")).unwrap();
    let err = wrong.get_blob(BlobKind::Chunk, mac).unwrap_err();
    assert!(matches!(err, StrataError::Codec { .. }), "{err}");

    let right =
        Repository::open(Box::new(LocalBackend::new(&dir)), Some("right")).unwrap();
    assert_eq!(right.get_blob(BlobKind::Chunk, mac).unwrap(), data);
}

#[test]
fn canceled_commit_leaves_only_orphans() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");
    let repo = Arc::new(init_local_repo(&dir));

    let session = Snapshot::with_worker_count(Arc::clone(&repo), 2);
    for i in 0u8..4 {
        let data = vec![i; 1024];
        let mac = repo.blob_mac(&data).unwrap();
        session.put_chunk(mac, &data).unwrap();
    }
    session.abort();
    assert!(matches!(session.commit(), Err(StrataError::Canceled)));

    let backend = LocalBackend::new(&dir);
    assert!(backend.states().unwrap().is_empty(), "no state object may appear");

    let reopened = open_local_repo(&dir);
    assert_eq!(reopened.state().count(BlobKind::Chunk), 0);
    assert_eq!(reopened.snapshots().len(), 0);
}

#[test]
fn advisory_lock_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");
    init_local_repo(&dir);

    let backend = LocalBackend::new(&dir);
    let guard = lock::acquire_lock(&backend).unwrap();
    assert!(matches!(
        lock::acquire_lock(&backend),
        Err(StrataError::Locked(_))
    ));
    lock::release_lock(&backend, guard).unwrap();

    let guard = lock::acquire_lock(&backend).unwrap();
    lock::release_lock(&backend, guard).unwrap();
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_types::error::Result;
use strata_types::mac::Mac;

/// Filesystem entry document format version.
pub const ENTRY_VERSION: u32 = 1;

/// What kind of filesystem record an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    File,
    Directory,
    Symlink,
    Device,
    Pipe,
    Socket,
}

/// Stat summary captured by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mod_time: DateTime<Utc>,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
}

/// A named extended attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedAttribute {
    pub name: String,
    pub value: Vec<u8>,
}

/// A named NTFS alternate data stream attached to a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateDataStream {
    pub name: String,
    pub value: Vec<u8>,
}

/// Arbitrary key/value metadata attached by integrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMetadata {
    pub key: String,
    pub value: Vec<u8>,
}

/// Content object: the ordered chunk list backing a regular file, stored
/// as its own blob and referenced from `FileEntry` by MAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub version: u32,
    pub mac: Mac,
    pub chunks: Vec<Mac>,
    pub content_type: String,
    pub entropy: f64,
}

impl Object {
    pub fn new(mac: Mac) -> Self {
        Self {
            version: ENTRY_VERSION,
            mac,
            chunks: Vec::new(),
            content_type: String::new(),
            entropy: 0.0,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(serialized: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(serialized)?)
    }
}

/// A file record inside a snapshot. Self-contained: serialized as one
/// blob, addressed by its MAC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub version: u32,
    pub parent_path: String,
    pub record_type: RecordType,
    pub file_info: FileInfo,

    pub symlink_target: Option<String>,
    /// MAC of the content object; `None` for non-regular files.
    pub object: Option<Mac>,

    pub extended_attributes: Vec<ExtendedAttribute>,
    pub alternate_data_streams: Vec<AlternateDataStream>,
    pub security_descriptor: Option<Vec<u8>>,
    pub custom_metadata: Vec<CustomMetadata>,
    pub tags: Vec<String>,
}

impl FileEntry {
    pub fn new(parent_path: impl Into<String>, record_type: RecordType, file_info: FileInfo) -> Self {
        Self {
            version: ENTRY_VERSION,
            parent_path: parent_path.into(),
            record_type,
            file_info,
            symlink_target: None,
            object: None,
            extended_attributes: Vec::new(),
            alternate_data_streams: Vec::new(),
            security_descriptor: None,
            custom_metadata: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(serialized: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(serialized)?)
    }

    pub fn name(&self) -> &str {
        &self.file_info.name
    }

    pub fn path(&self) -> String {
        join_path(&self.parent_path, &self.file_info.name)
    }
}

/// A directory record. Children are referenced by the MAC of their own
/// entry blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub version: u32,
    pub parent_path: String,
    pub file_info: FileInfo,
    pub children: Vec<Mac>,

    pub extended_attributes: Vec<ExtendedAttribute>,
    pub custom_metadata: Vec<CustomMetadata>,
    pub tags: Vec<String>,
}

impl DirectoryEntry {
    pub fn new(parent_path: impl Into<String>, file_info: FileInfo) -> Self {
        Self {
            version: ENTRY_VERSION,
            parent_path: parent_path.into(),
            file_info,
            children: Vec::new(),
            extended_attributes: Vec::new(),
            custom_metadata: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(serialized: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(serialized)?)
    }

    pub fn name(&self) -> &str {
        &self.file_info.name
    }

    pub fn path(&self) -> String {
        join_path(&self.parent_path, &self.file_info.name)
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    }
}

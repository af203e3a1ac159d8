use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use strata_types::error::{Result, StrataError};
use strata_types::mac::Mac;

use crate::codec::Codec;
use crate::state::BlobKind;

/// Packfile format version.
pub const PACKFILE_VERSION: u32 = 1;

/// Size of the fixed trailer: `version:u32 LE || footer_length:u8`.
pub const TRAILER_SIZE: usize = 5;

// Serialized-size estimate constants for `PackFile::size`.
const INDEX_ENTRY_OVERHEAD: u32 = 48;
const FOOTER_OVERHEAD: u32 = 128;

/// Kind tag persisted as one byte in packfile index entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlobType {
    Chunk = 0,
    Object = 1,
    File = 2,
    Directory = 3,
    Data = 4,
    Snapshot = 5,
    Config = 6,
    Lock = 7,
}

impl BlobType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Chunk),
            1 => Ok(Self::Object),
            2 => Ok(Self::File),
            3 => Ok(Self::Directory),
            4 => Ok(Self::Data),
            5 => Ok(Self::Snapshot),
            6 => Ok(Self::Config),
            7 => Ok(Self::Lock),
            _ => Err(StrataError::CorruptPackfile(format!(
                "unknown blob type tag: {v}"
            ))),
        }
    }

    /// The state kind this blob type registers under. `Config` and `Lock`
    /// blobs live outside packfiles and have no kind.
    pub fn kind(&self) -> Option<BlobKind> {
        match self {
            BlobType::Chunk => Some(BlobKind::Chunk),
            BlobType::Object => Some(BlobKind::Object),
            BlobType::File => Some(BlobKind::File),
            BlobType::Directory => Some(BlobKind::Directory),
            BlobType::Data => Some(BlobKind::Data),
            BlobType::Snapshot => Some(BlobKind::Snapshot),
            BlobType::Config | BlobType::Lock => None,
        }
    }

    /// The persisted tag for a state kind (every kind is packable).
    pub fn from_kind(kind: BlobKind) -> Self {
        match kind {
            BlobKind::Chunk => BlobType::Chunk,
            BlobKind::Object => BlobType::Object,
            BlobKind::File => BlobType::File,
            BlobKind::Directory => BlobType::Directory,
            BlobKind::Data => BlobType::Data,
            BlobKind::Snapshot => BlobType::Snapshot,
        }
    }
}

/// One entry in the packfile index. `offset` is relative to the start of
/// the data area, which is also the start of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub type_tag: u8,
    pub mac: Mac,
    pub offset: u32,
    pub length: u32,
}

impl IndexEntry {
    pub fn blob_type(&self) -> Result<BlobType> {
        BlobType::from_u8(self.type_tag)
    }
}

/// Footer locating the index within the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Footer {
    pub version: u32,
    pub timestamp: i64,
    pub index_offset: u64,
    pub index_length: u32,
    pub entry_count: u32,
}

/// In-memory packfile builder: an ordered sequence of sealed blob payloads
/// plus the index describing them.
///
/// Invariants: every MAC appears at most once; the sum of entry lengths
/// equals the data area length.
pub struct PackFile {
    data: Vec<u8>,
    index: Vec<IndexEntry>,
    seen: HashSet<Mac>,
}

impl PackFile {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            index: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Append a sealed blob payload and record its index entry.
    /// A MAC already present in this packfile is rejected.
    pub fn add(&mut self, blob_type: BlobType, mac: Mac, sealed: &[u8]) -> Result<()> {
        if !self.seen.insert(mac) {
            return Err(StrataError::CorruptPackfile(format!(
                "duplicate blob in packfile: {mac}"
            )));
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(sealed);
        self.index.push(IndexEntry {
            type_tag: blob_type as u8,
            mac,
            offset,
            length: sealed.len() as u32,
        });
        Ok(())
    }

    pub fn contains(&self, mac: &Mac) -> bool {
        self.seen.contains(mac)
    }

    /// Look up the index entry for a blob already added.
    pub fn find(&self, mac: &Mac) -> Option<&IndexEntry> {
        self.index.iter().find(|e| e.mac == *mac)
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn blob_count(&self) -> usize {
        self.index.len()
    }

    pub fn data_len(&self) -> u32 {
        self.data.len() as u32
    }

    /// Current serialized size estimate, including the index and footer.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
            + self.index.len() as u32 * INDEX_ENTRY_OVERHEAD
            + FOOTER_OVERHEAD
            + TRAILER_SIZE as u32
    }

    /// Serialize the packfile: `data_area || sealed(index) || sealed(footer)
    /// || trailer`. Consumes the builder.
    pub fn finalize(self, codec: &Codec) -> Result<Vec<u8>> {
        let serialized_index = rmp_serde::to_vec(&self.index)?;
        let sealed_index = codec.seal(&serialized_index)?;

        let footer = Footer {
            version: PACKFILE_VERSION,
            timestamp: Utc::now().timestamp(),
            index_offset: self.data.len() as u64,
            index_length: sealed_index.len() as u32,
            entry_count: self.index.len() as u32,
        };
        let serialized_footer = rmp_serde::to_vec(&footer)?;
        let sealed_footer = codec.seal(&serialized_footer)?;
        // The footer schema is fixed, so its sealed form always fits the
        // one-byte trailer field.
        debug_assert!(sealed_footer.len() <= u8::MAX as usize);
        let footer_length = u8::try_from(sealed_footer.len()).map_err(|_| {
            StrataError::CorruptPackfile(format!(
                "sealed footer too large: {} bytes",
                sealed_footer.len()
            ))
        })?;

        let mut out = Vec::with_capacity(
            self.data.len() + sealed_index.len() + sealed_footer.len() + TRAILER_SIZE,
        );
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&sealed_index);
        out.extend_from_slice(&sealed_footer);
        out.extend_from_slice(&PACKFILE_VERSION.to_le_bytes());
        out.push(footer_length);
        Ok(out)
    }
}

impl Default for PackFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the fixed 5-byte trailer. Returns the footer length.
/// Rejects unknown versions.
pub fn parse_trailer(tail: &[u8]) -> Result<u8> {
    if tail.len() != TRAILER_SIZE {
        return Err(StrataError::CorruptPackfile(format!(
            "trailer must be {TRAILER_SIZE} bytes, got {}",
            tail.len()
        )));
    }
    let version = u32::from_le_bytes(tail[..4].try_into().unwrap());
    if version != PACKFILE_VERSION {
        return Err(StrataError::CorruptPackfile(format!(
            "unsupported packfile version: {version}"
        )));
    }
    Ok(tail[4])
}

/// Unseal and decode a footer. Codec failures are reported as corruption.
pub fn decode_footer(sealed: &[u8], codec: &Codec) -> Result<Footer> {
    let serialized = codec
        .unseal(sealed)
        .map_err(|e| StrataError::CorruptPackfile(format!("footer: {e}")))?;
    let footer: Footer = rmp_serde::from_slice(&serialized)
        .map_err(|e| StrataError::CorruptPackfile(format!("footer: {e}")))?;
    if footer.version != PACKFILE_VERSION {
        return Err(StrataError::CorruptPackfile(format!(
            "unsupported packfile version: {}",
            footer.version
        )));
    }
    Ok(footer)
}

/// Unseal and decode an index, validating it against the footer and the
/// data area it describes.
pub fn decode_index(sealed: &[u8], footer: &Footer, codec: &Codec) -> Result<Vec<IndexEntry>> {
    let serialized = codec
        .unseal(sealed)
        .map_err(|e| StrataError::CorruptPackfile(format!("index: {e}")))?;
    let index: Vec<IndexEntry> = rmp_serde::from_slice(&serialized)
        .map_err(|e| StrataError::CorruptPackfile(format!("index: {e}")))?;

    if index.len() as u32 != footer.entry_count {
        return Err(StrataError::CorruptPackfile(format!(
            "index entry count mismatch: footer says {}, index has {}",
            footer.entry_count,
            index.len()
        )));
    }
    let data_len = footer.index_offset;
    let mut seen: HashSet<Mac> = HashSet::with_capacity(index.len());
    for entry in &index {
        entry.blob_type()?;
        let end = entry.offset as u64 + entry.length as u64;
        if end > data_len {
            return Err(StrataError::CorruptPackfile(format!(
                "index entry for {} exceeds data area: [{}, {end}) > {data_len}",
                entry.mac, entry.offset
            )));
        }
        if !seen.insert(entry.mac) {
            return Err(StrataError::CorruptPackfile(format!(
                "duplicate blob in packfile index: {}",
                entry.mac
            )));
        }
    }
    Ok(index)
}

/// Parse a fully materialized packfile into its footer and index.
pub fn parse(data: &[u8], codec: &Codec) -> Result<(Footer, Vec<IndexEntry>)> {
    if data.len() < TRAILER_SIZE {
        return Err(StrataError::CorruptPackfile(format!(
            "packfile too small: {} bytes",
            data.len()
        )));
    }
    let footer_length = parse_trailer(&data[data.len() - TRAILER_SIZE..])? as usize;
    if data.len() < TRAILER_SIZE + footer_length {
        return Err(StrataError::CorruptPackfile(
            "packfile too small for footer".into(),
        ));
    }

    let footer_start = data.len() - TRAILER_SIZE - footer_length;
    let footer = decode_footer(&data[footer_start..footer_start + footer_length], codec)?;

    let index_start = footer.index_offset as usize;
    let index_end = index_start + footer.index_length as usize;
    if index_end > footer_start {
        return Err(StrataError::CorruptPackfile(format!(
            "index [{index_start}, {index_end}) overlaps footer at {footer_start}"
        )));
    }
    let index = decode_index(&data[index_start..index_end], &footer, codec)?;
    Ok((footer, index))
}

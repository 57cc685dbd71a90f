//! Append-only journal that makes registry tables durable.
//!
//! ## Frame format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is the CBOR encoding of a [`JournalEntry`]; the CRC covers
//! header and payload.
//!
//! ## Recovery policy
//!
//! - A truncated final frame (crash mid-append) is dropped and the file is
//!   cut back to the last complete frame.
//! - A CRC mismatch, bad magic, unknown type or future version is fatal: the
//!   store refuses to open rather than silently lose registry state.
//! - So is a length field that is implausibly large, or that reaches past a
//!   later complete frame.

use crate::error::{CoreError, CoreResult};
use crate::record::RegistryRecord;
use crate::store::dir::StoreDir;
use crate::types::ResourceId;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Magic bytes starting every frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"GEOJ";

/// Current frame format version.
pub const JOURNAL_VERSION: u16 = 1;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// Largest payload a frame may claim; records are a few hundred bytes.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// A durable change to a registry table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Full image of a record after a write.
    Put {
        /// Owning replicator class.
        replicator: String,
        /// The record.
        record: RegistryRecord,
    },
    /// Record removed.
    Delete {
        /// Owning replicator class.
        replicator: String,
        /// Removed resource.
        resource_id: ResourceId,
    },
}

impl JournalEntry {
    fn type_byte(&self) -> u8 {
        match self {
            Self::Put { .. } => 1,
            Self::Delete { .. } => 2,
        }
    }

    /// Encodes the entry as a complete frame.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(self, &mut payload)
            .map_err(|e| CoreError::Codec(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::Codec(format!("entry too large: {} bytes", payload.len())))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(self.type_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Result of decoding a journal image.
#[derive(Debug)]
pub struct Replay {
    /// Complete entries in append order.
    pub entries: Vec<JournalEntry>,
    /// Length of the valid prefix.
    pub valid_len: u64,
}

/// Decodes every complete frame in `bytes`.
pub fn decode_frames(bytes: &[u8]) -> CoreResult<Replay> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while bytes.len() - offset >= HEADER_SIZE {
        let header = &bytes[offset..offset + HEADER_SIZE];
        if header[0..4] != JOURNAL_MAGIC {
            return Err(CoreError::journal_corruption(offset as u64, "bad magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > JOURNAL_VERSION {
            return Err(CoreError::journal_corruption(
                offset as u64,
                format!("unsupported version {version}"),
            ));
        }
        let type_byte = header[6];
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        if len > MAX_FRAME_PAYLOAD {
            return Err(CoreError::journal_corruption(
                offset as u64,
                format!("frame length {len} exceeds {MAX_FRAME_PAYLOAD}"),
            ));
        }

        let total = HEADER_SIZE + len + CRC_SIZE;
        if bytes.len() - offset < total {
            // Only the last frame can be torn; a length that swallows later
            // complete frames is a damaged header.
            if let Some(next) = next_complete_frame(bytes, offset + HEADER_SIZE) {
                return Err(CoreError::journal_corruption(
                    offset as u64,
                    format!("frame length {len} overruns the frame at offset {next}"),
                ));
            }
            break;
        }

        let body_end = offset + HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let computed = crc32fast::hash(&bytes[offset..body_end]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let entry: JournalEntry = ciborium::de::from_reader(&bytes[offset + HEADER_SIZE..body_end])
            .map_err(|e| CoreError::journal_corruption(offset as u64, e.to_string()))?;
        if entry.type_byte() != type_byte {
            return Err(CoreError::journal_corruption(
                offset as u64,
                format!("frame type {type_byte} does not match payload"),
            ));
        }

        entries.push(entry);
        offset += total;
    }

    Ok(Replay {
        entries,
        valid_len: offset as u64,
    })
}

/// Offset of the first CRC-valid frame starting at or after `from`.
fn next_complete_frame(bytes: &[u8], from: usize) -> Option<usize> {
    let mut start = from;
    while start + HEADER_SIZE <= bytes.len() {
        let found = bytes[start..]
            .windows(JOURNAL_MAGIC.len())
            .position(|window| window == JOURNAL_MAGIC)?;
        let offset = start + found;
        if offset + HEADER_SIZE > bytes.len() {
            return None;
        }

        let len = u32::from_le_bytes([
            bytes[offset + 7],
            bytes[offset + 8],
            bytes[offset + 9],
            bytes[offset + 10],
        ]) as usize;
        let body_end = offset + HEADER_SIZE + len;
        if len <= MAX_FRAME_PAYLOAD && body_end + CRC_SIZE <= bytes.len() {
            let stored = u32::from_le_bytes([
                bytes[body_end],
                bytes[body_end + 1],
                bytes[body_end + 2],
                bytes[body_end + 3],
            ]);
            if stored == crc32fast::hash(&bytes[offset..body_end]) {
                return Some(offset);
            }
        }
        start = offset + 1;
    }
    None
}

/// Byte store underneath a [`Journal`].
pub trait JournalBackend: Send {
    /// Reads the whole journal.
    fn read_all(&mut self) -> CoreResult<Vec<u8>>;

    /// Appends bytes at the end.
    fn append(&mut self, data: &[u8]) -> CoreResult<()>;

    /// Makes appended data durable.
    fn sync(&mut self) -> CoreResult<()>;

    /// Cuts the journal back to `len` bytes.
    fn truncate(&mut self, len: u64) -> CoreResult<()>;

    /// Atomically replaces the whole journal.
    fn replace(&mut self, data: &[u8]) -> CoreResult<()>;
}

/// Journal bytes held in memory.
///
/// Clones share the same buffer, which lets tests "reopen" a journal.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournalBackend {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryJournalBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend over existing bytes.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Returns a copy of the journal bytes.
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl JournalBackend for MemoryJournalBackend {
    fn read_all(&mut self) -> CoreResult<Vec<u8>> {
        Ok(self.data.lock().clone())
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        self.data.lock().extend_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        self.data.lock().truncate(len as usize);
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        *self.data.lock() = data.to_vec();
        Ok(())
    }
}

/// Journal stored in a file.
#[derive(Debug)]
pub struct FileJournalBackend {
    path: PathBuf,
    file: File,
    _dir: Option<StoreDir>,
}

impl FileJournalBackend {
    /// Opens or creates the journal file, creating parent directories.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            _dir: None,
        })
    }

    /// Opens the journal of a locked store directory.
    ///
    /// The directory lock is held for as long as the backend lives.
    pub fn in_dir(dir: StoreDir) -> CoreResult<Self> {
        let mut backend = Self::open(&dir.journal_path())?;
        backend._dir = Some(dir);
        Ok(backend)
    }

    /// Returns the journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalBackend for FileJournalBackend {
    fn read_all(&mut self) -> CoreResult<Vec<u8>> {
        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;
        Ok(data)
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        self.file.set_len(len)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        Ok(())
    }
}

/// Serialises appends to a [`JournalBackend`].
///
/// Lock order: write gate, then table lock, then backend.
pub struct Journal {
    backend: Mutex<Box<dyn JournalBackend>>,
    gate: RwLock<()>,
    sync_on_write: bool,
}

impl Journal {
    /// Opens a journal and returns the entries to replay.
    ///
    /// A truncated tail is cut off; corruption is an error.
    pub fn open(mut backend: Box<dyn JournalBackend>, sync_on_write: bool) -> CoreResult<(Self, Vec<JournalEntry>)> {
        let bytes = backend.read_all()?;
        let replay = decode_frames(&bytes)?;

        if replay.valid_len < bytes.len() as u64 {
            tracing::warn!(
                valid_len = replay.valid_len,
                file_len = bytes.len(),
                "dropping truncated journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        let journal = Self {
            backend: Mutex::new(backend),
            gate: RwLock::new(()),
            sync_on_write,
        };
        Ok((journal, replay.entries))
    }

    /// Appends one entry.
    pub fn append(&self, entry: &JournalEntry) -> CoreResult<()> {
        let frame = entry.encode_frame()?;
        let mut backend = self.backend.lock();
        backend.append(&frame)?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(())
    }

    /// Replaces the journal with exactly `entries`.
    pub fn rewrite(&self, entries: &[JournalEntry]) -> CoreResult<()> {
        let mut image = Vec::new();
        for entry in entries {
            image.extend_from_slice(&entry.encode_frame()?);
        }
        self.backend.lock().replace(&image)
    }

    /// Held by table writers for the duration of a write.
    pub(crate) fn admit(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read()
    }

    /// Blocks all table writers until dropped.
    pub(crate) fn freeze(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    /// Flushes appended entries to durable storage.
    pub fn sync(&self) -> CoreResult<()> {
        self.backend.lock().sync()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish()
    }
}

//! The backup manager boundary and its filesystem implementation.
//!
//! From the coordinator's perspective `take_backup` is asynchronous and
//! fire-and-forget: failures are the backup manager's own concern and
//! are never surfaced back into processing.
//!
//! # Manifest format
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ MAGIC: [u8; 4] = "FCBK"                         │
//! ├─────────────────────────────────────────────────┤
//! │ VERSION: u32 = 1                                │
//! ├─────────────────────────────────────────────────┤
//! │ FLAGS: u32                                      │
//! │   bit 0: body is LZ4 compressed                 │
//! ├─────────────────────────────────────────────────┤
//! │ CHECKPOINT_ID: u64                              │
//! ├─────────────────────────────────────────────────┤
//! │ POSITION: u64                                   │
//! ├─────────────────────────────────────────────────┤
//! │ TIMESTAMP: u64 (Unix seconds)                   │
//! ├─────────────────────────────────────────────────┤
//! │ BODY_LEN: u64 (as stored)                       │
//! ├─────────────────────────────────────────────────┤
//! │ RESERVED: [u8; 20]                              │
//! ├─────────────────────────────────────────────────┤
//! │ BODY: file listing of the snapshot              │
//! ├─────────────────────────────────────────────────┤
//! │ CRC32: u32 over the stored body                 │
//! └─────────────────────────────────────────────────┘
//!
//! Total header size: 64 bytes
//! ```
//!
//! Manifests are written to a `.tmp` sibling and atomically renamed, so
//! a crashed backup never leaves a readable-but-corrupt manifest.

use crate::error::BackupError;
use crate::state::StateStore;
use async_trait::async_trait;
use crc::{Crc, CRC_32_ISO_HDLC};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// Magic number for backup manifests.
pub const MAGIC: [u8; 4] = [b'F', b'C', b'B', b'K'];

/// Current manifest format version.
pub const VERSION: u32 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Flag: manifest body is LZ4 compressed.
pub const FLAG_COMPRESSED: u32 = 1 << 0;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// External collaborator taking backups on checkpoint creation.
#[async_trait]
pub trait BackupManager: Send + Sync + std::fmt::Debug {
    /// Take a backup for the given checkpoint. Fire-and-forget; the
    /// implementation owns its failures.
    async fn take_backup(&self, checkpoint_id: u64, position: u64);
}

/// Backup manager that does nothing. For deployments without backups.
#[derive(Debug, Default)]
pub struct NoopBackupManager;

#[async_trait]
impl BackupManager for NoopBackupManager {
    async fn take_backup(&self, checkpoint_id: u64, position: u64) {
        debug!(checkpoint_id, position, "Backup skipped (noop manager)");
    }
}

/// Backup manager that records invocations. Test collaborator.
#[derive(Debug, Default)]
pub struct RecordingBackupManager {
    taken: Mutex<Vec<(u64, u64)>>,
}

impl RecordingBackupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(checkpoint_id, position)` pairs backed up so far.
    pub fn taken(&self) -> Vec<(u64, u64)> {
        self.taken.lock().clone()
    }
}

#[async_trait]
impl BackupManager for RecordingBackupManager {
    async fn take_backup(&self, checkpoint_id: u64, position: u64) {
        self.taken.lock().push((checkpoint_id, position));
    }
}

/// Everything the manifest records about one backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupManifest {
    pub checkpoint_id: u64,
    pub position: u64,
    pub timestamp: u64,
    pub files: Vec<BackupFile>,
}

/// One file of the snapshotted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    pub name: String,
    pub size: u64,
}

/// Filesystem backup manager: snapshots the store under
/// `<root>/<checkpoint_id>/state/` and writes a checksummed manifest
/// beside it.
pub struct FsBackupManager {
    store: StateStore,
    root: PathBuf,
    compress: bool,
}

impl FsBackupManager {
    pub fn new(store: StateStore, root: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            store,
            root: root.into(),
            compress,
        }
    }

    fn backup_dir(&self, checkpoint_id: u64) -> PathBuf {
        self.root.join(format!("{checkpoint_id:016x}"))
    }

    fn write_backup(&self, checkpoint_id: u64, position: u64) -> Result<PathBuf, BackupError> {
        let dir = self.backup_dir(checkpoint_id);
        let state_dir = dir.join("state");
        if state_dir.exists() {
            // A previous attempt for the same id; keep the existing one.
            debug!(checkpoint_id, "Backup already present, skipping");
            return Ok(dir);
        }
        fs::create_dir_all(&dir)?;

        self.store
            .create_snapshot(&state_dir)
            .map_err(|e| BackupError::Io(std::io::Error::other(e.to_string())))?;

        let mut files = Vec::new();
        for entry in fs::read_dir(&state_dir)? {
            let entry = entry?;
            if entry.path().is_file() {
                files.push(BackupFile {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: entry.metadata()?.len(),
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let manifest_path = dir.join("manifest");
        write_manifest(
            &manifest_path,
            checkpoint_id,
            position,
            &files,
            self.compress,
        )?;
        Ok(dir)
    }
}

#[async_trait]
impl BackupManager for FsBackupManager {
    async fn take_backup(&self, checkpoint_id: u64, position: u64) {
        match self.write_backup(checkpoint_id, position) {
            Ok(dir) => {
                info!(checkpoint_id, position, dir = %dir.display(), "Backup written");
            }
            Err(err) => {
                error!(checkpoint_id, position, error = %err, "Backup failed");
            }
        }
    }
}

impl std::fmt::Debug for FsBackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBackupManager")
            .field("root", &self.root)
            .field("compress", &self.compress)
            .finish()
    }
}

/// Write a manifest via temp file and atomic rename.
pub fn write_manifest(
    path: &Path,
    checkpoint_id: u64,
    position: u64,
    files: &[BackupFile],
    compress: bool,
) -> Result<(), BackupError> {
    let raw_body = bincode::serialize(files).map_err(|e| BackupError::Decode(e.to_string()))?;
    let body = if compress {
        lz4_flex::compress_prepend_size(&raw_body)
    } else {
        raw_body
    };

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let mut data = Vec::with_capacity(HEADER_SIZE + body.len() + 4);
    data.extend_from_slice(&MAGIC);
    data.extend_from_slice(&VERSION.to_le_bytes());
    data.extend_from_slice(&(if compress { FLAG_COMPRESSED } else { 0 }).to_le_bytes());
    data.extend_from_slice(&checkpoint_id.to_le_bytes());
    data.extend_from_slice(&position.to_le_bytes());
    data.extend_from_slice(&timestamp.to_le_bytes());
    data.extend_from_slice(&(body.len() as u64).to_le_bytes());
    data.resize(HEADER_SIZE, 0);
    data.extend_from_slice(&body);
    data.extend_from_slice(&CRC32.checksum(&body).to_le_bytes());

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &data)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })?;
    Ok(())
}

/// Read and verify a manifest.
pub fn read_manifest(path: &Path) -> Result<BackupManifest, BackupError> {
    let data = fs::read(path)?;
    if data.len() < HEADER_SIZE + 4 {
        return Err(BackupError::Truncated);
    }
    if data[0..4] != MAGIC {
        return Err(BackupError::BadMagic);
    }
    let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(BackupError::UnsupportedVersion(version));
    }
    let flags = u32::from_le_bytes(data[8..12].try_into().unwrap());
    let checkpoint_id = u64::from_le_bytes(data[12..20].try_into().unwrap());
    let position = u64::from_le_bytes(data[20..28].try_into().unwrap());
    let timestamp = u64::from_le_bytes(data[28..36].try_into().unwrap());
    let body_len = u64::from_le_bytes(data[36..44].try_into().unwrap()) as usize;

    if data.len() != HEADER_SIZE + body_len + 4 {
        return Err(BackupError::Truncated);
    }
    let body = &data[HEADER_SIZE..HEADER_SIZE + body_len];
    let expected = u32::from_le_bytes(data[HEADER_SIZE + body_len..].try_into().unwrap());
    let computed = CRC32.checksum(body);
    if expected != computed {
        return Err(BackupError::ChecksumMismatch { expected, computed });
    }

    let raw_body = if flags & FLAG_COMPRESSED != 0 {
        lz4_flex::decompress_size_prepended(body)
            .map_err(|e| BackupError::Decompress(e.to_string()))?
    } else {
        body.to_vec()
    };
    let files: Vec<BackupFile> =
        bincode::deserialize(&raw_body).map_err(|e| BackupError::Decode(e.to_string()))?;

    Ok(BackupManifest {
        checkpoint_id,
        position,
        timestamp,
        files,
    })
}

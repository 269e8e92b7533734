//! Durable, crash-safe storage of serialized envelopes.
//!
//! One file per payload, named after its [`StoredTelemetryMetadata`]. A
//! payload becomes visible only once it has been completely written and
//! synced: bytes go to a hidden temporary file which is then renamed over
//! the final name. A crash mid-write leaves at most a temporary file,
//! which listings ignore and [`FsPayloadStore::purge_temporary_files`]
//! removes.

mod error;

pub use error::{StoreError, StoreResult};

use delivery_core::{EnvelopeKind, StoredTelemetryMetadata};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Streams serialized bytes into the handle the store opened.
pub type PayloadEncoder<'a> = &'a mut dyn FnMut(&mut dyn Write) -> io::Result<()>;

/// Storage of payloads keyed by metadata.
///
/// Implementations must be safe to call from several threads; each call
/// touches only the file named by its metadata.
pub trait PayloadStore: Send + Sync {
    /// Write a payload through `encoder`. The entry is either fully
    /// present when this returns `Ok` or absent.
    fn store(&self, metadata: &StoredTelemetryMetadata, encoder: PayloadEncoder<'_>)
        -> StoreResult<()>;

    /// Raw bytes, or `None` when the entry is missing or unreadable.
    fn load(&self, metadata: &StoredTelemetryMetadata) -> Option<Vec<u8>>;

    /// Remove an entry. Removing a missing entry succeeds.
    fn delete(&self, metadata: &StoredTelemetryMetadata) -> StoreResult<()>;

    /// Snapshot of every stored entry, in delivery order.
    fn list_all(&self) -> Vec<StoredTelemetryMetadata>;

    fn list_by_kind(&self, kind: EnvelopeKind) -> Vec<StoredTelemetryMetadata> {
        self.list_all()
            .into_iter()
            .filter(|metadata| metadata.kind == kind)
            .collect()
    }
}

/// Prefix shared by in-progress writes.
const TEMP_PREFIX: &str = ".";
/// Marker embedded in temporary file names.
const TEMP_MARKER: &str = ".tmp.";

/// [`PayloadStore`] backed by one directory.
#[derive(Debug, Clone)]
pub struct FsPayloadStore {
    dir: PathBuf,
}

impl FsPayloadStore {
    /// Open the store, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, metadata: &StoredTelemetryMetadata) -> PathBuf {
        self.dir.join(metadata.filename())
    }

    /// Remove temporary files left behind by interrupted writes.
    pub fn purge_temporary_files(&self) -> StoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_temporary(name) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        if removed > 0 {
            debug!(removed, dir = %self.dir.display(), "Purged interrupted payload writes");
        }
        Ok(removed)
    }

    fn write_temp_then_rename(
        &self,
        final_path: &Path,
        tmp_path: &Path,
        name: &str,
        encoder: PayloadEncoder<'_>,
    ) -> StoreResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)?;
        let mut writer = BufWriter::new(file);
        encoder(&mut writer).map_err(|source| StoreError::Encode {
            name: name.to_string(),
            source,
        })?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(tmp_path, final_path)?;

        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

fn is_temporary(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.contains(TEMP_MARKER)
}

fn temp_name(final_name: &str) -> String {
    format!(
        "{}{}{}{}",
        TEMP_PREFIX,
        final_name,
        TEMP_MARKER,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    )
}

impl PayloadStore for FsPayloadStore {
    fn store(
        &self,
        metadata: &StoredTelemetryMetadata,
        encoder: PayloadEncoder<'_>,
    ) -> StoreResult<()> {
        if let Err(err) = metadata.validate() {
            warn!(payload = %metadata, error = %err, "Refusing to store payload");
            return Err(err.into());
        }
        let name = metadata.filename();
        let final_path = self.dir.join(&name);
        let tmp_path = self.dir.join(temp_name(&name));

        let result = self.write_temp_then_rename(&final_path, &tmp_path, &name, encoder);
        if let Err(err) = &result {
            let _ = fs::remove_file(&tmp_path);
            warn!(payload = %name, error = %err, "Failed to store payload");
        }
        result
    }

    fn load(&self, metadata: &StoredTelemetryMetadata) -> Option<Vec<u8>> {
        let path = self.path_for(metadata);
        let mut bytes = Vec::new();
        match File::open(&path).and_then(|mut file| file.read_to_end(&mut bytes)) {
            Ok(0) => {
                warn!(payload = %metadata, "Stored payload is empty, treating as missing");
                None
            }
            Ok(_) => Some(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(payload = %metadata, error = %err, "Stored payload is unreadable");
                None
            }
        }
    }

    fn delete(&self, metadata: &StoredTelemetryMetadata) -> StoreResult<()> {
        match fs::remove_file(self.path_for(metadata)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list_all(&self) -> Vec<StoredTelemetryMetadata> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "Failed to list payload directory");
                return Vec::new();
            }
        };

        let mut listed: Vec<StoredTelemetryMetadata> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if is_temporary(&name) {
                    return None;
                }
                let mut metadata = StoredTelemetryMetadata::from_filename(&name).ok()?;
                metadata.size_hint = entry.metadata().ok().map(|m| m.len());
                Some(metadata)
            })
            .collect();
        listed.sort();
        listed
    }
}

//! Filesystem-backed output sink

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::Utc;
use recorder_shared::WritableStream;
use tracing::{debug, info, warn};

use crate::{
    OutputSink, PENDING_SUFFIX, SinkError, SinkHandle, SinkResult, SinkState, TRUNCATED_SUFFIX,
};

/// Attempts at `-<n>` suffixes before giving up on a name
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Build a name from `prefix` and the current unix time in milliseconds
pub fn timestamped_name(prefix: &str) -> String {
    format!("{}{}", prefix, Utc::now().timestamp_millis())
}

/// What [`FileSystemStore::recover_orphans`] did with one leftover file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanAction {
    /// Zero-length staging file deleted
    Removed,
    /// Partial recording kept under a new name
    Preserved(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredOrphan {
    pub path: PathBuf,
    pub bytes: u64,
    pub action: OrphanAction,
}

/// Stores recordings as files under one directory
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    base_dir: PathBuf,
}

impl FileSystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn ensure_base_dir(&self) -> SinkResult<()> {
        fs::create_dir_all(&self.base_dir).map_err(|source| SinkError::LocationUnavailable {
            path: self.base_dir.clone(),
            source,
        })
    }

    /// Clean up staging files left by a process that died mid-recording
    pub fn recover_orphans(&self) -> SinkResult<Vec<RecoveredOrphan>> {
        let mut recovered = Vec::new();

        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(recovered),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PENDING_SUFFIX) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let bytes = metadata.len();
            let action = if bytes == 0 {
                fs::remove_file(&path)?;
                info!("Removed empty orphan {}", path.display());
                OrphanAction::Removed
            } else {
                let target = path.with_extension(TRUNCATED_SUFFIX);
                fs::rename(&path, &target)?;
                warn!(
                    "Recovered possibly truncated recording: {} ({} bytes)",
                    target.display(),
                    bytes
                );
                OrphanAction::Preserved(target)
            };

            recovered.push(RecoveredOrphan {
                path,
                bytes,
                action,
            });
        }

        Ok(recovered)
    }
}

fn extension_for(mime_type: &str) -> SinkResult<&'static str> {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "video/mp4" => Ok("mp4"),
        other => Err(SinkError::UnsupportedMimeType(other.to_string())),
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "recording".to_string()
    } else {
        cleaned
    }
}

fn with_suffix(location: &Path, suffix: &str) -> PathBuf {
    let mut path = location.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

fn staging_path(location: &Path) -> PathBuf {
    with_suffix(location, PENDING_SUFFIX)
}

/// Where a recording intended for `location` lands when it may be incomplete
pub fn truncated_path(location: &Path) -> PathBuf {
    with_suffix(location, TRUNCATED_SUFFIX)
}

impl FileSystemStore {
    /// Sync the staged file and move it to `target`; empty files are removed instead
    fn publish(&self, handle: &mut SinkHandle, target: &Path) -> SinkResult<u64> {
        let Some(file) = handle.finish(SinkState::Closed) else {
            debug!("Sink {} already finished", handle.id());
            return Ok(0);
        };

        file.sync_all()?;
        let bytes = file.metadata()?.len();
        drop(file);

        if bytes == 0 {
            remove_if_present(handle.staging())?;
            info!(
                "Closed empty sink, nothing published at {}",
                handle.location().display()
            );
            return Ok(0);
        }

        fs::rename(handle.staging(), target)?;
        Ok(bytes)
    }
}

impl OutputSink for FileSystemStore {
    fn open(&self, suggested_name: &str, mime_type: &str) -> SinkResult<(SinkHandle, PathBuf)> {
        let extension = extension_for(mime_type)?;
        self.ensure_base_dir()?;

        let stem = sanitize(suggested_name);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = if attempt == 0 {
                format!("{}.{}", stem, extension)
            } else {
                format!("{}-{}.{}", stem, attempt, extension)
            };
            let location = self.base_dir.join(&file_name);
            if location.exists() {
                continue;
            }

            let staging = staging_path(&location);
            let file = match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&staging)
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(SinkError::LocationUnavailable {
                        path: staging,
                        source,
                    });
                }
            };

            info!("Opened output sink: {}", location.display());
            let handle = SinkHandle::new(location.clone(), staging, mime_type, file);
            return Ok((handle, location));
        }

        Err(SinkError::NamesExhausted(stem))
    }

    fn writable_stream(&self, handle: &SinkHandle) -> SinkResult<Box<dyn WritableStream>> {
        let file = handle.file().ok_or(SinkError::AlreadyClosed)?;
        let writer = file.try_clone()?;
        Ok(Box::new(BufWriter::new(writer)))
    }

    fn close(&self, handle: &mut SinkHandle) -> SinkResult<u64> {
        let location = handle.location().to_path_buf();
        let bytes = self.publish(handle, &location)?;
        if bytes > 0 {
            info!("Published recording: {} ({} bytes)", location.display(), bytes);
        }
        Ok(bytes)
    }

    fn close_truncated(&self, handle: &mut SinkHandle) -> SinkResult<u64> {
        let target = truncated_path(handle.location());
        let bytes = self.publish(handle, &target)?;
        if bytes > 0 {
            warn!(
                "Kept possibly truncated recording: {} ({} bytes)",
                target.display(),
                bytes
            );
        }
        Ok(bytes)
    }

    fn discard(&self, handle: &mut SinkHandle) -> SinkResult<()> {
        if handle.finish(SinkState::Discarded).is_none() {
            return Ok(());
        }

        remove_if_present(handle.staging())?;
        info!("Discarded output: {}", handle.location().display());
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> SinkResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//! A local directory served as the remote root.
//!
//! File revisions are digests of size and modification time, so listings only
//! stat files. Directory revisions and hashes are digests over the member
//! listing, so an untouched directory answers `Unchanged` to its previous hash.

use crate::error::RemoteError;
use crate::remote::{listing_hash, short_digest, MetadataResponse, RemoteEntry, RemoteStore};
use crate::types::Timestamp;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalDirRemote {
    root: PathBuf,
}

impl LocalDirRemote {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, RemoteError> {
        let root = dunce::canonicalize(root.as_ref()).map_err(|e| {
            RemoteError::new(
                404,
                format!("Remote root {} is not accessible: {}", root.as_ref().display(), e),
            )
        })?;
        if !root.is_dir() {
            return Err(RemoteError::new(
                400,
                format!("Remote root {} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> Result<T, RemoteError> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(root))
            .await
            .map_err(|e| RemoteError::new(500, format!("Remote worker failed: {}", e)))?
    }
}

fn io_status(err: &io::Error) -> u16 {
    match err.kind() {
        io::ErrorKind::NotFound => 404,
        io::ErrorKind::PermissionDenied => 403,
        _ => 500,
    }
}

fn io_error(path: &Path, err: io::Error) -> RemoteError {
    RemoteError::new(io_status(&err), format!("{}: {}", path.display(), err))
}

/// Resolve a slash separated path below `root`, matching each segment
/// case-insensitively. Returns the filesystem path and the display path.
fn resolve(root: &Path, path: &str) -> Result<Option<(PathBuf, String)>, RemoteError> {
    let mut current = root.to_path_buf();
    let mut display = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let wanted = segment.to_lowercase();
        let exact = current.join(segment);
        let found = if exact.exists() {
            Some((exact, segment.to_string()))
        } else {
            let entries = match fs::read_dir(&current) {
                Ok(entries) => entries,
                Err(e) if io_status(&e) == 404 => return Ok(None),
                Err(e) => return Err(io_error(&current, e)),
            };
            let mut matched = None;
            for entry in entries {
                let entry = entry.map_err(|e| io_error(&current, e))?;
                let name = entry.file_name().to_string_lossy().to_string();
                if name.to_lowercase() == wanted {
                    matched = Some((entry.path(), name));
                    break;
                }
            }
            matched
        };
        match found {
            Some((next, name)) => {
                current = next;
                display.push('/');
                display.push_str(&name);
            }
            None => return Ok(None),
        }
    }
    if display.is_empty() {
        display.push('/');
    }
    Ok(Some((current, display)))
}

fn modified_time(meta: &fs::Metadata) -> Timestamp {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| crate::types::beginning_of_time())
}

fn file_revision(meta: &fs::Metadata) -> String {
    let modified = modified_time(meta);
    let stamp = modified
        .timestamp_nanos_opt()
        .unwrap_or_else(|| modified.timestamp_micros());
    short_digest(format!("{}:{}", meta.len(), stamp).as_bytes())
}

fn file_entry(fs_path: &Path, display: String) -> Result<RemoteEntry, RemoteError> {
    let meta = fs::metadata(fs_path).map_err(|e| io_error(fs_path, e))?;
    Ok(RemoteEntry {
        path: display,
        is_dir: false,
        revision: file_revision(&meta),
        hash: None,
        bytes: meta.len(),
        modified: modified_time(&meta),
        contents: Vec::new(),
    })
}

fn member_entries(fs_path: &Path, display: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
    let mut members = Vec::new();
    for entry in fs::read_dir(fs_path).map_err(|e| io_error(fs_path, e))? {
        let entry = entry.map_err(|e| io_error(fs_path, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let child_display = if display == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", display, name)
        };
        let child_path = entry.path();
        if child_path.is_dir() {
            members.push(dir_entry(&child_path, child_display, false)?);
        } else {
            members.push(file_entry(&child_path, child_display)?);
        }
    }
    members.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(members)
}

/// A directory entry. Its revision covers the member listing; only the
/// requested directory carries its hash and contents.
fn dir_entry(fs_path: &Path, display: String, with_listing: bool) -> Result<RemoteEntry, RemoteError> {
    let meta = fs::metadata(fs_path).map_err(|e| io_error(fs_path, e))?;
    let names = dir_names(fs_path)?;
    let mut entry = RemoteEntry {
        path: display.clone(),
        is_dir: true,
        revision: short_digest(names.join("\n").as_bytes()),
        hash: None,
        bytes: 0,
        modified: modified_time(&meta),
        contents: Vec::new(),
    };
    if with_listing {
        let members = member_entries(fs_path, &display)?;
        entry.hash = Some(listing_hash(members.iter()));
        entry.contents = members;
    }
    Ok(entry)
}

fn dir_names(fs_path: &Path) -> Result<Vec<String>, RemoteError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(fs_path).map_err(|e| io_error(fs_path, e))? {
        let entry = entry.map_err(|e| io_error(fs_path, e))?;
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.starts_with('.') {
            continue;
        }
        let kind = if entry.path().is_dir() { "d" } else { "f" };
        names.push(format!("{}:{}", kind, name));
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl RemoteStore for LocalDirRemote {
    async fn metadata(
        &self,
        path: &str,
        hash: Option<&str>,
    ) -> Result<MetadataResponse, RemoteError> {
        let path = path.to_string();
        let hash = hash.map(str::to_string);
        debug!(remote_path = %path, "Local metadata request");
        self.blocking(move |root| {
            let Some((fs_path, display)) = resolve(&root, &path)? else {
                return Ok(MetadataResponse::NotFound);
            };
            if !fs_path.is_dir() {
                return Ok(MetadataResponse::Found(file_entry(&fs_path, display)?));
            }
            let entry = dir_entry(&fs_path, display, true)?;
            if hash.is_some() && entry.hash == hash {
                return Ok(MetadataResponse::Unchanged);
            }
            Ok(MetadataResponse::Found(entry))
        })
        .await
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let path = path.to_string();
        self.blocking(move |root| {
            let Some((fs_path, _)) = resolve(&root, &path)? else {
                return Err(RemoteError::new(404, format!("{} not found", path)));
            };
            if fs_path.is_dir() {
                return Err(RemoteError::new(400, format!("{} is a directory", path)));
            }
            fs::read(&fs_path).map_err(|e| io_error(&fs_path, e))
        })
        .await
    }
}

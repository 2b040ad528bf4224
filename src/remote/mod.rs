//! Remote store collaborator.
//!
//! The engine only needs two calls from the remote side: a conditional metadata
//! request and a content download. Non-success statuses surface as
//! [`RemoteError`].

pub mod local;
pub mod memory;

use crate::error::RemoteError;
use crate::types::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalDirRemote;
pub use memory::MemoryRemote;

/// Metadata for one remote entry. `contents` is only populated for directory
/// listings, and its members never carry nested contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Full remote path, including the site base directory.
    pub path: String,
    pub is_dir: bool,
    pub revision: String,
    pub hash: Option<String>,
    pub bytes: u64,
    pub modified: Timestamp,
    #[serde(default)]
    pub contents: Vec<RemoteEntry>,
}

/// Answer to a conditional metadata request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataResponse {
    /// Full metadata. Directory entries include their listing.
    Found(RemoteEntry),
    /// The directory hash matches the conditional token.
    Unchanged,
    NotFound,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Request metadata for `path`. `hash` is the conditional token from the
    /// last listing of a directory.
    async fn metadata(
        &self,
        path: &str,
        hash: Option<&str>,
    ) -> Result<MetadataResponse, RemoteError>;

    /// Download the content of a file.
    async fn download(&self, path: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Short hex digest used for synthesized revisions and listing hashes.
pub(crate) fn short_digest(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hex::encode(&hash.as_bytes()[..8])
}

/// Listing hash over `(name, kind, revision)` of every member, order independent.
pub(crate) fn listing_hash<'a>(members: impl Iterator<Item = &'a RemoteEntry>) -> String {
    let mut keys: Vec<String> = members
        .map(|m| {
            format!(
                "{}\u{1f}{}\u{1f}{}",
                m.path.rsplit('/').next().unwrap_or_default().to_lowercase(),
                if m.is_dir { 'd' } else { 'f' },
                m.revision
            )
        })
        .collect();
    keys.sort();
    let mut hasher = blake3::Hasher::new();
    for key in &keys {
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

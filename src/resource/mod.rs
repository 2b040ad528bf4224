//! Derived resources.
//!
//! A resource is a servable artifact keyed by a unique url and owned by exactly
//! one tree node. The variant set is closed; [`ResourceKind`] carries the
//! variant specific content and selects the fetch, format and serve behavior.

pub mod resolver;
pub mod serve;
pub mod state;

use crate::tree::path::file_name;
use crate::types::{Attributes, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use resolver::{reconcile, ReconcileOutcome};
pub use serve::{ServeRequest, ServeResponse, ServeSettings};
pub use state::{FetchState, ResourceContext};

/// Resource class named by the `resource_class` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceClass {
    Raw,
    Text,
    Page,
    Config,
    Image,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Raw => "RawResource",
            ResourceClass::Text => "TextResource",
            ResourceClass::Page => "PageResource",
            ResourceClass::Config => "ConfigResource",
            ResourceClass::Image => "ImageResource",
        }
    }

    /// Url for a canonical node path (directories end with `/`).
    ///
    /// Pages fold extensions and index files: `/b/post.md` serves at `/b/post`
    /// and `/b/index.txt` at `/b/`. Every other class serves at its path.
    pub fn compute_url(&self, canonical_path: &str) -> String {
        if *self != ResourceClass::Page || canonical_path.ends_with('/') {
            return canonical_path.to_string();
        }
        let name = file_name(canonical_path);
        let stem_len = match name.rfind('.') {
            Some(idx) if idx > 0 => idx,
            _ => name.len(),
        };
        let dir_len = canonical_path.len() - name.len();
        let stem = &name[..stem_len];
        if stem == "index" {
            canonical_path[..dir_len].to_string()
        } else {
            format!("{}{}", &canonical_path[..dir_len], stem)
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.strip_suffix("Resource").unwrap_or(trimmed);
        match name.to_ascii_lowercase().as_str() {
            "raw" => Ok(ResourceClass::Raw),
            "text" => Ok(ResourceClass::Text),
            "page" => Ok(ResourceClass::Page),
            "config" => Ok(ResourceClass::Config),
            "image" => Ok(ResourceClass::Image),
            _ => Err(format!("Unknown resource class: {}", s)),
        }
    }
}

/// Binary content served as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContent {
    pub source: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub source: Option<String>,
}

/// A formatted page. Directory pages have no source and mirror their default
/// attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub source_format: Option<String>,
    pub source: Option<String>,
    pub body: Option<String>,
    /// Pattern defaults, without `format`.
    pub default_attributes: Attributes,
    /// Defaults merged with the formatter output.
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Raw(RawContent),
    Text(TextContent),
    Page(PageContent),
    Config(TextContent),
    Image(RawContent),
}

impl ResourceKind {
    pub fn empty(class: ResourceClass) -> Self {
        match class {
            ResourceClass::Raw => ResourceKind::Raw(RawContent::default()),
            ResourceClass::Text => ResourceKind::Text(TextContent::default()),
            ResourceClass::Page => ResourceKind::Page(PageContent::default()),
            ResourceClass::Config => ResourceKind::Config(TextContent::default()),
            ResourceClass::Image => ResourceKind::Image(RawContent::default()),
        }
    }

    pub fn class(&self) -> ResourceClass {
        match self {
            ResourceKind::Raw(_) => ResourceClass::Raw,
            ResourceKind::Text(_) => ResourceClass::Text,
            ResourceKind::Page(_) => ResourceClass::Page,
            ResourceKind::Config(_) => ResourceClass::Config,
            ResourceKind::Image(_) => ResourceClass::Image,
        }
    }
}

/// A fetch that was scheduled but has not completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFetch {
    pub revision: String,
    pub requested_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub url: String,
    /// Path of the owning tree node.
    pub owner: String,
    /// Node revision of the last completed fetch.
    pub revision: Option<String>,
    pub pending_fetch: Option<PendingFetch>,
    pub kind: ResourceKind,
}

impl Resource {
    pub fn new(url: impl Into<String>, owner: impl Into<String>, class: ResourceClass) -> Self {
        Self {
            url: url.into(),
            owner: owner.into(),
            revision: None,
            pending_fetch: None,
            kind: ResourceKind::empty(class),
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.kind.class()
    }

    /// Stored content size in bytes.
    pub fn content_len(&self) -> usize {
        match &self.kind {
            ResourceKind::Raw(c) | ResourceKind::Image(c) => c.source.as_ref().map_or(0, Vec::len),
            ResourceKind::Text(c) | ResourceKind::Config(c) => c.source.as_ref().map_or(0, String::len),
            ResourceKind::Page(p) => p.body.as_ref().map_or(0, String::len),
        }
    }

    pub fn as_page(&self) -> Option<&PageContent> {
        match &self.kind {
            ResourceKind::Page(page) => Some(page),
            _ => None,
        }
    }

    /// Source text of text, config and page resources.
    pub fn text_source(&self) -> Option<&str> {
        match &self.kind {
            ResourceKind::Text(c) | ResourceKind::Config(c) => c.source.as_deref(),
            ResourceKind::Page(p) => p.source.as_deref(),
            ResourceKind::Raw(_) | ResourceKind::Image(_) => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} backed by {}", self.class(), self.url, self.owner)
    }
}

/// Image MIME type derived from a file extension.
pub fn image_content_type(path: &str) -> Option<&'static str> {
    let ext = file_name(path).rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "ico" => Some("image/x-icon"),
        "svg" => Some("image/svg+xml"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

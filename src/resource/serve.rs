//! Serving stored resources.
//!
//! Produces a transport-neutral response; template rendering and the HTTP
//! layer are left to the caller.

use crate::resource::{Resource, ResourceKind};
use crate::types::Attributes;

pub const DEFAULT_PROXY_MAX_AGE: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeSettings {
    /// Emit proxy cache headers for binary resources.
    pub proxy_enabled: bool,
    pub proxy_max_age: u64,
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            proxy_enabled: true,
            proxy_max_age: DEFAULT_PROXY_MAX_AGE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeRequest {
    pub url: String,
    pub if_none_match: Option<String>,
}

impl ServeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            if_none_match: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Template a page asks to be rendered with.
    pub template: Option<String>,
    /// Page attributes for the template context.
    pub attributes: Attributes,
}

impl ServeResponse {
    pub fn not_found() -> Self {
        Self {
            status: 404,
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Resource {
    /// Entity tag for the stored revision.
    pub fn etag(&self) -> Option<String> {
        self.revision.as_ref().map(|rev| format!("\"rev{}\"", rev))
    }

    pub fn serve(&self, request: &ServeRequest, settings: &ServeSettings) -> ServeResponse {
        match &self.kind {
            ResourceKind::Raw(content) | ResourceKind::Image(content) => {
                let mut response = ServeResponse {
                    status: 200,
                    content_type: content.content_type.clone(),
                    ..ServeResponse::default()
                };
                let etag = self.etag();
                if settings.proxy_enabled {
                    response.headers.push((
                        "Cache-Control".to_string(),
                        format!("max-age={}", settings.proxy_max_age),
                    ));
                    if let Some(etag) = &etag {
                        response.headers.push(("ETag".to_string(), etag.clone()));
                    }
                }
                if etag.is_some() && request.if_none_match == etag {
                    response.status = 304;
                } else {
                    response.body = content.source.clone().unwrap_or_default();
                }
                response
            }
            ResourceKind::Text(content) | ResourceKind::Config(content) => ServeResponse {
                status: 200,
                content_type: Some("text/plain; charset=utf-8".to_string()),
                body: content.source.clone().unwrap_or_default().into_bytes(),
                ..ServeResponse::default()
            },
            ResourceKind::Page(page) => ServeResponse {
                status: 200,
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: page.body.clone().unwrap_or_default().into_bytes(),
                template: page.attributes.get("template").cloned(),
                attributes: page.attributes.clone(),
                ..ServeResponse::default()
            },
        }
    }
}

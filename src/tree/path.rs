//! Path normalization for tree nodes.
//!
//! Node paths are slash separated, lower-cased, NFC normalized, start with `/` and
//! never end with `/` (except the root itself). Canonical paths used for pattern
//! matching and URL computation append a trailing `/` to directories.

use crate::error::ApiError;
use unicode_normalization::UnicodeNormalization;

/// Path of the singular root node.
pub const ROOT_PATH: &str = "/";

/// Normalize a site-relative path into node key form.
pub fn normalize_path(path: &str) -> String {
    let lowered: String = path.nfc().collect::<String>().to_lowercase();
    let mut out = String::with_capacity(lowered.len() + 1);
    for segment in lowered.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Map a path reported by the remote store onto a node path by stripping the
/// site base directory (case-insensitively).
pub fn normalize_remote_path(base_dir: &str, remote_path: &str) -> Result<String, ApiError> {
    let base = normalize_path(base_dir);
    let full = normalize_path(remote_path);
    if base == ROOT_PATH {
        return Ok(full);
    }
    if full == base {
        return Ok(ROOT_PATH.to_string());
    }
    match full.strip_prefix(&base) {
        Some(rest) if rest.starts_with('/') => Ok(rest.to_string()),
        _ => Err(ApiError::InvalidPath(format!(
            "Remote path {} is outside base directory {}",
            remote_path, base_dir
        ))),
    }
}

/// Path to request from the remote store for a node path.
pub fn remote_path(base_dir: &str, node_path: &str) -> String {
    let base = base_dir.trim_end_matches('/');
    if node_path == ROOT_PATH {
        format!("{}/", base)
    } else {
        format!("{}{}", base, node_path)
    }
}

/// Canonical form: directories end with a separator.
pub fn canonical_path(node_path: &str, is_dir: bool) -> String {
    let trimmed = node_path.trim_end_matches('/');
    if is_dir {
        format!("{}/", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parent node path, `None` for the root.
pub fn parent_path(node_path: &str) -> Option<String> {
    if node_path == ROOT_PATH {
        return None;
    }
    match node_path.rfind('/') {
        Some(0) => Some(ROOT_PATH.to_string()),
        Some(idx) => Some(node_path[..idx].to_string()),
        None => None,
    }
}

/// Last path segment, `/` for the root.
pub fn file_name(node_path: &str) -> &str {
    if node_path == ROOT_PATH {
        return ROOT_PATH;
    }
    node_path.rsplit('/').next().unwrap_or(node_path)
}

/// Key prefix under which all descendants of a node path sort.
pub fn descendant_prefix(node_path: &str) -> String {
    if node_path == ROOT_PATH {
        ROOT_PATH.to_string()
    } else {
        format!("{}/", node_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/B/B1.TXT"), "/b/b1.txt");
        assert_eq!(normalize_path("b//c/"), "/b/c");
    }

    #[test]
    fn test_normalize_remote_path_strips_base() {
        assert_eq!(
            normalize_remote_path("/Public/site", "/public/Site/B/b1.txt").unwrap(),
            "/b/b1.txt"
        );
        assert_eq!(normalize_remote_path("/Public/site", "/Public/site").unwrap(), "/");
        assert_eq!(normalize_remote_path("", "/A.txt").unwrap(), "/a.txt");
        assert!(normalize_remote_path("/Public/site", "/Public/sitex/a").is_err());
        assert!(normalize_remote_path("/Public/site", "/other/a").is_err());
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("/Public/site", "/"), "/Public/site/");
        assert_eq!(remote_path("/Public/site", "/b/b1.txt"), "/Public/site/b/b1.txt");
        assert_eq!(remote_path("", "/"), "/");
    }

    #[test]
    fn test_canonical_and_parent() {
        assert_eq!(canonical_path("/", true), "/");
        assert_eq!(canonical_path("/b", true), "/b/");
        assert_eq!(canonical_path("/b/b1.txt", false), "/b/b1.txt");
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/a.txt").as_deref(), Some("/"));
        assert_eq!(parent_path("/b/b1.txt").as_deref(), Some("/b"));
        assert_eq!(file_name("/b/b1.txt"), "b1.txt");
        assert_eq!(file_name("/"), "/");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(segments in proptest::collection::vec("[A-Za-z0-9._-]{1,8}", 0..6)) {
            let raw = format!("/{}", segments.join("/"));
            let once = normalize_path(&raw);
            prop_assert_eq!(normalize_path(&once), once.clone());
            prop_assert!(once.starts_with('/'));
            prop_assert!(once == "/" || !once.ends_with('/'));
        }

        #[test]
        fn prop_parent_is_prefix(segments in proptest::collection::vec("[a-z0-9]{1,8}", 1..6)) {
            let path = normalize_path(&segments.join("/"));
            let parent = parent_path(&path).unwrap();
            prop_assert!(path.starts_with(&descendant_prefix(&parent)));
        }
    }
}

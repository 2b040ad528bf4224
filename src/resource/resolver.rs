//! Resource Resolver
//!
//! Maps one tree node to at most one resource according to its computed
//! default attributes, settling URL collisions by canonical path.

use crate::error::ApiError;
use crate::resource::state::{verify_state, ResourceContext};
use crate::resource::{Resource, ResourceClass};
use crate::tree::TreeNode;
use crate::types::Attributes;
use tracing::{debug, info};

/// Attribute naming the resource class of a node.
pub const RESOURCE_CLASS: &str = "resource_class";

/// Result of reconciling one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No class assigned; the listed resources of the node were deleted.
    Unassigned { removed: Vec<String> },
    /// Another node with a greater canonical path owns the url.
    Superseded {
        url: String,
        by: String,
        released: Vec<String>,
    },
    /// The node owns the resource at `url`.
    Resolved {
        url: String,
        created: bool,
        released: Vec<String>,
    },
}

impl ReconcileOutcome {
    /// Urls the node owned before and gave up.
    pub fn released(&self) -> &[String] {
        match self {
            ReconcileOutcome::Unassigned { removed } => removed,
            ReconcileOutcome::Superseded { released, .. } | ReconcileOutcome::Resolved { released, .. } => {
                released
            }
        }
    }
}

/// The class assigned by `attributes`. `None` and the empty string mean no
/// class. Unknown names are reported and treated as unassigned.
pub fn assigned_class(
    attributes: &Attributes,
    ctx: &ResourceContext<'_>,
    path: &str,
) -> Option<ResourceClass> {
    let value = attributes.get(RESOURCE_CLASS)?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return None;
    }
    match value.parse() {
        Ok(class) => Some(class),
        Err(err) => {
            ctx.listener
                .config_error(&format!("{} (assigned to {})", err, path));
            None
        }
    }
}

fn delete_owned(node: &TreeNode, keep: Option<&str>, ctx: &ResourceContext<'_>) -> Result<Vec<String>, ApiError> {
    let mut removed = Vec::new();
    for resource in ctx.store.resources_owned_by(&node.path)? {
        if Some(resource.url.as_str()) == keep {
            continue;
        }
        debug!(url = %resource.url, owner = %node.path, "Deleting resource");
        ctx.store.delete_resource(&resource.url)?;
        removed.push(resource.url);
    }
    Ok(removed)
}

/// Ensure `node` has the resource its default attributes call for, or none.
pub fn reconcile(
    node: &TreeNode,
    attributes: &Attributes,
    ctx: &ResourceContext<'_>,
) -> Result<ReconcileOutcome, ApiError> {
    let canonical = node.canonical_path();
    let Some(class) = assigned_class(attributes, ctx, &canonical) else {
        let removed = delete_owned(node, None, ctx)?;
        return Ok(ReconcileOutcome::Unassigned { removed });
    };

    let url = class.compute_url(&canonical);
    let released = delete_owned(node, Some(&url), ctx)?;

    let mut created = false;
    let existing = match ctx.store.get_resource(&url)? {
        Some(existing) if existing.owner != node.path => {
            let rival = ctx.store.get_node(&existing.owner)?;
            match rival {
                Some(rival) if rival.canonical_path() > canonical => {
                    debug!(url = %url, owner = %rival.path, loser = %node.path, "Url owned by another node");
                    return Ok(ReconcileOutcome::Superseded {
                        url,
                        by: rival.path,
                        released,
                    });
                }
                _ => {
                    info!(url = %url, from = %existing.owner, to = %node.path, "Url changes owner");
                    ctx.store.delete_resource(&url)?;
                    None
                }
            }
        }
        Some(existing) if existing.class() != class => {
            info!(url = %url, old = %existing.class(), new = %class, "Resource class changed");
            ctx.store.delete_resource(&url)?;
            None
        }
        other => other,
    };

    let mut resource = match existing {
        Some(resource) => resource,
        None => {
            let resource = Resource::new(url.clone(), node.path.clone(), class);
            ctx.store.put_resource(&resource)?;
            created = true;
            debug!(resource = %resource, "Created resource");
            resource
        }
    };

    verify_state(&mut resource, node, attributes, ctx)?;
    Ok(ReconcileOutcome::Resolved {
        url,
        created,
        released,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatterRegistry;
    use crate::remote::MemoryRemote;
    use crate::site::RecordingListener;
    use crate::store::{SiteStore, SledSiteStore};
    use crate::task::{InlineDispatcher, Task};
    use chrono::{Duration, Utc};

    struct Fixture {
        store: SledSiteStore,
        remote: MemoryRemote,
        dispatcher: InlineDispatcher,
        listener: RecordingListener,
        formatters: FormatterRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let store = SledSiteStore::temporary().unwrap();
            store.put_node(&TreeNode::root()).unwrap();
            Self {
                store,
                remote: MemoryRemote::new(),
                dispatcher: InlineDispatcher::new(),
                listener: RecordingListener::default(),
                formatters: FormatterRegistry::with_builtin(),
            }
        }

        fn ctx(&self) -> ResourceContext<'_> {
            ResourceContext {
                store: &self.store,
                remote: &self.remote,
                dispatcher: &self.dispatcher,
                listener: &self.listener,
                formatters: &self.formatters,
                base_dir: "",
                fetch_timeout: Duration::seconds(600),
                now: Utc::now(),
            }
        }

        fn file(&self, path: &str) -> TreeNode {
            let mut node = TreeNode::fake(path);
            node.parent = Some("/".to_string());
            node.revision = "1".to_string();
            self.store.put_node(&node).unwrap();
            node
        }
    }

    fn class_attrs(class: &str) -> Attributes {
        Attributes::from([(RESOURCE_CLASS.to_string(), class.to_string())])
    }

    #[test]
    fn test_greater_canonical_path_owns_url() {
        let fx = Fixture::new();
        let root = fx.store.get_node("/").unwrap().unwrap();
        let index = fx.file("/index.txt");
        let page = class_attrs("PageResource");

        // Index first, then the directory: the directory loses.
        assert_eq!(
            reconcile(&index, &page, &fx.ctx()).unwrap(),
            ReconcileOutcome::Resolved {
                url: "/".into(),
                created: true,
                released: vec![]
            }
        );
        assert_eq!(
            reconcile(&root, &page, &fx.ctx()).unwrap(),
            ReconcileOutcome::Superseded {
                url: "/".into(),
                by: "/index.txt".into(),
                released: vec![]
            }
        );
        assert_eq!(fx.store.get_resource("/").unwrap().unwrap().owner, "/index.txt");

        // Directory first, then the index: the index takes over.
        fx.store.delete_resource("/").unwrap();
        reconcile(&root, &page, &fx.ctx()).unwrap();
        assert_eq!(fx.store.get_resource("/").unwrap().unwrap().owner, "/");
        reconcile(&index, &page, &fx.ctx()).unwrap();
        assert_eq!(fx.store.get_resource("/").unwrap().unwrap().owner, "/index.txt");
    }

    #[test]
    fn test_unassigned_class_deletes_resource() {
        let fx = Fixture::new();
        let node = fx.file("/notes.txt");
        reconcile(&node, &class_attrs("TextResource"), &fx.ctx()).unwrap();
        assert!(fx.store.get_resource("/notes.txt").unwrap().is_some());

        let outcome = reconcile(&node, &class_attrs("none"), &fx.ctx()).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Unassigned { removed: vec!["/notes.txt".into()] }
        );
        assert!(fx.store.get_resource("/notes.txt").unwrap().is_none());
        assert_eq!(
            reconcile(&node, &Attributes::new(), &fx.ctx()).unwrap(),
            ReconcileOutcome::Unassigned { removed: vec![] }
        );
    }

    #[test]
    fn test_class_change_recreates_resource() {
        let fx = Fixture::new();
        let node = fx.file("/style.css");
        reconcile(&node, &class_attrs("TextResource"), &fx.ctx()).unwrap();
        let outcome = reconcile(&node, &class_attrs("RawResource"), &fx.ctx()).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Resolved {
                url: "/style.css".into(),
                created: true,
                released: vec![]
            }
        );
        assert_eq!(
            fx.store.get_resource("/style.css").unwrap().unwrap().class(),
            ResourceClass::Raw
        );
    }

    #[test]
    fn test_url_change_drops_previous_resource() {
        let fx = Fixture::new();
        let node = fx.file("/post.md");
        reconcile(&node, &class_attrs("TextResource"), &fx.ctx()).unwrap();
        let outcome = reconcile(&node, &class_attrs("PageResource"), &fx.ctx()).unwrap();
        assert_eq!(outcome.released(), ["/post.md".to_string()]);
        assert!(fx.store.get_resource("/post.md").unwrap().is_none());
        let owned = fx.store.resources_owned_by("/post.md").unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].url, "/post");
    }

    #[test]
    fn test_unknown_class_is_reported() {
        let fx = Fixture::new();
        let node = fx.file("/clip.mov");
        let outcome = reconcile(&node, &class_attrs("VideoResource"), &fx.ctx()).unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Unassigned { .. }));
        assert_eq!(fx.listener.config_errors().len(), 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let fx = Fixture::new();
        let node = fx.file("/a.txt");
        let attrs = class_attrs("TextResource");
        reconcile(&node, &attrs, &fx.ctx()).unwrap();
        let second = reconcile(&node, &attrs, &fx.ctx()).unwrap();
        assert_eq!(
            second,
            ReconcileOutcome::Resolved {
                url: "/a.txt".into(),
                created: false,
                released: vec![]
            }
        );
        let fetches = fx
            .dispatcher
            .pending()
            .into_iter()
            .filter(|t| matches!(t, Task::Fetch { .. }))
            .count();
        assert_eq!(fetches, 1);
    }
}

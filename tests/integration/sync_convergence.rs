use crate::integration::support::Harness;
use dropsite::task::Task;
use dropsite::tree::TreeNode;

fn populate(h: &Harness) {
    h.remote.put_file("/a.txt", "alpha");
    h.remote.put_file("/docs/guide.md", "Title: Guide\n\nRead *this*.");
    h.remote.put_file("/docs/style.css", "body { margin: 0 }");
    h.remote.put_file("/img/logo.png", vec![0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn initial_sync_mirrors_tree_and_resources() {
    let h = Harness::new();
    populate(&h);
    h.sync().await;

    assert_eq!(
        h.node_paths(),
        vec!["/", "/a.txt", "/docs", "/docs/guide.md", "/docs/style.css", "/img", "/img/logo.png"]
    );
    assert_eq!(
        h.resource_urls(),
        vec!["/", "/a", "/docs/", "/docs/guide", "/docs/style.css", "/img/", "/img/logo.png"]
    );

    let guide = h.site.get_resource_by_url("/docs/guide").unwrap().unwrap();
    let page = guide.as_page().unwrap();
    assert_eq!(page.attributes["title"], "Guide");
    assert!(page.body.as_deref().unwrap().contains("<em>this</em>"));

    let css = h.site.get_resource_by_url("/docs/style.css").unwrap().unwrap();
    assert_eq!(css.content_len(), "body { margin: 0 }".len());
}

#[tokio::test]
async fn second_sync_changes_nothing() {
    let h = Harness::new();
    populate(&h);
    h.sync().await;
    let listing = h.site.tree_listing().unwrap();
    let downloads = h.remote.download_calls();
    h.dispatcher.clear();
    h.listener.clear();

    let report = h.sync().await;
    assert_eq!(report.updated, 0);
    assert_eq!(report.removed, 0);
    assert_eq!(h.site.tree_listing().unwrap(), listing);
    assert_eq!(h.remote.download_calls(), downloads);
    assert!(h
        .dispatcher
        .history()
        .iter()
        .all(|(task, _)| !matches!(task, Task::Fetch { .. })));
    assert!(h.listener.updated_urls().is_empty());
}

#[tokio::test]
async fn remote_changes_converge() {
    let h = Harness::new();
    populate(&h);
    h.sync().await;

    h.remote.remove("/a.txt");
    h.remote.put_file("/docs/guide.md", "Title: Guide v2\n\nUpdated.");
    h.remote.put_file("/docs/deep/new.md", "fresh");
    h.remote.remove("/img");
    h.sync().await;

    assert_eq!(
        h.node_paths(),
        vec!["/", "/docs", "/docs/deep", "/docs/deep/new.md", "/docs/guide.md", "/docs/style.css"]
    );
    assert_eq!(
        h.resource_urls(),
        vec!["/", "/docs/", "/docs/deep/", "/docs/deep/new", "/docs/guide", "/docs/style.css"]
    );
    assert!(h.page_body("/docs/guide").unwrap().contains("Updated."));
    assert!(h.listener.removed_paths().contains(&"/a.txt".to_string()));
    assert!(h.listener.removed_paths().contains(&"/img".to_string()));
}

#[tokio::test]
async fn file_turning_into_directory() {
    let h = Harness::new();
    h.remote.put_file("/switch.txt", "plain");
    h.sync().await;
    assert_eq!(h.owner_of("/switch").as_deref(), Some("/switch.txt"));

    h.remote.remove("/switch.txt");
    h.remote.put_file("/switch.txt/inner.md", "inside");
    h.sync().await;

    let node = h.site.store().get_node("/switch.txt").unwrap().unwrap();
    assert!(node.is_dir);
    assert_eq!(h.owner_of("/switch"), None);
    assert_eq!(h.owner_of("/switch.txt/").as_deref(), Some("/switch.txt"));
    assert!(h.page_body("/switch.txt/inner").unwrap().contains("inside"));

    h.remote.remove("/switch.txt");
    h.remote.put_file("/switch.txt", "plain again");
    h.sync().await;
    let node = h.site.store().get_node("/switch.txt").unwrap().unwrap();
    assert!(!node.is_dir);
    assert_eq!(h.node_paths(), vec!["/", "/switch.txt"]);
    assert!(h.page_body("/switch").unwrap().contains("plain again"));
}

#[tokio::test]
async fn orphans_are_reclaimed_by_their_parent_listing() {
    let h = Harness::new();
    h.remote.put_file("/later.txt", "found");
    h.site.store().put_node(&TreeNode::fake("/later.txt")).unwrap();
    assert_eq!(h.site.orphans().unwrap().len(), 1);

    h.sync().await;

    assert!(h.site.orphans().unwrap().is_empty());
    let node = h.site.store().get_node("/later.txt").unwrap().unwrap();
    assert_eq!(node.parent.as_deref(), Some("/"));
    assert!(h.page_body("/later").unwrap().contains("found"));
}

#[tokio::test]
async fn orphans_heal_and_stay_healed() {
    let h = Harness::new();
    h.remote.put_file("/a.txt", "alpha");
    h.remote.put_file("/b/b1.txt", "beta");
    h.site.store().put_node(&TreeNode::fake("/a.txt")).unwrap();
    h.site.store().put_node(&TreeNode::fake("/b/b1.txt")).unwrap();
    assert_eq!(h.site.orphans().unwrap().len(), 2);

    h.sync().await;
    assert!(h.site.orphans().unwrap().is_empty());
    let nodes = h.node_paths();
    assert_eq!(nodes, vec!["/", "/a.txt", "/b", "/b/b1.txt"]);

    // Forget the listing of /b and cut /b/b1.txt loose again.
    let mut dir = h.site.store().get_node("/b").unwrap().unwrap();
    dir.content_hash = None;
    h.site.store().put_node(&dir).unwrap();
    let mut leaf = h.site.store().get_node("/b/b1.txt").unwrap().unwrap();
    leaf.parent = None;
    h.site.store().put_node(&leaf).unwrap();
    assert_eq!(h.site.orphans().unwrap().len(), 1);

    h.sync().await;
    assert!(h.site.orphans().unwrap().is_empty());
    assert_eq!(h.node_paths(), nodes);
    let leaf = h.site.store().get_node("/b/b1.txt").unwrap().unwrap();
    assert_eq!(leaf.parent.as_deref(), Some("/b"));
    let a = h.site.store().get_node("/a.txt").unwrap().unwrap();
    assert_eq!(a.parent.as_deref(), Some("/"));
    assert_eq!(h.resource_urls(), vec!["/", "/a", "/b/", "/b/b1"]);
    assert!(h.page_body("/b/b1").unwrap().contains("beta"));
}

#[tokio::test]
async fn emptied_directory_keeps_no_trace_of_its_file() {
    let h = Harness::new();
    h.remote.put_file("/b/b1.txt", "beta");
    h.sync().await;
    let before = h.site.store().get_node("/b").unwrap().unwrap();
    assert_eq!(h.owner_of("/b/b1").as_deref(), Some("/b/b1.txt"));

    h.remote.remove("/b/b1.txt");
    h.remote.put_dir("/b");
    h.sync().await;

    let after = h.site.store().get_node("/b").unwrap().unwrap();
    assert!(after.is_dir);
    assert_ne!(after.revision, before.revision);
    assert_ne!(after.content_hash, before.content_hash);
    assert_eq!(h.node_paths(), vec!["/", "/b"]);
    assert!(h.site.store().children("/b").unwrap().is_empty());
    assert_eq!(h.resource_urls(), vec!["/", "/b/"]);
    assert_eq!(h.owner_of("/b/").as_deref(), Some("/b"));
}

#[tokio::test]
async fn remote_failure_reports_access_error_and_keeps_cache() {
    let h = Harness::new();
    populate(&h);
    h.sync().await;
    let listing = h.site.tree_listing().unwrap();

    h.remote.fail_path("/", 500);
    assert!(h.site.force_sync(None).await.is_err());
    assert_eq!(h.listener.access_errors().len(), 1);
    assert_eq!(h.site.tree_listing().unwrap(), listing);
}

#[tokio::test]
async fn flush_drops_everything() {
    let h = Harness::new();
    populate(&h);
    h.sync().await;
    h.site.flush_all().unwrap();
    assert!(h.node_paths().is_empty());
    assert!(h.resource_urls().is_empty());

    h.sync().await;
    assert_eq!(h.node_paths().len(), 7);
}

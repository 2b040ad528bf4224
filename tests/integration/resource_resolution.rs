use crate::integration::support::Harness;
use chrono::Utc;
use dropsite::resource::{ResourceClass, ResourceKind};
use dropsite::task::Task;

#[tokio::test]
async fn index_file_outranks_its_directory() {
    let h = Harness::new();
    h.remote.put_file("/docs/index.md", "Title: Docs\n\nWelcome");
    h.remote.put_file("/docs/other.md", "other");
    h.sync().await;

    assert_eq!(h.owner_of("/docs/").as_deref(), Some("/docs/index.md"));
    assert!(h.page_body("/docs/").unwrap().contains("Welcome"));

    // Releasing the url hands it back to the directory.
    h.remote.remove("/docs/index.md");
    h.sync().await;
    assert_eq!(h.owner_of("/docs/").as_deref(), Some("/docs"));
    let dir = h.site.get_resource_by_url("/docs/").unwrap().unwrap();
    assert_eq!(dir.as_page().unwrap().attributes["template"], "dir.html");
}

#[tokio::test]
async fn url_collisions_resolve_the_same_in_either_order() {
    let h = Harness::new();
    h.remote.put_file("/notes.md", "from markdown");
    h.sync().await;
    assert_eq!(h.owner_of("/notes").as_deref(), Some("/notes.md"));

    h.remote.put_file("/notes.txt", "from text");
    h.sync().await;
    assert_eq!(h.owner_of("/notes").as_deref(), Some("/notes.txt"));
    assert!(h.page_body("/notes").unwrap().contains("from text"));

    // A later reconcile of the losing node leaves the winner in place.
    let outcome = h.site.reconcile_node("/notes.md", Utc::now()).unwrap();
    assert!(outcome.is_some());
    h.drain().await;
    assert_eq!(h.owner_of("/notes").as_deref(), Some("/notes.txt"));

    h.remote.remove("/notes.txt");
    h.sync().await;
    assert_eq!(h.owner_of("/notes").as_deref(), Some("/notes.md"));
    assert!(h.page_body("/notes").unwrap().contains("from markdown"));
}

#[tokio::test]
async fn template_directories_get_no_resources() {
    let h = Harness::new();
    h.remote.put_file("/templates/page.html", "<html></html>");
    h.remote.put_file("/archive.zip", vec![1, 2, 3]);
    h.sync().await;

    assert_eq!(h.resource_urls(), vec!["/"]);
    assert!(h.node_paths().contains(&"/templates/page.html".to_string()));
}

#[tokio::test]
async fn format_errors_fall_back_to_escaped_source() {
    let h = Harness::new();
    h.remote.put_file("/broken.md", "abstract:\n    a\n  <b>\n");
    h.sync().await;

    assert_eq!(h.listener.format_errors(), vec!["/broken".to_string()]);
    assert_eq!(
        h.page_body("/broken").as_deref(),
        Some("abstract:\n    a\n  &lt;b&gt;\n")
    );
}

#[tokio::test]
async fn site_config_change_reclassifies_resources() {
    let h = Harness::new();
    h.remote.put_file("/a.txt", "hello");
    h.sync().await;
    assert_eq!(h.owner_of("/a").as_deref(), Some("/a.txt"));

    h.remote.put_file(
        "/site.yaml",
        "site_constants:\n  title: Mine\nresource_default_attributes:\n  - pattern: '.*\\.txt$'\n    resource_class: TextResource\n",
    );
    h.sync().await;

    assert!(h
        .dispatcher
        .history()
        .iter()
        .any(|(task, _)| *task == Task::VerifyConsistency));
    assert_eq!(h.owner_of("/a"), None);
    let text = h.site.get_resource_by_url("/a.txt").unwrap().unwrap();
    assert_eq!(text.class(), ResourceClass::Text);
    assert_eq!(text.text_source(), Some("hello"));
    assert_eq!(h.site.site_config().unwrap().site_constants["title"], "Mine");

    let config = h.site.get_resource_by_url("/site.yaml").unwrap().unwrap();
    assert!(matches!(config.kind, ResourceKind::Config(_)));
}

#[tokio::test]
async fn reclassified_winner_hands_its_url_to_the_runner_up() {
    let h = Harness::new();
    h.remote.put_file("/notes.md", "from markdown");
    h.remote.put_file("/notes.txt", "from text");
    h.sync().await;
    assert_eq!(h.owner_of("/notes").as_deref(), Some("/notes.txt"));

    h.remote.put_file(
        "/site.yaml",
        "resource_default_attributes:\n  - pattern: '.*\\.txt$'\n    resource_class: TextResource\n",
    );
    h.sync().await;

    // The consistency pass run for the config change settles /notes at once.
    assert_eq!(h.resource_urls(), vec!["/", "/notes", "/notes.txt", "/site.yaml"]);
    assert_eq!(h.owner_of("/notes").as_deref(), Some("/notes.md"));
    assert!(h.page_body("/notes").unwrap().contains("from markdown"));

    let report = h.site.verify_all_consistency(Utc::now()).unwrap();
    assert_eq!(report.reclaimed, 0);
    assert_eq!(h.owner_of("/notes").as_deref(), Some("/notes.md"));
}

#[tokio::test]
async fn verify_repairs_and_removes_orphan_resources() {
    let h = Harness::new();
    h.remote.put_file("/a.txt", "hello");
    h.sync().await;

    // A resource whose owner is gone, and a page deleted behind our back.
    let mut stray = h.site.get_resource_by_url("/a").unwrap().unwrap();
    stray.url = "/stray".to_string();
    stray.owner = "/nowhere.txt".to_string();
    h.site.store().put_resource(&stray).unwrap();
    h.site.store().delete_resource("/a").unwrap();

    let report = h.site.verify_all_consistency(Utc::now()).unwrap();
    h.drain().await;

    assert_eq!(report.orphans_deleted, vec!["/stray".to_string()]);
    assert_eq!(report.reconciled, 2);
    assert!(h.page_body("/a").unwrap().contains("hello"));
    assert_eq!(h.resource_urls(), vec!["/", "/a"]);
}

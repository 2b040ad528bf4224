use crate::integration::support::Harness;
use chrono::{Duration, Utc};
use dropsite::sync::ScheduleOutcome;
use dropsite::task::Task;

#[tokio::test]
async fn throttled_root_falls_back_to_single_file_sync() {
    let h = Harness::new();
    h.remote.put_file("/a.txt", "first a");
    h.remote.put_file("/docs/guide.md", "first guide");
    let now = Utc::now();

    let outcome = h.site.schedule_sync(None, now).unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Scheduled { ref path, .. } if path == "/"));
    h.drain().await;
    assert!(h.page_body("/docs/guide").unwrap().contains("first guide"));

    h.remote.put_file("/a.txt", "second a");
    h.remote.put_file("/docs/guide.md", "second guide");
    let outcome = h.site.schedule_sync(Some("/docs/guide.md"), now).unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Scheduled { ref path, .. } if path == "/docs/guide.md"));
    h.drain().await;

    assert!(h.page_body("/docs/guide").unwrap().contains("second guide"));
    // Only the requested file was refreshed.
    assert!(h.page_body("/a").unwrap().contains("first a"));

    let outcome = h.site.schedule_sync(Some("/docs/guide.md"), now).unwrap();
    assert!(matches!(outcome, ScheduleOutcome::Throttled { ref path, .. } if path == "/docs/guide.md"));
}

#[tokio::test]
async fn root_becomes_eligible_after_its_interval() {
    let h = Harness::new();
    let now = Utc::now();
    h.site.schedule_sync(None, now).unwrap();
    h.drain().await;

    let early = h.site.schedule_sync(None, now + Duration::seconds(60)).unwrap();
    assert!(matches!(early, ScheduleOutcome::Throttled { ref path, .. } if path == "/"));

    let later = h.site.schedule_sync(None, now + Duration::seconds(121)).unwrap();
    assert!(matches!(later, ScheduleOutcome::Scheduled { ref path, .. } if path == "/"));
}

#[tokio::test]
async fn unknown_path_is_reported() {
    let h = Harness::new();
    let now = Utc::now();
    h.site.schedule_sync(None, now).unwrap();
    assert!(h.site.schedule_sync(Some("/missing.txt"), now).is_err());
}

#[tokio::test]
async fn current_resources_are_not_fetched_again() {
    let h = Harness::new();
    h.remote.put_file("/a.txt", "alpha");
    h.remote.put_file("/style.css", "b {}");
    h.sync().await;
    let downloads = h.remote.download_calls();
    assert_eq!(downloads, 2);
    h.dispatcher.clear();

    h.site.verify_all_consistency(Utc::now()).unwrap();
    h.drain().await;
    assert_eq!(h.remote.download_calls(), downloads);
    assert!(h
        .dispatcher
        .history()
        .iter()
        .all(|(task, _)| !matches!(task, Task::Fetch { .. })));
}

#[tokio::test]
async fn transient_fetch_failures_are_retried() {
    let h = Harness::new();
    h.remote.put_file("/a.txt", "alpha");
    h.site.force_sync(None).await.unwrap();

    h.remote.fail_path("/a.txt", 503);
    let report = h.drain().await;
    assert!(report.retried > 0);
    assert!(!h.listener.access_errors().is_empty());
    assert_eq!(h.page_body("/a"), None);

    h.remote.clear_failures();
    h.site.verify_all_consistency(Utc::now() + Duration::seconds(601)).unwrap();
    h.drain().await;
    assert!(h.page_body("/a").unwrap().contains("alpha"));
}

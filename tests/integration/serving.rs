use crate::integration::support::Harness;
use chrono::Utc;
use dropsite::resource::ServeRequest;
use dropsite::site::SiteSettings;
use dropsite::task::Task;

#[tokio::test]
async fn raw_files_are_served_with_cache_headers() {
    let h = Harness::new();
    h.remote.put_file("/style.css", "b { color: red }");
    h.sync().await;
    let now = Utc::now();

    let response = h.site.serve(&ServeRequest::new("/style.css"), now).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("text/css"));
    assert_eq!(response.body, b"b { color: red }".to_vec());
    assert_eq!(response.header("Cache-Control"), Some("max-age=3600"));
    let etag = response.header("etag").unwrap().to_string();

    let conditional = ServeRequest {
        url: "/style.css".to_string(),
        if_none_match: Some(etag),
    };
    let response = h.site.serve(&conditional, now).unwrap();
    assert_eq!(response.status, 304);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn pages_carry_template_and_attributes() {
    let h = Harness::new();
    h.remote.put_file("/post.md", "Title: Post\n\nHello *there*");
    h.sync().await;

    let response = h.site.serve(&ServeRequest::new("/post"), Utc::now()).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("text/html; charset=utf-8"));
    assert_eq!(response.template.as_deref(), Some("page.html"));
    assert_eq!(response.attributes["title"], "Post");
    assert!(String::from_utf8(response.body).unwrap().contains("<em>there</em>"));
    assert!(h
        .listener
        .events()
        .iter()
        .any(|e| *e == dropsite::site::SiteEvent::ResourceAccessed("/post".to_string())));
}

#[tokio::test]
async fn serving_requests_a_refresh_of_the_owner() {
    let h = Harness::new();
    h.remote.put_file("/post.md", "v1");
    h.sync().await;
    h.dispatcher.clear();

    let now = Utc::now();
    h.site.serve(&ServeRequest::new("/post"), now).unwrap();
    assert_eq!(h.dispatcher.pending(), vec![Task::SyncNode { path: "/".into() }]);

    h.remote.put_file("/post.md", "v2");
    h.drain().await;
    assert!(h.page_body("/post").unwrap().contains("v2"));

    h.site.serve(&ServeRequest::new("/post"), now).unwrap();
    assert_eq!(
        h.dispatcher.pending(),
        vec![Task::SyncNode { path: "/post.md".into() }]
    );
}

#[tokio::test]
async fn missing_urls_are_not_found() {
    let h = Harness::new();
    h.sync().await;
    let response = h.site.serve(&ServeRequest::new("/nope"), Utc::now()).unwrap();
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn proxy_headers_follow_settings() {
    let mut settings = SiteSettings::default();
    settings.serve.proxy_enabled = false;
    let h = Harness::with_settings(settings);
    h.remote.put_file("/logo.png", vec![1, 2, 3]);
    h.sync().await;

    let response = h.site.serve(&ServeRequest::new("/logo.png"), Utc::now()).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("image/png"));
    assert!(response.headers.is_empty());
}

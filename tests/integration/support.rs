use dropsite::remote::MemoryRemote;
use dropsite::site::{RecordingListener, Site, SiteSettings};
use dropsite::store::SledSiteStore;
use dropsite::sync::SyncReport;
use dropsite::task::inline::DrainReport;
use dropsite::task::InlineDispatcher;
use std::sync::Arc;

/// A site over an in-memory remote with every task run inline.
pub struct Harness {
    pub remote: Arc<MemoryRemote>,
    pub dispatcher: Arc<InlineDispatcher>,
    pub listener: Arc<RecordingListener>,
    pub site: Site,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SiteSettings::default())
    }

    pub fn with_settings(settings: SiteSettings) -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(SledSiteStore::temporary().unwrap());
        let dispatcher = Arc::new(InlineDispatcher::new());
        let listener = Arc::new(RecordingListener::default());
        let site = Site::new(remote.clone(), store, dispatcher.clone(), settings)
            .with_listener(listener.clone());
        Self {
            remote,
            dispatcher,
            listener,
            site,
        }
    }

    /// Force a root sync and run everything it schedules.
    pub async fn sync(&self) -> SyncReport {
        let report = self.site.force_sync(None).await.unwrap();
        self.drain().await;
        report
    }

    pub async fn drain(&self) -> DrainReport {
        self.dispatcher.drain(&self.site).await.unwrap()
    }

    pub fn node_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .site
            .store()
            .all_nodes()
            .unwrap()
            .into_iter()
            .map(|n| n.path)
            .collect();
        paths.sort();
        paths
    }

    pub fn resource_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .site
            .resources()
            .unwrap()
            .into_iter()
            .map(|r| r.url)
            .collect();
        urls.sort();
        urls
    }

    pub fn owner_of(&self, url: &str) -> Option<String> {
        self.site
            .get_resource_by_url(url)
            .unwrap()
            .map(|r| r.owner)
    }

    pub fn page_body(&self, url: &str) -> Option<String> {
        self.site
            .get_resource_by_url(url)
            .unwrap()
            .and_then(|r| r.as_page().and_then(|p| p.body.clone()))
    }
}

//! In-process stand-ins for the two upstream services.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Service, SourceError};
use crate::unddit::archive::{
    ArchiveApi, ArchiveFetcher, ArchiveItem, ArchivePage, PageMetadata, PageQuery,
};
use crate::unddit::ids::{IdRef, strip_kind_prefix};
use crate::unddit::live::{LiveApi, LiveResponse, LiveSourceClient, LiveThing, QuotaTracker};
use crate::unddit::rate_limit::RateLimiter;
use crate::unddit::retry::Backoff;
use crate::unddit::status::{StatusEvent, StatusSink};

pub fn archive_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(125), Duration::from_millis(8_000))
}

pub fn live_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(125), Duration::from_millis(4_000))
}

pub fn item(id: &str, parent: Option<&str>, created: i64) -> ArchiveItem {
    ArchiveItem {
        id: id.to_string(),
        parent_id: parent.map(|p| IdRef::Text(p.to_string())),
        link_id: Some(IdRef::Text("t3_abc".to_string())),
        author: Some(format!("author_{id}")),
        body: Some(format!("body of {id}")),
        score: Some(1.0),
        created_utc: Some(created as f64),
        retrieved_utc: Some((created + 30) as f64),
        ..ArchiveItem::default()
    }
}

pub fn live_comment(id: &str, parent: &str, body: &str, score: i64) -> LiveThing {
    LiveThing {
        id: id.to_string(),
        name: Some(format!("t1_{id}")),
        parent_id: Some(parent.to_string()),
        link_id: Some("t3_abc".to_string()),
        author: Some(format!("author_{id}")),
        body: Some(body.to_string()),
        score: Some(score as f64),
        created_utc: Some(1.0),
        ..LiveThing::default()
    }
}

pub fn live_post(id: &str, title: &str, selftext: &str) -> LiveThing {
    LiveThing {
        id: id.to_string(),
        name: Some(format!("t3_{id}")),
        title: Some(title.to_string()),
        selftext: Some(selftext.to_string()),
        subreddit: Some("test".to_string()),
        created_utc: Some(1.0),
        ..LiveThing::default()
    }
}

pub struct FakeArchive {
    items: Vec<ArchiveItem>,
    post: Option<ArchiveItem>,
    with_metadata: bool,
    failures_left: Mutex<usize>,
    queries: Mutex<Vec<PageQuery>>,
}

impl FakeArchive {
    pub fn new(thread_id: &str, items: Vec<ArchiveItem>) -> Self {
        let mut items = items;
        for item in &mut items {
            if item.link_id.is_some() {
                item.link_id = Some(IdRef::Text(format!("t3_{thread_id}")));
            }
        }
        items.sort_by(|a, b| {
            a.created_utc
                .unwrap_or_default()
                .total_cmp(&b.created_utc.unwrap_or_default())
        });
        Self {
            items,
            post: None,
            with_metadata: true,
            failures_left: Mutex::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn without_metadata(mut self) -> Self {
        self.with_metadata = false;
        self
    }

    pub fn with_post(mut self, post: ArchiveItem) -> Self {
        self.post = Some(post);
        self
    }

    pub fn fail_next_pages(&self, count: usize) {
        *self.failures_left.lock().expect("failures lock") = count;
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().expect("queries lock").clone()
    }
}

#[async_trait]
impl ArchiveApi for FakeArchive {
    async fn comment_page(&self, query: &PageQuery) -> Result<ArchivePage, SourceError> {
        self.queries.lock().expect("queries lock").push(query.clone());
        {
            let mut failures = self.failures_left.lock().expect("failures lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::unavailable(Service::Archive, "http 502"));
            }
        }

        let matching = self
            .items
            .iter()
            .filter(|item| {
                let created = item.created_utc.unwrap_or_default() as i64;
                created > query.after && query.before.is_none_or(|before| created < before)
            })
            .cloned()
            .collect::<Vec<_>>();
        let total = matching.len() as u64;
        let data = matching.into_iter().take(query.size).collect::<Vec<_>>();
        let metadata = self.with_metadata.then(|| PageMetadata {
            total_results: Some(total),
            results_returned: Some(data.len() as u64),
        });
        Ok(ArchivePage { data, metadata })
    }

    async fn post(&self, thread_id: &str) -> Result<Option<ArchiveItem>, SourceError> {
        Ok(self
            .post
            .clone()
            .filter(|post| strip_kind_prefix(&post.id) == thread_id))
    }
}

#[derive(Default)]
pub struct FakeLive {
    things: Mutex<HashMap<String, LiveThing>>,
    info_calls: Mutex<Vec<Vec<String>>>,
    fail_marker: Mutex<Option<String>>,
    thread_error: Mutex<Option<SourceError>>,
    quota_rejections: Mutex<(usize, Option<f64>)>,
}

impl FakeLive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, thing: LiveThing) {
        let key = strip_kind_prefix(&thing.id).to_string();
        self.things.lock().expect("things lock").insert(key, thing);
    }

    pub fn fail_info_containing(&self, fullname: &str) {
        *self.fail_marker.lock().expect("marker lock") = Some(fullname.to_string());
    }

    pub fn fail_thread_with(&self, err: SourceError) {
        *self.thread_error.lock().expect("thread lock") = Some(err);
    }

    /// Answer the next `count` info calls with a 429.
    pub fn reject_info_for_quota(&self, count: usize, reset_secs: Option<f64>) {
        *self.quota_rejections.lock().expect("quota lock") = (count, reset_secs);
    }

    pub fn info_calls(&self) -> Vec<Vec<String>> {
        self.info_calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl LiveApi for FakeLive {
    async fn thread(&self, thread_id: &str) -> Result<LiveResponse, SourceError> {
        if let Some(err) = self.thread_error.lock().expect("thread lock").clone() {
            return Err(err);
        }
        let things = self.things.lock().expect("things lock");
        Ok(LiveResponse {
            things: things
                .get(thread_id)
                .filter(|thing| thing.is_post())
                .cloned()
                .into_iter()
                .collect(),
            quota: None,
        })
    }

    async fn info(&self, fullnames: &[String]) -> Result<LiveResponse, SourceError> {
        self.info_calls
            .lock()
            .expect("calls lock")
            .push(fullnames.to_vec());
        {
            let mut rejections = self.quota_rejections.lock().expect("quota lock");
            if rejections.0 > 0 {
                rejections.0 -= 1;
                return Err(SourceError::QuotaExceeded {
                    service: Service::Live,
                    reset_secs: rejections.1,
                });
            }
        }
        if let Some(marker) = self.fail_marker.lock().expect("marker lock").as_deref()
            && fullnames.iter().any(|name| name == marker)
        {
            return Err(SourceError::unavailable(Service::Live, "http 503"));
        }
        let things = self.things.lock().expect("things lock");
        Ok(LiveResponse {
            things: fullnames
                .iter()
                .filter_map(|name| things.get(strip_kind_prefix(name)).cloned())
                .collect(),
            quota: None,
        })
    }

    async fn comment_context(
        &self,
        _thread_id: &str,
        _comment_id: &str,
        _depth: u8,
    ) -> Result<LiveResponse, SourceError> {
        let things = self.things.lock().expect("things lock");
        Ok(LiveResponse {
            things: things.values().cloned().collect(),
            quota: None,
        })
    }
}

pub fn archive_fetcher(api: Arc<FakeArchive>) -> ArchiveFetcher {
    ArchiveFetcher::new(
        api,
        Arc::new(RateLimiter::new(100, Duration::from_millis(10))),
        100,
        archive_backoff(),
    )
}

pub fn live_client(api: Arc<FakeLive>) -> LiveSourceClient {
    LiveSourceClient::new(
        api,
        RateLimiter::new(100, Duration::from_millis(10)),
        QuotaTracker::new(600.0, Duration::from_secs(1)),
        100,
        live_backoff(),
    )
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl StatusSink for RecordingSink {
    fn update(&self, event: StatusEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

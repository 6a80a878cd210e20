use std::collections::HashSet;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Service, SourceError};
use crate::unddit::ids::{IdRef, normalize_ref, strip_kind_prefix};
use crate::unddit::rate_limit::RateLimiter;
use crate::unddit::record::{Record, RecordKind, secs_from_float};
use crate::unddit::retry::Backoff;
use crate::unddit::warn;

/// Fields requested from the archive for every comment page.
pub const COMMENT_FIELDS: &str =
    "author,body,created_utc,id,link_id,parent_id,retrieved_on,retrieved_utc,score,subreddit";

/// One item as the archive serves it. Ids may be fullnames, bare numbers or null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveItem {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<IdRef>,
    #[serde(default)]
    pub link_id: Option<IdRef>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub retrieved_utc: Option<f64>,
    #[serde(default)]
    pub retrieved_on: Option<f64>,
    #[serde(default)]
    pub subreddit: Option<String>,
}

impl ArchiveItem {
    pub fn into_comment(self, thread_id: &str) -> Record {
        let id = strip_kind_prefix(&self.id).to_string();
        let mut record = Record::comment(
            id,
            normalize_ref(self.parent_id.as_ref(), thread_id),
            normalize_ref(self.link_id.as_ref(), thread_id),
        );
        record.author = self.author.unwrap_or_default();
        record.body = self.body.unwrap_or_default();
        record.subreddit = self.subreddit;
        record.score = self.score.map(|s| s.round() as i64).unwrap_or_default();
        record.created_utc = secs_from_float(self.created_utc).unwrap_or_default();
        record.retrieved_utc = secs_from_float(self.retrieved_utc);
        record.retrieved_on = secs_from_float(self.retrieved_on);
        record
    }

    pub fn into_post(self, thread_id: &str) -> Record {
        let mut record = Record::post_stub(thread_id, self.subreddit);
        record.kind = RecordKind::Post;
        record.author = self.author.unwrap_or_default();
        record.body = self.selftext.or(self.body).unwrap_or_default();
        record.title = self.title;
        record.score = self.score.map(|s| s.round() as i64).unwrap_or_default();
        record.created_utc = secs_from_float(self.created_utc).unwrap_or_default();
        record.retrieved_utc = secs_from_float(self.retrieved_utc);
        record.retrieved_on = secs_from_float(self.retrieved_on);
        record
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default)]
    pub results_returned: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchivePage {
    #[serde(default)]
    pub data: Vec<ArchiveItem>,
    #[serde(default)]
    pub metadata: Option<PageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub thread_id: String,
    pub size: usize,
    pub after: i64,
    pub before: Option<i64>,
}

#[async_trait]
pub trait ArchiveApi: Send + Sync {
    /// Comments of one thread created strictly inside `(after, before)`, oldest first.
    async fn comment_page(&self, query: &PageQuery) -> Result<ArchivePage, SourceError>;
    async fn post(&self, thread_id: &str) -> Result<Option<ArchiveItem>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentsProgress {
    pub last_created: i64,
    pub covered_to_end: bool,
    pub pages: usize,
    pub fetched: usize,
}

fn page_exhausted(metadata: Option<&PageMetadata>, returned: usize, page_size: usize) -> bool {
    match metadata.and_then(|m| m.total_results) {
        Some(total) => {
            let returned = metadata
                .and_then(|m| m.results_returned)
                .unwrap_or(returned as u64);
            returned >= total
        }
        None => returned * 2 < page_size,
    }
}

pub struct ArchiveFetcher {
    api: Arc<dyn ArchiveApi>,
    limiter: Arc<RateLimiter>,
    page_size: usize,
    backoff: Backoff,
}

impl ArchiveFetcher {
    pub fn new(
        api: Arc<dyn ArchiveApi>,
        limiter: Arc<RateLimiter>,
        page_size: usize,
        backoff: Backoff,
    ) -> Self {
        Self {
            api,
            limiter,
            page_size: page_size.max(1),
            backoff,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub async fn get_post(&self, thread_id: &str) -> Result<Option<Record>, SourceError> {
        let item = self
            .with_retry("archive.post", thread_id, None, || self.api.post(thread_id))
            .await?;
        Ok(item.map(|item| item.into_post(thread_id)))
    }

    /// Page through the comments of `thread_id` created after `after` (and
    /// before `before`), handing each page to `on_page` as it arrives.
    ///
    /// At most `ceil(target_count / page_size)` pages are requested. The walk
    /// stops early when the archive runs dry, when `on_page` breaks, or when
    /// `cancel` fires.
    ///
    /// The cursor moves past the newest record of each page. When several
    /// records share that newest second the page may have cut the second in
    /// half, so the next page re-opens it and the records already seen are
    /// dropped.
    pub async fn get_comments<F>(
        &self,
        mut on_page: F,
        cancel: &CancellationToken,
        thread_id: &str,
        target_count: usize,
        after: i64,
        before: Option<i64>,
    ) -> Result<CommentsProgress, SourceError>
    where
        F: FnMut(Vec<Record>) -> ControlFlow<()>,
    {
        let mut pages_left = target_count.div_ceil(self.page_size).max(1);
        let mut cursor = after;
        let mut boundary_ids = HashSet::new();
        let mut progress = CommentsProgress {
            last_created: after,
            covered_to_end: false,
            pages: 0,
            fetched: 0,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            let query = PageQuery {
                thread_id: thread_id.to_string(),
                size: self.page_size,
                after: cursor,
                before,
            };
            let page = self
                .with_retry("archive.page", thread_id, Some(cancel), || {
                    self.api.comment_page(&query)
                })
                .await?;

            let returned = page.data.len();
            progress.pages += 1;
            progress.covered_to_end =
                page_exhausted(page.metadata.as_ref(), returned, self.page_size);

            let page_records = page
                .data
                .into_iter()
                .map(|item| item.into_comment(thread_id))
                .collect::<Vec<_>>();
            let newest = page_records.iter().map(|r| r.created_utc).max();
            let tied = page_records
                .iter()
                .filter(|r| Some(r.created_utc) == newest)
                .map(|r| r.id.clone())
                .collect::<HashSet<_>>();
            let records = page_records
                .into_iter()
                .filter(|r| !boundary_ids.contains(&r.id))
                .collect::<Vec<_>>();
            progress.fetched += records.len();
            if let Some(newest) = newest {
                progress.last_created = progress.last_created.max(newest);
            }
            log::debug!(
                "archive page thread={thread_id} after={cursor} returned={returned} new={} \
                 covered={}",
                records.len(),
                progress.covered_to_end
            );

            let flow = if records.is_empty() {
                ControlFlow::Continue(())
            } else {
                on_page(records)
            };
            if progress.covered_to_end || flow.is_break() {
                break;
            }
            let Some(newest) = newest else {
                break;
            };
            pages_left -= 1;
            let reopen_boundary = tied.len() > 1 && newest - 1 > cursor;
            if pages_left == 0 {
                if reopen_boundary {
                    // The next round starts inside the tied second.
                    progress.last_created = newest - 1;
                }
                break;
            }
            if reopen_boundary {
                cursor = newest - 1;
                boundary_ids = tied;
            } else {
                cursor = newest;
                boundary_ids.clear();
            }
        }

        Ok(progress)
    }

    async fn with_retry<T, F, Fut>(
        &self,
        stage: &str,
        thread_id: &str,
        cancel: Option<&CancellationToken>,
        mut call: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut schedule = self.backoff.schedule();
        loop {
            match cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                        _ = self.limiter.acquire() => {}
                    }
                }
                None => self.limiter.acquire().await,
            }

            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            let Some(delay) = schedule.next_delay() else {
                log::error!("{stage}: giving up on thread {thread_id}: {err}");
                return Err(SourceError::ServiceUnavailable {
                    service: Service::Archive,
                    reason: err.to_string(),
                    transport: err.is_transport(),
                });
            };
            warn::emit(warn::Warning {
                code: err.code().as_str(),
                stage,
                thread: thread_id,
                target: "archive",
                retry: &format!("{}ms", delay.as_millis()),
                reason: "transient failure",
                err: &err.to_string(),
            });
            // Every caller sharing this limiter backs off together.
            self.limiter.force_delay(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unddit::test_support::{FakeArchive, archive_backoff, item};
    use std::time::Duration;
    use tokio::time::Instant;

    fn fetcher(api: Arc<FakeArchive>) -> (ArchiveFetcher, Arc<RateLimiter>) {
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_millis(10)));
        let fetcher = ArchiveFetcher::new(api, Arc::clone(&limiter), 100, archive_backoff());
        (fetcher, limiter)
    }

    fn numbered(count: i64) -> Vec<ArchiveItem> {
        (1..=count)
            .map(|n| item(&format!("c{n}"), Some("t3_abc"), n))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn page_count_bounded_by_total_over_chunk() {
        let api = Arc::new(FakeArchive::new("abc", numbered(250)));
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let mut seen = 0usize;
        let progress = fetcher
            .get_comments(
                |page| {
                    seen += page.len();
                    ControlFlow::Continue(())
                },
                &CancellationToken::new(),
                "abc",
                10_000,
                0,
                None,
            )
            .await
            .expect("comments");

        assert!(progress.pages <= 3, "pages={}", progress.pages);
        assert!(progress.covered_to_end);
        assert_eq!(progress.last_created, 250);
        assert!(seen >= 250);
        assert_eq!(api.queries().len(), progress.pages);
    }

    #[tokio::test(start_paused = true)]
    async fn pages_do_not_refetch_the_boundary_record() {
        for (total, expected_pages) in [(299, 3), (1_000, 10)] {
            let api = Arc::new(FakeArchive::new("abc", numbered(total)));
            let (fetcher, _) = fetcher(Arc::clone(&api));
            let mut ids = Vec::new();
            let progress = fetcher
                .get_comments(
                    |page| {
                        ids.extend(page.into_iter().map(|r| r.id));
                        ControlFlow::Continue(())
                    },
                    &CancellationToken::new(),
                    "abc",
                    20_000,
                    0,
                    None,
                )
                .await
                .expect("comments");

            assert_eq!(progress.pages, expected_pages, "total={total}");
            assert_eq!(progress.fetched, total as usize);
            assert_eq!(ids.len(), total as usize);
            assert!(progress.covered_to_end);
            assert_eq!(api.queries()[1].after, 100);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tied_boundary_second_is_reopened_without_duplicates() {
        let mut items = (1..=98)
            .map(|n| item(&format!("c{n}"), Some("t3_abc"), n))
            .collect::<Vec<_>>();
        for id in ["c99", "c100", "c101"] {
            items.push(item(id, Some("t3_abc"), 99));
        }
        items.extend((102..=150).map(|n| item(&format!("c{n}"), Some("t3_abc"), n - 2)));
        let api = Arc::new(FakeArchive::new("abc", items));
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let mut ids = Vec::new();
        let progress = fetcher
            .get_comments(
                |page| {
                    ids.extend(page.into_iter().map(|r| r.id));
                    ControlFlow::Continue(())
                },
                &CancellationToken::new(),
                "abc",
                1_000,
                0,
                None,
            )
            .await
            .expect("comments");

        assert_eq!(progress.pages, 2);
        assert_eq!(api.queries()[1].after, 98);
        assert_eq!(progress.fetched, 150);
        let unique = ids.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), 150);
        assert_eq!(ids.len(), 150);
        assert!(unique.contains(&"c101".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_ending_in_a_tie_reports_the_second_before_it() {
        let mut items = (1..=98)
            .map(|n| item(&format!("c{n}"), Some("t3_abc"), n))
            .collect::<Vec<_>>();
        for id in ["c99", "c100", "c101"] {
            items.push(item(id, Some("t3_abc"), 99));
        }
        let api = Arc::new(FakeArchive::new("abc", items));
        let (fetcher, _) = fetcher(api);
        let progress = fetcher
            .get_comments(
                |_| ControlFlow::Continue(()),
                &CancellationToken::new(),
                "abc",
                100,
                0,
                None,
            )
            .await
            .expect("comments");
        assert_eq!(progress.pages, 1);
        assert!(!progress.covered_to_end);
        assert_eq!(progress.last_created, 98);
    }

    #[tokio::test(start_paused = true)]
    async fn short_page_without_metadata_means_exhausted() {
        let api = Arc::new(FakeArchive::new("abc", numbered(30)).without_metadata());
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let progress = fetcher
            .get_comments(
                |_| ControlFlow::Continue(()),
                &CancellationToken::new(),
                "abc",
                500,
                0,
                None,
            )
            .await
            .expect("comments");
        assert_eq!(progress.pages, 1);
        assert!(progress.covered_to_end);
    }

    #[tokio::test(start_paused = true)]
    async fn full_page_without_metadata_is_not_exhausted() {
        let api = Arc::new(FakeArchive::new("abc", numbered(120)).without_metadata());
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let progress = fetcher
            .get_comments(
                |_| ControlFlow::Continue(()),
                &CancellationToken::new(),
                "abc",
                100,
                0,
                None,
            )
            .await
            .expect("comments");
        assert_eq!(progress.pages, 1);
        assert!(!progress.covered_to_end);
        assert_eq!(progress.last_created, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn numeric_parent_ids_are_converted_to_short_ids() {
        let mut raw = item("c1", None, 5);
        raw.parent_id = Some(IdRef::Numeric(1_295));
        raw.link_id = None;
        let api = Arc::new(FakeArchive::new("abc", vec![raw]));
        let (fetcher, _) = fetcher(api);
        let mut records = Vec::new();
        fetcher
            .get_comments(
                |page| {
                    records.extend(page);
                    ControlFlow::Continue(())
                },
                &CancellationToken::new(),
                "abc",
                100,
                0,
                None,
            )
            .await
            .expect("comments");
        assert_eq!(records[0].parent_id, "zz");
        assert_eq!(records[0].link_id, "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn callback_break_stops_without_error() {
        let api = Arc::new(FakeArchive::new("abc", numbered(400)));
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let progress = fetcher
            .get_comments(
                |_| ControlFlow::Break(()),
                &CancellationToken::new(),
                "abc",
                400,
                0,
                None,
            )
            .await
            .expect("comments");
        assert_eq!(progress.pages, 1);
        assert_eq!(api.queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_stops_before_next_page() {
        let api = Arc::new(FakeArchive::new("abc", numbered(400)));
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let cancel = CancellationToken::new();
        let result = fetcher
            .get_comments(
                |_| {
                    cancel.cancel();
                    ControlFlow::Continue(())
                },
                &cancel,
                "abc",
                400,
                0,
                None,
            )
            .await;
        assert!(matches!(result, Err(SourceError::Cancelled)));
        assert_eq!(api.queries().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_with_backoff() {
        let api = Arc::new(FakeArchive::new("abc", numbered(3)));
        api.fail_next_pages(2);
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let start = Instant::now();
        let progress = fetcher
            .get_comments(
                |_| ControlFlow::Continue(()),
                &CancellationToken::new(),
                "abc",
                100,
                0,
                None,
            )
            .await
            .expect("comments");
        assert!(progress.covered_to_end);
        assert!(start.elapsed() >= Duration::from_millis(375));
        assert_eq!(api.queries().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_exhaustion_reports_archive_unavailable() {
        let api = Arc::new(FakeArchive::new("abc", numbered(3)));
        api.fail_next_pages(usize::MAX);
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let start = Instant::now();
        let result = fetcher
            .get_comments(
                |_| ControlFlow::Continue(()),
                &CancellationToken::new(),
                "abc",
                100,
                0,
                None,
            )
            .await;
        match result {
            Err(SourceError::ServiceUnavailable { service, .. }) => {
                assert_eq!(service, Service::Archive)
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(7_875));
        assert_eq!(api.queries().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_throttles_other_archive_calls() {
        let api = Arc::new(
            FakeArchive::new("abc", numbered(3)).with_post(item("abc", None, 1)),
        );
        api.fail_next_pages(1);
        let (fetcher, _) = fetcher(Arc::clone(&api));
        let start = Instant::now();
        let cancel = CancellationToken::new();
        let comments = fetcher.get_comments(
            |_| ControlFlow::Continue(()),
            &cancel,
            "abc",
            100,
            0,
            None,
        );
        let post = async {
            let post = fetcher.get_post("abc").await;
            (post, start.elapsed())
        };
        let (comments, (post, post_elapsed)) = tokio::join!(comments, post);
        comments.expect("comments");
        assert!(post.expect("post").is_some());
        assert!(post_elapsed >= Duration::from_millis(125));
    }
}

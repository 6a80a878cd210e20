use std::mem;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::unddit::archive::ArchiveFetcher;
use crate::unddit::contig::{ContigList, RoundResult};
use crate::unddit::live::{LiveSourceClient, MAX_CONTEXT_DEPTH};
use crate::unddit::reconcile::{Reconciler, ThreadStats};
use crate::unddit::record::{Record, is_deleted, is_removed};
use crate::unddit::status::StatusSink;
use crate::unddit::tree::{CommentFilter, CommentTreeBuilder, SortOrder, TreeNode};
use crate::unddit::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Idle,
    LoadingPost,
    LoadingComments,
    Ready,
    Reloading,
}

impl ThreadState {
    pub fn label(self) -> &'static str {
        match self {
            ThreadState::Idle => "idle",
            ThreadState::LoadingPost => "loading_post",
            ThreadState::LoadingComments => "loading_comments",
            ThreadState::Ready => "ready",
            ThreadState::Reloading => "reloading",
        }
    }
}

/// What the view was opened on: a whole thread, or one comment of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTarget {
    pub thread_id: String,
    pub comment_id: Option<String>,
    pub context_depth: u8,
}

impl ThreadTarget {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            comment_id: None,
            context_depth: 0,
        }
    }

    pub fn comment(
        thread_id: impl Into<String>,
        comment_id: impl Into<String>,
        context_depth: u8,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            comment_id: Some(comment_id.into()),
            context_depth: context_depth.min(MAX_CONTEXT_DEPTH),
        }
    }

    pub fn root_id(&self) -> &str {
        self.comment_id.as_deref().unwrap_or(&self.thread_id)
    }
}

#[derive(Clone)]
pub struct Sources {
    pub archive: Arc<ArchiveFetcher>,
    pub live: Arc<LiveSourceClient>,
}

/// What one round pulled from the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundOutcome {
    pub fetched: usize,
    pub gained: usize,
    pub covered_to_end: bool,
}

async fn lookup_batch(
    live: Arc<LiveSourceClient>,
    ids: Vec<String>,
) -> Result<Vec<Record>, SourceError> {
    live.get_comments(&ids).await
}

/// Drives one thread view: post resolution, comment rounds over the open
/// contig, and live reconciliation. Dropping or cancelling the view stops
/// every in-flight step before it touches the canonical mapping again.
pub struct ThreadOrchestrator {
    sources: Sources,
    sink: Arc<dyn StatusSink>,
    cancel: CancellationToken,
    target: ThreadTarget,
    flush_threshold: usize,
    state: ThreadState,
    post: Option<Record>,
    reconciler: Reconciler,
    contigs: ContigList,
    active: usize,
    errors: Vec<SourceError>,
    builder: CommentTreeBuilder,
    built_revision: Option<u64>,
}

impl ThreadOrchestrator {
    pub fn new(
        sources: Sources,
        sink: Arc<dyn StatusSink>,
        target: ThreadTarget,
        flush_threshold: usize,
    ) -> Self {
        // Missing parents only matter when the whole thread is shown.
        let include_missing_parents = target.comment_id.is_none();
        Self {
            reconciler: Reconciler::new(target.thread_id.clone(), include_missing_parents),
            sources,
            sink,
            cancel: CancellationToken::new(),
            target,
            flush_threshold: flush_threshold.max(1),
            state: ThreadState::Idle,
            post: None,
            contigs: ContigList::new(),
            active: 0,
            errors: Vec::new(),
            builder: CommentTreeBuilder::new(),
            built_revision: None,
        }
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn target(&self) -> &ThreadTarget {
        &self.target
    }

    pub fn post(&self) -> Option<&Record> {
        self.post.as_ref()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn contigs(&self) -> &ContigList {
        &self.contigs
    }

    pub fn errors(&self) -> &[SourceError] {
        &self.errors
    }

    pub fn stats(&self) -> ThreadStats {
        self.reconciler.stats()
    }

    pub fn orphans(&self) -> &[String] {
        self.builder.orphans()
    }

    pub fn unreachable(&self) -> &[String] {
        self.builder.unreachable()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tear the view down. Anything still in flight is discarded.
    pub fn abandon(&self) {
        self.cancel.cancel();
    }

    pub fn is_abandoned(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn loaded_all_comments(&self) -> bool {
        self.contigs
            .get(self.active)
            .is_some_and(|c| c.loaded_all_comments)
    }

    /// Load the post, then up to `target_count` comments.
    pub async fn open(&mut self, target_count: usize) -> Result<ThreadStats, SourceError> {
        self.check_live()?;
        self.state = ThreadState::LoadingPost;
        self.sink.loading("Loading post...");
        let post = self.resolve_post().await?;
        self.post = Some(post);

        self.state = ThreadState::LoadingComments;
        let anchor = self.resolve_anchor().await?;
        self.active = self.contigs.open_at(anchor);

        let loaded = self.load_comments(target_count, true).await;
        self.settle(loaded)
    }

    /// Ask for `count` more comments past what is already loaded.
    pub async fn load_more(
        &mut self,
        count: usize,
        persistent: bool,
    ) -> Result<ThreadStats, SourceError> {
        self.check_live()?;
        if self.state != ThreadState::Ready {
            log::debug!("load_more ignored in state {}", self.state.label());
            return Ok(self.stats());
        }
        if self.loaded_all_comments() {
            return Ok(self.stats());
        }
        self.state = ThreadState::Reloading;
        let loaded = self.load_comments(count, persistent).await;
        self.settle(loaded)
    }

    /// Filtered and sorted view of what has been loaded so far.
    pub fn tree(&mut self, filter: CommentFilter, sort: SortOrder) -> &[TreeNode] {
        let revision = self.reconciler.revision();
        if self.built_revision != Some(revision) {
            self.builder.invalidate();
            self.built_revision = Some(revision);
        }
        let context_depth = if self.target.comment_id.is_some() {
            usize::from(self.target.context_depth)
        } else {
            0
        };
        self.builder.build(
            self.reconciler.records(),
            self.target.root_id(),
            filter,
            sort,
            context_depth,
        )
    }

    fn check_live(&self) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        Ok(())
    }

    fn settle(&mut self, loaded: Result<(), SourceError>) -> Result<ThreadStats, SourceError> {
        match loaded {
            Ok(()) => {
                self.state = ThreadState::Ready;
                self.sink.success();
                Ok(self.stats())
            }
            Err(SourceError::Cancelled) => Err(SourceError::Cancelled),
            Err(err) => {
                // Whatever was merged before the failure stays.
                self.state = ThreadState::Ready;
                self.report(&err);
                Err(err)
            }
        }
    }

    fn report(&mut self, err: &SourceError) {
        self.sink.error(&err.user_message(), err.help_url());
        self.errors.push(err.clone());
    }

    async fn resolve_post(&mut self) -> Result<Record, SourceError> {
        let thread_id = self.target.thread_id.clone();
        let live = match self.sources.live.get_post(&thread_id).await {
            Ok(post) => post,
            Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
            Err(err) => {
                self.check_live()?;
                self.report(&err);
                return self.archived_post_or_stub(&thread_id).await;
            }
        };
        self.check_live()?;

        let removed = is_removed(&live.body);
        if !removed && !is_deleted(&live.body) {
            return Ok(live);
        }
        let mut post = match self.sources.archive.get_post(&thread_id).await {
            Ok(Some(archived)) => archived,
            Ok(None) => live,
            Err(SourceError::Cancelled) => return Err(SourceError::Cancelled),
            Err(err) => {
                warn::emit(warn::Warning {
                    code: err.code().as_str(),
                    stage: "archive.post",
                    thread: &thread_id,
                    target: "archive",
                    retry: "none",
                    reason: "keeping live placeholder post",
                    err: &err.to_string(),
                });
                live
            }
        };
        self.check_live()?;
        if removed {
            post.mark_removed();
        } else {
            post.mark_deleted();
        }
        Ok(post)
    }

    async fn archived_post_or_stub(&mut self, thread_id: &str) -> Result<Record, SourceError> {
        let archived = self.sources.archive.get_post(thread_id).await;
        self.check_live()?;
        match archived {
            Ok(Some(mut post)) => {
                post.mark_removed();
                Ok(post)
            }
            Ok(None) => {
                log::warn!("post {thread_id} not found in either source; using a stub");
                Ok(Record::post_stub(thread_id, None))
            }
            Err(err) => {
                self.report(&err);
                Ok(Record::post_stub(thread_id, None))
            }
        }
    }

    /// Creation time to open the first contig at.
    async fn resolve_anchor(&mut self) -> Result<i64, SourceError> {
        let Some(comment_id) = self.target.comment_id.clone() else {
            return Ok(1);
        };
        let chain = self
            .sources
            .live
            .get_parent_chain(&self.target.thread_id, &comment_id, self.target.context_depth)
            .await;
        self.check_live()?;
        match chain {
            Ok(chain) => {
                let created = chain.first().map(|r| r.created_utc).filter(|c| *c > 0);
                self.reconciler.insert_context(chain);
                Ok(created.unwrap_or(1))
            }
            Err(SourceError::Cancelled) => Err(SourceError::Cancelled),
            Err(err) => {
                warn::emit(warn::Warning {
                    code: err.code().as_str(),
                    stage: "live.context",
                    thread: &self.target.thread_id,
                    target: &comment_id,
                    retry: "none",
                    reason: "anchoring at thread start",
                    err: &err.to_string(),
                });
                Ok(1)
            }
        }
    }

    async fn load_comments(
        &mut self,
        target_count: usize,
        persistent: bool,
    ) -> Result<(), SourceError> {
        let mut remaining = target_count.max(1);
        loop {
            let outcome = self.run_round(remaining).await?;
            remaining = remaining.saturating_sub(outcome.fetched);
            let more = persistent
                && remaining > 0
                && outcome.fetched > 0
                && outcome.gained > 0
                && !self.loaded_all_comments();
            if !more {
                return Ok(());
            }
            log::debug!(
                "round under-delivered for {}; {remaining} comments still wanted",
                self.target.thread_id
            );
        }
    }

    /// One archive walk over the active contig's open interval, with live
    /// lookups streaming alongside it.
    async fn run_round(&mut self, target_count: usize) -> Result<RoundOutcome, SourceError> {
        let Some((after, before)) = self.contigs.window(self.active) else {
            return Ok(RoundOutcome::default());
        };
        let thread_id = self.target.thread_id.clone();
        let start_len = self.reconciler.len();
        let goal = start_len + target_count;
        self.sink.loading("Loading comments from archive...");

        let (pages_tx, mut pages_rx) = mpsc::unbounded_channel::<Vec<Record>>();
        let archive = Arc::clone(&self.sources.archive);
        let live = Arc::clone(&self.sources.live);
        let cancel = self.cancel.clone();
        let flush_threshold = self.flush_threshold;
        let sink = Arc::clone(&self.sink);
        let reconciler = &mut self.reconciler;

        let producer = async {
            let on_page = move |page: Vec<Record>| {
                if pages_tx.send(page).is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            };
            archive
                .get_comments(on_page, &cancel, &thread_id, target_count, after, before)
                .await
        };

        let consumer = async {
            let mut buffer = Vec::new();
            let mut batches = FuturesUnordered::new();
            let mut pages_open = true;
            let mut live_error = None;
            loop {
                tokio::select! {
                    page = pages_rx.recv(), if pages_open => match page {
                        Some(page) => {
                            if cancel.is_cancelled() {
                                continue;
                            }
                            buffer.extend(reconciler.ingest(page));
                            sink.progress(reconciler.len(), goal);
                            if buffer.len() >= flush_threshold {
                                sink.loading("Comparing comments to live source...");
                                let ids = mem::take(&mut buffer);
                                batches.push(lookup_batch(Arc::clone(&live), ids));
                            }
                        }
                        None => {
                            pages_open = false;
                            if !buffer.is_empty() {
                                sink.loading("Comparing comments to live source...");
                                let ids = mem::take(&mut buffer);
                                batches.push(lookup_batch(Arc::clone(&live), ids));
                            }
                        }
                    },
                    Some(result) = batches.next(), if !batches.is_empty() => match result {
                        Ok(records) => {
                            if cancel.is_cancelled() {
                                continue;
                            }
                            reconciler.finalize(records);
                            sink.progress(reconciler.len(), goal);
                        }
                        Err(err) => {
                            live_error.get_or_insert(err);
                        }
                    },
                    else => break,
                }
            }
            live_error
        };

        let (fetched, live_error) = tokio::join!(producer, consumer);
        self.check_live()?;

        let progress = fetched?;
        self.active = self.contigs.complete_round(
            self.active,
            RoundResult {
                last_seen: (progress.fetched > 0).then_some(progress.last_created),
                covered_to_end: progress.covered_to_end,
            },
        );
        if let Some(err) = live_error {
            return Err(err);
        }

        let outcome = RoundOutcome {
            fetched: progress.fetched,
            gained: self.reconciler.len().saturating_sub(start_len),
            covered_to_end: progress.covered_to_end,
        };
        log::info!(
            "round done thread={} fetched={} new={} covered={}",
            self.target.thread_id,
            outcome.fetched,
            outcome.gained,
            outcome.covered_to_end
        );
        Ok(outcome)
    }
}

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep_until};

use crate::error::{Service, SourceError};
use crate::unddit::ids::{COMMENT_PREFIX, POST_PREFIX, fullname, strip_kind_prefix};
use crate::unddit::rate_limit::RateLimiter;
use crate::unddit::record::{Record, RecordKind, secs_from_float};
use crate::unddit::retry::Backoff;
use crate::unddit::warn;

/// Deepest ancestor chain the live source will return in one call.
pub const MAX_CONTEXT_DEPTH: u8 = 8;

/// `edited` is `false` or the edit timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Edited {
    Flag(bool),
    At(f64),
}

impl Edited {
    pub fn timestamp(self) -> Option<i64> {
        match self {
            Edited::At(at) => secs_from_float(Some(at)),
            Edited::Flag(_) => None,
        }
    }
}

/// The `data` payload of one live listing child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveThing {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub link_id: Option<String>,
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
    pub edited: Option<Edited>,
    #[serde(default)]
    pub subreddit: Option<String>,
}

impl LiveThing {
    pub fn is_post(&self) -> bool {
        match self.name.as_deref() {
            Some(name) => name.starts_with(POST_PREFIX),
            None => self.title.is_some() && self.parent_id.is_none(),
        }
    }

    pub fn edited_utc(&self) -> Option<i64> {
        self.edited.and_then(Edited::timestamp)
    }

    pub fn into_record(self) -> Record {
        let id = strip_kind_prefix(&self.id).to_string();
        let is_post = self.is_post();
        let edited_utc = self.edited_utc();
        let (parent_id, link_id) = if is_post {
            (id.clone(), id.clone())
        } else {
            let link = self
                .link_id
                .as_deref()
                .map(strip_kind_prefix)
                .unwrap_or_default()
                .to_string();
            let parent = self
                .parent_id
                .as_deref()
                .map(strip_kind_prefix)
                .map(str::to_string)
                .unwrap_or_else(|| link.clone());
            (parent, link)
        };

        let mut record = Record::comment(id, parent_id, link_id);
        record.kind = if is_post {
            RecordKind::Post
        } else {
            RecordKind::Comment
        };
        record.author = self.author.unwrap_or_default();
        record.body = if is_post {
            self.selftext.or(self.body).unwrap_or_default()
        } else {
            self.body.unwrap_or_default()
        };
        record.title = self.title;
        record.subreddit = self.subreddit;
        record.score = self.score.map(|s| s.round() as i64).unwrap_or_default();
        record.created_utc = secs_from_float(self.created_utc).unwrap_or_default();
        record.edited_utc = edited_utc;
        record
    }
}

/// Rate-limit headers reported with every live response.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuotaHeaders {
    pub remaining: Option<f64>,
    pub used: Option<f64>,
    pub reset_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveResponse {
    pub things: Vec<LiveThing>,
    pub quota: Option<QuotaHeaders>,
}

#[async_trait]
pub trait LiveApi: Send + Sync {
    /// The post of a thread, first in `things`.
    async fn thread(&self, thread_id: &str) -> Result<LiveResponse, SourceError>;
    /// Up to one batch of fullnames.
    async fn info(&self, fullnames: &[String]) -> Result<LiveResponse, SourceError>;
    /// A comment and up to `depth` of its ancestors.
    async fn comment_context(
        &self,
        thread_id: &str,
        comment_id: &str,
        depth: u8,
    ) -> Result<LiveResponse, SourceError>;
}

#[derive(Debug)]
struct QuotaState {
    remaining: f64,
    limit: f64,
    reset_at: Option<Instant>,
}

/// Local estimate of the server-side request quota.
#[derive(Debug)]
pub struct QuotaTracker {
    state: Mutex<QuotaState>,
    reset_buffer: Duration,
    jitter: Duration,
}

impl QuotaTracker {
    pub fn new(limit: f64, reset_buffer: Duration) -> Self {
        let limit = limit.max(1.0);
        Self {
            state: Mutex::new(QuotaState {
                remaining: limit,
                limit,
                reset_at: None,
            }),
            reset_buffer,
            jitter: Duration::from_secs(2),
        }
    }

    fn state(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn remaining(&self) -> f64 {
        self.state().remaining
    }

    pub fn reset_at(&self) -> Option<Instant> {
        self.state().reset_at
    }

    /// Debit one request, sleeping past the reset when the quota is spent.
    pub async fn reserve(&self) {
        loop {
            let wake_at = {
                let mut state = self.state();
                let now = Instant::now();
                let window_over = state
                    .reset_at
                    .is_none_or(|reset| now >= reset + self.reset_buffer);
                if window_over && (state.remaining < 1.0 || state.reset_at.is_some()) {
                    state.remaining = state.limit;
                    state.reset_at = None;
                }
                if state.remaining >= 1.0 {
                    state.remaining -= 1.0;
                    return;
                }
                match state.reset_at {
                    Some(reset) => reset + self.reset_buffer,
                    None => now + self.reset_buffer,
                }
            };
            log::info!(
                "live quota exhausted; waiting {}ms for reset",
                wake_at
                    .saturating_duration_since(Instant::now())
                    .as_millis()
            );
            sleep_until(wake_at).await;
        }
    }

    /// The server refused a request for quota: nothing is left until the
    /// reset it reported, or for one buffer when it reported none.
    pub fn exhaust(&self, reset_secs: Option<f64>) {
        let mut state = self.state();
        let now = Instant::now();
        state.remaining = 0.0;
        state.reset_at = Some(match reset_secs.filter(|s| s.is_finite()) {
            Some(secs) => now + Duration::from_secs_f64(secs.max(0.0)),
            None => now,
        });
    }

    /// Fold the server's view into the local estimate.
    pub fn observe(&self, headers: QuotaHeaders) {
        let mut state = self.state();
        let now = Instant::now();
        if let (Some(used), Some(remaining)) = (headers.used, headers.remaining) {
            let limit = (used + remaining).max(1.0);
            if (limit - state.limit).abs() >= 1.0 {
                log::debug!("live quota limit changed {} -> {limit}", state.limit);
                state.limit = limit;
            }
        }
        if let Some(reported) = headers.remaining {
            state.remaining = state.remaining.min(reported.max(0.0));
        }
        if let Some(secs) = headers.reset_secs.filter(|s| s.is_finite()) {
            let reported_reset = now + Duration::from_secs_f64(secs.max(0.0));
            let resync = match state.reset_at {
                Some(local) => reported_reset > local + self.jitter,
                None => true,
            };
            if resync {
                state.reset_at = Some(reported_reset);
            }
        }
    }
}

/// Quota refusals waited out in one call before it counts as a failure.
const MAX_QUOTA_WAITS: usize = 3;

pub struct LiveSourceClient {
    api: std::sync::Arc<dyn LiveApi>,
    limiter: RateLimiter,
    quota: QuotaTracker,
    batch_size: usize,
    backoff: Backoff,
}

impl LiveSourceClient {
    pub fn new(
        api: std::sync::Arc<dyn LiveApi>,
        limiter: RateLimiter,
        quota: QuotaTracker,
        batch_size: usize,
        backoff: Backoff,
    ) -> Self {
        Self {
            api,
            limiter,
            quota,
            batch_size: batch_size.clamp(1, 100),
            backoff,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    async fn call<F, Fut>(
        &self,
        stage: &str,
        target: &str,
        mut request: F,
    ) -> Result<LiveResponse, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<LiveResponse, SourceError>>,
    {
        let mut schedule = self.backoff.schedule();
        let mut quota_waits = 0;
        loop {
            self.quota.reserve().await;
            self.limiter.acquire().await;
            let err = match request().await {
                Ok(response) => {
                    if let Some(headers) = response.quota {
                        self.quota.observe(headers);
                    }
                    return Ok(response);
                }
                Err(SourceError::QuotaExceeded { reset_secs, .. })
                    if quota_waits < MAX_QUOTA_WAITS =>
                {
                    quota_waits += 1;
                    log::debug!("{stage} {target}: quota refused, waiting for reset");
                    self.quota.exhaust(reset_secs);
                    continue;
                }
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };
            let Some(delay) = schedule.next_delay() else {
                return Err(SourceError::ServiceUnavailable {
                    service: Service::Live,
                    reason: err.to_string(),
                    transport: err.is_transport(),
                });
            };
            warn::emit(warn::Warning {
                code: err.code().as_str(),
                stage,
                thread: "na",
                target,
                retry: &format!("{}ms", delay.as_millis()),
                reason: "transient failure",
                err: &err.to_string(),
            });
            self.limiter.force_delay(delay);
        }
    }

    pub async fn get_post(&self, thread_id: &str) -> Result<Record, SourceError> {
        let response = self
            .call("live.post", thread_id, || self.api.thread(thread_id))
            .await?;
        response
            .things
            .into_iter()
            .find(LiveThing::is_post)
            .map(LiveThing::into_record)
            .ok_or_else(|| SourceError::NotFound {
                service: Service::Live,
                what: format!("thread {thread_id}"),
            })
    }

    pub async fn get_comments(&self, ids: &[String]) -> Result<Vec<Record>, SourceError> {
        self.get_batched(COMMENT_PREFIX, ids).await
    }

    pub async fn get_threads(&self, ids: &[String]) -> Result<Vec<Record>, SourceError> {
        self.get_batched(POST_PREFIX, ids).await
    }

    async fn get_batched(&self, prefix: &str, ids: &[String]) -> Result<Vec<Record>, SourceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = ids.chunks(self.batch_size).map(|chunk| {
            let names = chunk
                .iter()
                .map(|id| fullname(prefix, id))
                .collect::<Vec<_>>();
            async move {
                let target = format!("{} ids", names.len());
                self.call("live.info", &target, || self.api.info(&names))
                    .await
            }
        });

        // The first failing chunk ends the batch; the others are dropped.
        let responses = try_join_all(chunks).await.map_err(|err| match err {
            SourceError::TransportBlocked { .. } | SourceError::Cancelled => err,
            SourceError::ServiceUnavailable { .. } => err,
            other => SourceError::ServiceUnavailable {
                service: Service::Live,
                transport: other.is_transport(),
                reason: other.to_string(),
            },
        })?;

        Ok(responses
            .into_iter()
            .flat_map(|response| response.things)
            .map(LiveThing::into_record)
            .collect())
    }

    /// The comment followed by up to `depth` ancestors, nearest first.
    pub async fn get_parent_chain(
        &self,
        thread_id: &str,
        comment_id: &str,
        depth: u8,
    ) -> Result<Vec<Record>, SourceError> {
        let depth = depth.min(MAX_CONTEXT_DEPTH);
        let response = self
            .call("live.context", comment_id, || {
                self.api.comment_context(thread_id, comment_id, depth)
            })
            .await?;

        let mut by_id = response
            .things
            .into_iter()
            .filter(|thing| !thing.is_post())
            .map(|thing| {
                let record = thing.into_record();
                (record.id.clone(), record)
            })
            .collect::<HashMap<_, _>>();

        let mut chain = Vec::new();
        let mut cursor = strip_kind_prefix(comment_id).to_string();
        while chain.len() <= usize::from(depth) {
            let Some(record) = by_id.remove(&cursor) else {
                break;
            };
            cursor = record.parent_id.clone();
            chain.push(record);
        }
        if chain.is_empty() {
            return Err(SourceError::NotFound {
                service: Service::Live,
                what: format!("comment {comment_id}"),
            });
        }
        Ok(chain)
    }
}

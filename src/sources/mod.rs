//! HTTP bindings of the two upstream services.

pub mod archive_http;
pub mod auth;
pub mod live_http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;

use crate::error::{Service, SourceError};
use crate::unddit::archive::ArchiveFetcher;
use crate::unddit::config::UndditConfig;
use crate::unddit::live::{LiveSourceClient, QuotaTracker};
use crate::unddit::orchestrator::Sources;
use crate::unddit::rate_limit::RateLimiter;

const USER_AGENT: &str = concat!("unddit/", env!("CARGO_PKG_VERSION"));

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()?)
}

/// Error for a non-success status.
pub(crate) fn status_error(service: Service, status: StatusCode, what: &str) -> SourceError {
    match status {
        StatusCode::NOT_FOUND => SourceError::NotFound {
            service,
            what: what.to_string(),
        },
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => SourceError::Forbidden {
            service,
            what: what.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => SourceError::QuotaExceeded {
            service,
            reset_secs: None,
        },
        other => SourceError::unavailable(service, format!("http {}", other.as_u16())),
    }
}

/// Error for a request that produced no response at all.
pub(crate) fn transport_error(
    service: Service,
    err: &reqwest::Error,
    help_url: Option<&str>,
) -> SourceError {
    if err.is_connect() && service == Service::Live {
        return SourceError::TransportBlocked {
            service,
            help_url: help_url.map(str::to_string),
        };
    }
    SourceError::ServiceUnavailable {
        service,
        reason: err.to_string(),
        transport: err.is_connect() || err.is_timeout() || err.is_request(),
    }
}

pub(crate) fn decode_error(service: Service, err: impl std::fmt::Display) -> SourceError {
    SourceError::Decode {
        service,
        reason: err.to_string(),
    }
}

/// Both clients wired from configuration. The archive limiter is shared by
/// every archive call of the process.
pub fn build_sources(cfg: &UndditConfig) -> Result<Sources> {
    let archive_api = archive_http::HttpArchive::new(&cfg.archive)?;
    let archive = ArchiveFetcher::new(
        Arc::new(archive_api),
        Arc::new(RateLimiter::new(
            cfg.archive.limiter_capacity,
            Duration::from_millis(cfg.archive.limiter_interval_ms),
        )),
        cfg.archive.page_size,
        cfg.archive.backoff(),
    );

    let live_api = live_http::HttpLive::new(&cfg.live)?;
    let live = LiveSourceClient::new(
        Arc::new(live_api),
        RateLimiter::new(
            cfg.live.limiter_capacity,
            Duration::from_millis(cfg.live.limiter_interval_ms),
        ),
        QuotaTracker::new(
            cfg.live.quota_limit,
            Duration::from_millis(cfg.live.quota_reset_buffer_ms),
        ),
        cfg.live.batch_size,
        cfg.live.backoff(),
    );

    Ok(Sources {
        archive: Arc::new(archive),
        live: Arc::new(live),
    })
}

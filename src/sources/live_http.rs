use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Service, SourceError};
use crate::sources::auth::AnonymousAuth;
use crate::sources::{decode_error, http_client, status_error, transport_error};
use crate::unddit::config::LiveConfig;
use crate::unddit::live::{LiveApi, LiveResponse, LiveThing, QuotaHeaders};
use crate::unddit::warn;

#[derive(Debug, Default, Deserialize)]
struct Listing {
    #[serde(default)]
    data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Every thing in a listing, replies included, depth first.
fn flatten_listing(listing: Listing, out: &mut Vec<LiveThing>) -> Result<(), serde_json::Error> {
    for child in listing.data.children {
        if child.kind == "more" {
            continue;
        }
        let replies = match child.data.get("replies") {
            Some(replies @ Value::Object(_)) => Some(Listing::deserialize(replies)?),
            _ => None,
        };
        out.push(LiveThing::deserialize(&child.data)?);
        if let Some(replies) = replies {
            flatten_listing(replies, out)?;
        }
    }
    Ok(())
}

/// A thread or context response: an array of listings (post, then comments).
fn things_from_thread(body: Value) -> Result<Vec<LiveThing>, serde_json::Error> {
    let listings = match body {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value::<Listing>)
            .collect::<Result<Vec<_>, _>>()?,
        other => vec![serde_json::from_value::<Listing>(other)?],
    };
    let mut out = Vec::new();
    for listing in listings {
        flatten_listing(listing, &mut out)?;
    }
    Ok(out)
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
}

pub(crate) fn quota_from_headers(headers: &HeaderMap) -> Option<QuotaHeaders> {
    let quota = QuotaHeaders {
        remaining: header_f64(headers, "x-ratelimit-remaining"),
        used: header_f64(headers, "x-ratelimit-used"),
        reset_secs: header_f64(headers, "x-ratelimit-reset"),
    };
    (quota != QuotaHeaders::default()).then_some(quota)
}

/// A 429 keeps the server's reset clock so the caller can wait it out.
fn live_status_error(status: StatusCode, quota: Option<QuotaHeaders>, what: &str) -> SourceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SourceError::QuotaExceeded {
            service: Service::Live,
            reset_secs: quota.and_then(|q| q.reset_secs),
        };
    }
    status_error(Service::Live, status, what)
}

pub struct HttpLive {
    client: reqwest::Client,
    base_url: String,
    oauth_url: String,
    help_url: Option<String>,
    auth: Option<AnonymousAuth>,
}

impl HttpLive {
    pub fn new(cfg: &LiveConfig) -> Result<Self> {
        let auth = cfg
            .use_oauth
            .then(|| AnonymousAuth::new(&cfg.token_url, &cfg.client_id, &cfg.device_id));
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            oauth_url: cfg.oauth_url.trim_end_matches('/').to_string(),
            help_url: cfg.help_url.clone(),
            auth,
        })
    }

    /// OAuth host with a bearer token when one can be had, public host otherwise.
    async fn route(&self) -> (&str, Option<&str>) {
        let Some(auth) = &self.auth else {
            return (self.base_url.as_str(), None);
        };
        match auth.token(&self.client).await {
            Ok(token) => (self.oauth_url.as_str(), Some(token)),
            Err(err) => {
                warn::emit(warn::Warning {
                    code: err.code().as_str(),
                    stage: "live.token",
                    thread: "na",
                    target: "live",
                    retry: "public-host",
                    reason: "anonymous token unavailable",
                    err: &err.to_string(),
                });
                (self.base_url.as_str(), None)
            }
        }
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
        what: &str,
    ) -> Result<(Value, Option<QuotaHeaders>), SourceError> {
        let (host, token) = self.route().await;
        let mut request = self
            .client
            .get(format!("{host}{path}"))
            .query(params)
            .header(ACCEPT_LANGUAGE, "en");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| transport_error(Service::Live, &err, self.help_url.as_deref()))?;
        let quota = quota_from_headers(response.headers());
        let status = response.status();
        if !status.is_success() {
            return Err(live_status_error(status, quota, what));
        }
        let body = response
            .json::<Value>()
            .await
            .map_err(|err| decode_error(Service::Live, err))?;
        Ok((body, quota))
    }
}

#[async_trait]
impl LiveApi for HttpLive {
    async fn thread(&self, thread_id: &str) -> Result<LiveResponse, SourceError> {
        let what = format!("thread {thread_id}");
        let (body, quota) = self
            .get(
                &format!("/comments/{thread_id}.json"),
                &[("limit", "1".to_string())],
                &what,
            )
            .await?;
        let things = things_from_thread(body).map_err(|err| decode_error(Service::Live, err))?;
        Ok(LiveResponse { things, quota })
    }

    async fn info(&self, fullnames: &[String]) -> Result<LiveResponse, SourceError> {
        let what = format!("{} ids", fullnames.len());
        let (body, quota) = self
            .get("/api/info", &[("id", fullnames.join(","))], &what)
            .await?;
        let listing = serde_json::from_value::<Listing>(body)
            .map_err(|err| decode_error(Service::Live, err))?;
        let mut things = Vec::new();
        flatten_listing(listing, &mut things).map_err(|err| decode_error(Service::Live, err))?;
        Ok(LiveResponse { things, quota })
    }

    async fn comment_context(
        &self,
        thread_id: &str,
        comment_id: &str,
        depth: u8,
    ) -> Result<LiveResponse, SourceError> {
        let what = format!("comment {comment_id}");
        let (body, quota) = self
            .get(
                &format!("/comments/{thread_id}/_/{comment_id}.json"),
                &[("context", depth.to_string())],
                &what,
            )
            .await?;
        let things = things_from_thread(body).map_err(|err| decode_error(Service::Live, err))?;
        Ok(LiveResponse { things, quota })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn thread_listing_flattens_nested_replies() {
        let body = json!([
            {"kind": "Listing", "data": {"children": [
                {"kind": "t3", "data": {"id": "abc", "name": "t3_abc", "title": "t", "selftext": "s"}}
            ]}},
            {"kind": "Listing", "data": {"children": [
                {"kind": "t1", "data": {
                    "id": "a", "name": "t1_a", "parent_id": "t3_abc", "link_id": "t3_abc", "body": "x",
                    "replies": {"kind": "Listing", "data": {"children": [
                        {"kind": "t1", "data": {"id": "b", "name": "t1_b", "parent_id": "t1_a", "link_id": "t3_abc", "body": "y", "replies": ""}},
                        {"kind": "more", "data": {"id": "_", "children": ["c"]}}
                    ]}}
                }}
            ]}}
        ]);
        let things = things_from_thread(body).expect("decode");
        let ids = things.iter().map(|t| t.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["abc", "a", "b"]);
        assert!(things[0].is_post());
        assert_eq!(things[2].clone().into_record().parent_id, "a");
    }

    #[test]
    fn edited_timestamp_and_flag_both_decode() {
        let body = json!({"data": {"children": [
            {"kind": "t1", "data": {"id": "a", "name": "t1_a", "body": "x", "edited": 1700000000.0}},
            {"kind": "t1", "data": {"id": "b", "name": "t1_b", "body": "y", "edited": false}}
        ]}});
        let listing = serde_json::from_value::<Listing>(body).expect("listing");
        let mut things = Vec::new();
        flatten_listing(listing, &mut things).expect("flatten");
        assert_eq!(things[0].edited_utc(), Some(1_700_000_000));
        assert_eq!(things[1].edited_utc(), None);
    }

    #[test]
    fn quota_headers_are_read_when_present() {
        let mut headers = HeaderMap::new();
        assert_eq!(quota_from_headers(&headers), None);
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("598.0"));
        headers.insert("x-ratelimit-used", HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("431"));
        let quota = quota_from_headers(&headers).expect("quota");
        assert_eq!(quota.remaining, Some(598.0));
        assert_eq!(quota.used, Some(2.0));
        assert_eq!(quota.reset_secs, Some(431.0));
    }

    #[test]
    fn rate_limited_status_keeps_the_reset_clock() {
        let quota = QuotaHeaders {
            remaining: Some(0.0),
            used: Some(600.0),
            reset_secs: Some(42.0),
        };
        match live_status_error(StatusCode::TOO_MANY_REQUESTS, Some(quota), "3 ids") {
            SourceError::QuotaExceeded { service, reset_secs } => {
                assert_eq!(service, Service::Live);
                assert_eq!(reset_secs, Some(42.0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            live_status_error(StatusCode::TOO_MANY_REQUESTS, None, "3 ids"),
            SourceError::QuotaExceeded {
                reset_secs: None,
                ..
            }
        ));
        assert!(matches!(
            live_status_error(StatusCode::NOT_FOUND, Some(quota), "thread x"),
            SourceError::NotFound { .. }
        ));
    }
}

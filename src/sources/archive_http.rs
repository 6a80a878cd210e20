use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Service, SourceError};
use crate::sources::{decode_error, http_client, status_error, transport_error};
use crate::unddit::archive::{ArchiveApi, ArchiveItem, ArchivePage, COMMENT_FIELDS, PageQuery};
use crate::unddit::config::ArchiveConfig;

#[derive(Debug, Deserialize)]
struct SubmissionSearch {
    #[serde(default)]
    data: Vec<ArchiveItem>,
}

pub struct HttpArchive {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArchive {
    pub fn new(cfg: &ArchiveConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T>(
        &self,
        path: &str,
        params: &[(&str, String)],
        what: &str,
    ) -> Result<T, SourceError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|err| transport_error(Service::Archive, &err, None))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(Service::Archive, status, what));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| decode_error(Service::Archive, err))
    }
}

pub(crate) fn comment_params(query: &PageQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("size", query.size.to_string()),
        ("sort", "asc".to_string()),
        ("fields", COMMENT_FIELDS.to_string()),
        ("q", "*".to_string()),
        ("link_id", query.thread_id.clone()),
        ("after", query.after.to_string()),
    ];
    if let Some(before) = query.before {
        params.push(("before", before.to_string()));
    }
    params
}

#[async_trait]
impl ArchiveApi for HttpArchive {
    async fn comment_page(&self, query: &PageQuery) -> Result<ArchivePage, SourceError> {
        let what = format!("comments of {}", query.thread_id);
        self.get_json("/reddit/comment/search/", &comment_params(query), &what)
            .await
    }

    async fn post(&self, thread_id: &str) -> Result<Option<ArchiveItem>, SourceError> {
        let what = format!("thread {thread_id}");
        let search: SubmissionSearch = self
            .get_json(
                "/reddit/submission/search/",
                &[("ids", thread_id.to_string())],
                &what,
            )
            .await?;
        Ok(search.data.into_iter().next())
    }
}

use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::{Service, SourceError};
use crate::sources::{decode_error, status_error, transport_error};

pub const INSTALLED_CLIENT_GRANT: &str = "https://oauth.reddit.com/grants/installed_client";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Device-scoped anonymous credential for the live source, fetched on first
/// use and shared by every later request.
pub struct AnonymousAuth {
    token_url: String,
    client_id: String,
    device_id: String,
    token: OnceCell<String>,
}

impl AnonymousAuth {
    pub fn new(token_url: &str, client_id: &str, device_id: &str) -> Self {
        Self {
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            device_id: device_id.to_string(),
            token: OnceCell::new(),
        }
    }

    pub fn form(&self) -> [(&'static str, String); 2] {
        [
            ("grant_type", INSTALLED_CLIENT_GRANT.to_string()),
            ("device_id", self.device_id.clone()),
        ]
    }

    /// Concurrent first callers wait on a single token request.
    pub async fn token(&self, client: &reqwest::Client) -> Result<&str, SourceError> {
        self.token
            .get_or_try_init(|| self.fetch(client))
            .await
            .map(String::as_str)
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<String, SourceError> {
        log::debug!("requesting anonymous live token");
        let response = client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(""))
            .form(&self.form())
            .send()
            .await
            .map_err(|err| transport_error(Service::Live, &err, None))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(Service::Live, status, "access token"));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| decode_error(Service::Live, err))?;
        match body.access_token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(token),
            None => Err(decode_error(
                Service::Live,
                body.error.unwrap_or_else(|| "token response without access_token".to_string()),
            )),
        }
    }
}

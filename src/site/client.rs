//! Snapshot HTTP client used for one gallery attempt.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use super::SiteError;
use super::ban;

/// HTTP client bound to the proxy and cookie settings in force when it was built.
///
/// Created by [`Session::connect`](crate::session::Session::connect); changing
/// the session afterwards does not affect clients already handed out.
#[derive(Debug, Clone)]
pub struct SiteClient {
    client: Client,
    request_timeout: Duration,
}

impl SiteClient {
    /// Wraps a configured reqwest client.
    #[must_use]
    pub fn new(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    /// Timeout applied to page and API requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Fetches an HTML page and rejects it when it is the ban notice.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Banned`] for the ban notice, [`SiteError::HttpStatus`]
    /// for non-success responses, and transport errors otherwise.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn fetch_page(&self, url: &Url) -> Result<String, SiteError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| SiteError::from_reqwest(url.as_str(), e))?;
        read_checked_body(url, response).await
    }

    /// Posts a JSON body and returns the response text after the ban check.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_page`](Self::fetch_page).
    #[instrument(level = "debug", skip(self, body), fields(url = %url))]
    pub async fn post_json<B>(&self, url: &Url, body: &B) -> Result<String, SiteError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(url.clone())
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| SiteError::from_reqwest(url.as_str(), e))?;
        read_checked_body(url, response).await
    }

    /// Opens a streaming GET, following redirects.
    ///
    /// Only the connect and per-read timeouts apply so large bodies can stream.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::HttpStatus`] for non-success responses and
    /// transport errors otherwise.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn open_stream(&self, url: &Url) -> Result<Response, SiteError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SiteError::from_reqwest(url.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SiteError::http_status(url.as_str(), status.as_u16()));
        }
        debug!(final_url = %response.url(), "stream opened");
        Ok(response)
    }
}

async fn read_checked_body(url: &Url, response: Response) -> Result<String, SiteError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SiteError::from_reqwest(url.as_str(), e))?;
    if let Some(condition) = ban::inspect(&body) {
        debug!(%condition, "ban notice received");
        return Err(SiteError::from(condition));
    }
    if !status.is_success() {
        return Err(SiteError::http_status(url.as_str(), status.as_u16()));
    }
    Ok(body)
}

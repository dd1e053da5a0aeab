use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{FetchOutcome, FetchStatus, StaticSource};
use crate::settings::FetchSettings;

/// Static fetcher. Redirects come back as statuses, never followed.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent).context("invalid user agent")?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&settings.accept_language).context("invalid accept-language")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://www.google.com/"));

        let client = Client::builder()
            .default_headers(headers)
            .redirect(Policy::none())
            .timeout(settings.request_timeout())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

/// None when the response should be read as a page.
fn classify(code: StatusCode) -> Option<FetchStatus> {
    if code.is_redirection() {
        Some(FetchStatus::Redirect(code.as_u16()))
    } else if code == StatusCode::NOT_FOUND {
        Some(FetchStatus::NotFound)
    } else if code.is_client_error() || code.is_server_error() {
        Some(FetchStatus::Http(code.as_u16()))
    } else {
        None
    }
}

#[async_trait]
impl StaticSource for HttpSource {
    async fn get(&self, url: &str) -> FetchOutcome {
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("  request failed for {}: {}", url, e);
                return FetchOutcome::without_page(FetchStatus::Request);
            }
        };

        if let Some(status) = classify(resp.status()) {
            debug!("  {} answered {}", url, resp.status());
            return FetchOutcome::without_page(status);
        }

        match resp.text().await {
            Ok(body) => FetchOutcome::from_markup(body, FetchStatus::Ok, FetchStatus::OkEmpty),
            Err(e) => {
                warn!("  failed to read body of {}: {}", url, e);
                FetchOutcome::without_page(FetchStatus::Request)
            }
        }
    }
}

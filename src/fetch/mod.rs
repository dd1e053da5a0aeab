pub mod http;
pub mod render;
pub mod text;

use std::fmt;

use async_trait::async_trait;
use tracing::{info, warn};

pub use http::HttpSource;
pub use render::{ChromeRenderer, RenderError};

/// How a fetch attempt ended. Rendered with the literal labels stored in the
/// `fetch_status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    Ok,
    OkEmpty,
    OkDynamic,
    OkDynamicEmpty,
    Redirect(u16),
    NotFound,
    Http(u16),
    Request,
    Render,
    Timeout,
    Unknown,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Ok => f.write_str("OK"),
            FetchStatus::OkEmpty => f.write_str("OK_Empty"),
            FetchStatus::OkDynamic => f.write_str("OK_Dynamic"),
            FetchStatus::OkDynamicEmpty => f.write_str("OK_Dynamic_Empty"),
            FetchStatus::Redirect(code) => write!(f, "Redirect_{}", code),
            FetchStatus::NotFound => f.write_str("Error_404"),
            FetchStatus::Http(code) => write!(f, "Error_HTTP_{}", code),
            FetchStatus::Request => f.write_str("Error_Request"),
            FetchStatus::Render => f.write_str("Error_Selenium"),
            FetchStatus::Timeout => f.write_str("Error_Connect"),
            FetchStatus::Unknown => f.write_str("Error_Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub html: String,
    pub text: String,
}

impl Page {
    /// None when the markup has no visible text.
    pub fn from_markup(html: String) -> Option<Page> {
        let text = text::visible_text(&html);
        if text.is_empty() {
            None
        } else {
            Some(Page { html, text })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    pub page: Option<Page>,
}

impl FetchOutcome {
    pub fn without_page(status: FetchStatus) -> Self {
        FetchOutcome { status, page: None }
    }

    /// `found` when the markup has visible text, `empty` otherwise.
    pub fn from_markup(html: String, found: FetchStatus, empty: FetchStatus) -> Self {
        match Page::from_markup(html) {
            Some(page) => FetchOutcome { status: found, page: Some(page) },
            None => FetchOutcome::without_page(empty),
        }
    }
}

/// A plain HTTP GET. Never follows redirects.
#[async_trait]
pub trait StaticSource: Send + Sync {
    async fn get(&self, url: &str) -> FetchOutcome;
}

/// Runs the page's scripts and returns the resulting markup.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, RenderError>;
}

/// Static fetch first, rendered fetch only when the static page came back
/// without visible text.
pub struct Fetcher {
    source: Box<dyn StaticSource>,
    renderer: Option<Box<dyn Renderer>>,
}

impl Fetcher {
    pub fn new(source: impl StaticSource + 'static) -> Self {
        Self { source: Box::new(source), renderer: None }
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let outcome = self.source.get(url).await;
        if outcome.status != FetchStatus::OkEmpty {
            return outcome;
        }
        let Some(renderer) = &self.renderer else {
            return outcome;
        };

        info!("  no visible text in static page, rendering {}", url);
        match renderer.render(url).await {
            Ok(html) => {
                FetchOutcome::from_markup(html, FetchStatus::OkDynamic, FetchStatus::OkDynamicEmpty)
            }
            Err(e) => {
                warn!("  render failed for {}: {}", url, e);
                FetchOutcome::without_page(FetchStatus::Render)
            }
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Renderer;
use crate::settings::FetchSettings;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("browser session already closed")]
    Closed,
    #[error(transparent)]
    Cdp(#[from] CdpError),
}

/// Headless Chrome renderer. Every call launches a fresh browser and tears it
/// down before returning, whatever the outcome.
pub struct ChromeRenderer {
    settle: Duration,
    user_agent: String,
    executable: Option<PathBuf>,
}

impl ChromeRenderer {
    pub fn new(settings: &FetchSettings) -> Self {
        Self {
            settle: settings.render_settle(),
            user_agent: settings.user_agent.clone(),
            executable: settings.chrome_executable.clone(),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, RenderError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-setuid-sandbox")
            .arg(format!("--user-agent={}", self.user_agent));
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(RenderError::Launch)
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let session = BrowserSession::launch(self.browser_config()?).await?;
        let result = session.load(url, self.settle).await;
        session.close().await;
        result
    }
}

/// Owns one browser process and its CDP event loop.
///
/// `close` is the normal exit. If the session is dropped instead, e.g. when the
/// row deadline aborts the fetch mid-render, Drop hands the shutdown to a
/// background task on the runtime captured at launch.
struct BrowserSession {
    browser: Option<Browser>,
    events: Option<JoinHandle<()>>,
    runtime: tokio::runtime::Handle,
}

impl BrowserSession {
    async fn launch(config: BrowserConfig) -> Result<Self, RenderError> {
        let (browser, mut handler) = Browser::launch(config).await?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            browser: Some(browser),
            events: Some(events),
            runtime: tokio::runtime::Handle::current(),
        })
    }

    async fn load(&self, url: &str, settle: Duration) -> Result<String, RenderError> {
        let browser = self.browser.as_ref().ok_or(RenderError::Closed)?;
        let page = browser.new_page(url).await?;
        // Give client-side scripts time to build the page.
        tokio::time::sleep(settle).await;
        let html = page.content().await;
        if let Err(e) = page.close().await {
            debug!("failed to close tab for {}: {}", url, e);
        }
        Ok(html?)
    }

    async fn close(mut self) {
        let (Some(browser), events) = (self.browser.take(), self.events.take()) else {
            return;
        };
        shutdown(browser, events).await;
    }
}

async fn shutdown(mut browser: Browser, events: Option<JoinHandle<()>>) {
    if let Err(e) = browser.close().await {
        warn!("failed to close browser: {}", e);
    }
    if let Err(e) = browser.wait().await {
        debug!("browser process did not exit cleanly: {}", e);
    }
    if let Some(events) = events {
        events.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(browser) = self.browser.take() {
            let events = self.events.take();
            self.runtime.spawn(shutdown(browser, events));
        }
    }
}

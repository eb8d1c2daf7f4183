use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use std::time::Duration;

use crate::utils::error::Result;

/// A fully rendered page. `final_url` reflects any client-side redirects
/// the browser followed.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
}

/// Narrow seam over the headless browser so the pipeline can run against a
/// fake in tests. `Ok(None)` means the render failed in a recoverable way
/// and the caller should continue without it.
#[async_trait]
pub trait RenderedFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout_ms: u64) -> Result<Option<RenderedPage>>;
}

/// Production fetcher backed by headless Chrome. Launch and navigation
/// failures are swallowed into `None`; a missing browser binary must never
/// fail a check run.
pub struct ChromeRenderer {
    user_agent: String,
}

impl ChromeRenderer {
    pub fn new(user_agent: String) -> Self {
        Self { user_agent }
    }

    fn render_blocking(
        user_agent: &str,
        url: &str,
        timeout_ms: u64,
    ) -> Option<RenderedPage> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
                std::ffi::OsStr::new("--disable-extensions"),
            ])
            .build()
            .ok()?;

        let browser = match Browser::new(launch_options) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(error = %e, "browser launch failed");
                return None;
            }
        };

        let tab = browser.new_tab().ok()?;
        tab.set_user_agent(user_agent, None, None).ok()?;
        tab.set_default_timeout(Duration::from_millis(timeout_ms));

        if let Err(e) = tab.navigate_to(url) {
            tracing::debug!(url, error = %e, "navigation failed");
            return None;
        }
        if let Err(e) = tab.wait_until_navigated() {
            tracing::debug!(url, error = %e, "page load failed");
            return None;
        }

        // Best-effort settle wait; a timeout here is not a failure
        let _ = tab.wait_for_element_with_custom_timeout(
            "body",
            Duration::from_millis(timeout_ms / 2),
        );

        let html = tab.get_content().ok()?;
        let final_url = {
            let u = tab.get_url();
            if u.is_empty() {
                url.to_string()
            } else {
                u
            }
        };

        let _ = tab.close(true);
        Some(RenderedPage { html, final_url })
    }
}

#[async_trait]
impl RenderedFetcher for ChromeRenderer {
    async fn fetch(&self, url: &str, timeout_ms: u64) -> Result<Option<RenderedPage>> {
        let user_agent = self.user_agent.clone();
        let url = url.to_string();

        let page = tokio::task::spawn_blocking(move || {
            Self::render_blocking(&user_agent, &url, timeout_ms)
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "render task panicked");
            None
        });

        Ok(page)
    }
}

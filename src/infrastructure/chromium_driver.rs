//! Chromium-backed browser sessions (feature `browser`)

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::Page;
use chromiumoxide::element::Element;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::infrastructure::browser::{
    BrowserLauncher, BrowserSession, HIDE_WEBDRIVER_SCRIPT, Probe, stealth_args,
};
use crate::infrastructure::config::BrowserConfig;

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Launches a local Chromium through the DevTools protocol
#[derive(Debug, Default, Clone)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, config: &BrowserConfig) -> anyhow::Result<Box<dyn BrowserSession>> {
        let mut builder = ChromeConfig::builder()
            .window_size(config.window_width, config.window_height)
            .args(stealth_args(config));
        if !config.headless {
            builder = builder.with_head();
        }
        let chrome_config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {}", e))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .context("Failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;
        page.evaluate_on_new_document(HIDE_WEBDRIVER_SCRIPT)
            .await
            .context("Failed to install webdriver override")?;

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
        }))
    }
}

/// One Chromium tab plus the browser that owns it
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromiumSession {
    async fn elements(&self, selector: &str) -> Probe<Vec<Element>> {
        match self.page.find_elements(selector).await {
            Ok(elements) if elements.is_empty() => Probe::NotFound,
            Ok(elements) => Probe::Found(elements),
            Err(e) => Probe::TransientFault(e.to_string()),
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Probe<()> {
        match self.page.goto(url).await {
            Ok(_) => Probe::Found(()),
            Err(e) => Probe::TransientFault(e.to_string()),
        }
    }

    async fn count(&mut self, selector: &str) -> Probe<usize> {
        match self.elements(selector).await {
            Probe::Found(elements) => Probe::Found(elements.len()),
            Probe::NotFound => Probe::NotFound,
            Probe::TransientFault(reason) => Probe::TransientFault(reason),
        }
    }

    async fn text(&mut self, selector: &str) -> Probe<String> {
        let elements = match self.elements(selector).await {
            Probe::Found(elements) => elements,
            Probe::NotFound => return Probe::NotFound,
            Probe::TransientFault(reason) => return Probe::TransientFault(reason),
        };
        let Some(element) = elements.into_iter().next() else {
            return Probe::NotFound;
        };
        match element.inner_text().await {
            Ok(Some(text)) => Probe::Found(text.trim().to_string()),
            Ok(None) => Probe::Found(String::new()),
            Err(e) => Probe::TransientFault(e.to_string()),
        }
    }

    async fn click_nth(&mut self, selector: &str, index: usize) -> Probe<()> {
        let elements = match self.elements(selector).await {
            Probe::Found(elements) => elements,
            Probe::NotFound => return Probe::NotFound,
            Probe::TransientFault(reason) => return Probe::TransientFault(reason),
        };
        let Some(element) = elements.get(index) else {
            return Probe::NotFound;
        };
        if let Err(e) = element.scroll_into_view().await {
            debug!("scroll_into_view failed: {}", e);
        }
        match element.click().await {
            Ok(_) => Probe::Found(()),
            Err(e) => Probe::TransientFault(e.to_string()),
        }
    }

    async fn current_url(&mut self) -> Probe<String> {
        match self.page.url().await {
            Ok(Some(url)) => Probe::Found(url),
            Ok(None) => Probe::NotFound,
            Err(e) => Probe::TransientFault(e.to_string()),
        }
    }

    async fn scroll_to_bottom(&mut self) -> Probe<()> {
        match self.page.evaluate(SCROLL_SCRIPT).await {
            Ok(_) => Probe::Found(()),
            Err(e) => Probe::TransientFault(e.to_string()),
        }
    }

    async fn press_escape(&mut self) -> Probe<()> {
        let body = match self.page.find_element("body").await {
            Ok(body) => body,
            Err(e) => return Probe::TransientFault(e.to_string()),
        };
        match body.press_key("Escape").await {
            Ok(_) => Probe::Found(()),
            Err(e) => Probe::TransientFault(e.to_string()),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("⚠️ Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process wait failed: {}", e);
        }
        self.handler_task.abort();
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::{json, Map};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Browser, DialogAction, DialogHandler};
use crate::config;

const DIALOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// [`Browser`] backed by a WebDriver server (chromedriver, geckodriver).
pub struct WebDriverBrowser {
    client: Client,
    dialog_task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WebDriverBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDriverBrowser").finish_non_exhaustive()
    }
}

impl WebDriverBrowser {
    pub async fn connect(cfg: &config::Browser) -> Result<Self> {
        let mut caps = Map::new();
        if cfg.headless {
            caps.insert(
                "goog:chromeOptions".into(),
                json!({ "args": ["--headless=new", "--disable-gpu", "--window-size=1280,2000"] }),
            );
            caps.insert("moz:firefoxOptions".into(), json!({ "args": ["-headless"] }));
        }
        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&cfg.webdriver_url)
            .await
            .with_context(|| format!("failed to connect to WebDriver at {}", cfg.webdriver_url))?;
        info!(url = %cfg.webdriver_url, headless = cfg.headless, "connected to WebDriver");
        Ok(Self {
            client,
            dialog_task: Mutex::new(None),
        })
    }

    async fn find_all(&self, scope: Option<&Element>, selector: &str) -> Result<Vec<Element>> {
        let found = match scope {
            Some(el) => el.find_all(Locator::Css(selector)).await,
            None => self.client.find_all(Locator::Css(selector)).await,
        };
        found.with_context(|| format!("query failed for {}", selector))
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    type Element = Element;

    async fn navigate(&self, url: &str) -> Result<()> {
        debug!(%url, "navigating");
        self.client
            .goto(url)
            .await
            .with_context(|| format!("failed to navigate to {}", url))
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        self.client
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(selector))
            .await
            .with_context(|| format!("timed out after {:?} waiting for {}", timeout, selector))?;
        Ok(())
    }

    async fn query(&self, scope: Option<&Element>, selector: &str) -> Result<Option<Element>> {
        Ok(self.find_all(scope, selector).await?.into_iter().next())
    }

    async fn query_all(&self, scope: Option<&Element>, selector: &str) -> Result<Vec<Element>> {
        self.find_all(scope, selector).await
    }

    async fn click(&self, element: &Element) -> Result<()> {
        element.click().await.context("click failed")
    }

    async fn type_text(&self, element: &Element, text: &str) -> Result<()> {
        element.send_keys(text).await.context("typing failed")
    }

    async fn attribute(&self, element: &Element, name: &str) -> Result<Option<String>> {
        element
            .attr(name)
            .await
            .with_context(|| format!("failed to read attribute {}", name))
    }

    async fn text(&self, element: &Element) -> Result<String> {
        element.text().await.context("failed to read element text")
    }

    async fn on_dialog(&self, handler: DialogHandler) -> Result<()> {
        // WebDriver has no dialog events, so poll for an open alert instead.
        let client = self.client.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(DIALOG_POLL_INTERVAL).await;
                let Ok(message) = client.get_alert_text().await else {
                    continue;
                };
                let res = match handler(&message) {
                    DialogAction::Accept => client.accept_alert().await,
                    DialogAction::Dismiss => client.dismiss_alert().await,
                };
                if let Err(err) = res {
                    debug!(?err, "failed to answer dialog");
                }
            }
        });
        if let Some(previous) = self.dialog_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.dialog_task.lock().await.take() {
            task.abort();
        }
        self.client
            .clone()
            .close()
            .await
            .context("failed to close WebDriver session")
    }
}

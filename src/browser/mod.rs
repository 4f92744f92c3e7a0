//! Capabilities the scraper needs from a browser automation driver.
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod webdriver;

pub use webdriver::WebDriverBrowser;

/// What to do with a native dialog (alert, confirm, prompt).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogAction {
    Accept,
    Dismiss,
}

/// Called with the dialog message each time a native dialog shows up.
pub type DialogHandler = Arc<dyn Fn(&str) -> DialogAction + Send + Sync>;

/// A single browser tab. Element handles are only valid until the next
/// navigation.
#[async_trait]
pub trait Browser: Send + Sync + 'static {
    type Element: Clone + Send + Sync;

    async fn navigate(&self, url: &str) -> Result<()>;

    /// Wait until `selector` matches; an `Err` means it did not within `timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// First element matching `selector`, searched under `scope` when given.
    async fn query(&self, scope: Option<&Self::Element>, selector: &str) -> Result<Option<Self::Element>>;

    async fn query_all(&self, scope: Option<&Self::Element>, selector: &str) -> Result<Vec<Self::Element>>;

    async fn click(&self, element: &Self::Element) -> Result<()>;

    async fn type_text(&self, element: &Self::Element, text: &str) -> Result<()>;

    async fn attribute(&self, element: &Self::Element, name: &str) -> Result<Option<String>>;

    async fn text(&self, element: &Self::Element) -> Result<String>;

    /// Install `handler` for every native dialog raised from now on.
    async fn on_dialog(&self, handler: DialogHandler) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Click the first element matching `selector`.
pub async fn click_selector<B: Browser + ?Sized>(browser: &B, selector: &str) -> Result<()> {
    match browser.query(None, selector).await? {
        Some(el) => browser.click(&el).await,
        None => Err(anyhow::anyhow!("no element matches {}", selector)),
    }
}

/// Text of the first element matching `selector` under `scope`, if any.
pub async fn text_of<B: Browser + ?Sized>(
    browser: &B,
    scope: &B::Element,
    selector: &str,
) -> Result<Option<String>> {
    match browser.query(Some(scope), selector).await? {
        Some(el) => Ok(Some(browser.text(&el).await?)),
        None => Ok(None),
    }
}

/// Attribute of the first element matching `selector` under `scope`, if any.
pub async fn attribute_of<B: Browser + ?Sized>(
    browser: &B,
    scope: &B::Element,
    selector: &str,
    name: &str,
) -> Result<Option<String>> {
    match browser.query(Some(scope), selector).await? {
        Some(el) => browser.attribute(&el, name).await,
        None => Ok(None),
    }
}

//! Walks the highlights list and scrapes each book's detail view.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::browser::{attribute_of, click_selector, text_of, Browser};
use crate::config;
use crate::error::ScrapeError;
use crate::model::{Annotation, BookRecord, BookSummary, HighlightColor};
use crate::session::SessionKeeper;

/// Attempts for the Readwise export side action.
pub const EXPORT_ATTEMPTS: u32 = 5;

pub mod selectors {
    pub const READING_ITEM: &str = ".reading-item";
    pub const ITEM_COVER: &str = "div.cover > img";
    pub const ITEM_HIGHLIGHT_COUNT: &str = ".highlight-count";

    pub const DETAIL_CONTAINER: &str = "div.highlights-item-container";
    pub const DETAIL_HEADER: &str = "div.highlights-item-container > div:nth-child(1)";
    pub const HEADER_TITLE: &str = "div:nth-child(2) > div";
    pub const HEADER_COVER: &str = "div:nth-child(1) > img";
    pub const HIGHLIGHT_ITEM: &str = ".highlight-item";
    pub const HIGHLIGHT_TEXT: &str = "div.highlight-content > span";
    // sic, the site's class name
    pub const HIGHLIGHT_NOTE: &str = "span.highlight-annoatation";

    pub const EXPORT_MENU: &str = "#react-container > div > div > div.row.no-gutters > div.col-sm-10 > section > div.desktop-top-nav > div > div > div > span:nth-child(5)";
    pub const READWISE_BUTTON: &str = "body > div.fade.export-highlight-modal.modal.show > div > div > div.list-group.list-group-flush > button:nth-child(12)";
    pub const TOKEN_INPUT: &str = "body > div.fade.modal.show > div > div > div.modal-body > form > div > input";
    pub const TOKEN_SUBMIT: &str = "body > div.fade.modal.show > div > div > div.modal-body > form > div > div > button";
    pub const EXPORT_DONE: &str = "body > div.fade.export-highlight-modal.modal.show > div > div > div.list-group.list-group-flush > button:nth-child(12) > span.text-secondary > a";
}

static COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid count regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeOptions {
    /// Trigger the Readwise export on each book's detail view.
    pub export_externally: bool,
}

#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Attempts per book before it is left out of the result.
    pub max_retry: u32,
    pub export_attempts: u32,
    pub wait_timeout: Duration,
}

impl ScrapeSettings {
    pub fn from_config(cfg: &config::Scrape) -> Self {
        Self {
            max_retry: cfg.max_retry,
            export_attempts: EXPORT_ATTEMPTS,
            wait_timeout: cfg.wait_timeout(),
        }
    }
}

pub struct Scraper<B: Browser> {
    session: Arc<SessionKeeper<B>>,
    settings: ScrapeSettings,
    readwise_token: Option<String>,
}

impl<B: Browser> Scraper<B> {
    pub fn new(
        session: Arc<SessionKeeper<B>>,
        settings: ScrapeSettings,
        readwise_token: Option<String>,
    ) -> Self {
        Self {
            session,
            settings,
            readwise_token,
        }
    }

    /// Summaries of every book on the list, in list order. Titles are unique:
    /// the first item with a given title wins.
    #[instrument(skip_all)]
    pub async fn list_records(&self) -> Result<Vec<BookSummary>, ScrapeError> {
        let session = self.session.ensure(true).await?;
        let browser: &B = &session;
        let items = browser.query_all(None, selectors::READING_ITEM).await?;

        let reads = join_all(items.iter().map(|item| read_summary(browser, item))).await;

        let mut seen = HashSet::new();
        let mut summaries = Vec::with_capacity(reads.len());
        for read in reads {
            match read {
                Ok(Some(summary)) => {
                    if seen.insert(summary.title.clone()) {
                        summaries.push(summary);
                    } else {
                        warn!(title = %summary.title, "duplicate title in list; keeping the first");
                    }
                }
                Ok(None) => debug!("skipping list item without a title"),
                Err(err) => warn!(?err, "failed to read list item; skipping"),
            }
        }
        info!(count = summaries.len(), "listed books");
        Ok(summaries)
    }

    /// Open the book titled `title` from a fresh list view and parse its highlights.
    #[instrument(skip(self))]
    pub async fn fetch_detail(&self, title: &str) -> Result<BookRecord, ScrapeError> {
        let session = self.session.ensure(true).await?;
        let browser: &B = &session;
        let items = browser.query_all(None, selectors::READING_ITEM).await?;

        let titles = join_all(
            items
                .iter()
                .map(|item| attribute_of(browser, item, selectors::ITEM_COVER, "alt")),
        )
        .await;
        let target = items.iter().zip(titles).find_map(|(item, alt)| match alt {
            Ok(Some(alt)) if alt.trim() == title => Some(item),
            _ => None,
        });
        let Some(target) = target else {
            return Err(ScrapeError::RecordNotFound(title.to_string()));
        };

        browser.click(target).await?;
        Ok(parse_book_highlights(browser, title, self.settings.wait_timeout).await?)
    }

    /// Scrape every listed book. Books that keep failing are left out.
    #[instrument(skip_all)]
    pub async fn scrape_all(&self, options: ScrapeOptions) -> Result<Vec<BookRecord>, ScrapeError> {
        let summaries = self.list_records().await?;
        let total = summaries.len();

        let mut books = Vec::with_capacity(total);
        for (idx, summary) in summaries.iter().enumerate() {
            info!(n = idx + 1, total, title = %summary.title, "scraping book");
            let Some(book) = self.fetch_with_retry(&summary.title).await else {
                warn!(
                    title = %summary.title,
                    attempts = self.settings.max_retry,
                    "giving up on book"
                );
                continue;
            };
            info!(
                title = %book.title,
                highlights = book.annotations_count().highlights_count,
                notes = book.annotations_count().notes_count,
                "scraped book"
            );
            if options.export_externally {
                self.export_to_readwise().await;
            }
            books.push(book);
        }
        Ok(books)
    }

    async fn fetch_with_retry(&self, title: &str) -> Option<BookRecord> {
        let mut attempt = 0;
        while attempt < self.settings.max_retry {
            attempt += 1;
            match self.fetch_detail(title).await {
                Ok(book) => return Some(book),
                Err(err) => warn!(?err, %title, attempt, "failed to scrape book"),
            }
        }
        None
    }

    /// Export the open detail view to Readwise. Best effort: returns whether
    /// the export went through, never fails the scrape.
    #[instrument(skip_all)]
    pub async fn export_to_readwise(&self) -> bool {
        let Some(token) = self.readwise_token.as_deref() else {
            warn!("no Readwise token configured; skipping export");
            return false;
        };
        let session = match self.session.ensure(false).await {
            Ok(session) => session,
            Err(err) => {
                warn!(?err, "no session for Readwise export");
                return false;
            }
        };

        for attempt in 1..=self.settings.export_attempts {
            match export_once(&*session, token, self.settings.wait_timeout).await {
                Ok(()) => {
                    info!("exported to Readwise");
                    return true;
                }
                Err(err) => warn!(?err, attempt, "Readwise export failed; retrying"),
            }
        }
        warn!(
            attempts = self.settings.export_attempts,
            "Readwise export failed, giving up"
        );
        false
    }
}

async fn read_summary<B: Browser>(browser: &B, item: &B::Element) -> Result<Option<BookSummary>> {
    let Some(cover) = browser.query(Some(item), selectors::ITEM_COVER).await? else {
        return Ok(None);
    };
    let title = browser
        .attribute(&cover, "alt")
        .await?
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let Some(title) = title else {
        return Ok(None);
    };
    let cover_url = browser.attribute(&cover, "src").await?;
    let count_text = text_of(browser, item, selectors::ITEM_HIGHLIGHT_COUNT).await?;

    Ok(Some(BookSummary {
        title,
        cover_url,
        highlights_count: parse_count(count_text.as_deref()),
    }))
}

/// First integer in `text`, 0 when there is none.
pub fn parse_count(text: Option<&str>) -> usize {
    text.and_then(|t| COUNT_RE.find(t))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Parse an open detail view. `fallback_title` is used when the header is blank.
pub async fn parse_book_highlights<B: Browser>(
    browser: &B,
    fallback_title: &str,
    timeout: Duration,
) -> Result<BookRecord> {
    browser
        .wait_for_selector(selectors::DETAIL_CONTAINER, timeout)
        .await?;

    let header = browser
        .query(None, selectors::DETAIL_HEADER)
        .await?
        .ok_or_else(|| anyhow!("book header not found"))?;
    let title = text_of(browser, &header, selectors::HEADER_TITLE)
        .await?
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());
    let cover = attribute_of(browser, &header, selectors::HEADER_COVER, "src")
        .await?
        .unwrap_or_default();

    let items = browser.query_all(None, selectors::HIGHLIGHT_ITEM).await?;
    let mut annotations = Vec::with_capacity(items.len());
    for item in &items {
        let classes = browser.attribute(item, "class").await?;
        let highlight = text_of(browser, item, selectors::HIGHLIGHT_TEXT)
            .await?
            .unwrap_or_default();
        let note = text_of(browser, item, selectors::HIGHLIGHT_NOTE)
            .await?
            .unwrap_or_default();
        annotations.push(Annotation {
            highlight,
            note,
            color: HighlightColor::from_class_list(classes.as_deref()),
        });
    }

    Ok(BookRecord::new(title, cover, annotations))
}

async fn export_once<B: Browser>(browser: &B, token: &str, timeout: Duration) -> Result<()> {
    if let Some(menu) = browser.query(None, selectors::EXPORT_MENU).await? {
        browser.click(&menu).await?;
    }
    browser
        .wait_for_selector(selectors::READWISE_BUTTON, timeout)
        .await?;
    click_selector(browser, selectors::READWISE_BUTTON).await?;

    // First export asks for the token, later ones go straight through.
    if let Some(input) = browser.query(None, selectors::TOKEN_INPUT).await? {
        browser.type_text(&input, token).await?;
        click_selector(browser, selectors::TOKEN_SUBMIT).await?;
        browser
            .wait_for_selector(selectors::READWISE_BUTTON, timeout)
            .await?;
        click_selector(browser, selectors::READWISE_BUTTON).await?;
    }

    browser.wait_for_selector(selectors::EXPORT_DONE, timeout).await
}

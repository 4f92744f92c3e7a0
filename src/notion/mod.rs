use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::notion::model::{Database, Page, QueryDatabaseResp, WritePayload};

pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";

/// Notion rejects requests carrying more than this many blocks.
pub const MAX_BLOCKS_PER_REQUEST: usize = 100;

const QUERY_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// The document store operations the sync engine relies on.
#[async_trait]
pub trait NotionService: Send + Sync {
    async fn create_database(
        &self,
        parent_page_id: &str,
        title: &str,
        properties: &Value,
    ) -> Result<Database>;

    async fn retrieve_database(&self, database_id: &str) -> Result<Database>;

    /// Every live page of the database, across all result pages.
    async fn query_database(&self, database_id: &str) -> Result<Vec<Page>>;

    /// Create a page from `payload` with `children` as its initial blocks.
    /// Returns the new page id.
    async fn create_page(
        &self,
        database_id: &str,
        payload: &WritePayload,
        children: &[Value],
    ) -> Result<String>;

    async fn append_block_children(&self, block_id: &str, children: &[Value]) -> Result<()>;

    async fn delete_page(&self, page_id: &str) -> Result<()>;

    async fn delete_database(&self, database_id: &str) -> Result<()>;
}

impl NotionClient {
    pub fn new(token: String, version: String) -> Self {
        let base_url = Url::parse(NOTION_API_BASE).expect("valid default Notion URL");
        Self::with_base_url(token, version, base_url)
    }

    pub fn with_base_url(token: String, version: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent(concat!("readmoo-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            version,
        }
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid Notion base URL")?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version);
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        builder.build().context("failed to build Notion request")
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let request = self.build_request(method, path, body)?;
        debug!(
            method = %request.method(),
            url = %request.url(),
            payload = %body.map(|b| b.to_string()).unwrap_or_default(),
            "sending notion request"
        );

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Notion")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by Notion: {}", body);
            return Err(anyhow!("received 429 from Notion: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!("Notion API error - Status: {}, Body: {}", status, body);
            return Err(anyhow!("notion error {}: {}", status, body));
        }

        let response_body = res.text().await.context("failed to read Notion response")?;
        debug!(body = %response_body, "notion response");
        serde_json::from_str(&response_body).context("invalid Notion response JSON")
    }
}

#[async_trait]
impl NotionService for NotionClient {
    async fn create_database(
        &self,
        parent_page_id: &str,
        title: &str,
        properties: &Value,
    ) -> Result<Database> {
        let body = build_create_database_request(parent_page_id, title, properties);
        let db: Database = self
            .send(Method::POST, "v1/databases", Some(&body))
            .await
            .context("failed to create Notion database")?;
        info!(database_id = %db.id, parent = %parent_page_id, "created Notion database");
        Ok(db)
    }

    async fn retrieve_database(&self, database_id: &str) -> Result<Database> {
        self.send(Method::GET, &format!("v1/databases/{}", database_id), None)
            .await
            .with_context(|| format!("failed to retrieve database {}", database_id))
    }

    async fn query_database(&self, database_id: &str) -> Result<Vec<Page>> {
        let path = format!("v1/databases/{}/query", database_id);
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = build_query_request(cursor.as_deref());
            let resp: QueryDatabaseResp = self
                .send(Method::POST, &path, Some(&body))
                .await
                .with_context(|| format!("failed to query database {}", database_id))?;
            pages.extend(
                resp.results
                    .into_iter()
                    .filter(|p| !p.archived && (p.object.is_empty() || p.object == "page")),
            );
            match (resp.has_more, resp.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(pages)
    }

    async fn create_page(
        &self,
        database_id: &str,
        payload: &WritePayload,
        children: &[Value],
    ) -> Result<String> {
        let body = build_create_page_request(database_id, payload, children);
        let created: CreatedObject = self
            .send(Method::POST, "v1/pages", Some(&body))
            .await
            .with_context(|| format!("failed to create page '{}'", payload.title))?;
        Ok(created.id)
    }

    async fn append_block_children(&self, block_id: &str, children: &[Value]) -> Result<()> {
        let body = json!({ "children": children });
        let _: Value = self
            .send(
                Method::PATCH,
                &format!("v1/blocks/{}/children", block_id),
                Some(&body),
            )
            .await
            .with_context(|| format!("failed to append blocks to {}", block_id))?;
        Ok(())
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        let body = json!({ "archived": true });
        let _: Value = self
            .send(Method::PATCH, &format!("v1/pages/{}", page_id), Some(&body))
            .await
            .with_context(|| format!("failed to archive page {}", page_id))?;
        Ok(())
    }

    async fn delete_database(&self, database_id: &str) -> Result<()> {
        // Databases are blocks of their parent page.
        let _: Value = self
            .send(Method::DELETE, &format!("v1/blocks/{}", database_id), None)
            .await
            .with_context(|| format!("failed to delete database {}", database_id))?;
        Ok(())
    }
}

fn external_file(url: &str) -> Value {
    json!({ "type": "external", "external": { "url": url } })
}

pub fn build_create_page_request(database_id: &str, payload: &WritePayload, children: &[Value]) -> Value {
    let mut body = json!({
        "parent": { "database_id": database_id },
        "properties": Value::Object(payload.properties.clone()),
        "children": children,
    });
    if let Some(icon) = payload.icon.as_deref().filter(|u| !u.is_empty()) {
        body["icon"] = external_file(icon);
    }
    if let Some(cover) = payload.cover.as_deref().filter(|u| !u.is_empty()) {
        body["cover"] = external_file(cover);
    }
    body
}

pub fn build_create_database_request(parent_page_id: &str, title: &str, properties: &Value) -> Value {
    json!({
        "parent": { "type": "page_id", "page_id": parent_page_id },
        "title": [ { "type": "text", "text": { "content": title } } ],
        "properties": properties,
    })
}

pub fn build_query_request(start_cursor: Option<&str>) -> Value {
    let mut body = json!({ "page_size": QUERY_PAGE_SIZE });
    if let Some(cursor) = start_cursor {
        body["start_cursor"] = json!(cursor);
    }
    body
}

#[derive(Deserialize)]
struct CreatedObject {
    id: String,
}

//! Mirrors scraped books into a Notion database, one page per book.
//!
//! Pages are matched to books by title. A matched page is replaced wholesale
//! (archived, then created again) so running the sync twice never duplicates
//! a book. When the sync created the database itself, any failure deletes the
//! database again so the caller never sees a half-filled one.
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::error::SyncError;
use crate::model::BookRecord;
use crate::notion::model::{DatabaseSchema, Page, PropertyValue, WritePayload};
use crate::notion::{NotionService, MAX_BLOCKS_PER_REQUEST};

pub const DEFAULT_DATABASE_TITLE: &str = "Readmoo Highlights";

/// Where to sync. `database_id` wins when both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncTarget {
    /// Create a new database under this page.
    pub page_id: Option<String>,
    /// Sync into this existing database.
    pub database_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExistingEntry {
    pub page_id: String,
    pub properties: HashMap<String, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub database_id: String,
    pub created: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

struct Resolved {
    database_id: String,
    schema: DatabaseSchema,
    entries: HashMap<String, ExistingEntry>,
    created_database: bool,
}

/// Schema of a database created by the sync.
pub fn default_database_properties() -> Value {
    json!({
        "Title": { "title": {} },
        "Full Title": { "rich_text": {} },
        "Author": { "rich_text": {} },
        "Category": { "select": { "options": [
            { "name": "Books", "color": "blue" },
            { "name": "Articles", "color": "green" },
            { "name": "Tweets", "color": "purple" },
            { "name": "Podcasts", "color": "orange" }
        ] } },
        "Highlights": { "number": { "format": "number" } },
        "Notes": { "number": { "format": "number" } },
        "Last Synced": { "date": {} },
        "URL": { "url": {} }
    })
}

/// Split blocks into the batch sent with the create call and the batches
/// appended afterwards, each at most [`MAX_BLOCKS_PER_REQUEST`] long.
pub fn chunk_blocks(blocks: &[Value]) -> (&[Value], std::slice::Chunks<'_, Value>) {
    let (first, rest) = blocks.split_at(blocks.len().min(MAX_BLOCKS_PER_REQUEST));
    (first, rest.chunks(MAX_BLOCKS_PER_REQUEST))
}

/// Index pages by title. The first page wins when titles repeat; untitled
/// pages are ignored.
pub fn index_entries(pages: Vec<Page>) -> HashMap<String, ExistingEntry> {
    let mut entries = HashMap::with_capacity(pages.len());
    for page in pages {
        let Some(title) = page.title() else {
            continue;
        };
        match entries.entry(title) {
            Entry::Occupied(o) => {
                warn!(title = %o.key(), page_id = %page.id, "duplicate title in database; ignoring page");
            }
            Entry::Vacant(v) => {
                v.insert(ExistingEntry {
                    page_id: page.id,
                    properties: page.properties,
                });
            }
        }
    }
    entries
}

/// Upsert `rows` into the target database, matching existing pages by title.
///
/// Every row is transformed before the first page write, so a transform
/// failure leaves an existing database untouched. A failing row aborts the
/// remaining rows; rows written before it stay when syncing into an existing
/// database, and a database created by this call is deleted.
#[instrument(skip_all)]
pub async fn sync_to_database<S, F>(
    store: &S,
    rows: &[BookRecord],
    transform: F,
    target: &SyncTarget,
) -> Result<SyncReport, SyncError>
where
    S: NotionService + ?Sized,
    F: Fn(&DatabaseSchema, &BookRecord) -> anyhow::Result<WritePayload>,
{
    if target.page_id.is_none() && target.database_id.is_none() {
        return Err(SyncError::InvalidTarget);
    }

    let resolved = resolve(store, target).await?;
    match write_all(store, &resolved, rows, &transform).await {
        Ok(report) => {
            info!(
                database_id = %report.database_id,
                created = report.created,
                updated = report.updated,
                "synced data to Notion"
            );
            Ok(report)
        }
        Err(err) => {
            if resolved.created_database {
                warn!(database_id = %resolved.database_id, "rolling back newly created database");
                if let Err(rollback_err) = store.delete_database(&resolved.database_id).await {
                    error!(?rollback_err, database_id = %resolved.database_id, "rollback failed");
                }
            }
            Err(err)
        }
    }
}

async fn resolve<S>(store: &S, target: &SyncTarget) -> Result<Resolved, SyncError>
where
    S: NotionService + ?Sized,
{
    if let Some(database_id) = target.database_id.as_deref() {
        let db = store.retrieve_database(database_id).await?;
        let pages = store.query_database(&db.id).await?;
        let entries = index_entries(pages);
        info!(database_id = %db.id, existing = entries.len(), "syncing to existing database");
        return Ok(Resolved {
            database_id: db.id,
            schema: db.properties,
            entries,
            created_database: false,
        });
    }

    let page_id = target.page_id.as_deref().ok_or(SyncError::InvalidTarget)?;
    let db = store
        .create_database(page_id, DEFAULT_DATABASE_TITLE, &default_database_properties())
        .await?;
    info!(database_id = %db.id, parent = %page_id, "syncing to new database");
    Ok(Resolved {
        database_id: db.id,
        schema: db.properties,
        entries: HashMap::new(),
        created_database: true,
    })
}

async fn write_all<S, F>(
    store: &S,
    resolved: &Resolved,
    rows: &[BookRecord],
    transform: &F,
) -> Result<SyncReport, SyncError>
where
    S: NotionService + ?Sized,
    F: Fn(&DatabaseSchema, &BookRecord) -> anyhow::Result<WritePayload>,
{
    let payloads = rows
        .iter()
        .map(|row| {
            transform(&resolved.schema, row).map_err(|source| SyncError::Transform {
                title: row.title.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = HashSet::with_capacity(payloads.len());
    if let Some(dup) = payloads.iter().find(|p| !seen.insert(p.title.as_str())) {
        return Err(SyncError::DuplicateTitle(dup.title.clone()));
    }

    let mut report = SyncReport {
        database_id: resolved.database_id.clone(),
        created: 0,
        updated: 0,
    };
    for payload in &payloads {
        match upsert(store, resolved, payload).await {
            Ok(Upsert::Created) => report.created += 1,
            Ok(Upsert::Updated) => report.updated += 1,
            Err(source) => {
                error!(?source, title = %payload.title, "error while syncing book to Notion");
                return Err(SyncError::Abort {
                    title: payload.title.clone(),
                    source,
                });
            }
        }
    }
    Ok(report)
}

async fn upsert<S>(store: &S, resolved: &Resolved, payload: &WritePayload) -> anyhow::Result<Upsert>
where
    S: NotionService + ?Sized,
{
    match resolved.entries.get(&payload.title) {
        Some(existing) => {
            info!(title = %payload.title, page_id = %existing.page_id, "updating page");
            store.delete_page(&existing.page_id).await?;
            create_entry(store, &resolved.database_id, payload).await?;
            Ok(Upsert::Updated)
        }
        None => {
            info!(title = %payload.title, "creating page");
            create_entry(store, &resolved.database_id, payload).await?;
            Ok(Upsert::Created)
        }
    }
}

/// Create the page with its first blocks, then append the rest in order.
async fn create_entry<S>(store: &S, database_id: &str, payload: &WritePayload) -> anyhow::Result<String>
where
    S: NotionService + ?Sized,
{
    let (first, rest) = chunk_blocks(&payload.children);
    let page_id = store.create_page(database_id, payload, first).await?;
    for batch in rest {
        store.append_block_children(&page_id, batch).await?;
    }
    Ok(page_id)
}

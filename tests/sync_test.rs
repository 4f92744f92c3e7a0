use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use readmoo_sync::error::SyncError;
use readmoo_sync::model::{Annotation, BookRecord, HighlightColor};
use readmoo_sync::notion::model::{Database, DatabaseSchema, Page, WritePayload};
use readmoo_sync::notion::NotionService;
use readmoo_sync::sync::{sync_to_database, SyncTarget};
use readmoo_sync::transform;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    CreateDatabase(String),
    RetrieveDatabase(String),
    QueryDatabase(String),
    CreatePage { title: String, blocks: usize },
    Append { page_id: String, blocks: usize },
    DeletePage(String),
    DeleteDatabase(String),
}

#[derive(Debug, Clone)]
struct StoredPage {
    id: String,
    database_id: String,
    title: String,
    properties: Map<String, Value>,
    blocks: Vec<Value>,
    archived: bool,
}

#[derive(Default)]
struct Store {
    next_id: usize,
    databases: HashMap<String, Value>,
    pages: Vec<StoredPage>,
    calls: Vec<Call>,
    fail_create: HashSet<String>,
    fail_append: HashSet<String>,
}

impl Store {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// In-memory stand-in for a Notion workspace.
#[derive(Clone, Default)]
struct InMemoryNotion {
    inner: Arc<Mutex<Store>>,
}

impl InMemoryNotion {
    async fn seed_database(&self) -> String {
        let mut store = self.inner.lock().await;
        let id = store.next_id("db");
        store
            .databases
            .insert(id.clone(), readmoo_sync::sync::default_database_properties());
        id
    }

    async fn seed_page(&self, database_id: &str, title: &str) -> String {
        let mut store = self.inner.lock().await;
        let id = store.next_id("page");
        store.pages.push(StoredPage {
            id: id.clone(),
            database_id: database_id.to_string(),
            title: title.to_string(),
            properties: Map::new(),
            blocks: Vec::new(),
            archived: false,
        });
        id
    }

    async fn fail_create_for(&self, title: &str) {
        self.inner.lock().await.fail_create.insert(title.to_string());
    }

    async fn fail_append_for(&self, title: &str) {
        self.inner.lock().await.fail_append.insert(title.to_string());
    }

    async fn live_pages(&self, database_id: &str) -> Vec<StoredPage> {
        let store = self.inner.lock().await;
        store
            .pages
            .iter()
            .filter(|p| p.database_id == database_id && !p.archived)
            .cloned()
            .collect()
    }

    async fn page(&self, id: &str) -> Option<StoredPage> {
        let store = self.inner.lock().await;
        store.pages.iter().find(|p| p.id == id).cloned()
    }

    async fn database_exists(&self, id: &str) -> bool {
        self.inner.lock().await.databases.contains_key(id)
    }

    async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }
}

/// Schema as Notion reports it back: every property gets an id, select
/// options get ids too.
fn schema_response(id: &str, properties: &Value) -> Result<Database> {
    let mut props = Map::new();
    for (name, def) in properties.as_object().into_iter().flatten() {
        let typ = def
            .as_object()
            .and_then(|o| o.keys().next().cloned())
            .unwrap_or_default();
        let mut prop = json!({ "id": format!("prop-{}", name), "name": name, "type": typ });
        if typ == "select" {
            let options: Vec<Value> = def["select"]["options"]
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|o| json!({ "id": format!("opt-{}", o["name"].as_str().unwrap_or("")), "name": o["name"] }))
                .collect();
            prop["select"] = json!({ "options": options });
        }
        props.insert(name.clone(), prop);
    }
    Ok(serde_json::from_value(json!({ "id": id, "properties": props }))?)
}

fn title_from_properties(properties: &Map<String, Value>) -> Option<String> {
    properties.values().find_map(|v| {
        v.get("title")?.as_array().map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"]["content"].as_str())
                .collect::<String>()
        })
    })
}

#[async_trait::async_trait]
impl NotionService for InMemoryNotion {
    async fn create_database(&self, parent_page_id: &str, _title: &str, properties: &Value) -> Result<Database> {
        let mut store = self.inner.lock().await;
        store.calls.push(Call::CreateDatabase(parent_page_id.to_string()));
        let id = store.next_id("db");
        store.databases.insert(id.clone(), properties.clone());
        schema_response(&id, properties)
    }

    async fn retrieve_database(&self, database_id: &str) -> Result<Database> {
        let mut store = self.inner.lock().await;
        store.calls.push(Call::RetrieveDatabase(database_id.to_string()));
        let props = store
            .databases
            .get(database_id)
            .cloned()
            .ok_or_else(|| anyhow!("notion error 404: database {} not found", database_id))?;
        schema_response(database_id, &props)
    }

    async fn query_database(&self, database_id: &str) -> Result<Vec<Page>> {
        let mut store = self.inner.lock().await;
        store.calls.push(Call::QueryDatabase(database_id.to_string()));
        store
            .pages
            .iter()
            .filter(|p| p.database_id == database_id && !p.archived)
            .map(|p| -> Result<Page> {
                Ok(serde_json::from_value(json!({
                    "object": "page",
                    "id": p.id,
                    "properties": {
                        "Title": { "id": "title", "type": "title", "title": [{ "plain_text": p.title }] }
                    }
                }))?)
            })
            .collect()
    }

    async fn create_page(&self, database_id: &str, payload: &WritePayload, children: &[Value]) -> Result<String> {
        let mut store = self.inner.lock().await;
        let title = title_from_properties(&payload.properties).unwrap_or_default();
        store.calls.push(Call::CreatePage {
            title: title.clone(),
            blocks: children.len(),
        });
        if children.len() > 100 {
            return Err(anyhow!("notion error 400: too many children"));
        }
        if !store.databases.contains_key(database_id) {
            return Err(anyhow!("notion error 404: database {} not found", database_id));
        }
        if store.fail_create.contains(&title) {
            return Err(anyhow!("notion error 502: bad gateway"));
        }
        let id = store.next_id("page");
        store.pages.push(StoredPage {
            id: id.clone(),
            database_id: database_id.to_string(),
            title,
            properties: payload.properties.clone(),
            blocks: children.to_vec(),
            archived: false,
        });
        Ok(id)
    }

    async fn append_block_children(&self, block_id: &str, children: &[Value]) -> Result<()> {
        let mut store = self.inner.lock().await;
        store.calls.push(Call::Append {
            page_id: block_id.to_string(),
            blocks: children.len(),
        });
        if children.len() > 100 {
            return Err(anyhow!("notion error 400: too many children"));
        }
        let fail_append = store.fail_append.clone();
        let page = store
            .pages
            .iter_mut()
            .find(|p| p.id == block_id)
            .ok_or_else(|| anyhow!("notion error 404: block {} not found", block_id))?;
        if fail_append.contains(&page.title) {
            return Err(anyhow!("notion error 409: conflict"));
        }
        page.blocks.extend_from_slice(children);
        Ok(())
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        let mut store = self.inner.lock().await;
        store.calls.push(Call::DeletePage(page_id.to_string()));
        let page = store
            .pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| anyhow!("notion error 404: page {} not found", page_id))?;
        page.archived = true;
        Ok(())
    }

    async fn delete_database(&self, database_id: &str) -> Result<()> {
        let mut store = self.inner.lock().await;
        store.calls.push(Call::DeleteDatabase(database_id.to_string()));
        store.databases.remove(database_id);
        store.pages.retain(|p| p.database_id != database_id);
        Ok(())
    }
}

fn book(title: &str, highlights: usize) -> BookRecord {
    let annotations = (0..highlights)
        .map(|i| Annotation {
            highlight: format!("{} highlight {}", title, i),
            note: String::new(),
            color: HighlightColor::Yellow,
        })
        .collect();
    BookRecord::new(title, "https://cdn.readmoo.com/cover.jpg", annotations)
}

fn existing(database_id: &str) -> SyncTarget {
    SyncTarget {
        page_id: None,
        database_id: Some(database_id.to_string()),
    }
}

fn new_under(page_id: &str) -> SyncTarget {
    SyncTarget {
        page_id: Some(page_id.to_string()),
        database_id: None,
    }
}

fn create_titles(calls: &[Call]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::CreatePage { title, .. } => Some(title.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn resync_keeps_one_page_per_title() {
    let notion = InMemoryNotion::default();
    let db = notion.seed_database().await;
    let books = vec![book("A", 2), book("B", 1)];

    let first = sync_to_database(&notion, &books, transform::readmoo_to_notion, &existing(&db))
        .await
        .unwrap();
    assert_eq!((first.created, first.updated), (2, 0));

    let second = sync_to_database(&notion, &books, transform::readmoo_to_notion, &existing(&db))
        .await
        .unwrap();
    assert_eq!((second.created, second.updated), (0, 2));

    let mut titles: Vec<String> = notion.live_pages(&db).await.into_iter().map(|p| p.title).collect();
    titles.sort();
    assert_eq!(titles, vec!["A", "B"]);
}

#[tokio::test]
async fn blocks_beyond_the_create_limit_are_appended_in_order() {
    let notion = InMemoryNotion::default();
    let db = notion.seed_database().await;
    // Two blocks per highlight (text + spacer): 120 highlights = 240 blocks.
    let long = book("Long", 120);
    let exact = book("Exact", 50);

    sync_to_database(
        &notion,
        &[long.clone(), exact.clone()],
        transform::readmoo_to_notion,
        &existing(&db),
    )
    .await
    .unwrap();

    let calls = notion.calls().await;
    let pages = notion.live_pages(&db).await;
    let long_page = pages.iter().find(|p| p.title == "Long").unwrap();
    let appends: Vec<usize> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Append { page_id, blocks } if *page_id == long_page.id => Some(*blocks),
            _ => None,
        })
        .collect();
    assert_eq!(appends, vec![100, 40]);

    let expected: Vec<Value> = long.annotations.iter().flat_map(transform::annotation_blocks).collect();
    assert_eq!(long_page.blocks, expected);

    let exact_page = pages.iter().find(|p| p.title == "Exact").unwrap();
    assert_eq!(exact_page.blocks.len(), 100);
    assert!(!calls
        .iter()
        .any(|c| matches!(c, Call::Append { page_id, .. } if *page_id == exact_page.id)));
}

#[tokio::test]
async fn failure_in_a_new_database_rolls_it_back() {
    let notion = InMemoryNotion::default();
    notion.fail_create_for("B").await;
    let books = vec![book("A", 1), book("B", 1), book("C", 1)];

    let err = sync_to_database(&notion, &books, transform::readmoo_to_notion, &new_under("parent-1"))
        .await
        .unwrap_err();
    match err {
        SyncError::Abort { title, .. } => assert_eq!(title, "B"),
        other => panic!("unexpected error: {:?}", other),
    }

    let calls = notion.calls().await;
    assert!(calls.iter().any(|c| matches!(c, Call::CreateDatabase(_))));
    let deleted: Vec<&Call> = calls.iter().filter(|c| matches!(c, Call::DeleteDatabase(_))).collect();
    assert_eq!(deleted.len(), 1);
    if let Call::DeleteDatabase(id) = deleted[0] {
        assert!(!notion.database_exists(id).await);
        assert!(notion.live_pages(id).await.is_empty());
    }
    // C was never attempted.
    assert_eq!(create_titles(&calls), vec!["A", "B"]);
}

#[tokio::test]
async fn append_failure_in_a_new_database_rolls_it_back() {
    let notion = InMemoryNotion::default();
    notion.fail_append_for("Long").await;

    let err = sync_to_database(
        &notion,
        &[book("Short", 1), book("Long", 80)],
        transform::readmoo_to_notion,
        &new_under("parent-1"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Abort { ref title, .. } if title == "Long"));
    assert!(notion
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, Call::DeleteDatabase(_))));
}

#[tokio::test]
async fn failure_in_an_existing_database_keeps_earlier_rows() {
    let notion = InMemoryNotion::default();
    let db = notion.seed_database().await;
    notion.fail_create_for("B").await;

    let err = sync_to_database(
        &notion,
        &[book("A", 1), book("B", 1), book("C", 1)],
        transform::readmoo_to_notion,
        &existing(&db),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Abort { .. }));

    assert!(notion.database_exists(&db).await);
    let titles: Vec<String> = notion.live_pages(&db).await.into_iter().map(|p| p.title).collect();
    assert_eq!(titles, vec!["A"]);
    assert!(!notion
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, Call::DeleteDatabase(_))));
}

#[tokio::test]
async fn matched_titles_are_replaced_and_others_untouched() {
    let notion = InMemoryNotion::default();
    let db = notion.seed_database().await;
    let id1 = notion.seed_page(&db, "A").await;
    let id2 = notion.seed_page(&db, "B").await;
    notion.clear_calls().await;

    let report = sync_to_database(
        &notion,
        &[book("B", 1), book("C", 1)],
        transform::readmoo_to_notion,
        &existing(&db),
    )
    .await
    .unwrap();
    assert_eq!((report.created, report.updated), (1, 1));

    let calls = notion.calls().await;
    let deletes: Vec<&Call> = calls.iter().filter(|c| matches!(c, Call::DeletePage(_))).collect();
    assert_eq!(deletes, vec![&Call::DeletePage(id2.clone())]);
    assert_eq!(create_titles(&calls), vec!["B", "C"]);

    let untouched = notion.page(&id1).await.unwrap();
    assert!(!untouched.archived);
    assert!(notion.page(&id2).await.unwrap().archived);
}

#[tokio::test]
async fn missing_target_is_rejected_before_any_call() {
    let notion = InMemoryNotion::default();
    let err = sync_to_database(&notion, &[book("A", 1)], transform::readmoo_to_notion, &SyncTarget::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidTarget));
    assert!(notion.calls().await.is_empty());
}

#[tokio::test]
async fn database_id_wins_over_page_id() {
    let notion = InMemoryNotion::default();
    let db = notion.seed_database().await;
    let target = SyncTarget {
        page_id: Some("parent-1".into()),
        database_id: Some(db.clone()),
    };
    sync_to_database(&notion, &[book("A", 1)], transform::readmoo_to_notion, &target)
        .await
        .unwrap();
    let calls = notion.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, Call::CreateDatabase(_))));
    assert_eq!(notion.live_pages(&db).await.len(), 1);
}

#[tokio::test]
async fn transform_failure_aborts_before_writes() {
    let notion = InMemoryNotion::default();
    let db = notion.seed_database().await;
    let failing = |schema: &DatabaseSchema, row: &BookRecord| -> Result<WritePayload> {
        if row.title == "B" {
            return Err(anyhow!("cannot map B"));
        }
        transform::readmoo_to_notion(schema, row)
    };

    let err = sync_to_database(&notion, &[book("A", 1), book("B", 1)], failing, &existing(&db))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transform { ref title, .. } if title == "B"));
    assert!(create_titles(&notion.calls().await).is_empty());

    let err = sync_to_database(&notion, &[book("A", 1), book("B", 1)], failing, &new_under("parent-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transform { .. }));
    let calls = notion.calls().await;
    assert!(create_titles(&calls).is_empty());
    assert!(calls.iter().any(|c| matches!(c, Call::DeleteDatabase(_))));
}

#[tokio::test]
async fn duplicate_titles_are_rejected_before_writes() {
    let notion = InMemoryNotion::default();
    let db = notion.seed_database().await;
    let err = sync_to_database(
        &notion,
        &[book("A", 1), book("B", 1), book("A", 2)],
        transform::readmoo_to_notion,
        &existing(&db),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::DuplicateTitle(ref t) if t == "A"));
    assert!(create_titles(&notion.calls().await).is_empty());
}

#[tokio::test]
async fn unknown_database_surfaces_as_remote_error() {
    let notion = InMemoryNotion::default();
    let err = sync_to_database(&notion, &[book("A", 1)], transform::readmoo_to_notion, &existing("db-missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Remote(_)));
}

#[tokio::test]
async fn new_database_gets_category_from_its_schema() {
    let notion = InMemoryNotion::default();
    let report = sync_to_database(&notion, &[book("A", 1)], transform::readmoo_to_notion, &new_under("parent-1"))
        .await
        .unwrap();
    assert!(notion.database_exists(&report.database_id).await);
    assert_eq!(report.created, 1);
    let pages = notion.live_pages(&report.database_id).await;
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].properties["Category"]["select"]["id"], "opt-Books");
    assert_eq!(pages[0].properties["Highlights"]["number"], 1);
}

//! Maps a scraped book onto a Notion page.
use anyhow::{bail, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::model::{Annotation, BookRecord};
use crate::notion::model::{Database, DatabaseSchema, WritePayload};

/// Notion caps a single rich text segment at this many characters.
pub const MAX_TEXT_CONTENT: usize = 2000;

const CATEGORY_PROPERTY: &str = "Category";
const BOOKS_CATEGORY: &str = "Books";

/// Rich text array for `content`, split into segments Notion accepts.
pub fn rich_text(content: &str) -> Value {
    let chars: Vec<char> = content.chars().collect();
    let segments: Vec<Value> = chars
        .chunks(MAX_TEXT_CONTENT)
        .map(|chunk| {
            let text: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": text } })
        })
        .collect();
    Value::Array(segments)
}

pub fn paragraph(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": rich_text(content) }
    })
}

/// Highlight, then its note if any, then an empty spacer paragraph.
pub fn annotation_blocks(annotation: &Annotation) -> Vec<Value> {
    let mut blocks = vec![paragraph(&annotation.highlight)];
    if annotation.has_note() {
        blocks.push(paragraph(&annotation.note));
    }
    blocks.push(paragraph(""));
    blocks
}

fn has_property(schema: &DatabaseSchema, name: &str, typ: &str) -> bool {
    schema.get(name).is_some_and(|p| p.typ == typ)
}

/// Name of the schema's title property; `Title` when the schema is unknown.
fn title_property(schema: &DatabaseSchema) -> String {
    schema
        .iter()
        .find(|(_, p)| p.typ == "title")
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| "Title".to_string())
}

fn external_url(url: &str) -> Option<String> {
    let url = url.trim();
    (url.starts_with("https://") || url.starts_with("http://")).then(|| url.to_string())
}

/// Default transform used by the binary.
pub fn readmoo_to_notion(schema: &DatabaseSchema, book: &BookRecord) -> Result<WritePayload> {
    build_payload(schema, book, Utc::now())
}

pub fn build_payload(
    schema: &DatabaseSchema,
    book: &BookRecord,
    synced_at: DateTime<Utc>,
) -> Result<WritePayload> {
    if book.title.trim().is_empty() {
        bail!("book has no title");
    }
    let counts = book.annotations_count();

    let mut properties = Map::new();
    properties.insert(title_property(schema), json!({ "title": rich_text(&book.title) }));
    if has_property(schema, "Full Title", "rich_text") {
        properties.insert("Full Title".into(), json!({ "rich_text": rich_text(&book.title) }));
    }
    if has_property(schema, "Highlights", "number") {
        properties.insert("Highlights".into(), json!({ "number": counts.highlights_count }));
    }
    if has_property(schema, "Notes", "number") {
        properties.insert("Notes".into(), json!({ "number": counts.notes_count }));
    }
    if has_property(schema, "Last Synced", "date") {
        properties.insert(
            "Last Synced".into(),
            json!({ "date": { "start": synced_at.to_rfc3339_opts(SecondsFormat::Millis, true) } }),
        );
    }
    if let Some(option_id) = Database::select_option_id(schema, CATEGORY_PROPERTY, BOOKS_CATEGORY) {
        properties.insert(CATEGORY_PROPERTY.into(), json!({ "select": { "id": option_id } }));
    }

    let cover = external_url(&book.cover);
    Ok(WritePayload {
        title: book.title.clone(),
        icon: cover.clone(),
        cover,
        properties,
        children: book.annotations.iter().flat_map(annotation_blocks).collect(),
    })
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One property of a database schema.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseProperty {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub select: Option<SelectConfig>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SelectConfig {
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectOption {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// Property name -> property definition.
pub type DatabaseSchema = HashMap<String, DatabaseProperty>;

#[derive(Deserialize, Debug, Clone)]
pub struct Database {
    pub id: String,
    #[serde(default)]
    pub title: Vec<Value>,
    #[serde(default)]
    pub properties: DatabaseSchema,
}

impl Database {
    /// Id of the select option `option` of property `property`, if both exist.
    pub fn select_option_id(schema: &DatabaseSchema, property: &str, option: &str) -> Option<String> {
        schema
            .get(property)?
            .select
            .as_ref()?
            .options
            .iter()
            .find(|o| o.name == option)?
            .id
            .clone()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct TextContent {
    pub content: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub text: Option<TextContent>,
}

impl RichText {
    pub fn as_str(&self) -> &str {
        if !self.plain_text.is_empty() {
            return &self.plain_text;
        }
        self.text.as_ref().map(|t| t.content.as_str()).unwrap_or("")
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DateValue {
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
}

/// Value of a page property. Shapes this tool never reads are `Unsupported`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title {
        #[serde(default)]
        title: Vec<RichText>,
    },
    RichText {
        #[serde(default)]
        rich_text: Vec<RichText>,
    },
    Select {
        #[serde(default)]
        select: Option<SelectOption>,
    },
    Number {
        #[serde(default)]
        number: Option<f64>,
    },
    Date {
        #[serde(default)]
        date: Option<DateValue>,
    },
    Url {
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

impl PropertyValue {
    /// Plain text of a title or rich text property.
    pub fn plain_text(&self) -> Option<String> {
        match self {
            PropertyValue::Title { title: parts } | PropertyValue::RichText { rich_text: parts } => {
                Some(parts.iter().map(RichText::as_str).collect())
            }
            _ => None,
        }
    }
}

/// A page (database entry) as returned by a database query.
#[derive(Deserialize, Debug, Clone)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

impl Page {
    /// Text of the page's title property; `None` when missing or blank.
    pub fn title(&self) -> Option<String> {
        self.properties
            .values()
            .find(|p| matches!(p, PropertyValue::Title { .. }))
            .and_then(PropertyValue::plain_text)
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Deserialize, Debug)]
pub struct QueryDatabaseResp {
    pub results: Vec<Page>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// What the sync engine writes for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePayload {
    /// Matching key against existing entries.
    pub title: String,
    /// External image URL used as the page icon.
    pub icon: Option<String>,
    /// External image URL used as the page cover.
    pub cover: Option<String>,
    pub properties: Map<String, Value>,
    pub children: Vec<Value>,
}

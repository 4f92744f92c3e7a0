use serde::{Deserialize, Serialize};

/// Highlight colors offered by the reader. Anything else falls back to yellow,
/// both when scraping and when reading a dump back.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Orange,
    Red,
    Pink,
    Purple,
    Blue,
    Green,
}

impl HighlightColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "yellow",
            HighlightColor::Orange => "orange",
            HighlightColor::Red => "red",
            HighlightColor::Pink => "pink",
            HighlightColor::Purple => "purple",
            HighlightColor::Blue => "blue",
            HighlightColor::Green => "green",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "yellow" => Some(HighlightColor::Yellow),
            "orange" => Some(HighlightColor::Orange),
            "red" => Some(HighlightColor::Red),
            "pink" => Some(HighlightColor::Pink),
            "purple" => Some(HighlightColor::Purple),
            "blue" => Some(HighlightColor::Blue),
            "green" => Some(HighlightColor::Green),
            _ => None,
        }
    }

    /// The color is the second token of a highlight item's class list
    /// (`"highlight-item blue"`).
    pub fn from_class_list(classes: Option<&str>) -> Self {
        classes
            .and_then(|c| c.split_whitespace().nth(1))
            .and_then(Self::parse)
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for HighlightColor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub highlight: String,
    /// Empty when the highlight carries no note.
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub color: HighlightColor,
}

impl Annotation {
    pub fn has_note(&self) -> bool {
        !self.note.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationsCount {
    pub highlights_count: usize,
    pub notes_count: usize,
}

impl AnnotationsCount {
    pub fn of(annotations: &[Annotation]) -> Self {
        Self {
            highlights_count: annotations.len(),
            notes_count: annotations.iter().filter(|a| a.has_note()).count(),
        }
    }
}

/// One scraped book with its highlights, in display order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    pub title: String,
    pub cover: String,
    annotations_count: AnnotationsCount,
    pub annotations: Vec<Annotation>,
}

impl BookRecord {
    pub fn new(title: impl Into<String>, cover: impl Into<String>, annotations: Vec<Annotation>) -> Self {
        Self {
            title: title.into(),
            cover: cover.into(),
            annotations_count: AnnotationsCount::of(&annotations),
            annotations,
        }
    }

    pub fn annotations_count(&self) -> AnnotationsCount {
        self.annotations_count
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBookRecord {
    title: String,
    #[serde(default)]
    cover: String,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

// Counts in a dump are recomputed rather than trusted.
impl<'de> Deserialize<'de> for BookRecord {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawBookRecord::deserialize(deserializer)?;
        Ok(BookRecord::new(raw.title, raw.cover, raw.annotations))
    }
}

/// A book as shown in the highlights list view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookSummary {
    pub title: String,
    pub cover_url: Option<String>,
    pub highlights_count: usize,
}

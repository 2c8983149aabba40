//! Text normalization: every accepted input shape becomes an ordered
//! sequence of [`NormalizedItem`]s.

use std::{fs::read_to_string, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    error::{DedupError, Result},
    model::{NormalizedItem, NormalizedItems},
};

/// A record carrying a text and, optionally, its own identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl TagRecord {
    pub fn new<T: Into<String>>(text: T) -> Self {
        Self {
            id: None,
            text: Some(text.into()),
        }
    }

    pub fn with_id<I: Into<String>, T: Into<String>>(id: I, text: T) -> Self {
        Self {
            id: Some(id.into()),
            text: Some(text.into()),
        }
    }
}

/// The input shapes the normalizer accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagInput {
    /// Bare strings; ids are positional indices.
    Strings(Vec<String>),

    /// Records; each must carry a text, ids fall back to the position.
    Records(Vec<TagRecord>),

    /// id -> text entries, in mapping iteration order.
    Mapping(Vec<(String, String)>),
}

impl From<Vec<String>> for TagInput {
    fn from(value: Vec<String>) -> Self {
        Self::Strings(value)
    }
}

impl From<&[&str]> for TagInput {
    fn from(value: &[&str]) -> Self {
        Self::Strings(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<TagRecord>> for TagInput {
    fn from(value: Vec<TagRecord>) -> Self {
        Self::Records(value)
    }
}

impl<K, V> FromIterator<(K, V)> for TagInput
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::Mapping(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl TagInput {
    /// Resolve a JSON document into an input shape.
    ///
    /// - an array of strings becomes [`TagInput::Strings`];
    /// - an array containing objects becomes [`TagInput::Records`] (bare
    ///   strings in such an array are records without an id);
    /// - an object becomes [`TagInput::Mapping`] with its values as texts.
    ///
    /// Anything else is [`DedupError::UnsupportedInput`].
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Array(elements) => {
                if elements.iter().all(Value::is_string) {
                    return Ok(Self::Strings(
                        elements
                            .into_iter()
                            .filter_map(|e| match e {
                                Value::String(s) => Some(s),
                                _ => None,
                            })
                            .collect(),
                    ));
                }
                elements
                    .into_iter()
                    .enumerate()
                    .map(|(index, element)| match element {
                        Value::String(s) => Ok(TagRecord::new(s)),
                        Value::Object(map) => Ok(TagRecord {
                            id: map.get("id").map(scalar_to_string).transpose()?,
                            text: map.get("text").map(scalar_to_string).transpose()?,
                        }),
                        other => Err(DedupError::UnsupportedInput(format!(
                            "element {} is {}; expected a string or an object with `text`",
                            index,
                            json_kind(&other)
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Self::Records)
            }
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| scalar_to_string(&v).map(|text| (k, text)))
                .collect::<Result<Vec<_>>>()
                .map(Self::Mapping),
            other => Err(DedupError::UnsupportedInput(format!(
                "top-level {}; expected an array or an object",
                json_kind(&other)
            ))),
        }
    }

    /// Number of entries, which is also the length of the normalized output.
    pub fn len(&self) -> usize {
        match self {
            Self::Strings(v) => v.len(),
            Self::Records(v) => v.len(),
            Self::Mapping(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convert input into [`NormalizedItems`], preserving order and length.
pub fn normalize_inputs(input: &TagInput) -> Result<NormalizedItems> {
    match input {
        TagInput::Strings(texts) => Ok(texts
            .iter()
            .enumerate()
            .map(|(idx, text)| NormalizedItem::new(idx.to_string(), text.as_str()))
            .collect()),
        TagInput::Records(records) => records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                let text = record.text.as_deref().ok_or(DedupError::MissingField {
                    index: idx,
                    field: "text",
                })?;
                let id = record.id.clone().unwrap_or_else(|| idx.to_string());
                Ok(NormalizedItem::new(id, text))
            })
            .collect(),
        TagInput::Mapping(entries) => Ok(entries
            .iter()
            .map(|(id, text)| NormalizedItem::new(id.as_str(), text.as_str()))
            .collect()),
    }
}

/// Normalize a plain slice of strings. Infallible: every entry has a text.
pub fn normalize_texts<S: AsRef<str>>(texts: &[S]) -> NormalizedItems {
    texts
        .iter()
        .enumerate()
        .map(|(idx, text)| NormalizedItem::new(idx.to_string(), text.as_ref()))
        .collect()
}

/// Read a tag list from disk.
///
/// - `.json`: an array (string elements) or an object (its values);
/// - `.csv` / `.tsv`: the first column of each row, quoting honoured;
/// - anything else: one tag per non-empty, trimmed line.
pub fn load_tag_list(path: &Path) -> Result<Vec<String>> {
    let body = read_to_string(path)?;
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let tags: Vec<String> = match extension.as_str() {
        "json" => {
            let items = normalize_inputs(&TagInput::from_json(serde_json::from_str(&body)?)?)?;
            items.into_iter().map(|i| i.text).collect()
        }
        "csv" | "tsv" => {
            let delimiter = if extension == "csv" { b',' } else { b'\t' };
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(delimiter)
                .has_headers(false)
                .flexible(true)
                .from_reader(body.as_bytes());
            let mut tags = vec![];
            for record in reader.records() {
                let record = record.map_err(|e| {
                    DedupError::UnsupportedInput(format!("{}: {}", path.display(), e))
                })?;
                if let Some(cell) = record.get(0).map(str::trim).filter(|c| !c.is_empty()) {
                    tags.push(cell.to_string());
                }
            }
            tags
        }
        _ => body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    };
    debug!(path = %path.display(), count = tags.len(), "loaded tag list");
    Ok(tags)
}

fn scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(DedupError::UnsupportedInput(format!(
            "expected a scalar, found {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

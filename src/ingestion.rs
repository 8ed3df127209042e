use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::media::{classify_media, MediaKind};

/// One spreadsheet row as fetched, keyed by trimmed header in sheet order.
pub type RawRecord = IndexMap<String, Value>;

const URL_HASH_CHARS: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    Kurdish,
    Arabic,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Kurdish, Language::Arabic];

    pub fn as_tag(&self) -> &'static str {
        match self {
            Language::Kurdish => "Kurdish",
            Language::Arabic => "Arabic",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kurdish" | "ku" | "ckb" | "کوردی" => Ok(Language::Kurdish),
            "arabic" | "ar" | "عربي" | "العربية" => Ok(Language::Arabic),
            _ => Err(AppError::Config(format!("unsupported language: {value}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Tag,
    Color,
    Material,
}

impl Attribute {
    pub const ALL: [Attribute; 3] = [Attribute::Tag, Attribute::Color, Attribute::Material];

    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::Tag => "tag",
            Attribute::Color => "color",
            Attribute::Material => "material",
        }
    }
}

/// Candidate headers for one language. The first column present in a row wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageColumns {
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub url: Vec<String>,
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(default)]
    pub color: Vec<String>,
    #[serde(default)]
    pub material: Vec<String>,
}

impl LanguageColumns {
    fn attribute(&self, attribute: Attribute) -> &[String] {
        match attribute {
            Attribute::Tag => &self.tag,
            Attribute::Color => &self.color,
            Attribute::Material => &self.material,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMap {
    #[serde(default = "default_id_columns")]
    pub id: Vec<String>,
    pub languages: BTreeMap<Language, LanguageColumns>,
}

impl ColumnMap {
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = fs::read_to_string(path)?;
        let map = serde_json::from_str::<Self>(&contents)?;
        debug!(
            target: "ingestion",
            path = %path.display(),
            languages = map.languages.len(),
            "loaded custom column map"
        );
        Ok(map)
    }

    pub fn columns(&self, language: Language) -> Option<&LanguageColumns> {
        self.languages.get(&language)
    }
}

impl Default for ColumnMap {
    fn default() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            Language::Kurdish,
            LanguageColumns {
                title: names(&["Kurdish Title", "ناونیشان", "Title", "title"]),
                url: names(&["Kurdish Media", "Media", "media", "URL", "Image", "Link"]),
                tag: names(&["Kurdish Tags", "تاگەکان", "Tags"]),
                color: names(&["Kurdish Colors", "ڕەنگەکان", "Colors"]),
                material: names(&["Kurdish Materials", "کەرەستەکان", "Materials"]),
            },
        );
        languages.insert(
            Language::Arabic,
            LanguageColumns {
                title: names(&["Arabic Title", "العنوان", "Title", "title"]),
                url: names(&["Arabic Media", "Media", "media", "URL", "Image", "Link"]),
                tag: names(&["Arabic Tags", "الوسوم", "Tags"]),
                color: names(&["Arabic Colors", "الألوان", "Colors"]),
                material: names(&["Arabic Materials", "المواد", "Materials"]),
            },
        );
        Self {
            id: default_id_columns(),
            languages,
        }
    }
}

fn default_id_columns() -> Vec<String> {
    names(&["ID", "id", "Id"])
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: String,
    pub position: usize,
    pub language: Language,
    pub title: String,
    pub media_url: String,
    pub fields: BTreeMap<Attribute, BTreeMap<Language, String>>,
    pub raw_row: IndexMap<String, String>,
    pub extra_fields: IndexMap<String, String>,
}

impl Product {
    pub fn media_kind(&self) -> MediaKind {
        classify_media(&self.media_url)
    }

    /// Raw comma-delimited value for the product's own language.
    pub fn field(&self, attribute: Attribute) -> &str {
        self.field_in(attribute, self.language)
    }

    pub fn field_in(&self, attribute: Attribute, language: Language) -> &str {
        self.fields
            .get(&attribute)
            .and_then(|per_language| per_language.get(&language))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn tokens(&self, attribute: Attribute) -> BTreeSet<String> {
        split_tokens(self.field(attribute))
    }

    pub fn searchable_text(&self) -> String {
        self.raw_row
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn split_tokens(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedBatch {
    pub products: Vec<Product>,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    columns: ColumnMap,
}

impl RecordNormalizer {
    pub fn new(columns: ColumnMap) -> Self {
        Self { columns }
    }

    pub fn column_map(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn normalize_all(&self, records: &[RawRecord], language: Language) -> NormalizedBatch {
        let mut batch = NormalizedBatch::default();
        for (index, record) in records.iter().enumerate() {
            match self.normalize(index, record, language) {
                Ok(product) => batch.products.push(product),
                Err(err) => {
                    warn!(target: "ingestion", index, error = %err, "skipping malformed row");
                    batch.skipped += 1;
                }
            }
        }
        batch
    }

    /// Missing columns degrade to empty strings; only non-scalar cell
    /// values reject the row.
    pub fn normalize(
        &self,
        index: usize,
        record: &RawRecord,
        language: Language,
    ) -> AppResult<Product> {
        let raw_row = stringify_row(index, record)?;
        let mut consumed = BTreeSet::new();

        let id_column = find_column(&raw_row, &self.columns.id);
        let explicit_id = id_column.and_then(|column| {
            consumed.insert(column.to_string());
            raw_row.get(column).filter(|value| !value.is_empty()).cloned()
        });

        let mut fields: BTreeMap<Attribute, BTreeMap<Language, String>> = BTreeMap::new();
        for candidate in Language::ALL {
            let Some(columns) = self.columns.columns(candidate) else {
                continue;
            };
            for attribute in Attribute::ALL {
                let value = take_value(&raw_row, columns.attribute(attribute), &mut consumed);
                fields.entry(attribute).or_default().insert(candidate, value);
            }
        }

        let (title, media_url) = match self.columns.columns(language) {
            Some(columns) => (
                take_value(&raw_row, &columns.title, &mut consumed),
                take_value(&raw_row, &columns.url, &mut consumed),
            ),
            None => (String::new(), String::new()),
        };
        // Title and media columns of the other language are not extra data either.
        for candidate in Language::ALL.into_iter().filter(|l| *l != language) {
            if let Some(columns) = self.columns.columns(candidate) {
                take_value(&raw_row, &columns.title, &mut consumed);
                take_value(&raw_row, &columns.url, &mut consumed);
            }
        }

        let extra_fields = raw_row
            .iter()
            .filter(|(column, value)| !consumed.contains(*column) && !value.is_empty())
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();

        let id = explicit_id.unwrap_or_else(|| derive_id(index, &media_url));

        Ok(Product {
            id,
            position: index,
            language,
            title,
            media_url,
            fields,
            raw_row,
            extra_fields,
        })
    }
}

fn stringify_row(index: usize, record: &RawRecord) -> AppResult<IndexMap<String, String>> {
    let mut row = IndexMap::with_capacity(record.len());
    for (column, value) in record {
        let text = match value {
            Value::Null => String::new(),
            Value::String(text) => text.trim().to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Number(number) => number.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(AppError::MalformedRecord {
                    index,
                    reason: format!("column `{column}` holds a nested value"),
                })
            }
        };
        row.insert(column.clone(), text);
    }
    Ok(row)
}

fn find_column<'a>(row: &'a IndexMap<String, String>, candidates: &[String]) -> Option<&'a str> {
    for candidate in candidates {
        if let Some((column, _)) = row.get_key_value(candidate.as_str()) {
            return Some(column.as_str());
        }
    }
    for candidate in candidates {
        if let Some(column) = row
            .keys()
            .find(|column| column.eq_ignore_ascii_case(candidate))
        {
            return Some(column.as_str());
        }
    }
    None
}

fn take_value(
    row: &IndexMap<String, String>,
    candidates: &[String],
    consumed: &mut BTreeSet<String>,
) -> String {
    match find_column(row, candidates) {
        Some(column) => {
            consumed.insert(column.to_string());
            row.get(column).cloned().unwrap_or_default()
        }
        None => String::new(),
    }
}

fn derive_id(index: usize, media_url: &str) -> String {
    if media_url.is_empty() {
        return format!("row-{index}");
    }
    let digest = Sha256::digest(media_url.as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(digest);
    format!("url-{}", &encoded[..URL_HASH_CHARS])
}

#[cfg(test)]
pub(crate) fn record(pairs: &[(&str, &str)]) -> RawRecord {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), Value::String(value.to_string())))
        .collect()
}

//! The unit of data flowing through a pipeline

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// A scraped record produced by a handler and refined by pipeline stages
///
/// Domain-specific fields go into `metadata`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrapedItem {
    /// Origin identifier (e.g. "site1", a scraper name)
    pub source: String,
    /// Item name/title
    pub name: String,
    /// Detail page URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,
    /// Free-form metadata, mutable by stages
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Local file materialized for this item, once downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl ScrapedItem {
    /// Create an item with empty metadata
    pub fn new(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            detail_url: None,
            metadata: HashMap::new(),
            local_path: None,
        }
    }

    /// Builder-style detail URL
    pub fn with_detail_url(mut self, url: impl Into<String>) -> Self {
        self.detail_url = Some(url.into());
        self
    }

    /// Builder-style metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_metadata(key, value);
        self
    }

    /// Insert or replace a metadata entry
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Look up a metadata entry
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Look up a metadata entry holding a string
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Copy entries from `other`; existing keys are replaced only when `overwrite` is set
    pub fn merge_metadata<I, K>(&mut self, other: I, overwrite: bool)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in other {
            let key = key.into();
            if overwrite || !self.metadata.contains_key(&key) {
                self.metadata.insert(key, value);
            }
        }
    }
}

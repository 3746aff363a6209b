//! Document model and driver option/result types.

use serde::{Deserialize, Serialize};

/// A schemaless document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Dotted field path.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

/// Options for `find`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FindOptions {
    /// Documents to skip after sorting.
    #[serde(default)]
    pub skip: u64,
    /// Maximum number of documents returned.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Sort keys, most significant first.
    #[serde(default)]
    pub sort: Vec<SortKey>,
    /// Top-level fields to return. Empty returns whole documents.
    #[serde(default)]
    pub fields: Vec<String>,
}

impl FindOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of documents to skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the result limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Appends a sort key.
    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order,
        });
        self
    }

    /// Restricts the returned fields.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Options for `find_and_modify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FindAndModifyOptions {
    /// Insert the selector merged with the update when nothing matches.
    #[serde(default)]
    pub upsert: bool,
    /// Return the document after the update instead of before.
    #[serde(default)]
    pub return_new: bool,
}

/// Result of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
}

/// Result of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteResult {
    /// Documents removed.
    pub deleted: u64,
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed fields.
    pub keys: Vec<String>,
    /// Whether values must be unique.
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    /// Creates a non-unique index.
    pub fn new<I, S>(name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Marks the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_options_builder() {
        let opts = FindOptions::new()
            .with_skip(5)
            .with_limit(10)
            .with_sort("name", SortOrder::Descending)
            .with_fields(["name", "ip"]);
        assert_eq!(opts.skip, 5);
        assert_eq!(opts.limit, Some(10));
        assert_eq!(opts.sort[0].order, SortOrder::Descending);
        assert_eq!(opts.fields, vec!["name".to_string(), "ip".to_string()]);
    }

    #[test]
    fn find_options_default_from_empty_object() {
        let opts: FindOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, FindOptions::default());
    }
}

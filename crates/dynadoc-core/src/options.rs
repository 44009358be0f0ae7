//! Static collection metadata: table, key attributes, indexes and limits.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::OptionsError;
use crate::types::KeySchema;

/// Default bound on concurrently outstanding RPCs for one action list run.
pub const DEFAULT_MAX_OUTSTANDING_ACTION_RPCS: usize = 10;

/// Whether a secondary index shares the table's partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Local,
    Global,
}

/// The attributes a secondary index copies from the table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    /// Every attribute.
    #[default]
    All,
    /// Index and table key attributes only.
    KeysOnly,
    /// Key attributes plus the listed top-level attributes.
    Include(Vec<String>),
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Unique index name (e.g., `"author-index"`).
    pub name: String,
    pub kind: IndexKind,
    pub partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub projection: Projection,
}

impl IndexDefinition {
    pub fn key_schema(&self) -> KeySchema {
        KeySchema::new(self.partition_key.clone(), self.sort_key.clone())
    }
}

/// Immutable schema metadata for one collection.
///
/// Build with [`CollectionOptions::builder`] or load with
/// [`CollectionOptions::from_json`]; both validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    table_name: String,
    partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort_key: Option<String>,
    #[serde(default)]
    allow_scans: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision_field: Option<String>,
    #[serde(default = "default_max_outstanding")]
    max_outstanding_action_rpcs: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    indexes: Vec<IndexDefinition>,
}

fn default_max_outstanding() -> usize {
    DEFAULT_MAX_OUTSTANDING_ACTION_RPCS
}

impl CollectionOptions {
    pub fn builder(table_name: &str) -> CollectionOptionsBuilder {
        CollectionOptionsBuilder::new(table_name)
    }

    /// Parse and validate options from JSON.
    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let options: CollectionOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.sort_key.as_deref()
    }

    pub fn allow_scans(&self) -> bool {
        self.allow_scans
    }

    pub fn revision_field(&self) -> Option<&str> {
        self.revision_field.as_deref()
    }

    pub fn max_outstanding_action_rpcs(&self) -> usize {
        self.max_outstanding_action_rpcs
    }

    /// Secondary indexes in registration order.
    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    /// The table's primary key attributes.
    pub fn key_schema(&self) -> KeySchema {
        KeySchema::new(self.partition_key.clone(), self.sort_key.clone())
    }

    fn validate(&self) -> Result<(), OptionsError> {
        if self.table_name.is_empty() {
            return Err(OptionsError::EmptyTableName);
        }
        if self.partition_key.is_empty() {
            return Err(OptionsError::EmptyPartitionKey);
        }
        if let Some(sk) = &self.sort_key
            && (sk.is_empty() || *sk == self.partition_key)
        {
            return Err(OptionsError::SortKeyIsPartitionKey(sk.clone()));
        }
        if let Some(rev) = &self.revision_field
            && (*rev == self.partition_key || self.sort_key.as_ref() == Some(rev))
        {
            return Err(OptionsError::RevisionFieldIsKey(rev.clone()));
        }
        if self.max_outstanding_action_rpcs == 0 {
            return Err(OptionsError::ZeroOutstandingRpcs);
        }

        let mut names = HashSet::new();
        for index in &self.indexes {
            if index.name.is_empty() {
                return Err(OptionsError::EmptyIndexName);
            }
            if !names.insert(index.name.as_str()) {
                return Err(OptionsError::DuplicateIndex(index.name.clone()));
            }
            if index.partition_key.is_empty() || index.sort_key.as_deref() == Some("") {
                return Err(OptionsError::EmptyIndexKey(index.name.clone()));
            }
            if index.kind == IndexKind::Local {
                if index.partition_key != self.partition_key {
                    return Err(OptionsError::LocalIndexPartitionKey {
                        index: index.name.clone(),
                        expected: self.partition_key.clone(),
                    });
                }
                if index.sort_key.is_none() {
                    return Err(OptionsError::LocalIndexWithoutSortKey(index.name.clone()));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CollectionOptionsBuilder
// ---------------------------------------------------------------------------

/// Builder for [`CollectionOptions`].
pub struct CollectionOptionsBuilder {
    options: CollectionOptions,
}

impl CollectionOptionsBuilder {
    fn new(table_name: &str) -> Self {
        Self {
            options: CollectionOptions {
                table_name: table_name.to_string(),
                partition_key: String::new(),
                sort_key: None,
                allow_scans: false,
                revision_field: None,
                max_outstanding_action_rpcs: DEFAULT_MAX_OUTSTANDING_ACTION_RPCS,
                indexes: Vec::new(),
            },
        }
    }

    /// Set the partition key field.
    pub fn partition_key(mut self, name: &str) -> Self {
        self.options.partition_key = name.to_string();
        self
    }

    /// Set the (optional) sort key field.
    pub fn sort_key(mut self, name: &str) -> Self {
        self.options.sort_key = Some(name.to_string());
        self
    }

    /// Permit queries that match no index to run as full scans.
    pub fn allow_scans(mut self, allow: bool) -> Self {
        self.options.allow_scans = allow;
        self
    }

    /// Field that carries the store-assigned document revision.
    pub fn revision_field(mut self, name: &str) -> Self {
        self.options.revision_field = Some(name.to_string());
        self
    }

    pub fn max_outstanding_action_rpcs(mut self, max: usize) -> Self {
        self.options.max_outstanding_action_rpcs = max;
        self
    }

    /// Register a local secondary index on the table partition key.
    pub fn local_index(mut self, name: &str, sort_key: &str, projection: Projection) -> Self {
        let partition_key = self.options.partition_key.clone();
        self.options.indexes.push(IndexDefinition {
            name: name.to_string(),
            kind: IndexKind::Local,
            partition_key,
            sort_key: Some(sort_key.to_string()),
            projection,
        });
        self
    }

    /// Register a global secondary index.
    pub fn global_index(
        mut self,
        name: &str,
        partition_key: &str,
        sort_key: Option<&str>,
        projection: Projection,
    ) -> Self {
        self.options.indexes.push(IndexDefinition {
            name: name.to_string(),
            kind: IndexKind::Global,
            partition_key: partition_key.to_string(),
            sort_key: sort_key.map(str::to_string),
            projection,
        });
        self
    }

    pub fn build(self) -> Result<CollectionOptions, OptionsError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

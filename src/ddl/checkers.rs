//! Capability checkers injected into the classifier
//!
//! The classifier never talks to a database. Callers that can introspect the
//! target server supply these functions; every one is optional and a missing
//! checker turns its validation into a no-op.

use super::DdlMode;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Column as reported by the target server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Full column type, e.g. `enum('a','b')` or `varchar(255)`
    pub column_type: String,
}

impl ColumnInfo {
    pub fn new(column_type: impl Into<String>) -> Self {
        Self {
            column_type: column_type.into(),
        }
    }
}

type TableExistsFn = dyn Fn(DdlMode, &str) -> bool + Send + Sync;
type ColumnsFn = dyn Fn(&str) -> HashMap<String, ColumnInfo> + Send + Sync;
type TablePredicateFn = dyn Fn(&str) -> bool + Send + Sync;
type ForeignKeysFn = dyn Fn(&str) -> BTreeSet<String> + Send + Sync;
type ServerPredicateFn = dyn Fn() -> bool + Send + Sync;

#[derive(Clone, Default)]
pub struct Checkers {
    table_exists: Option<Arc<TableExistsFn>>,
    get_columns: Option<Arc<ColumnsFn>>,
    has_referenced_foreign_keys: Option<Arc<TablePredicateFn>>,
    get_foreign_keys: Option<Arc<ForeignKeysFn>>,
    avoid_temporal_upgrade: Option<Arc<ServerPredicateFn>>,
}

impl Checkers {
    /// No checkers: every check passes
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_table_exists(
        mut self,
        f: impl Fn(DdlMode, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.table_exists = Some(Arc::new(f));
        self
    }

    pub fn with_get_columns(
        mut self,
        f: impl Fn(&str) -> HashMap<String, ColumnInfo> + Send + Sync + 'static,
    ) -> Self {
        self.get_columns = Some(Arc::new(f));
        self
    }

    pub fn with_has_referenced_foreign_keys(
        mut self,
        f: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.has_referenced_foreign_keys = Some(Arc::new(f));
        self
    }

    pub fn with_get_foreign_keys(
        mut self,
        f: impl Fn(&str) -> BTreeSet<String> + Send + Sync + 'static,
    ) -> Self {
        self.get_foreign_keys = Some(Arc::new(f));
        self
    }

    pub fn with_avoid_temporal_upgrade(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.avoid_temporal_upgrade = Some(Arc::new(f));
        self
    }

    pub fn table_exists(&self, mode: DdlMode, name: &str) -> Option<bool> {
        self.table_exists.as_ref().map(|f| f(mode, name))
    }

    pub fn get_columns(&self, table: &str) -> Option<HashMap<String, ColumnInfo>> {
        self.get_columns.as_ref().map(|f| f(table))
    }

    pub fn has_referenced_foreign_keys(&self, table: &str) -> Option<bool> {
        self.has_referenced_foreign_keys.as_ref().map(|f| f(table))
    }

    pub fn get_foreign_keys(&self, table: &str) -> Option<BTreeSet<String>> {
        self.get_foreign_keys.as_ref().map(|f| f(table))
    }

    pub fn avoid_temporal_upgrade(&self) -> Option<bool> {
        self.avoid_temporal_upgrade.as_ref().map(|f| f())
    }
}

impl fmt::Debug for Checkers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkers")
            .field("table_exists", &self.table_exists.is_some())
            .field("get_columns", &self.get_columns.is_some())
            .field("has_referenced_foreign_keys", &self.has_referenced_foreign_keys.is_some())
            .field("get_foreign_keys", &self.get_foreign_keys.is_some())
            .field("avoid_temporal_upgrade", &self.avoid_temporal_upgrade.is_some())
            .finish()
    }
}

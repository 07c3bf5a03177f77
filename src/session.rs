//! session.rs — explicit session state for one chat.
//!
//! Everything the interactive loop mutates lives here and is passed by
//! reference into handlers; there is no global state. One user action is in
//! flight at a time, so no locking is needed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TabletalkError};
use crate::schema::TableSchema;
use crate::transcript::Turn;

/// One configured warehouse table, addressed as `dataset.table` within the
/// session's project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        TableRef { dataset: dataset.into(), table: table.into() }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub project: String,
    pub tables: Vec<TableRef>,
    /// Set once access is verified and schema fetched; frozen afterwards.
    pub initialized: bool,
    /// A loaded historical transcript is browsable but cannot take new turns.
    pub view_only: bool,
}

/// Live chat session: configuration, extracted schema, and the ordered
/// transcript. Turns are append-only; nothing mutates a turn after creation.
#[derive(Debug, Default)]
pub struct Session {
    pub config: SessionConfig,
    pub schema_info: BTreeMap<String, TableSchema>,
    pub transcript: Vec<Turn>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            config: SessionConfig {
                project: String::new(),
                tables: vec![TableRef::new("", "")],
                initialized: false,
                view_only: false,
            },
            schema_info: BTreeMap::new(),
            transcript: Vec::new(),
        }
    }

    /// Drop schema, transcript, and flags but keep the entered configuration,
    /// so a new chat against the same tables needs no re-typing.
    pub fn reset(&mut self) {
        self.config.initialized = false;
        self.config.view_only = false;
        self.schema_info.clear();
        self.transcript.clear();
    }

    pub fn add_table(&mut self) {
        self.config.tables.push(TableRef::new("", ""));
    }

    /// The first table entry is not removable.
    pub fn remove_table(&mut self, index: usize) {
        if index > 0 && index < self.config.tables.len() {
            self.config.tables.remove(index);
        }
    }

    /// Check the configuration is complete enough to initialize.
    pub fn validate_config(&self) -> Result<()> {
        if self.config.project.is_empty() {
            return Err(TabletalkError::Config("Please enter a GCP Project ID".into()));
        }
        if self.config.tables.is_empty() {
            return Err(TabletalkError::Config("Please enter at least one dataset and table".into()));
        }
        if self
            .config
            .tables
            .iter()
            .any(|t| t.dataset.is_empty() || t.table.is_empty())
        {
            return Err(TabletalkError::Config("Please enter all dataset and table names".into()));
        }
        Ok(())
    }

    pub fn can_take_turns(&self) -> bool {
        self.config.initialized && !self.config.view_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_table_not_removable() {
        let mut s = Session::new();
        s.add_table();
        assert_eq!(s.config.tables.len(), 2);
        s.remove_table(0);
        assert_eq!(s.config.tables.len(), 2);
        s.remove_table(1);
        assert_eq!(s.config.tables.len(), 1);
    }

    #[test]
    fn test_validate_rejects_blank_entries() {
        let mut s = Session::new();
        assert!(s.validate_config().is_err());
        s.config.project = "proj".into();
        assert!(s.validate_config().is_err());
        s.config.tables[0] = TableRef::new("sales", "orders");
        assert!(s.validate_config().is_ok());
    }

    #[test]
    fn test_reset_keeps_configuration() {
        let mut s = Session::new();
        s.config.project = "proj".into();
        s.config.tables[0] = TableRef::new("sales", "orders");
        s.config.initialized = true;
        s.reset();
        assert!(!s.config.initialized);
        assert_eq!(s.config.project, "proj");
        assert_eq!(s.config.tables[0].qualified(), "sales.orders");
    }
}

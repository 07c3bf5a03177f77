//! auth.rs — pre-flight access verification.
//!
//! A single fail-fast pass over the configured tables before any schema
//! fetch or model call: dataset lookup, then table lookup, stopping at the
//! first failure with wording that tells not-found apart from
//! permission-denied.

use crate::logging::app_info;
use crate::session::TableRef;
use crate::warehouse::{Warehouse, WarehouseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCheck {
    pub success: bool,
    pub error: Option<String>,
}

impl AccessCheck {
    fn ok() -> Self {
        AccessCheck { success: true, error: None }
    }

    fn failed(error: String) -> Self {
        AccessCheck { success: false, error: Some(error) }
    }
}

/// Verify the caller can reach every configured dataset and table. No
/// retries; the first failure wins.
pub async fn verify_access(
    warehouse: &dyn Warehouse,
    project: &str,
    tables: &[TableRef],
) -> AccessCheck {
    for item in tables {
        match warehouse.get_dataset(&item.dataset).await {
            Ok(()) => {}
            Err(WarehouseError::NotFound(_)) => {
                return AccessCheck::failed(format!(
                    "Dataset {} not found in project {}.",
                    item.dataset, project
                ));
            }
            Err(WarehouseError::PermissionDenied(_)) => {
                return AccessCheck::failed(format!(
                    "Permission denied for dataset {} in project {}.",
                    item.dataset, project
                ));
            }
            Err(WarehouseError::Other(reason)) => {
                return AccessCheck::failed(format!("Error verifying access: {}", reason));
            }
        }

        match warehouse.get_table(&item.dataset, &item.table).await {
            Ok(_) => {}
            Err(WarehouseError::NotFound(_)) => {
                return AccessCheck::failed(format!(
                    "Table {} not found in dataset {}.",
                    item.table, item.dataset
                ));
            }
            Err(WarehouseError::PermissionDenied(_)) => {
                return AccessCheck::failed(format!(
                    "Permission denied for table {} in dataset {}.",
                    item.table, item.dataset
                ));
            }
            Err(WarehouseError::Other(reason)) => {
                return AccessCheck::failed(format!("Error verifying access: {}", reason));
            }
        }
    }

    app_info(format!("Access verified for {} table(s) in {}", tables.len(), project));
    AccessCheck::ok()
}

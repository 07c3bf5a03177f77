//! schema.rs — warehouse schema extraction for prompt grounding.
//!
//! One entry per configured table: column metadata plus a small sample of
//! rows. A failed sample fetch degrades that table to an empty sample and
//! leaves the others untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TabletalkError};
use crate::executor::{self, CellValue, Row};
use crate::logging::{app_info, app_warn};
use crate::session::TableRef;
use crate::warehouse::{ColumnMeta, Warehouse};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    /// `project.dataset.table`, the only form generated SQL should use.
    pub full_name: String,
    pub num_rows: u64,
    pub created: Option<String>,
    pub description: String,
    pub columns: Vec<ColumnMeta>,
    pub sample_data: Vec<Row>,
}

/// Fetch metadata and a bounded row sample for every configured table,
/// keyed by fully-qualified table name. Metadata failure for a table is
/// fatal; sample failure is not.
pub async fn extract_schema(
    warehouse: &dyn Warehouse,
    tables: &[TableRef],
    sample_rows: usize,
) -> Result<BTreeMap<String, TableSchema>> {
    let project = warehouse.project().to_string();
    let mut schema_info = BTreeMap::new();

    for item in tables {
        let qualified = item.qualified();
        let meta = warehouse
            .get_table(&item.dataset, &item.table)
            .await
            .map_err(|e| TabletalkError::Schema {
                table: qualified.clone(),
                reason: e.to_string(),
            })?;

        let full_name = format!("{}.{}.{}", project, item.dataset, item.table);
        let sample_query = format!("SELECT * FROM `{}` LIMIT {}", full_name, sample_rows);
        let sample_data = match executor::execute_query(warehouse, &sample_query).await {
            Ok(result) => result.rows,
            Err(e) => {
                app_warn(format!("Could not fetch sample data for {}: {}", qualified, e));
                Vec::new()
            }
        };

        app_info(format!(
            "Registered {} ({} rows, {} columns, {} sample rows)",
            full_name,
            meta.num_rows,
            meta.columns.len(),
            sample_data.len()
        ));

        schema_info.insert(
            qualified,
            TableSchema {
                project_id: project.clone(),
                dataset_id: item.dataset.clone(),
                table_id: item.table.clone(),
                full_name,
                num_rows: meta.num_rows,
                created: meta.created,
                description: meta.description,
                columns: meta.columns,
                sample_data,
            },
        );
    }

    Ok(schema_info)
}

/// Render the schema map as prompt text: per table, identity, row count,
/// description, the column list, and a column-aligned sample mini-table.
/// Deterministic for a given schema map.
pub fn format_schema_for_prompt(
    schema_info: &BTreeMap<String, TableSchema>,
    project_id: &str,
) -> String {
    let mut text = format!(
        "Available tables and their schemas in project '{}':\n\n",
        project_id
    );

    for table in schema_info.values() {
        text.push_str(&format!("Table: {}\n", table.full_name));
        text.push_str(&format!("  - Project: {}\n", table.project_id));
        text.push_str(&format!("  - Dataset: {}\n", table.dataset_id));
        text.push_str(&format!("  - Table: {}\n", table.table_id));
        text.push_str(&format!("  - Row count: {}\n", table.num_rows));

        if !table.description.is_empty() {
            text.push_str(&format!("Description: {}\n", table.description));
        }

        text.push_str("Columns:\n");
        for column in &table.columns {
            text.push_str(&format!("  - {} ({})", column.name, column.column_type));
            if !column.description.is_empty() {
                text.push_str(&format!(": {}", column.description));
            }
            text.push('\n');
        }

        if table.sample_data.is_empty() {
            text.push_str("\nSample data:\n  (No sample data available)\n");
        } else {
            text.push_str(&format!("\nSample data (first {} rows):\n", table.sample_data.len()));
            text.push_str(&render_sample_table(&table.columns, &table.sample_data));
        }

        text.push_str("\n\n");
    }

    text
}

fn sample_cell(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(CellValue::Null) | None => "NULL".to_string(),
        Some(value) => value.to_string(),
    }
}

/// Pad every column to its widest value so the sample reads as a table.
fn render_sample_table(columns: &[ColumnMeta], sample_data: &[Row]) -> String {
    let widths: Vec<usize> = columns
        .iter()
        .map(|col| {
            sample_data
                .iter()
                .map(|row| sample_cell(row, &col.name).len())
                .chain(std::iter::once(col.name.len()))
                .max()
                .unwrap_or(col.name.len())
        })
        .collect();

    let mut out = String::from("  ");
    for (col, width) in columns.iter().zip(&widths) {
        out.push_str(&format!("{:<pad$}", col.name, pad = width + 2));
    }
    out.push('\n');

    let total: usize = widths.iter().sum::<usize>() + columns.len() * 2;
    out.push_str("  ");
    out.push_str(&"-".repeat(total));
    out.push('\n');

    for row in sample_data {
        out.push_str("  ");
        for (col, width) in columns.iter().zip(&widths) {
            out.push_str(&format!("{:<pad$}", sample_cell(row, &col.name), pad = width + 2));
        }
        out.push('\n');
    }

    out
}

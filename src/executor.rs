//! executor.rs — query execution and scalar normalization.
//!
//! Runs extracted SQL against the warehouse and flattens every result row
//! into plain scalars: no warehouse-native temporal or numeric wrapper
//! survives past this module. Soft-fail mode reports execution errors as a
//! tagged value so the orchestrator can drive its correction flow.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TabletalkError};
use crate::logging::{app_info, app_warn};
use crate::warehouse::{RawQueryOutput, Warehouse};

/// A normalized result cell. Every value a query can produce is one of
/// these five shapes; JSON round-trips reproduce them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(n) => write!(f, "{}", n),
            CellValue::Float(x) => write!(f, "{}", x),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

pub type Row = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub rows: u64,
    pub columns: usize,
    pub bytes_processed: i64,
    pub bytes_billed: i64,
    pub elapsed_ms: f64,
    pub slot_millis: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub stats: QueryStats,
}

impl QueryResult {
    fn failed(error: String) -> Self {
        QueryResult { success: false, error: Some(error), ..Default::default() }
    }
}

/// Execute `sql`, blocking until the job completes, and materialize the
/// full result set. Warehouse errors propagate.
pub async fn execute_query(warehouse: &dyn Warehouse, sql: &str) -> Result<QueryResult> {
    let raw = warehouse
        .run_query(sql)
        .await
        .map_err(|e| TabletalkError::Execution(e.to_string()))?;
    Ok(normalize_output(raw))
}

/// Soft-fail variant: a failed execution comes back as a tagged
/// `QueryResult` carrying the raw warehouse error instead of an `Err`.
pub async fn execute_query_soft(warehouse: &dyn Warehouse, sql: &str) -> QueryResult {
    match warehouse.run_query(sql).await {
        Ok(raw) => normalize_output(raw),
        Err(e) => {
            app_warn(format!("Query soft-failed: {}", e));
            QueryResult::failed(e.to_string())
        }
    }
}

fn normalize_output(raw: RawQueryOutput) -> QueryResult {
    let columns: Vec<String> = raw.fields.iter().map(|f| f.name.clone()).collect();

    let rows: Vec<Row> = raw
        .rows
        .iter()
        .map(|cells| {
            raw.fields
                .iter()
                .zip(cells.iter())
                .map(|(field, cell)| {
                    (field.name.clone(), normalize_cell(cell.as_deref(), &field.field_type))
                })
                .collect()
        })
        .collect();

    let stats = QueryStats {
        rows: raw.total_rows,
        columns: columns.len(),
        bytes_processed: raw.bytes_processed,
        bytes_billed: raw.bytes_billed,
        elapsed_ms: raw.elapsed_ms,
        slot_millis: raw.slot_millis,
    };

    app_info(format!(
        "Normalized {} row(s) across {} column(s)",
        rows.len(),
        columns.len()
    ));

    QueryResult { success: true, error: None, columns, rows, stats }
}

/// Render rows as a padded text table (header, separator, one line per
/// row). Used for the model-facing result dump and for terminal display.
pub fn format_rows(columns: &[String], rows: &[Row]) -> String {
    let cell = |row: &Row, col: &str| -> String {
        match row.get(col) {
            Some(v) => v.to_string(),
            None => "NULL".to_string(),
        }
    };

    let widths: Vec<usize> = columns
        .iter()
        .map(|col| {
            rows.iter()
                .map(|row| cell(row, col).len())
                .chain(std::iter::once(col.len()))
                .max()
                .unwrap_or(col.len())
        })
        .collect();

    let mut out = String::new();
    for (col, width) in columns.iter().zip(&widths) {
        out.push_str(&format!("{:<pad$}", col, pad = width + 2));
    }
    out.push('\n');
    out.push_str(&"-".repeat(widths.iter().sum::<usize>() + columns.len() * 2));
    out.push('\n');
    for row in rows {
        for (col, width) in columns.iter().zip(&widths) {
            out.push_str(&format!("{:<pad$}", cell(row, col), pad = width + 2));
        }
        out.push('\n');
    }
    out
}

/// Map one wire cell (BigQuery renders every value as a string) onto a
/// plain scalar, guided by the declared field type. Unparseable values fall
/// back to text rather than failing the whole result.
fn normalize_cell(value: Option<&str>, field_type: &str) -> CellValue {
    let Some(text) = value else {
        return CellValue::Null;
    };

    match field_type {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(CellValue::Int)
            .unwrap_or_else(|_| CellValue::Text(text.to_string())),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .parse::<f64>()
            .map(CellValue::Float)
            .unwrap_or_else(|_| CellValue::Text(text.to_string())),
        "BOOLEAN" | "BOOL" => match text {
            "true" => CellValue::Bool(true),
            "false" => CellValue::Bool(false),
            other => CellValue::Text(other.to_string()),
        },
        // TIMESTAMP arrives as fractional epoch seconds; render RFC 3339.
        "TIMESTAMP" => text
            .parse::<f64>()
            .ok()
            .and_then(|secs| Utc.timestamp_micros((secs * 1e6) as i64).single())
            .map(|t| CellValue::Text(t.to_rfc3339()))
            .unwrap_or_else(|| CellValue::Text(text.to_string())),
        // DATE, DATETIME, TIME and everything else already arrive as
        // human-readable strings.
        _ => CellValue::Text(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::ResultField;

    fn raw(fields: Vec<(&str, &str)>, rows: Vec<Vec<Option<&str>>>) -> RawQueryOutput {
        RawQueryOutput {
            fields: fields
                .into_iter()
                .map(|(name, field_type)| ResultField {
                    name: name.to_string(),
                    field_type: field_type.to_string(),
                })
                .collect(),
            total_rows: rows.len() as u64,
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|c| c.map(str::to_string)).collect())
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cells_normalize_to_plain_scalars() {
        let output = raw(
            vec![
                ("id", "INTEGER"),
                ("score", "FLOAT"),
                ("active", "BOOLEAN"),
                ("name", "STRING"),
                ("missing", "INTEGER"),
            ],
            vec![vec![Some("42"), Some("3.5"), Some("true"), Some("alice"), None]],
        );
        let result = normalize_output(output);
        assert!(result.success);
        let row = &result.rows[0];
        assert_eq!(row["id"], CellValue::Int(42));
        assert_eq!(row["score"], CellValue::Float(3.5));
        assert_eq!(row["active"], CellValue::Bool(true));
        assert_eq!(row["name"], CellValue::Text("alice".into()));
        assert_eq!(row["missing"], CellValue::Null);
    }

    #[test]
    fn test_timestamp_becomes_string() {
        let output = raw(vec![("ts", "TIMESTAMP")], vec![vec![Some("1700000000.0")]]);
        let result = normalize_output(output);
        match &result.rows[0]["ts"] {
            CellValue::Text(s) => assert!(s.starts_with("2023-11-14T22:13:20")),
            other => panic!("timestamp leaked as {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_numeric_falls_back_to_text() {
        let output = raw(vec![("n", "INTEGER")], vec![vec![Some("not-a-number")]]);
        let result = normalize_output(output);
        assert_eq!(result.rows[0]["n"], CellValue::Text("not-a-number".into()));
    }

    #[test]
    fn test_cell_value_json_round_trip() {
        let row: Row = [
            ("a".to_string(), CellValue::Int(7)),
            ("b".to_string(), CellValue::Float(0.5)),
            ("c".to_string(), CellValue::Null),
            ("d".to_string(), CellValue::Bool(false)),
            ("e".to_string(), CellValue::Text("x".into())),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&row).unwrap();
        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(row, back);
    }
}

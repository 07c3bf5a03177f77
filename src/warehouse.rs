//! warehouse.rs — BigQuery REST v2 client.
//!
//! Thin pass-through layer: dataset/table metadata lookups and blocking
//! query execution. All heavy lifting happens server-side; this module only
//! formats requests, walks the JSON replies, and maps HTTP statuses onto
//! the three error kinds the access verifier distinguishes.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;

use crate::logging::{app_error, app_info};

const BIGQUERY_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

// Each getQueryResults call long-polls server-side for up to 10 s, so
// this caps an incomplete job at roughly five minutes before giving up.
const MAX_COMPLETION_POLLS: u32 = 30;

/// Warehouse-side failures, distinguishable for access-check wording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    NotFound(String),
    PermissionDenied(String),
    Other(String),
}

impl std::fmt::Display for WarehouseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarehouseError::NotFound(msg)
            | WarehouseError::PermissionDenied(msg)
            | WarehouseError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub nullable: bool,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    pub num_rows: u64,
    /// RFC 3339 creation time, when the warehouse reports one.
    pub created: Option<String>,
    pub description: String,
    pub columns: Vec<ColumnMeta>,
}

/// One result field as reported by the query response schema.
#[derive(Debug, Clone)]
pub struct ResultField {
    pub name: String,
    pub field_type: String,
}

/// Fully materialized query output, values still in wire form (BigQuery
/// renders every cell as a string or null). Normalization into plain
/// scalars happens in the executor.
#[derive(Debug, Clone, Default)]
pub struct RawQueryOutput {
    pub fields: Vec<ResultField>,
    pub rows: Vec<Vec<Option<String>>>,
    pub total_rows: u64,
    pub bytes_processed: i64,
    pub bytes_billed: i64,
    pub slot_millis: i64,
    pub elapsed_ms: f64,
}

/// The warehouse collaborator. Implemented for real by [`BigQueryClient`];
/// tests substitute fakes.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn project(&self) -> &str;

    /// Dataset metadata lookup; success means the dataset exists and is
    /// readable.
    async fn get_dataset(&self, dataset: &str) -> Result<(), WarehouseError>;

    /// Table metadata lookup: row count, creation time, description, and
    /// the full column list.
    async fn get_table(&self, dataset: &str, table: &str) -> Result<TableMeta, WarehouseError>;

    /// Submit SQL, block until the job completes, and materialize the full
    /// result set in memory. No size limit, no cancellation, no streaming.
    async fn run_query(&self, sql: &str) -> Result<RawQueryOutput, WarehouseError>;
}

pub struct BigQueryClient {
    project: String,
    token: String,
    http: reqwest::Client,
}

impl BigQueryClient {
    /// Build a client for `project`, resolving a bearer token from the
    /// `GOOGLE_ACCESS_TOKEN` env var or, failing that, `gcloud auth
    /// print-access-token`.
    pub fn new(project: impl Into<String>) -> Result<Self, WarehouseError> {
        let token = resolve_access_token()?;
        Ok(BigQueryClient {
            project: project.into(),
            token,
            http: reqwest::Client::new(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, WarehouseError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| WarehouseError::Other(format!("Request failed: {e}")))?;
        Self::decode_response(resp).await
    }

    async fn decode_response(resp: reqwest::Response) -> Result<Value, WarehouseError> {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| WarehouseError::Other(format!("JSON parse error: {e}")));
        }

        // The API reports a structured error; fall back to the raw body.
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| {
                let truncated = crate::error::body_preview(&body);
                format!("HTTP {status}: {truncated}")
            });

        Err(match status.as_u16() {
            404 => WarehouseError::NotFound(message),
            401 | 403 => WarehouseError::PermissionDenied(message),
            _ => WarehouseError::Other(message),
        })
    }

    /// Poll `getQueryResults` until the job reports completion, following
    /// page tokens so the entire result set lands in memory.
    async fn collect_results(&self, job_id: &str) -> Result<(Vec<ResultField>, Vec<Vec<Option<String>>>, u64, i64), WarehouseError> {
        let mut fields = Vec::new();
        let mut rows = Vec::new();
        let mut total_rows = 0u64;
        let mut bytes_processed = 0i64;
        let mut page_token: Option<String> = None;
        let mut polls = 0u32;

        loop {
            let mut url = format!(
                "{BIGQUERY_BASE}/projects/{}/queries/{}?timeoutMs=10000",
                self.project, job_id
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={token}"));
            }

            let data = self.get_json(&url).await?;

            match next_poll_step(&data, polls) {
                PollStep::Ready => {}
                PollStep::GiveUp => {
                    return Err(WarehouseError::Other(format!(
                        "Query job {job_id} did not complete after {MAX_COMPLETION_POLLS} polls"
                    )));
                }
                PollStep::Retry => {
                    polls += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    continue;
                }
            }

            if let Some(errors) = data["errors"].as_array() {
                if let Some(first) = errors.first() {
                    let msg = first["message"].as_str().unwrap_or("query failed");
                    return Err(WarehouseError::Other(msg.to_string()));
                }
            }

            if fields.is_empty() {
                fields = parse_result_fields(&data["schema"]);
            }
            total_rows = data["totalRows"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);
            bytes_processed = data["totalBytesProcessed"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            if let Some(row_values) = data["rows"].as_array() {
                for row in row_values {
                    let cells = row["f"]
                        .as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|cell| cell["v"].as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    rows.push(cells);
                }
            }

            page_token = data["pageToken"].as_str().map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        Ok((fields, rows, total_rows, bytes_processed))
    }

    /// Fetch job statistics (timings, billed bytes, slot-milliseconds) once
    /// the job has completed.
    async fn job_statistics(&self, job_id: &str) -> Result<(f64, i64, i64), WarehouseError> {
        let url = format!("{BIGQUERY_BASE}/projects/{}/jobs/{}", self.project, job_id);
        let data = self.get_json(&url).await?;
        let stats = &data["statistics"];

        let started: f64 = stats["startTime"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        let ended: f64 = stats["endTime"].as_str().and_then(|s| s.parse().ok()).unwrap_or(started);
        let bytes_billed = stats["query"]["totalBytesBilled"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let slot_millis = stats["query"]["totalSlotMs"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Ok((ended - started, bytes_billed, slot_millis))
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    fn project(&self) -> &str {
        &self.project
    }

    async fn get_dataset(&self, dataset: &str) -> Result<(), WarehouseError> {
        let url = format!("{BIGQUERY_BASE}/projects/{}/datasets/{}", self.project, dataset);
        self.get_json(&url).await.map(|_| ())
    }

    async fn get_table(&self, dataset: &str, table: &str) -> Result<TableMeta, WarehouseError> {
        let url = format!(
            "{BIGQUERY_BASE}/projects/{}/datasets/{}/tables/{}",
            self.project, dataset, table
        );
        let data = self.get_json(&url).await?;

        let columns = data["schema"]["fields"]
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .map(|field| ColumnMeta {
                        name: field["name"].as_str().unwrap_or("").to_string(),
                        column_type: field["type"].as_str().unwrap_or("STRING").to_string(),
                        // Absent mode means NULLABLE on the wire.
                        nullable: field["mode"].as_str().map_or(true, |m| m == "NULLABLE"),
                        description: field["description"].as_str().unwrap_or("").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let created = data["creationTime"]
            .as_str()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|t| t.to_rfc3339());

        Ok(TableMeta {
            num_rows: data["numRows"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
            created,
            description: data["description"].as_str().unwrap_or("").to_string(),
            columns,
        })
    }

    async fn run_query(&self, sql: &str) -> Result<RawQueryOutput, WarehouseError> {
        app_info(format!("Submitting query ({} chars)", sql.len()));

        let url = format!("{BIGQUERY_BASE}/projects/{}/queries", self.project);
        let payload = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": 60_000,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                app_error(format!("Query request failed: {e}"));
                WarehouseError::Other(format!("Request failed: {e}"))
            })?;
        let data = Self::decode_response(resp).await?;

        let job_id = data["jobReference"]["jobId"]
            .as_str()
            .ok_or_else(|| WarehouseError::Other("Query response carried no job reference".into()))?
            .to_string();

        let (fields, rows, total_rows, bytes_processed) = self.collect_results(&job_id).await?;
        let (elapsed_ms, bytes_billed, slot_millis) = self.job_statistics(&job_id).await?;

        app_info(format!(
            "Query finished: {} rows, {} bytes processed, {:.0} ms",
            total_rows, bytes_processed, elapsed_ms
        ));

        Ok(RawQueryOutput {
            fields,
            rows,
            total_rows,
            bytes_processed,
            bytes_billed,
            slot_millis,
            elapsed_ms,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PollStep {
    Ready,
    Retry,
    GiveUp,
}

/// Decide what to do with one getQueryResults reply: take the results,
/// poll again, or stop once the retry budget is spent. A missing
/// `jobComplete` field counts as incomplete.
fn next_poll_step(data: &Value, polls: u32) -> PollStep {
    if data["jobComplete"].as_bool().unwrap_or(false) {
        PollStep::Ready
    } else if polls + 1 >= MAX_COMPLETION_POLLS {
        PollStep::GiveUp
    } else {
        PollStep::Retry
    }
}

fn parse_result_fields(schema: &Value) -> Vec<ResultField> {
    schema["fields"]
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .map(|field| ResultField {
                    name: field["name"].as_str().unwrap_or("").to_string(),
                    field_type: field["type"].as_str().unwrap_or("STRING").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn resolve_access_token() -> Result<String, WarehouseError> {
    if let Ok(token) = env::var("GOOGLE_ACCESS_TOKEN") {
        if !token.is_empty() {
            return Ok(token);
        }
    }

    let output = std::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .map_err(|e| {
            WarehouseError::Other(format!(
                "GOOGLE_ACCESS_TOKEN not set and gcloud unavailable: {e}"
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WarehouseError::Other(format!(
            "gcloud auth print-access-token failed: {}",
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(WarehouseError::Other("gcloud returned an empty access token".into()));
    }
    Ok(token)
}

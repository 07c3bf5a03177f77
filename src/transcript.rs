//! transcript.rs — JSON persistence of chat transcripts.
//!
//! The live transcript is an append-only in-memory list; on request it is
//! written to `chats/chat_history_<YYYYMMDD_HHMMSS>.json` with a synthetic
//! leading entry recording the session configuration. Loading surfaces that
//! configuration for display without re-enabling live querying.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TabletalkError};
use crate::executor::QueryResult;
use crate::logging::app_info;
use crate::session::TableRef;

pub const HISTORY_PREFIX: &str = "chat_history_";
pub const HISTORY_SUFFIX: &str = ".json";

/// One entry in a transcript. User and assistant turns are produced exactly
/// once per submission and never mutated; the metadata variant exists only
/// as the synthetic first entry of a saved file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Assistant {
        understanding: String,
        sql: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query_result: Option<QueryResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Metadata {
        timestamp: String,
        project: String,
        tables: Vec<TableRef>,
    },
}

/// A transcript read back from disk, with whatever configuration the
/// metadata entry carried. Loaded transcripts are view-only.
#[derive(Debug, Clone)]
pub struct LoadedTranscript {
    pub turns: Vec<Turn>,
    pub project: Option<String>,
    pub tables: Vec<TableRef>,
}

/// Save `turns` under `chats_dir` with a timestamped filename and a
/// synthetic leading metadata entry. Returns the path written.
pub fn save_transcript(
    chats_dir: &Path,
    project: &str,
    tables: &[TableRef],
    turns: &[Turn],
) -> Result<PathBuf> {
    fs::create_dir_all(chats_dir)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = chats_dir.join(format!("{HISTORY_PREFIX}{timestamp}{HISTORY_SUFFIX}"));

    let mut entries = Vec::with_capacity(turns.len() + 1);
    entries.push(Turn::Metadata {
        timestamp: Local::now().to_rfc3339(),
        project: project.to_string(),
        tables: tables.to_vec(),
    });
    entries.extend_from_slice(turns);

    let json = serde_json::to_string_pretty(&entries)?;
    fs::write(&path, json)?;

    app_info(format!("Chat history saved to {}", path.display()));
    Ok(path)
}

/// Read a transcript file, surfacing project and tables from the metadata
/// entry when present.
pub fn load_transcript(path: &Path) -> Result<LoadedTranscript> {
    let data = fs::read_to_string(path)?;
    let turns: Vec<Turn> = serde_json::from_str(&data)?;

    let mut project = None;
    let mut tables = Vec::new();
    for turn in &turns {
        if let Turn::Metadata { project: p, tables: t, .. } = turn {
            project = Some(p.clone());
            tables = t.clone();
        }
    }

    app_info(format!("Loaded {} transcript entries from {}", turns.len(), path.display()));
    Ok(LoadedTranscript { turns, project, tables })
}

/// List saved transcript files under `chats_dir`, most recent first. The
/// timestamped naming makes lexicographic order chronological.
pub fn list_transcripts(chats_dir: &Path) -> Result<Vec<PathBuf>> {
    if !chats_dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(chats_dir)
        .map_err(|e| TabletalkError::Transcript(e.to_string()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(HISTORY_PREFIX) && n.ends_with(HISTORY_SUFFIX))
        })
        .collect();

    files.sort();
    files.reverse();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CellValue, QueryStats};

    fn sample_turns() -> Vec<Turn> {
        let row = [("n".to_string(), CellValue::Int(3))].into_iter().collect();
        vec![
            Turn::User { text: "how many orders?".into() },
            Turn::Assistant {
                understanding: "You want the order count.".into(),
                sql: "SELECT COUNT(*) AS n FROM `p.sales.orders`".into(),
                query_result: Some(QueryResult {
                    success: true,
                    error: None,
                    columns: vec!["n".into()],
                    rows: vec![row],
                    stats: QueryStats { rows: 1, columns: 1, ..Default::default() },
                }),
                explanation: Some("There are 3 orders.".into()),
                error: None,
            },
        ]
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let turns = sample_turns();
        let tables = vec![TableRef::new("sales", "orders")];

        let path = save_transcript(dir.path(), "proj", &tables, &turns).unwrap();
        let loaded = load_transcript(&path).unwrap();

        assert_eq!(loaded.project.as_deref(), Some("proj"));
        assert_eq!(loaded.tables, tables);
        // First entry is the synthetic metadata record; the rest round-trip.
        assert!(matches!(loaded.turns[0], Turn::Metadata { .. }));
        assert_eq!(&loaded.turns[1..], turns.as_slice());
    }

    #[test]
    fn test_list_is_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["chat_history_20250101_000000.json", "chat_history_20250601_120000.json"] {
            fs::write(dir.path().join(name), "[]").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = list_transcripts(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].to_string_lossy().contains("20250601"));
    }

    #[test]
    fn test_list_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = list_transcripts(&dir.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_history_20250101_000000.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_transcript(&path).is_err());
    }
}

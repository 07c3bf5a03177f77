//! Tabletalk — conversational front-end for BigQuery tables.
//!
//! Natural-language questions are translated to SQL by Gemini, executed
//! against the warehouse, and explained back in plain language. The
//! interesting control flow lives in [`orchestrator`]; everything else is
//! request formatting, response parsing, and JSON persistence.

pub mod auth;
pub mod chat;
pub mod error;
pub mod executor;
pub mod gemini;
pub mod logging;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod schema;
pub mod session;
pub mod settings;
pub mod transcript;
pub mod warehouse;

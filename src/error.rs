//! error.rs — error taxonomy for the query pipeline.
//!
//! Errors stay human-readable strings end to end: the warehouse and the
//! model both report opaque text, and everything surfaced to the user is
//! shown verbatim. No error here is retried more than once anywhere.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TabletalkError {
    /// Project/dataset/table access checks failed; aborts initialization.
    #[error("{0}")]
    Access(String),

    /// Table metadata could not be fetched for a configured table.
    #[error("Error fetching schema for {table}: {reason}")]
    Schema { table: String, reason: String },

    /// The language-model call itself failed (transport, HTTP, empty reply).
    #[error("Model error: {0}")]
    Model(String),

    /// A warehouse query failed and the caller did not request soft-fail.
    #[error("Query error: {0}")]
    Execution(String),

    /// Transcript save/load problems; reported, never fatal to the session.
    #[error("Transcript error: {0}")]
    Transcript(String),

    /// Bad session configuration (empty project id, empty table names, ...).
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TabletalkError>;

/// At most the first 300 bytes of an HTTP error body, cut back to a char
/// boundary so a multibyte character straddling the limit cannot panic
/// the slice. Error bodies from the Google APIs can carry localized text.
pub fn body_preview(body: &str) -> &str {
    const LIMIT: usize = 300;
    if body.len() <= LIMIT {
        return body;
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

impl From<std::io::Error> for TabletalkError {
    fn from(err: std::io::Error) -> Self {
        TabletalkError::Transcript(err.to_string())
    }
}

impl From<serde_json::Error> for TabletalkError {
    fn from(err: serde_json::Error) -> Self {
        TabletalkError::Transcript(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_preview_passes_short_bodies_through() {
        assert_eq!(body_preview("not found"), "not found");
    }

    #[test]
    fn test_body_preview_backs_off_to_char_boundary() {
        // 299 ASCII bytes then a three-byte character straddling byte 300.
        let body = format!("{}\u{20ac} tail", "x".repeat(299));
        let preview = body_preview(&body);
        assert_eq!(preview, "x".repeat(299));
        assert!(body.is_char_boundary(preview.len()));
    }
}

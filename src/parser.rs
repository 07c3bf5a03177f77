//! parser.rs — free-text reply segmentation.
//!
//! The model is instructed to answer in an understanding / SQL /
//! explanation shape, but the reply is still free text. Paragraphs are
//! classified by substring heuristics, independently and in document
//! order; a later paragraph matching a field overwrites an earlier one.
//! A reply matching no rule lands verbatim in the explanation field.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub understanding: String,
    pub sql: String,
    pub explanation: String,
}

impl ParsedResponse {
    pub fn is_empty(&self) -> bool {
        self.understanding.is_empty() && self.sql.is_empty() && self.explanation.is_empty()
    }
}

const UNDERSTANDING_TRIGGERS: &[&str] = &["understanding", "i understand", "understand that"];
const EXPLANATION_TRIGGERS: &[&str] = &["explanation:", "results show", "analysis:"];

/// Split the raw reply on blank-line boundaries and classify each
/// paragraph. Within one paragraph, understanding wins over SQL wins over
/// explanation; across paragraphs, last match wins per field.
pub fn parse_response(text: &str) -> ParsedResponse {
    let mut result = ParsedResponse::default();

    for part in text.split("\n\n") {
        if UNDERSTANDING_TRIGGERS.iter().any(|t| find_ignore_case(part, t).is_some()) {
            result.understanding = part.to_string();
        } else if find_ignore_case(part, "```sql").is_some() {
            // Fenced form takes precedence: everything between the opening
            // fence and the next closing fence, trimmed.
            if let Some(sql) = extract_fenced_sql(part) {
                result.sql = sql;
            }
        } else if let Some(idx) = find_ignore_case(part, "sql query:") {
            result.sql = part[idx + "sql query:".len()..].trim().to_string();
        } else if EXPLANATION_TRIGGERS.iter().any(|t| find_ignore_case(part, t).is_some()) {
            result.explanation = part.to_string();
        }
    }

    if result.is_empty() {
        result.explanation = text.to_string();
    }

    result
}

/// Byte offset of the first case-insensitive occurrence of `needle` in
/// `haystack`. The triggers are all ASCII, so matching bytes with
/// `eq_ignore_ascii_case` directly against the haystack keeps every
/// offset valid for slicing it; lowercasing a copy first can change byte
/// lengths and shift the offsets.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    debug_assert!(needle.is_ascii());
    let bytes = haystack.as_bytes();
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        bytes
            .get(i..i + needle.len())
            .map_or(false, |window| window.eq_ignore_ascii_case(needle.as_bytes()))
    })
}

fn extract_fenced_sql(part: &str) -> Option<String> {
    let start = find_ignore_case(part, "```sql")? + "```sql".len();
    let body = &part[start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(body[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "My understanding: you want the row count per table.\n\n\
        ```sql\nSELECT COUNT(*) AS n\nFROM `p.sales.orders`\n```\n\n\
        Explanation: one row per table with its count.";

    #[test]
    fn test_well_formed_reply_fills_all_fields() {
        let parsed = parse_response(WELL_FORMED);
        assert!(parsed.understanding.contains("row count per table"));
        assert_eq!(parsed.sql, "SELECT COUNT(*) AS n\nFROM `p.sales.orders`");
        assert!(parsed.explanation.starts_with("Explanation:"));
    }

    #[test]
    fn test_paragraph_order_does_not_matter() {
        let reordered = "Explanation: counts per table.\n\n\
            ```sql\nSELECT 1\n```\n\n\
            I understand that you want totals.";
        let parsed = parse_response(reordered);
        assert_eq!(parsed.sql, "SELECT 1");
        assert!(parsed.understanding.contains("totals"));
        assert!(parsed.explanation.contains("counts per table"));
    }

    #[test]
    fn test_no_match_degrades_to_raw_explanation() {
        let raw = "Could you clarify which table you mean?";
        let parsed = parse_response(raw);
        assert!(parsed.understanding.is_empty());
        assert!(parsed.sql.is_empty());
        assert_eq!(parsed.explanation, raw);
    }

    #[test]
    fn test_last_match_wins_per_field() {
        let text = "Explanation: the first reading.\n\n\
            Explanation: the corrected reading.";
        let parsed = parse_response(text);
        assert!(parsed.explanation.contains("corrected reading"));
        assert!(!parsed.explanation.contains("first reading"));
    }

    #[test]
    fn test_fence_takes_precedence_over_sql_query_phrase() {
        let text = "SQL Query: ```sql\nSELECT 2\n```";
        let parsed = parse_response(text);
        assert_eq!(parsed.sql, "SELECT 2");
    }

    #[test]
    fn test_bare_sql_query_phrase() {
        let text = "SQL Query: SELECT name FROM `p.d.t`";
        let parsed = parse_response(text);
        assert_eq!(parsed.sql, "SELECT name FROM `p.d.t`");
    }

    #[test]
    fn test_unclosed_fence_runs_to_end_of_paragraph() {
        let text = "```sql\nSELECT 3";
        let parsed = parse_response(text);
        assert_eq!(parsed.sql, "SELECT 3");
    }

    #[test]
    fn test_non_ascii_before_trigger_keeps_offsets_valid() {
        // "İ" lowercases to two chars (three bytes), so offsets taken from
        // a lowercased copy would not line up with the original paragraph.
        let text = "\u{130}SQL Query: SELECT name FROM `p.d.t` WHERE city = '\u{e9}p\u{e9}e'";
        let parsed = parse_response(text);
        assert_eq!(parsed.sql, "SELECT name FROM `p.d.t` WHERE city = '\u{e9}p\u{e9}e'");
    }

    #[test]
    fn test_non_ascii_before_fence_keeps_offsets_valid() {
        let text = "R\u{e9}sum\u{e9} \u{130}: ```SQL\nSELECT 4\n```";
        let parsed = parse_response(text);
        assert_eq!(parsed.sql, "SELECT 4");
    }

    #[test]
    fn test_understanding_wins_within_a_paragraph() {
        // One paragraph carrying several trigger words classifies as
        // understanding; the precedence is part of the contract.
        let text = "I understand that you want an explanation: totals per day.";
        let parsed = parse_response(text);
        assert!(!parsed.understanding.is_empty());
        assert!(parsed.explanation.is_empty());
    }
}

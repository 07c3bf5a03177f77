//! prompt.rs — instruction-template rendering for the model.
//!
//! Pure functions: identical schema map and transcript tail produce
//! byte-identical prompts.

use std::collections::BTreeMap;

use crate::schema::{format_schema_for_prompt, TableSchema};
use crate::transcript::Turn;

/// How many trailing turns of conversation travel with each new question.
pub const HISTORY_TURNS: usize = 3;

/// Render the fixed instruction template: assistant role, required
/// four-step response shape, the schema rendering, and the project id so
/// generated SQL is always fully qualified.
pub fn system_prompt(schema_info: &BTreeMap<String, TableSchema>, project_id: &str) -> String {
    let schema_text = format_schema_for_prompt(schema_info, project_id);

    format!(
        r#"You are an expert SQL assistant for Google BigQuery. Your role is to help users query their BigQuery tables using natural language.

I'll provide you with schema information about the available tables, and you'll need to:
1. Understand the user's natural language question
2. Translate it into a valid BigQuery SQL query
3. Generate a well-formatted SQL query that I will execute for you
4. Explain the results in a clear, helpful way

{schema_text}

When generating SQL:
- ALWAYS use fully qualified table names in the format `{project_id}.dataset_id.table_id`
- The current project ID is: {project_id}
- Include helpful comments in the SQL
- Be mindful of potential JOIN conditions between tables
- Use appropriate aggregations (SUM, AVG, COUNT, etc.) when needed
- Handle NULL values appropriately
- For time-based queries, use proper TIMESTAMP functions
- Optimize queries to minimize data processed when possible

In your responses:
1. First, briefly explain your understanding of the question
2. Show the SQL query you're generating with proper SQL syntax and formatting
3. After I execute the query, I'll share the results with you
4. Then provide a clear explanation of the output results from the SQL execution in simple terms. Break down the results and do an analysis to interpret the results if needed
5. Do not be overly verbose in your answers

Never make up or assume schema details that weren't provided. If you need additional information, ask the user for clarification.

Please handle the user's question step by step and think carefully about the SQL logic.
"#
    )
}

/// Append the transcript tail and the new question to the system prompt.
/// Only user text and prior assistant understanding/explanation travel with
/// the context; prior SQL and prior result rows never do.
pub fn conversation_context(system_prompt: &str, transcript: &[Turn], question: &str) -> String {
    let mut history = String::new();

    let tail: Vec<&Turn> = transcript
        .iter()
        .filter(|turn| !matches!(turn, Turn::Metadata { .. }))
        .collect();
    let start = tail.len().saturating_sub(HISTORY_TURNS);

    for turn in &tail[start..] {
        match turn {
            Turn::User { text } => {
                history.push_str(&format!("User: {}\n\n", text));
            }
            Turn::Assistant { understanding, explanation, .. } => {
                if !understanding.is_empty() {
                    history.push_str(&format!("Assistant's understanding: {}\n\n", understanding));
                }
                if let Some(explanation) = explanation {
                    if !explanation.is_empty() {
                        history.push_str(&format!("Assistant's explanation: {}\n\n", explanation));
                    }
                }
            }
            Turn::Metadata { .. } => {}
        }
    }

    if history.is_empty() {
        format!("{}\n\nUser's question: {}", system_prompt, question)
    } else {
        format!(
            "{}\n\nRecent conversation history:\n{}\n\nUser's new question: {}",
            system_prompt, history, question
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(text: &str) -> Turn {
        Turn::User { text: text.to_string() }
    }

    fn assistant(understanding: &str, sql: &str, explanation: &str) -> Turn {
        Turn::Assistant {
            understanding: understanding.to_string(),
            sql: sql.to_string(),
            query_result: None,
            explanation: Some(explanation.to_string()),
            error: None,
        }
    }

    #[test]
    fn test_empty_history_uses_plain_question_form() {
        let ctx = conversation_context("SYSTEM", &[], "How many rows?");
        assert_eq!(ctx, "SYSTEM\n\nUser's question: How many rows?");
    }

    #[test]
    fn test_history_excludes_sql_and_keeps_last_three_turns() {
        let transcript = vec![
            user("first question"),
            assistant("u1", "SELECT 1", "e1"),
            user("second question"),
            assistant("u2", "SELECT 2", "e2"),
        ];
        let ctx = conversation_context("SYSTEM", &transcript, "third question");
        // Only the last three turns survive.
        assert!(!ctx.contains("first question"));
        assert!(ctx.contains("u1"));
        assert!(ctx.contains("second question"));
        assert!(ctx.contains("Assistant's explanation: e2"));
        // Prior SQL never travels with the context.
        assert!(!ctx.contains("SELECT 1"));
        assert!(!ctx.contains("SELECT 2"));
        assert!(ctx.ends_with("User's new question: third question"));
    }

    #[test]
    fn test_context_is_deterministic() {
        let transcript = vec![user("q"), assistant("u", "SELECT 1", "e")];
        let a = conversation_context("SYSTEM", &transcript, "next");
        let b = conversation_context("SYSTEM", &transcript, "next");
        assert_eq!(a, b);
    }
}

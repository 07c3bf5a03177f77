//! orchestrator.rs — one conversational turn, end to end.
//!
//! Drives prompt building, the model call, reply parsing, query execution,
//! the single error-driven correction pass, and the follow-up explanation
//! request. The correction cap (default one attempt) bounds the cost and
//! latency of the loop; model-driven retries have no convergence guarantee.

use std::collections::BTreeMap;

use crate::executor::{self, format_rows, QueryResult};
use crate::gemini::TextModel;
use crate::logging::{app_error, app_info};
use crate::parser::parse_response;
use crate::prompt;
use crate::schema::TableSchema;
use crate::transcript::Turn;
use crate::warehouse::Warehouse;

const APOLOGY_CORRECTED_FAILED: &str = "I wasn't able to run a successful query even after \
    attempting to fix it. Could you please rephrase your question or provide more details?";
const APOLOGY_NO_CORRECTED_SQL: &str = "I couldn't generate a corrected SQL query. Could you \
    please rephrase your question or provide more details?";
const APOLOGY_NO_RETRY_LEFT: &str = "I wasn't able to run a successful query. Could you please \
    rephrase your question or provide more details?";

/// Pipeline states for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Drafting,
    AwaitingModel,
    Executing,
    Correcting,
    ReExecuting,
    Success,
    Failed,
}

/// The assistant turn produced for one user submission, plus how the turn
/// ended and how many SQL executions it took to get there.
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn: Turn,
    pub state: TurnState,
    pub execution_attempts: u32,
}

pub struct Orchestrator<'a> {
    warehouse: &'a dyn Warehouse,
    model: &'a dyn TextModel,
    max_correction_attempts: u32,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        warehouse: &'a dyn Warehouse,
        model: &'a dyn TextModel,
        max_correction_attempts: u32,
    ) -> Self {
        Orchestrator { warehouse, model, max_correction_attempts }
    }

    /// Run one user turn against the current schema and transcript tail.
    /// Model transport errors surface as a generic error turn rather than
    /// propagating; previously appended turns are never touched.
    pub async fn process_question(
        &self,
        schema_info: &BTreeMap<String, TableSchema>,
        project: &str,
        transcript: &[Turn],
        question: &str,
    ) -> TurnOutcome {
        let mut state = TurnState::Drafting;
        let system = prompt::system_prompt(schema_info, project);
        let context = prompt::conversation_context(&system, transcript, question);

        state = advance(state, TurnState::AwaitingModel);
        let reply = match self.model.generate(&context).await {
            Ok(reply) => reply,
            Err(e) => return self.model_error_turn(e.to_string()),
        };

        let parsed = parse_response(&reply);

        // No SQL extracted: terminal, the raw reply is the explanation.
        if parsed.sql.is_empty() {
            app_info("Model reply carried no SQL; turn ends without execution");
            return TurnOutcome {
                turn: Turn::Assistant {
                    understanding: parsed.understanding,
                    sql: String::new(),
                    query_result: None,
                    explanation: Some(reply),
                    error: None,
                },
                state: TurnState::Failed,
                execution_attempts: 0,
            };
        }

        state = advance(state, TurnState::Executing);
        let original_sql = parsed.sql.clone();
        let mut sql = parsed.sql;
        let mut attempts = 1u32;
        let mut result = executor::execute_query_soft(self.warehouse, &sql).await;

        if result.success {
            state = advance(state, TurnState::Success);
            return self
                .success_turn(parsed.understanding, sql, result, false, attempts, state)
                .await;
        }

        let original_error = result.error.clone().unwrap_or_default();

        // A single corrective pass per turn (the counter resets with each
        // question): hand the warehouse error back and re-execute whatever
        // SQL comes back, once per allowed attempt.
        let mut corrections = 0u32;
        while corrections < self.max_correction_attempts {
            corrections += 1;
            state = advance(state, TurnState::Correcting);

            let error_context = format!(
                "The SQL query failed with the following error:\n\n{}\n\n\
                 Please fix the SQL query and provide a corrected version.",
                result.error.as_deref().unwrap_or("unknown error")
            );

            let corrected_reply = match self.model.generate(&error_context).await {
                Ok(reply) => reply,
                Err(e) => return self.model_error_turn(e.to_string()),
            };

            let corrected = parse_response(&corrected_reply);
            if corrected.sql.is_empty() {
                advance(state, TurnState::Failed);
                return TurnOutcome {
                    turn: Turn::Assistant {
                        understanding: parsed.understanding,
                        sql: original_sql,
                        query_result: None,
                        explanation: Some(APOLOGY_NO_CORRECTED_SQL.to_string()),
                        error: Some(original_error),
                    },
                    state: TurnState::Failed,
                    execution_attempts: attempts,
                };
            }

            state = advance(state, TurnState::ReExecuting);
            sql = corrected.sql;
            attempts += 1;
            result = executor::execute_query_soft(self.warehouse, &sql).await;

            if result.success {
                state = advance(state, TurnState::Success);
                return self
                    .success_turn(parsed.understanding, sql, result, true, attempts, state)
                    .await;
            }
        }

        advance(state, TurnState::Failed);
        let (explanation, error) = if self.max_correction_attempts == 0 {
            (APOLOGY_NO_RETRY_LEFT, original_error)
        } else {
            (APOLOGY_CORRECTED_FAILED, result.error.unwrap_or(original_error))
        };

        TurnOutcome {
            turn: Turn::Assistant {
                understanding: parsed.understanding,
                // The corrected query did not survive either; the turn keeps
                // the SQL the model first proposed.
                sql: original_sql,
                query_result: None,
                explanation: Some(explanation.to_string()),
                error: Some(error),
            },
            state: TurnState::Failed,
            execution_attempts: attempts,
        }
    }

    /// Ask the model to explain the successful result, then assemble the
    /// final turn. The corrected-query path dumps only the first rows; the
    /// first-attempt path dumps them all.
    async fn success_turn(
        &self,
        understanding: String,
        sql: String,
        result: QueryResult,
        corrected: bool,
        attempts: u32,
        state: TurnState,
    ) -> TurnOutcome {
        let mut context = if corrected {
            String::from("The corrected SQL query was executed successfully. Here are the results:\n\n")
        } else {
            format!(
                "SQL Query: {}\n\nThe SQL query was executed successfully. Here are the results:\n\n",
                sql
            )
        };
        context.push_str(&format!(
            "Rows returned: {}\nExecution time: {:.2} ms\n\n",
            result.stats.rows, result.stats.elapsed_ms
        ));

        if result.rows.is_empty() {
            context.push_str("The query returned no results.\n\n");
        } else if corrected {
            let head = &result.rows[..result.rows.len().min(5)];
            context.push_str(&format!("Sample results:\n{}\n\n", format_rows(&result.columns, head)));
        } else {
            context.push_str(&format!("Results:\n{}\n\n", format_rows(&result.columns, &result.rows)));
        }

        context.push_str(
            "Please provide a clear explanation of these results in relation to the user's question.",
        );

        let explanation = match self.model.generate(&context).await {
            Ok(text) => Some(text),
            Err(e) => return self.model_error_turn(e.to_string()),
        };

        TurnOutcome {
            turn: Turn::Assistant {
                understanding,
                sql,
                query_result: Some(result),
                explanation,
                error: None,
            },
            state,
            execution_attempts: attempts,
        }
    }

    fn model_error_turn(&self, error: String) -> TurnOutcome {
        app_error(format!("Turn aborted by model error: {}", error));
        TurnOutcome {
            turn: Turn::Assistant {
                understanding: "I encountered an error while processing your query.".into(),
                sql: String::new(),
                query_result: None,
                explanation: Some(format!("Error: {}", error)),
                error: Some(error),
            },
            state: TurnState::Failed,
            execution_attempts: 0,
        }
    }
}

fn advance(from: TurnState, to: TurnState) -> TurnState {
    tracing::debug!(target: "tabletalk", "turn state {:?} -> {:?}", from, to);
    to
}

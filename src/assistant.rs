//! # Assistant turns
//!
//! One user question becomes one *turn*:
//!
//! 1. The question is stored as a user message. That message is the turn's
//!    **anchor**: every statement executed during the turn is recorded against
//!    it. An empty question re-runs the conversation and anchors on the last
//!    stored message instead.
//! 2. The model sees the template's system prompt, the template's seed messages,
//!    the stored history and the question.
//! 3. While the model asks for tools, they run one after another in the order
//!    requested and their output is appended to the conversation.
//! 4. The model's final text is stored as an assistant message, unless it is
//!    empty.
//!
//! Executed SQL is never validated. A failing statement is reported to the
//! model as text; a statement whose audit record could not be written still
//! runs and shows up as [`QueryRecord::Dropped`].

use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    conversations::TurnLog,
    discovery::SchemaDiscovery,
    error::{DbaiError, Result},
    llm::{
        ChatMessage, Completion, LanguageModel, assistant_tool_calls, history_message,
        system_message, tool_message, user_message,
    },
    models::{Message, Role},
    source::SourceDatabase,
    template::ChatTemplate,
    tools::{QueryRecord, Toolbox, tool_specs},
};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Everything one turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final model text, possibly empty.
    pub reply: String,
    /// The stored assistant message; `None` when the reply was empty.
    pub message: Option<Message>,
    /// Statements executed during the turn, in execution order.
    pub queries: Vec<QueryRecord>,
}

pub struct Assistant {
    model: Arc<dyn LanguageModel>,
    discovery: Arc<SchemaDiscovery>,
    source: Arc<dyn SourceDatabase>,
    log: Arc<dyn TurnLog>,
    template: ChatTemplate,
    max_tool_rounds: usize,
}

impl Assistant {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        discovery: Arc<SchemaDiscovery>,
        source: Arc<dyn SourceDatabase>,
        log: Arc<dyn TurnLog>,
        template: ChatTemplate,
    ) -> Self {
        Self {
            model,
            discovery,
            source,
            log,
            template,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds.max(1);
        self
    }

    /// Answer `user_text` in conversation `conversation_id`.
    ///
    /// # Parameters
    /// - `history`: messages already stored for the conversation, oldest first.
    ///
    /// # Errors
    /// - [`DbaiError::Persistence`] when the user or assistant message cannot be
    ///   stored, or when an empty question has no message to anchor on.
    /// - [`DbaiError::Model`] when the model fails, calls an unknown tool, or
    ///   keeps calling tools past the round limit.
    pub async fn run_turn(
        &self,
        conversation_id: i32,
        user_text: &str,
        history: &[Message],
    ) -> Result<TurnOutcome> {
        let anchor = if user_text.trim().is_empty() {
            history.last().cloned().ok_or_else(|| {
                DbaiError::Persistence(format!(
                    "conversation {conversation_id} has no message to answer"
                ))
            })?
        } else {
            self.log.add_message(conversation_id, Role::User, user_text)?
        };
        debug!(
            "Turn in conversation {} anchored on message {}",
            conversation_id, anchor.id
        );

        let mut messages = self.opening_messages(history, user_text)?;
        let toolbox = Toolbox {
            model: self.model.as_ref(),
            discovery: self.discovery.as_ref(),
            source: self.source.as_ref(),
            log: self.log.as_ref(),
            anchor_message_id: anchor.id,
        };
        let specs = tool_specs();
        let mut queries = Vec::new();

        for round in 1..=self.max_tool_rounds {
            match self.model.complete(&messages, &specs).await? {
                Completion::ToolCalls(calls) => {
                    debug!("Round {}: {} tool calls", round, calls.len());
                    messages.push(assistant_tool_calls(&calls));
                    for call in &calls {
                        let outcome = toolbox.run(call).await?;
                        messages.push(tool_message(&call.id, &outcome.output));
                        queries.extend(outcome.query);
                    }
                }
                Completion::Text(reply) => {
                    let message = if reply.trim().is_empty() {
                        None
                    } else {
                        Some(
                            self.log
                                .add_message(conversation_id, Role::Assistant, &reply)?,
                        )
                    };

                    info!(
                        "Turn in conversation {} finished after {} rounds, {} queries",
                        conversation_id,
                        round,
                        queries.len()
                    );
                    return Ok(TurnOutcome {
                        reply,
                        message,
                        queries,
                    });
                }
            }
        }

        Err(DbaiError::Model(format!(
            "no answer after {} tool rounds",
            self.max_tool_rounds
        )))
    }

    /// [`run_turn`](Self::run_turn) with a wall-clock limit.
    ///
    /// When the limit is hit the turn is abandoned: no assistant message is
    /// stored, while the user message and statements recorded so far remain.
    pub async fn run_turn_with_timeout(
        &self,
        limit: Duration,
        conversation_id: i32,
        user_text: &str,
        history: &[Message],
    ) -> Result<TurnOutcome> {
        tokio::time::timeout(limit, self.run_turn(conversation_id, user_text, history))
            .await
            .map_err(|_| DbaiError::TurnTimedOut(limit.as_secs()))?
    }

    fn opening_messages(&self, history: &[Message], user_text: &str) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::with_capacity(history.len() + self.template.messages.len() + 2);
        messages.push(system_message(&self.template.system_prompt));
        messages.extend(self.template.messages.iter().cloned());
        for message in history {
            messages.push(history_message(message)?);
        }
        if !user_text.trim().is_empty() {
            messages.push(user_message(user_text));
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        snapshot::SnapshotStore,
        testing::{FakeSource, RecordingLog, ScriptedModel},
    };
    use async_openai::types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestToolMessageContent,
    };
    use serde_json::json;

    struct Harness {
        _dir: tempfile::TempDir,
        model: Arc<ScriptedModel>,
        source: Arc<FakeSource>,
        log: Arc<RecordingLog>,
        assistant: Assistant,
    }

    fn harness(model: ScriptedModel, source: FakeSource, log: RecordingLog) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(model);
        let source = Arc::new(source);
        let log = Arc::new(log);
        let discovery = Arc::new(SchemaDiscovery::new(
            source.clone(),
            SnapshotStore::new(dir.path().join("database_structure.json")),
        ));
        let assistant = Assistant::new(
            model.clone(),
            discovery,
            source.clone(),
            log.clone(),
            ChatTemplate::default(),
        );
        Harness {
            _dir: dir,
            model,
            source,
            log,
            assistant,
        }
    }

    fn tool_outputs(messages: &[ChatMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|message| match message {
                ChatCompletionRequestMessage::Tool(tool) => match &tool.content {
                    ChatCompletionRequestToolMessageContent::Text(text) => Some(text.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn orders_script(final_text: &str) -> ScriptedModel {
        ScriptedModel::default()
            .with_tool_call("getDatabaseStructure", json!({}))
            .with_tool_call(
                "generateQuery",
                json!({"userRequest": "How many orders?", "databaseStructure": []}),
            )
            .with_tool_call("executeQuery", json!({"query": "SELECT COUNT(*) AS count FROM orders"}))
            .with_text(final_text)
            .with_object(json!({"query": "SELECT COUNT(*) AS count FROM orders"}))
    }

    #[tokio::test]
    async fn test_orders_question_runs_the_full_tool_chain() {
        let h = harness(
            orders_script("There are 42 orders."),
            FakeSource::orders().with_result(json!([{"count": 42}])),
            RecordingLog::default(),
        );

        let outcome = h.assistant.run_turn(1, "How many orders?", &[]).await.unwrap();

        assert_eq!(outcome.reply, "There are 42 orders.");
        let stored = h.log.messages();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, "user");
        assert_eq!(stored[0].content, "How many orders?");
        assert_eq!(stored[1].role, "assistant");
        assert_eq!(outcome.message.as_ref(), Some(&stored[1]));

        let queries = h.log.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].message_id, stored[0].id);
        assert_eq!(queries[0].content, "SELECT COUNT(*) AS count FROM orders");
        assert_eq!(outcome.queries, vec![QueryRecord::Recorded(queries[0].clone())]);

        assert_eq!(h.source.executed(), vec!["SELECT COUNT(*) AS count FROM orders"]);
        let requests = h.model.requests();
        assert_eq!(requests.len(), 4);
        let outputs = tool_outputs(requests.last().unwrap());
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[1], "SELECT COUNT(*) AS count FROM orders");
        assert_eq!(outputs[2], r#"[{"count":42}]"#);
    }

    #[tokio::test]
    async fn test_syntax_error_is_reported_to_the_model() {
        let model = ScriptedModel::default()
            .with_tool_call("executeQuery", json!({"query": "SELEC * FROM orders"}))
            .with_text("The query failed because of a syntax error.");
        let h = harness(
            model,
            FakeSource::orders().with_error("syntax error at or near \"SELEC\""),
            RecordingLog::default(),
        );

        let outcome = h.assistant.run_turn(1, "List orders", &[]).await.unwrap();

        let outputs = tool_outputs(h.model.requests().last().unwrap());
        assert_eq!(
            outputs,
            vec!["Error executing query: syntax error at or near \"SELEC\""]
        );
        assert_eq!(h.log.queries().len(), 1);
        assert_eq!(h.log.messages().len(), 2);
        assert!(outcome.message.is_some());
    }

    #[tokio::test]
    async fn test_unrecorded_query_still_runs_and_is_reported() {
        let model = ScriptedModel::default()
            .with_tool_call("executeQuery", json!({"query": "SELECT 1"}))
            .with_text("One.");
        let h = harness(
            model,
            FakeSource::orders().with_result(json!([{"?column?": 1}])),
            RecordingLog::failing_queries(),
        );

        let outcome = h.assistant.run_turn(1, "one?", &[]).await.unwrap();

        assert_eq!(
            outcome.queries,
            vec![QueryRecord::Dropped {
                content: "SELECT 1".to_string()
            }]
        );
        assert_eq!(h.source.executed(), vec!["SELECT 1"]);
        assert_eq!(outcome.reply, "One.");
    }

    #[tokio::test]
    async fn test_empty_answer_is_not_stored() {
        let h = harness(
            ScriptedModel::default().with_text(""),
            FakeSource::orders(),
            RecordingLog::default(),
        );

        let outcome = h.assistant.run_turn(1, "Anything?", &[]).await.unwrap();

        assert_eq!(outcome.reply, "");
        assert!(outcome.message.is_none());
        assert_eq!(h.log.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_question_anchors_on_last_history_message() {
        let model = ScriptedModel::default()
            .with_tool_call("executeQuery", json!({"query": "SELECT 2"}))
            .with_text("Two.");
        let h = harness(model, FakeSource::orders(), RecordingLog::default());
        let earlier = h.log.add_message(3, Role::User, "How many?").unwrap();

        h.assistant
            .run_turn(3, "", std::slice::from_ref(&earlier))
            .await
            .unwrap();

        assert_eq!(h.log.queries()[0].message_id, earlier.id);
        let first_request = &h.model.requests()[0];
        assert_eq!(first_request.len(), 2, "system prompt and history only");
        assert_eq!(first_request[1], user_message("How many?"));
    }

    #[tokio::test]
    async fn test_empty_question_without_history_fails() {
        let h = harness(
            ScriptedModel::default().with_text("unused"),
            FakeSource::orders(),
            RecordingLog::default(),
        );

        let result = h.assistant.run_turn(1, "  ", &[]).await;
        assert!(matches!(result, Err(DbaiError::Persistence(_))));
        assert!(h.model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unstorable_question_stops_the_turn() {
        let h = harness(
            ScriptedModel::default().with_text("unused"),
            FakeSource::orders(),
            RecordingLog::failing_messages(),
        );

        let result = h.assistant.run_turn(1, "How many orders?", &[]).await;
        assert!(matches!(result, Err(DbaiError::Persistence(_))));
        assert!(h.model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_tool_rounds_are_bounded() {
        let model = ScriptedModel::default()
            .with_tool_call("getDatabaseStructure", json!({}))
            .with_tool_call("getDatabaseStructure", json!({}))
            .with_tool_call("getDatabaseStructure", json!({}));
        let mut h = harness(model, FakeSource::orders(), RecordingLog::default());
        h.assistant = h.assistant.with_max_tool_rounds(2);

        let result = h.assistant.run_turn(1, "Loop forever", &[]).await;

        assert!(matches!(result, Err(DbaiError::Model(_))));
        assert_eq!(h.model.requests().len(), 2);
        assert_eq!(h.log.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_abandons_the_turn() {
        let model = ScriptedModel::default()
            .with_text("Too late.")
            .with_delay(Duration::from_millis(500));
        let h = harness(model, FakeSource::orders(), RecordingLog::default());

        let result = h
            .assistant
            .run_turn_with_timeout(Duration::from_millis(20), 1, "Slow?", &[])
            .await;

        assert!(matches!(result, Err(DbaiError::TurnTimedOut(_))));
        let stored = h.log.messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, "user");
    }
}

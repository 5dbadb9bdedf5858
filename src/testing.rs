//! In-memory stand-ins for the model, the connected database and the
//! conversation store, shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicI32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::{
    conversations::TurnLog,
    error::{DbaiError, Result},
    llm::{ChatMessage, Completion, LanguageModel, ObjectSchema},
    models::{Message, Query, Role},
    snapshot::TableRow,
    source::{Dialect, SourceDatabase},
    tools::{ToolCall, ToolSpec},
};

pub struct FakeSource {
    rows: Vec<TableRow>,
    result: std::result::Result<Vec<Map<String, Value>>, String>,
    metadata_error: Option<String>,
    executed: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(rows: Vec<TableRow>) -> Self {
        Self {
            rows,
            result: Ok(Vec::new()),
            metadata_error: None,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// A single `orders` table.
    pub fn orders() -> Self {
        Self::new(vec![
            TableRow::new("orders", "id", "integer"),
            TableRow::new("orders", "customer_id", "integer"),
            TableRow::new("orders", "total", "numeric"),
            TableRow::new("orders", "placed_at", "timestamp without time zone"),
        ])
    }

    pub fn with_result(mut self, rows: Value) -> Self {
        self.result = Ok(serde_json::from_value(rows).unwrap());
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.result = Err(message.to_string());
        self
    }

    pub fn with_metadata_error(mut self, message: &str) -> Self {
        self.metadata_error = Some(message.to_string());
        self
    }

    pub fn rows(&self) -> Vec<TableRow> {
        self.rows.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceDatabase for FakeSource {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn database_name(&self) -> Option<&str> {
        Some("shop")
    }

    async fn fetch_table_rows(&self) -> Result<Vec<TableRow>> {
        match &self.metadata_error {
            Some(message) => Err(DbaiError::Query(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }

    async fn execute_unchecked(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.result.clone().map_err(DbaiError::Query)
    }
}

/// Replays scripted completions and objects in order.
#[derive(Default)]
pub struct ScriptedModel {
    completions: Mutex<VecDeque<Completion>>,
    objects: Mutex<VecDeque<Value>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    object_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn with_text(self, text: &str) -> Self {
        self.completions
            .lock()
            .unwrap()
            .push_back(Completion::Text(text.to_string()));
        self
    }

    pub fn with_tool_call(self, name: &str, arguments: Value) -> Self {
        let id = format!("call_{}", self.completions.lock().unwrap().len() + 1);
        self.completions
            .lock()
            .unwrap()
            .push_back(Completion::ToolCalls(vec![ToolCall {
                id,
                name: name.to_string(),
                arguments: arguments.to_string(),
            }]));
        self
    }

    pub fn with_object(self, object: Value) -> Self {
        self.objects.lock().unwrap().push_back(object);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn object_prompts(&self) -> Vec<String> {
        self.object_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<Completion> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(messages.to_vec());
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DbaiError::Model("no scripted completion left".to_string()))
    }

    async fn generate_object(
        &self,
        _system: &str,
        prompt: &str,
        _schema: ObjectSchema,
    ) -> Result<Value> {
        self.object_prompts.lock().unwrap().push(prompt.to_string());
        self.objects
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DbaiError::Model("no scripted object left".to_string()))
    }
}

/// [`TurnLog`] that keeps everything in memory and can be told to fail.
#[derive(Default)]
pub struct RecordingLog {
    next_id: AtomicI32,
    messages: Mutex<Vec<Message>>,
    queries: Mutex<Vec<Query>>,
    fail_messages: bool,
    fail_queries: bool,
}

impl RecordingLog {
    pub fn failing_queries() -> Self {
        Self {
            fail_queries: true,
            ..Self::default()
        }
    }

    pub fn failing_messages() -> Self {
        Self {
            fail_messages: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }
}

impl TurnLog for RecordingLog {
    fn add_message(&self, conversation_id: i32, role: Role, content: &str) -> Result<Message> {
        if self.fail_messages {
            return Err(DbaiError::Persistence("database is locked".to_string()));
        }
        let message = Message {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            conversation_id,
            content: content.to_string(),
            role: role.as_str().to_string(),
            created_at: Utc::now().naive_utc(),
        };
        self.messages.lock().unwrap().push(message.clone());
        Ok(message)
    }

    fn add_query(&self, message_id: i32, content: &str) -> Result<Query> {
        if self.fail_queries {
            return Err(DbaiError::Persistence("database is locked".to_string()));
        }
        let query = Query {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            message_id,
            content: content.to_string(),
            created_at: Utc::now().naive_utc(),
        };
        self.queries.lock().unwrap().push(query.clone());
        Ok(query)
    }
}

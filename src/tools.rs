//! # Tools
//!
//! The three functions the model may call while answering a question:
//!
//! | Tool                   | Arguments                              | Output                          |
//! |------------------------|----------------------------------------|---------------------------------|
//! | `getDatabaseStructure` | none                                   | live columns as a JSON array    |
//! | `generateQuery`        | `userRequest`, `databaseStructure`     | one SQL statement               |
//! | `executeQuery`         | `query`                                | result rows as a JSON array     |
//!
//! [`Toolbox::run`] executes one call. `executeQuery` records the statement on the
//! turn's anchor message before running it. A failed recording is logged and
//! reported as [`QueryRecord::Dropped`]; a failed execution becomes the text
//! `Error executing query: <message>` so the model can react to it. Failures of
//! the other two tools propagate.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    conversations::TurnLog,
    discovery::SchemaDiscovery,
    error::{DbaiError, Result},
    llm::{LanguageModel, ObjectSchema},
    models::Query,
    source::SourceDatabase,
};

const SQL_GENERATOR_PROMPT: &str = "You are a SQL query generator. Generate a SQL query based on the user's request and the provided database structure.";

/// Function definition offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

/// The tools understood by [`Toolbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    GetDatabaseStructure,
    GenerateQuery,
    ExecuteQuery,
}

impl ToolName {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "getDatabaseStructure" => Some(ToolName::GetDatabaseStructure),
            "generateQuery" => Some(ToolName::GenerateQuery),
            "executeQuery" => Some(ToolName::ExecuteQuery),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetDatabaseStructure => "getDatabaseStructure",
            ToolName::GenerateQuery => "generateQuery",
            ToolName::ExecuteQuery => "executeQuery",
        }
    }
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: ToolName::GetDatabaseStructure.as_str(),
            description: "Get the structure of the database.",
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: ToolName::GenerateQuery.as_str(),
            description: "Generate a SQL query based on the user's request and the database structure.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "userRequest": {"type": "string", "description": "The user's request"},
                    "databaseStructure": {"description": "The structure of the database"}
                },
                "required": ["userRequest", "databaseStructure"]
            }),
        },
        ToolSpec {
            name: ToolName::ExecuteQuery.as_str(),
            description: "Execute the generated SQL query and return the results. \
                Please make sure to use the mermaid format correctly, it must be started with \"```mermaid\" and ended with \"```\". \
                Only one mermaid chart is allowed per response.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The SQL query to execute"}
                },
                "required": ["query"]
            }),
        },
    ]
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

impl ToolCall {
    fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = if self.arguments.trim().is_empty() {
            "{}"
        } else {
            self.arguments.as_str()
        };
        serde_json::from_str(raw).map_err(|err| {
            DbaiError::Model(format!("malformed arguments for {}: {}", self.name, err))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateQueryArgs {
    user_request: String,
    #[serde(default)]
    database_structure: Value,
}

#[derive(Debug, Deserialize)]
struct ExecuteQueryArgs {
    query: String,
}

/// What happened to an executed statement's audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum QueryRecord {
    Recorded(Query),
    /// The statement ran but could not be stored.
    Dropped { content: String },
}

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Text handed back to the model.
    pub output: String,
    pub query: Option<QueryRecord>,
}

impl ToolOutcome {
    fn text(output: String) -> Self {
        Self {
            output,
            query: None,
        }
    }
}

/// Everything a tool call may touch during one turn.
pub struct Toolbox<'a> {
    pub model: &'a dyn LanguageModel,
    pub discovery: &'a SchemaDiscovery,
    pub source: &'a dyn SourceDatabase,
    pub log: &'a dyn TurnLog,
    /// Message that executed statements are recorded against.
    pub anchor_message_id: i32,
}

impl Toolbox<'_> {
    /// Execute `call`.
    ///
    /// # Errors
    /// - [`DbaiError::Model`] for unknown tools, malformed arguments or a bad
    ///   `generateQuery` response.
    /// - Discovery errors from `getDatabaseStructure`.
    pub async fn run(&self, call: &ToolCall) -> Result<ToolOutcome> {
        let tool = ToolName::parse(&call.name)
            .ok_or_else(|| DbaiError::Model(format!("unknown tool {}", call.name)))?;
        debug!("Running tool {} ({})", tool.as_str(), call.id);

        match tool {
            ToolName::GetDatabaseStructure => {
                let rows = self.discovery.discover().await?;
                let output = serde_json::to_string(&rows)
                    .map_err(|err| DbaiError::Snapshot(err.to_string()))?;
                Ok(ToolOutcome::text(output))
            }
            ToolName::GenerateQuery => {
                let args: GenerateQueryArgs = call.parse_arguments()?;
                let query = self.generate_query(&args).await?;
                Ok(ToolOutcome::text(query))
            }
            ToolName::ExecuteQuery => {
                let args: ExecuteQueryArgs = call.parse_arguments()?;
                Ok(self.execute_query(args.query).await)
            }
        }
    }

    async fn generate_query(&self, args: &GenerateQueryArgs) -> Result<String> {
        let prompt = format!(
            "User request: \"{}\"\nDatabase structure: {}\nGenerate an appropriate SQL query:",
            args.user_request, args.database_structure
        );
        let schema = ObjectSchema::new(
            "sql_query",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The generated SQL query"}
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        );

        let object = self
            .model
            .generate_object(SQL_GENERATOR_PROMPT, &prompt, schema)
            .await?;

        object
            .get("query")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DbaiError::Model("generated object has no query".to_string()))
    }

    async fn execute_query(&self, sql: String) -> ToolOutcome {
        let record = match self.log.add_query(self.anchor_message_id, &sql) {
            Ok(query) => QueryRecord::Recorded(query),
            Err(err) => {
                warn!(
                    "Could not record query on message {}: {}",
                    self.anchor_message_id, err
                );
                QueryRecord::Dropped {
                    content: sql.clone(),
                }
            }
        };

        let output = match self.source.execute_unchecked(&sql).await {
            Ok(rows) => serde_json::to_string(&rows)
                .unwrap_or_else(|err| format!("Error executing query: {err}")),
            Err(err) => format!("Error executing query: {}", execution_error_message(&err)),
        };

        ToolOutcome {
            output,
            query: Some(record),
        }
    }
}

fn execution_error_message(err: &DbaiError) -> String {
    match err {
        DbaiError::Query(message) => message.clone(),
        other => other.to_string(),
    }
}

//! # Language model
//!
//! The orchestration loop and the generators only know the [`LanguageModel`]
//! trait. It offers two kinds of calls:
//!
//! - [`LanguageModel::complete`]: one chat completion with tools available. The
//!   model answers with either tool calls or final text ([`Completion`]).
//! - [`LanguageModel::generate_object`]: one completion constrained to a JSON
//!   schema (`response_format = json_schema`), parsed into a [`Value`].
//!
//! [`OpenAiModel`] implements both against any OpenAI compatible endpoint with
//! `async-openai`. Chat history is expressed directly in async-openai's request
//! message type ([`ChatMessage`]); the helpers in this module build the variants
//! the loop needs.
//!
//! # Example
//!
//! ```no_run
//! use dbai::config::DbaiConfig;
//! use dbai::llm::{LanguageModel, OpenAiModel, user_message};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let model = OpenAiModel::new(&DbaiConfig::default());
//! let completion = model.complete(&[user_message("How many orders?")], &[]).await?;
//! println!("{completion:?}");
//! # Ok(()) }
//! ```

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestToolMessage,
        ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionTools,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionCall,
        FunctionObject, ResponseFormat, ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{
    config::DbaiConfig,
    error::{DbaiError, Result},
    models::{Message, Role},
    tools::{ToolCall, ToolSpec},
};

/// A message as sent to the chat completion endpoint.
pub type ChatMessage = ChatCompletionRequestMessage;

/// What the model did with one completion request.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The model wants these tools run, in order, before it continues.
    ToolCalls(Vec<ToolCall>),
    /// The model's final answer. May be empty.
    Text(String),
}

/// JSON schema a structured generation must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub name: String,
    pub description: Option<String>,
    pub schema: Value,
}

impl ObjectSchema {
    pub fn new(name: &str, schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            schema,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one tool-enabled chat completion over `messages`.
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion>;

    /// Generate one JSON value that satisfies `schema`.
    async fn generate_object(&self, system: &str, prompt: &str, schema: ObjectSchema)
    -> Result<Value>;
}

/// [`LanguageModel`] backed by an OpenAI compatible chat completion API.
#[derive(Clone)]
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAiModel {
    /// Creates a new model client from configuration.
    ///
    /// # Parameters
    /// - `config: &DbaiConfig`: Configuration containing API base, key, model and token limit.
    pub fn new(config: &DbaiConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());
        debug!("Client created for {} ({})", config.api_base, config.model);

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    fn request_args(&self, messages: Vec<ChatMessage>) -> CreateChatCompletionRequestArgs {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone()).messages(messages);
        if let Some(max_tokens) = self.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        args
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<Completion> {
        let mut args = self.request_args(messages.to_vec());
        if !tools.is_empty() {
            args.tools(tools.iter().map(tool_definition).collect::<Vec<_>>());
        }
        let request = args.build()?;

        debug!(
            "Sending completion request: {} messages, {} tools",
            messages.len(),
            tools.len()
        );
        let response = self.client.chat().create(request).await?;

        completion_from_response(response)
    }

    async fn generate_object(
        &self,
        system: &str,
        prompt: &str,
        schema: ObjectSchema,
    ) -> Result<Value> {
        let mut args = self.request_args(vec![system_message(system), user_message(prompt)]);
        args.response_format(ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: schema.description,
                name: schema.name.clone(),
                schema: Some(schema.schema),
                strict: Some(true),
            },
        });
        let request = args.build()?;

        debug!("Sending structured request for {}", schema.name);
        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| DbaiError::Model(format!("empty response for {}", schema.name)))?;

        serde_json::from_str(&content)
            .map_err(|err| DbaiError::Model(format!("{} is not valid JSON: {}", schema.name, err)))
    }
}

fn tool_definition(spec: &ToolSpec) -> ChatCompletionTools {
    ChatCompletionTools::Function(ChatCompletionTool {
        function: FunctionObject {
            name: spec.name.to_string(),
            description: Some(spec.description.to_string()),
            parameters: Some(spec.parameters.clone()),
            strict: None,
        },
    })
}

fn completion_from_response(response: CreateChatCompletionResponse) -> Result<Completion> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| DbaiError::Model("response contained no choices".to_string()))?;

    let tool_calls = choice.message.tool_calls.unwrap_or_default();
    if tool_calls.is_empty() {
        return Ok(Completion::Text(choice.message.content.unwrap_or_default()));
    }

    tool_calls
        .into_iter()
        .map(|call| match call {
            ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                id,
                function,
            }) => Ok(ToolCall {
                id,
                name: function.name,
                arguments: function.arguments,
            }),
            ChatCompletionMessageToolCalls::Custom(custom) => Err(DbaiError::Model(format!(
                "unsupported custom tool call {}",
                custom.id
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Completion::ToolCalls)
}

pub fn system_message(content: &str) -> ChatMessage {
    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
        content: ChatCompletionRequestSystemMessageContent::Text(content.to_string()),
        name: None,
    })
}

pub fn user_message(content: &str) -> ChatMessage {
    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
        content: ChatCompletionRequestUserMessageContent::Text(content.to_string()),
        name: None,
    })
}

pub fn assistant_message(content: &str) -> ChatMessage {
    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
        content: Some(ChatCompletionRequestAssistantMessageContent::Text(
            content.to_string(),
        )),
        ..Default::default()
    })
}

/// The assistant turn that requested `calls`; must precede their tool messages.
pub fn assistant_tool_calls(calls: &[ToolCall]) -> ChatMessage {
    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
        tool_calls: Some(
            calls
                .iter()
                .map(|call| {
                    ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                        id: call.id.clone(),
                        function: FunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    })
                })
                .collect(),
        ),
        ..Default::default()
    })
}

pub fn tool_message(tool_call_id: &str, content: &str) -> ChatMessage {
    ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
        content: ChatCompletionRequestToolMessageContent::Text(content.to_string()),
        tool_call_id: tool_call_id.to_string(),
    })
}

/// Convert a stored message into chat history.
///
/// Rows with an unknown role are rejected with [`DbaiError::Persistence`].
pub fn history_message(message: &Message) -> Result<ChatMessage> {
    Ok(match message.role()? {
        Role::User => user_message(&message.content),
        Role::Assistant => assistant_message(&message.content),
        Role::System => system_message(&message.content),
    })
}

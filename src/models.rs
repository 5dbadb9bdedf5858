//! # Database models
//!
//! Data structures that map to the conversation store's SQLite schema via **Diesel**.
//!
//! - [`Conversation`]: a titled chat thread.
//! - [`Message`]: one record per turn (system/user/assistant) within a conversation.
//! - [`Query`]: one SQL statement executed while the assistant produced an answer.
//!
//! Rows are read through the `Queryable`/`Selectable` structs and written through
//! the matching `New*` insertables, so ids and timestamps are always set by the
//! store rather than by callers.
//!
//! ## Ownership
//!
//! `queries → messages → conversations`, each link a non-null foreign key with
//! `ON DELETE CASCADE` (see [`crate::conversations::SCHEMA_SQL`]).
//!
//! ## Basic usage
//!
//! ```no_run
//! use dbai::conversations::{ConversationStore, TurnLog};
//! use dbai::models::Role;
//!
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ConversationStore::open("dbai.db", 4)?;
//! let convo = store.create_conversation("orders")?;
//! let msg = store.add_message(convo.id, Role::User, "How many orders?")?;
//! store.add_query(msg.id, "SELECT COUNT(*) FROM orders")?;
//! # Ok(()) }
//! ```

use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::DbaiError;

/// Sender of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DbaiError;

    fn from_str(role: &str) -> Result<Self, Self::Err> {
        match role {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(DbaiError::Persistence(format!(
                "Role in message not allowed: {other}"
            ))),
        }
    }
}

/// A titled chat thread.
///
/// ### Table
/// - `conversations`
#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::conversations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Auto-increment primary key.
    pub id: i32,
    /// Human readable title shown in the sidebar.
    pub title: String,
    pub created_at: NaiveDateTime,
    /// Bumped on rename.
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::conversations)]
pub struct NewConversation<'a> {
    pub title: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// One turn in a conversation.
///
/// Never mutated after insertion. Associated with exactly one [`Conversation`].
///
/// ### Role values
/// - `"system"`: system instructions or preamble
/// - `"user"`: user input
/// - `"assistant"`: model output
#[derive(
    Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone, PartialEq,
)]
#[diesel(belongs_to(Conversation))]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i32,
    /// Foreign key to the owning [`Conversation`].
    pub conversation_id: i32,
    /// Raw message text.
    pub content: String,
    /// Sender role: `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    pub created_at: NaiveDateTime,
}

impl Message {
    /// Parsed [`Role`] of this message.
    pub fn role(&self) -> Result<Role, DbaiError> {
        self.role.parse()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::messages)]
pub struct NewMessage<'a> {
    pub conversation_id: i32,
    pub content: &'a str,
    pub role: &'a str,
    pub created_at: NaiveDateTime,
}

/// A SQL statement executed while producing an assistant reply.
#[derive(
    Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone, PartialEq,
)]
#[diesel(belongs_to(Message))]
#[diesel(table_name = crate::schema::queries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: i32,
    /// Foreign key to the owning [`Message`].
    pub message_id: i32,
    /// The SQL text exactly as the model produced it.
    pub content: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::queries)]
pub struct NewQuery<'a> {
    pub message_id: i32,
    pub content: &'a str,
    pub created_at: NaiveDateTime,
}

/// A message together with the queries recorded against it.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageWithQueries {
    #[serde(flatten)]
    pub message: Message,
    pub queries: Vec<Query>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_text() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let message = Message {
            id: 7,
            conversation_id: 3,
            content: "hi".to_string(),
            role: "user".to_string(),
            created_at: chrono::DateTime::from_timestamp(0, 0).unwrap().naive_utc(),
        };
        let json = serde_json::to_value(MessageWithQueries {
            message,
            queries: vec![],
        })
        .unwrap();
        assert_eq!(json["conversationId"], 3);
        assert_eq!(json["role"], "user");
        assert!(json["queries"].as_array().unwrap().is_empty());
    }
}

//! # Conversation store
//!
//! Durable record of chat sessions: conversations, their messages and the SQL
//! statements executed while the assistant answered.
//!
//! ## What this module owns
//! - [`ConversationStore`], a pooled Diesel/SQLite handle. Every pooled
//!   connection enables `PRAGMA foreign_keys`, so deleting a conversation cascades
//!   to its messages and, transitively, to their queries.
//! - [`TurnLog`], the narrow write interface the orchestration loop depends on.
//!
//! ## Typical flow (high level)
//! 1. `ConversationStore::open(url, pool_size)` bootstraps the schema.
//! 2. A user message is stored when a turn starts.
//! 3. Each executed statement is stored as a [`Query`] on that message.
//! 4. The assistant's final answer is stored as a new message.

use chrono::Utc;
use diesel::prelude::*;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use tracing::{debug, info};

use crate::error::{DbaiError, Result};
use crate::models::{
    Conversation, Message, MessageWithQueries, NewConversation, NewMessage, NewQuery, Query, Role,
};
use crate::schema::{conversations, messages, queries};

/// Tables of the conversation store, created on first open.
pub const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title VARCHAR(256) NOT NULL,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    );
    CREATE INDEX IF NOT EXISTS title_idx ON conversations(title);
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        role VARCHAR(20) NOT NULL,
        created_at TIMESTAMP NOT NULL,
        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id);
    CREATE TABLE IF NOT EXISTS queries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL,
        FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_queries_message_id ON queries(message_id);
";

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Per-connection settings applied whenever the pool opens a connection.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Write side of the store used while a turn runs.
///
/// Kept as a trait so the orchestration loop can be exercised against stores
/// that fail on purpose.
pub trait TurnLog: Send + Sync {
    fn add_message(&self, conversation_id: i32, role: Role, content: &str) -> Result<Message>;
    fn add_query(&self, message_id: i32, content: &str) -> Result<Query>;
}

/// Pooled handle to the conversation database.
#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    /// Open (or create) the SQLite database at `database_url` and create missing tables.
    ///
    /// # Parameters
    /// - `database_url`: SQLite path, e.g. `dbai.db`.
    /// - `pool_size`: maximum number of pooled connections.
    pub fn open(database_url: &str, pool_size: u32) -> Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout_ms: 5_000,
            }))
            .build(manager)?;

        let store = Self { pool };
        store.connection()?.batch_execute(SCHEMA_SQL)?;
        info!("Conversation store ready at {}", database_url);

        Ok(store)
    }

    fn connection(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        Ok(self.pool.get()?)
    }

    /// Create a new conversation with the given title.
    pub fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let now = Utc::now().naive_utc();
        let conversation = diesel::insert_into(conversations::table)
            .values(&NewConversation {
                title,
                created_at: now,
                updated_at: now,
            })
            .returning(Conversation::as_returning())
            .get_result(&mut self.connection()?)?;

        debug!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    /// Rename a conversation and bump its `updated_at`.
    pub fn rename_conversation(&self, id: i32, title: &str) -> Result<Conversation> {
        diesel::update(conversations::table.find(id))
            .set((
                conversations::title.eq(title),
                conversations::updated_at.eq(Utc::now().naive_utc()),
            ))
            .returning(Conversation::as_returning())
            .get_result(&mut self.connection()?)
            .optional()?
            .ok_or_else(|| DbaiError::NotFound(format!("conversation {id}")))
    }

    /// Delete a conversation. Its messages and their queries go with it.
    pub fn delete_conversation(&self, id: i32) -> Result<()> {
        let deleted = diesel::delete(conversations::table.find(id))
            .execute(&mut self.connection()?)?;

        if deleted == 0 {
            return Err(DbaiError::NotFound(format!("conversation {id}")));
        }

        debug!("Deleted conversation {}", id);
        Ok(())
    }

    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(conversations::table
            .order(conversations::id.asc())
            .select(Conversation::as_select())
            .load(&mut self.connection()?)?)
    }

    pub fn get_conversation(&self, id: i32) -> Result<Conversation> {
        conversations::table
            .find(id)
            .select(Conversation::as_select())
            .first(&mut self.connection()?)
            .optional()?
            .ok_or_else(|| DbaiError::NotFound(format!("conversation {id}")))
    }

    /// All messages of a conversation in insertion order, each with its queries.
    pub fn conversation_messages(&self, conversation_id: i32) -> Result<Vec<MessageWithQueries>> {
        let mut conn = self.connection()?;

        let conversation_messages: Vec<Message> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order(messages::id.asc())
            .select(Message::as_select())
            .load(&mut conn)?;

        let message_queries: Vec<Query> = Query::belonging_to(&conversation_messages)
            .order(queries::id.asc())
            .select(Query::as_select())
            .load(&mut conn)?;

        Ok(message_queries
            .grouped_by(&conversation_messages)
            .into_iter()
            .zip(conversation_messages)
            .map(|(queries, message)| MessageWithQueries { message, queries })
            .collect())
    }

    /// A single message with its queries, or `None` if it does not exist.
    pub fn message_with_queries(&self, message_id: i32) -> Result<Option<MessageWithQueries>> {
        let mut conn = self.connection()?;

        let message: Option<Message> = messages::table
            .find(message_id)
            .select(Message::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(message) = message else {
            return Ok(None);
        };

        let queries: Vec<Query> = Query::belonging_to(&message)
            .order(queries::id.asc())
            .select(Query::as_select())
            .load(&mut conn)?;

        Ok(Some(MessageWithQueries { message, queries }))
    }
}

impl TurnLog for ConversationStore {
    fn add_message(&self, conversation_id: i32, role: Role, content: &str) -> Result<Message> {
        debug!(
            "Adding {} message to conversation {} ({} chars)",
            role,
            conversation_id,
            content.len()
        );

        let message = diesel::insert_into(messages::table)
            .values(&NewMessage {
                conversation_id,
                content,
                role: role.as_str(),
                created_at: Utc::now().naive_utc(),
            })
            .returning(Message::as_returning())
            .get_result(&mut self.connection()?)
            .map_err(|err| DbaiError::Persistence(err.to_string()))?;

        Ok(message)
    }

    fn add_query(&self, message_id: i32, content: &str) -> Result<Query> {
        let query = diesel::insert_into(queries::table)
            .values(&NewQuery {
                message_id,
                content,
                created_at: Utc::now().naive_utc(),
            })
            .returning(Query::as_returning())
            .get_result(&mut self.connection()?)
            .map_err(|err| DbaiError::Persistence(err.to_string()))?;

        Ok(query)
    }
}

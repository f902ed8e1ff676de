//! SQLite-backed conversation store.
//!
//! One connection behind a mutex, WAL journaling, and a busy timeout so that
//! concurrent handles on the same file back off instead of failing. Message
//! appends and their chat counter updates commit in a single transaction.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pcommon::{BoxFuture, ChatId, MessageId, UserId};
use pprovider::ProviderId;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::feed::FeedHub;
use crate::{
    ChatListFeed, ChatRecord, ConversationStore, MessageFeed, MessageRecord, OWNER_CHAT_LIMIT,
    Sender, StoreError,
};

pub struct SqliteConversationStore {
    connection: Mutex<Connection>,
    feeds: FeedHub,
}

impl SqliteConversationStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|error| {
                StoreError::storage(format!("failed to create sqlite parent directory: {error}"))
            })?;
        }

        let connection = Connection::open(path).map_err(|error| {
            StoreError::storage(format!("failed to open sqlite database: {error}"))
        })?;
        Self::from_connection(connection)
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(|error| {
            StoreError::storage(format!("failed to open in-memory sqlite database: {error}"))
        })?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self, StoreError> {
        connection
            .busy_timeout(Duration::from_secs(5))
            .map_err(|error| {
                StoreError::storage(format!("failed to configure sqlite busy timeout: {error}"))
            })?;
        let store = Self {
            connection: Mutex::new(connection),
            feeds: FeedHub::new(),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::storage("sqlite store lock poisoned"))
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS chats (
                chat_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                user_id TEXT NOT NULL,
                ai_provider TEXT NOT NULL,
                message_count INTEGER NOT NULL,
                last_message TEXT,
                is_anonymous INTEGER NOT NULL,
                created_at_millis INTEGER NOT NULL,
                updated_at_millis INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chats_owner_updated
            ON chats(user_id, updated_at_millis DESC);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                chat_id TEXT NOT NULL,
                text TEXT NOT NULL,
                sender TEXT NOT NULL,
                ai_provider TEXT NOT NULL,
                user_id TEXT NOT NULL,
                timestamp_millis INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_timestamp
            ON messages(chat_id, timestamp_millis, id);
            ",
        )
        .map_err(|error| {
            StoreError::storage(format!("failed to initialize sqlite schema: {error}"))
        })?;

        Ok(())
    }

    fn query_messages(
        conn: &Connection,
        chat_id: &ChatId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let mut stmt = conn
            .prepare(
                "
                SELECT message_id, chat_id, text, sender, ai_provider, user_id, timestamp_millis
                FROM messages
                WHERE chat_id = ?1
                ORDER BY timestamp_millis ASC, id ASC
                ",
            )
            .map_err(|error| {
                StoreError::storage(format!("failed to prepare message query: {error}"))
            })?;
        let rows = stmt
            .query_map(params![chat_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(|error| {
                StoreError::storage(format!("failed to query message rows: {error}"))
            })?;

        let mut messages = Vec::new();
        for row in rows {
            let (message_id, chat_id, text, sender, ai_provider, user_id, timestamp_millis) = row
                .map_err(|error| {
                StoreError::storage(format!("failed to read message row: {error}"))
            })?;
            messages.push(MessageRecord {
                id: MessageId::new(message_id),
                chat_id: ChatId::new(chat_id),
                text,
                sender: sender_from_str(&sender)?,
                ai: provider_from_str(&ai_provider)?,
                user_id: UserId::new(user_id),
                timestamp: decode_timestamp(timestamp_millis)?,
            });
        }
        Ok(messages)
    }

    fn query_owner_chats(conn: &Connection, owner: &UserId) -> Result<Vec<ChatRecord>, StoreError> {
        if owner.is_anonymous() {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(
                "
                SELECT
                    chat_id,
                    title,
                    user_id,
                    ai_provider,
                    message_count,
                    last_message,
                    is_anonymous,
                    created_at_millis,
                    updated_at_millis
                FROM chats
                WHERE user_id = ?1 AND is_anonymous = 0
                ORDER BY updated_at_millis DESC
                LIMIT ?2
                ",
            )
            .map_err(|error| {
                StoreError::storage(format!("failed to prepare chat list query: {error}"))
            })?;
        let rows = stmt
            .query_map(params![owner.as_str(), OWNER_CHAT_LIMIT as i64], chat_row)
            .map_err(|error| StoreError::storage(format!("failed to query chat rows: {error}")))?;

        let mut chats = Vec::new();
        for row in rows {
            let raw = row.map_err(|error| {
                StoreError::storage(format!("failed to read chat row: {error}"))
            })?;
            chats.push(decode_chat(raw)?);
        }
        Ok(chats)
    }

    fn query_chat(conn: &Connection, chat_id: &ChatId) -> Result<Option<ChatRecord>, StoreError> {
        let raw = conn
            .query_row(
                "
                SELECT
                    chat_id,
                    title,
                    user_id,
                    ai_provider,
                    message_count,
                    last_message,
                    is_anonymous,
                    created_at_millis,
                    updated_at_millis
                FROM chats
                WHERE chat_id = ?1
                ",
                params![chat_id.as_str()],
                chat_row,
            )
            .optional()
            .map_err(|error| StoreError::storage(format!("failed to load chat row: {error}")))?;

        raw.map(decode_chat).transpose()
    }
}

type RawChatRow = (
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    i64,
    i64,
    i64,
);

fn chat_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChatRow> {
    Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, String>(3)?,
        row.get::<_, i64>(4)?,
        row.get::<_, Option<String>>(5)?,
        row.get::<_, i64>(6)?,
        row.get::<_, i64>(7)?,
        row.get::<_, i64>(8)?,
    ))
}

fn decode_chat(raw: RawChatRow) -> Result<ChatRecord, StoreError> {
    let (
        chat_id,
        title,
        user_id,
        ai_provider,
        message_count,
        last_message,
        is_anonymous,
        created_at_millis,
        updated_at_millis,
    ) = raw;
    Ok(ChatRecord {
        id: ChatId::new(chat_id),
        title,
        user_id: UserId::new(user_id),
        ai_provider: provider_from_str(&ai_provider)?,
        message_count: u32::try_from(message_count).map_err(|_| {
            StoreError::storage(format!(
                "chat message count out of range: {message_count}"
            ))
        })?,
        last_message,
        is_anonymous: is_anonymous != 0,
        created_at: decode_timestamp(created_at_millis)?,
        updated_at: decode_timestamp(updated_at_millis)?,
    })
}

fn sender_from_str(value: &str) -> Result<Sender, StoreError> {
    match value {
        "user" => Ok(Sender::User),
        "ai" => Ok(Sender::Ai),
        _ => Err(StoreError::storage(format!(
            "unknown message sender value '{value}'"
        ))),
    }
}

fn provider_from_str(value: &str) -> Result<ProviderId, StoreError> {
    ProviderId::from_str(value).map_err(|error| StoreError::storage(error.message))
}

fn decode_timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StoreError::storage(format!("timestamp out of range: {millis}"))
    })
}

impl ConversationStore for SqliteConversationStore {
    fn create_chat<'a>(
        &'a self,
        title: &'a str,
        provider: ProviderId,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatId, StoreError>> {
        Box::pin(async move {
            let chat_id = ChatId::new(Uuid::new_v4().to_string());
            let now = Utc::now().timestamp_millis();

            let snapshot = {
                let conn = self.connection()?;
                conn.execute(
                    "
                    INSERT INTO chats (
                        chat_id,
                        title,
                        user_id,
                        ai_provider,
                        message_count,
                        last_message,
                        is_anonymous,
                        created_at_millis,
                        updated_at_millis
                    )
                    VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5, ?6, ?6)
                    ",
                    params![
                        chat_id.as_str(),
                        title,
                        owner.as_str(),
                        provider.to_string(),
                        if owner.is_anonymous() { 1_i64 } else { 0_i64 },
                        now,
                    ],
                )
                .map_err(|error| {
                    StoreError::storage(format!("failed to insert chat row: {error}"))
                })?;
                Self::query_owner_chats(&conn, owner)?
            };

            self.feeds.publish_chats(owner, snapshot)?;
            Ok(chat_id)
        })
    }

    fn append_message<'a>(
        &'a self,
        chat_id: &'a ChatId,
        text: &'a str,
        sender: Sender,
        provider: ProviderId,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<MessageId, StoreError>> {
        Box::pin(async move {
            let message_id = MessageId::new(Uuid::new_v4().to_string());
            let now = Utc::now().timestamp_millis();

            let (chat_owner, message_snapshot, chat_snapshot) = {
                let mut conn = self.connection()?;
                let tx = conn.transaction().map_err(|error| {
                    StoreError::storage(format!("failed to begin append transaction: {error}"))
                })?;

                let updated = tx
                    .execute(
                        "
                        UPDATE chats
                        SET message_count = message_count + 1,
                            last_message = ?2,
                            updated_at_millis = ?3
                        WHERE chat_id = ?1
                        ",
                        params![chat_id.as_str(), text, now],
                    )
                    .map_err(|error| {
                        StoreError::storage(format!("failed to update chat counters: {error}"))
                    })?;
                if updated == 0 {
                    return Err(StoreError::not_found(format!("no chat with id {chat_id}")));
                }

                tx.execute(
                    "
                    INSERT INTO messages (
                        message_id,
                        chat_id,
                        text,
                        sender,
                        ai_provider,
                        user_id,
                        timestamp_millis
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ",
                    params![
                        message_id.as_str(),
                        chat_id.as_str(),
                        text,
                        sender.as_str(),
                        provider.to_string(),
                        owner.as_str(),
                        now,
                    ],
                )
                .map_err(|error| {
                    StoreError::storage(format!("failed to insert message row: {error}"))
                })?;

                tx.commit().map_err(|error| {
                    StoreError::storage(format!("failed to commit append transaction: {error}"))
                })?;

                let chat = Self::query_chat(&conn, chat_id)?
                    .ok_or_else(|| StoreError::not_found(format!("no chat with id {chat_id}")))?;
                let messages = Self::query_messages(&conn, chat_id)?;
                let chats = Self::query_owner_chats(&conn, &chat.user_id)?;
                (chat.user_id, messages, chats)
            };

            self.feeds.publish_messages(chat_id, message_snapshot)?;
            self.feeds.publish_chats(&chat_owner, chat_snapshot)?;
            Ok(message_id)
        })
    }

    fn load_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<Vec<MessageRecord>, StoreError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            Self::query_messages(&conn, chat_id)
        })
    }

    fn load_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<ChatRecord>, StoreError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            Self::query_owner_chats(&conn, owner)
        })
    }

    fn subscribe_messages<'a>(
        &'a self,
        chat_id: &'a ChatId,
    ) -> BoxFuture<'a, Result<MessageFeed, StoreError>> {
        Box::pin(async move {
            let snapshot = {
                let conn = self.connection()?;
                Self::query_messages(&conn, chat_id)?
            };
            self.feeds.subscribe_messages(chat_id, snapshot)
        })
    }

    fn subscribe_owner_chats<'a>(
        &'a self,
        owner: &'a UserId,
    ) -> BoxFuture<'a, Result<ChatListFeed, StoreError>> {
        Box::pin(async move {
            let snapshot = {
                let conn = self.connection()?;
                Self::query_owner_chats(&conn, owner)?
            };
            self.feeds.subscribe_chats(owner, snapshot)
        })
    }

    fn delete_chat<'a>(&'a self, chat_id: &'a ChatId) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let (owner, chat_snapshot) = {
                let mut conn = self.connection()?;
                let owner = Self::query_chat(&conn, chat_id)?
                    .ok_or_else(|| StoreError::not_found(format!("no chat with id {chat_id}")))?
                    .user_id;

                let tx = conn.transaction().map_err(|error| {
                    StoreError::storage(format!("failed to begin delete transaction: {error}"))
                })?;
                // Messages go first so the chat row never outlives them.
                tx.execute(
                    "DELETE FROM messages WHERE chat_id = ?1",
                    params![chat_id.as_str()],
                )
                .map_err(|error| {
                    StoreError::storage(format!("failed to delete message rows: {error}"))
                })?;
                tx.execute(
                    "DELETE FROM chats WHERE chat_id = ?1",
                    params![chat_id.as_str()],
                )
                .map_err(|error| {
                    StoreError::storage(format!("failed to delete chat row: {error}"))
                })?;
                tx.commit().map_err(|error| {
                    StoreError::storage(format!("failed to commit delete transaction: {error}"))
                })?;

                (owner.clone(), Self::query_owner_chats(&conn, &owner)?)
            };

            self.feeds.close_messages(chat_id)?;
            self.feeds.publish_chats(&owner, chat_snapshot)?;
            Ok(())
        })
    }

    fn transfer_ownership<'a>(
        &'a self,
        old_owner: &'a UserId,
        new_owner: &'a UserId,
    ) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();

            let (transferred, chat_snapshot, message_snapshots) = {
                let mut conn = self.connection()?;
                let tx = conn.transaction().map_err(|error| {
                    StoreError::storage(format!("failed to begin transfer transaction: {error}"))
                })?;

                let transferred_ids: Vec<ChatId> = {
                    let mut stmt = tx
                        .prepare(
                            "
                            SELECT chat_id FROM chats
                            WHERE user_id = ?1 AND is_anonymous = 1
                            ",
                        )
                        .map_err(|error| {
                            StoreError::storage(format!(
                                "failed to prepare transfer query: {error}"
                            ))
                        })?;
                    let rows = stmt
                        .query_map(params![old_owner.as_str()], |row| row.get::<_, String>(0))
                        .map_err(|error| {
                            StoreError::storage(format!(
                                "failed to query transferable chats: {error}"
                            ))
                        })?;
                    let mut ids = Vec::new();
                    for row in rows {
                        ids.push(ChatId::new(row.map_err(|error| {
                            StoreError::storage(format!(
                                "failed to read transferable chat row: {error}"
                            ))
                        })?));
                    }
                    ids
                };

                for chat_id in &transferred_ids {
                    tx.execute(
                        "
                        UPDATE chats
                        SET user_id = ?2, is_anonymous = 0, updated_at_millis = ?3
                        WHERE chat_id = ?1
                        ",
                        params![chat_id.as_str(), new_owner.as_str(), now],
                    )
                    .map_err(|error| {
                        StoreError::storage(format!("failed to reassign chat row: {error}"))
                    })?;
                    tx.execute(
                        "
                        UPDATE messages
                        SET user_id = ?3
                        WHERE chat_id = ?1 AND user_id = ?2
                        ",
                        params![chat_id.as_str(), old_owner.as_str(), new_owner.as_str()],
                    )
                    .map_err(|error| {
                        StoreError::storage(format!("failed to reassign message rows: {error}"))
                    })?;
                }

                tx.commit().map_err(|error| {
                    StoreError::storage(format!("failed to commit transfer transaction: {error}"))
                })?;

                let mut message_snapshots = Vec::new();
                for chat_id in &transferred_ids {
                    message_snapshots
                        .push((chat_id.clone(), Self::query_messages(&conn, chat_id)?));
                }

                (
                    transferred_ids.len() as u64,
                    Self::query_owner_chats(&conn, new_owner)?,
                    message_snapshots,
                )
            };

            for (chat_id, snapshot) in message_snapshots {
                self.feeds.publish_messages(&chat_id, snapshot)?;
            }

            self.feeds.publish_chats(new_owner, chat_snapshot)?;
            Ok(transferred)
        })
    }
}

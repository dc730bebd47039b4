use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageResult,
};
use super::ids::{ChatId, MessageId, UserId};
use super::types::{ChatRecord, Language, MessageRecord, MessageRole, NewChat, NewMessage};
use super::{BoxFuture, ChatStore, MessageStore};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite chat store opened");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl ChatStore for SqliteStorage {
    fn insert_chat(&self, input: NewChat) -> BoxFuture<'_, StorageResult<ChatRecord>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let chat_id = ChatId::new_v7();
            let now = unix_timestamp_ms();

            sqlx::query(
                "INSERT INTO chats (id, owner_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chat_id.to_string())
            .bind(input.owner_id.to_string())
            .bind(input.title.clone())
            .bind(now)
            .bind(now)
            .execute(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-insert-apply",
            })?;

            Ok(ChatRecord {
                id: chat_id,
                owner_id: input.owner_id,
                title: input.title,
                created_at_unix_ms: i64_to_u64(now, "chat-insert-created-at")?,
                updated_at_unix_ms: i64_to_u64(now, "chat-insert-updated-at")?,
            })
        })
    }

    fn list_chats(&self, owner_id: UserId) -> BoxFuture<'_, StorageResult<Vec<ChatRecord>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query_as::<_, ChatRow>(
                "SELECT id, owner_id, title, created_at, updated_at FROM chats WHERE owner_id = ? ORDER BY updated_at DESC, id DESC",
            )
            .bind(owner_id.to_string())
            .fetch_all(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "chat-list-query",
            })?;

            rows.into_iter().map(chat_row_to_record).collect()
        })
    }
}

impl MessageStore for SqliteStorage {
    fn insert_message(
        &self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut tx = pool.begin().await.context(SqliteQuerySnafu {
                stage: "message-insert-begin",
            })?;

            let chat_exists =
                sqlx::query_scalar::<_, i64>("SELECT 1 FROM chats WHERE id = ? LIMIT 1")
                    .bind(chat_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "message-insert-ensure-chat",
                    })?
                    .is_some();
            if !chat_exists {
                return NotFoundSnafu {
                    stage: "message-insert-chat-missing",
                    entity: "chat",
                    id: chat_id.to_string(),
                }
                .fail();
            }

            let message_id = MessageId::new_v7();
            let now = unix_timestamp_ms();

            sqlx::query(
                "INSERT INTO messages (id, chat_id, role, content, language, is_pinned, created_at) VALUES (?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(message_id.to_string())
            .bind(chat_id.to_string())
            .bind(role_to_sql(input.role))
            .bind(input.content.clone())
            .bind(input.language.tag())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-insert-apply",
            })?;

            // Appends drive chat recency, in the same transaction so the
            // sidebar ordering never observes a half-applied append.
            sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(chat_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-insert-touch-chat",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-insert-commit",
            })?;

            Ok(MessageRecord {
                id: message_id,
                chat_id,
                role: input.role,
                content: input.content,
                language: input.language,
                is_pinned: false,
                created_at_unix_ms: i64_to_u64(now, "message-insert-created-at")?,
            })
        })
    }

    fn list_messages(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let chat_exists =
                sqlx::query_scalar::<_, i64>("SELECT 1 FROM chats WHERE id = ? LIMIT 1")
                    .bind(chat_id.to_string())
                    .fetch_optional(&pool)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "message-list-ensure-chat",
                    })?
                    .is_some();
            if !chat_exists {
                return NotFoundSnafu {
                    stage: "message-list-chat-missing",
                    entity: "chat",
                    id: chat_id.to_string(),
                }
                .fail();
            }

            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, chat_id, role, content, language, is_pinned, created_at FROM messages WHERE chat_id = ? ORDER BY created_at ASC, id ASC",
            )
            .bind(chat_id.to_string())
            .fetch_all(&pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }

    fn update_message_pin(
        &self,
        message_id: MessageId,
        is_pinned: bool,
    ) -> BoxFuture<'_, StorageResult<()>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query("UPDATE messages SET is_pinned = ? WHERE id = ?")
                .bind(is_pinned)
                .bind(message_id.to_string())
                .execute(&pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-pin-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "message-pin-missing",
                    entity: "message",
                    id: message_id.to_string(),
                }
                .fail();
            }

            Ok(())
        })
    }
}

#[derive(Debug, FromRow)]
struct ChatRow {
    id: String,
    owner_id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    chat_id: String,
    role: String,
    content: String,
    language: String,
    is_pinned: bool,
    created_at: i64,
}

fn chat_row_to_record(row: ChatRow) -> StorageResult<ChatRecord> {
    Ok(ChatRecord {
        id: ChatId::parse(&row.id)?,
        owner_id: UserId::parse(&row.owner_id)?,
        title: row.title,
        created_at_unix_ms: i64_to_u64(row.created_at, "chat-row-created-at")?,
        updated_at_unix_ms: i64_to_u64(row.updated_at, "chat-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        chat_id: ChatId::parse(&row.chat_id)?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        language: language_from_sql(&row.language)?,
        is_pinned: row.is_pinned,
        created_at_unix_ms: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

fn role_to_sql(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "system" => Ok(MessageRole::System),
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn language_from_sql(raw: &str) -> StorageResult<Language> {
    Language::from_tag(raw).ok_or_else(|| {
        InvariantViolationSnafu {
            stage: "message-language-from-sql",
            details: format!("unknown language tag '{raw}'"),
        }
        .build()
    })
}

fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::StorageError;

    async fn open_memory_store() -> SqliteStorage {
        SqliteStorage::open(":memory:")
            .await
            .expect("in-memory sqlite store must open")
    }

    fn user_message(content: &str) -> NewMessage {
        NewMessage::new(MessageRole::User, content, Language::En)
    }

    #[tokio::test]
    async fn inserted_chat_round_trips_through_listing() {
        let storage = open_memory_store().await;
        let owner_id = UserId::new_v7();

        let created = storage
            .insert_chat(NewChat {
                owner_id,
                title: "AIADMK History".to_string(),
            })
            .await
            .expect("chat insert must succeed");

        let listed = storage
            .list_chats(owner_id)
            .await
            .expect("chat listing must succeed");
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn chat_listing_is_scoped_to_owner() {
        let storage = open_memory_store().await;
        let owner_id = UserId::new_v7();
        let stranger_id = UserId::new_v7();

        storage
            .insert_chat(NewChat {
                owner_id,
                title: "mine".to_string(),
            })
            .await
            .expect("chat insert must succeed");

        let listed = storage
            .list_chats(stranger_id)
            .await
            .expect("chat listing must succeed");
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn message_append_moves_chat_to_front_of_listing() {
        let storage = open_memory_store().await;
        let owner_id = UserId::new_v7();

        let older = storage
            .insert_chat(NewChat {
                owner_id,
                title: "older".to_string(),
            })
            .await
            .expect("chat insert must succeed");
        let newer = storage
            .insert_chat(NewChat {
                owner_id,
                title: "newer".to_string(),
            })
            .await
            .expect("chat insert must succeed");

        let listed = storage
            .list_chats(owner_id)
            .await
            .expect("chat listing must succeed");
        assert_eq!(listed[0].id, newer.id);

        // Let the millisecond clock advance so the append visibly outranks
        // the newer chat's creation time.
        tokio::time::sleep(Duration::from_millis(5)).await;
        storage
            .insert_message(older.id, user_message("bump"))
            .await
            .expect("message insert must succeed");

        let listed = storage
            .list_chats(owner_id)
            .await
            .expect("chat listing must succeed");
        assert_eq!(listed[0].id, older.id);
        assert!(listed[0].updated_at_unix_ms > older.updated_at_unix_ms);
    }

    #[tokio::test]
    async fn messages_list_in_insertion_order() {
        let storage = open_memory_store().await;
        let chat = storage
            .insert_chat(NewChat {
                owner_id: UserId::new_v7(),
                title: "ordering".to_string(),
            })
            .await
            .expect("chat insert must succeed");

        let first = storage
            .insert_message(chat.id, user_message("first"))
            .await
            .expect("message insert must succeed");
        let second = storage
            .insert_message(
                chat.id,
                NewMessage::new(MessageRole::Assistant, "second", Language::En),
            )
            .await
            .expect("message insert must succeed");

        let listed = storage
            .list_messages(chat.id)
            .await
            .expect("message listing must succeed");
        assert_eq!(
            listed.iter().map(|message| message.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
        assert_eq!(listed[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn pin_update_persists_and_reverts() {
        let storage = open_memory_store().await;
        let chat = storage
            .insert_chat(NewChat {
                owner_id: UserId::new_v7(),
                title: "pins".to_string(),
            })
            .await
            .expect("chat insert must succeed");
        let message = storage
            .insert_message(chat.id, user_message("pin me"))
            .await
            .expect("message insert must succeed");
        assert!(!message.is_pinned);

        storage
            .update_message_pin(message.id, true)
            .await
            .expect("pin update must succeed");
        let listed = storage
            .list_messages(chat.id)
            .await
            .expect("message listing must succeed");
        assert!(listed[0].is_pinned);

        storage
            .update_message_pin(message.id, false)
            .await
            .expect("pin update must succeed");
        let listed = storage
            .list_messages(chat.id)
            .await
            .expect("message listing must succeed");
        assert!(!listed[0].is_pinned);
    }

    #[tokio::test]
    async fn pin_update_on_unknown_message_reports_not_found() {
        let storage = open_memory_store().await;
        let missing = storage
            .update_message_pin(MessageId::new_v7(), true)
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn message_insert_into_unknown_chat_reports_not_found() {
        let storage = open_memory_store().await;
        let missing = storage
            .insert_message(ChatId::new_v7(), user_message("orphan"))
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn language_tags_round_trip_through_sql() {
        let storage = open_memory_store().await;
        let chat = storage
            .insert_chat(NewChat {
                owner_id: UserId::new_v7(),
                title: "tags".to_string(),
            })
            .await
            .expect("chat insert must succeed");

        storage
            .insert_message(
                chat.id,
                NewMessage::new(MessageRole::User, "வணக்கம்", Language::Ta),
            )
            .await
            .expect("message insert must succeed");

        let listed = storage
            .list_messages(chat.id)
            .await
            .expect("message listing must succeed");
        assert_eq!(listed[0].language, Language::Ta);
    }
}

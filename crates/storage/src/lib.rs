use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{ChatId, MessageId, UserId};
pub use sqlite::SqliteStorage;
pub use types::{
    ChatRecord, DEFAULT_CHAT_TITLE, Language, MessageRecord, MessageRole, NewChat, NewMessage,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Chat-row operations. Chats are never deleted through this boundary;
/// account-management concerns live elsewhere.
pub trait ChatStore: Send + Sync {
    fn insert_chat(&self, input: NewChat) -> BoxFuture<'_, StorageResult<ChatRecord>>;
    /// Lists a user's chats ordered by `updated_at` descending.
    fn list_chats(&self, owner_id: UserId) -> BoxFuture<'_, StorageResult<Vec<ChatRecord>>>;
}

/// Message-row operations. `content`, `role`, and `language` are immutable
/// once inserted; `is_pinned` is the only mutable column.
pub trait MessageStore: Send + Sync {
    /// Appends a message and advances the owning chat's `updated_at` in the
    /// same transaction.
    fn insert_message(
        &self,
        chat_id: ChatId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>>;
    /// Lists a chat's messages ordered by `created_at` ascending.
    fn list_messages(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>>;
    fn update_message_pin(
        &self,
        message_id: MessageId,
        is_pinned: bool,
    ) -> BoxFuture<'_, StorageResult<()>>;
}

pub trait Storage: ChatStore + MessageStore {}

impl<T> Storage for T where T: ChatStore + MessageStore {}

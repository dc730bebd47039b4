use std::sync::Arc;

use snafu::IntoError;

use pesu_storage::{ChatId, ChatRecord, ChatStore, Storage, UserId};

use crate::error::{EngineResult, ListFetchSnafu};

/// Owns the set of a user's chats for a sidebar: fetch, search, select.
///
/// Never mutates messages; chat rows change only through the engine's
/// appends, observed here on the next refresh.
pub struct ChatListController {
    storage: Arc<dyn Storage>,
    chats: Vec<ChatRecord>,
    selected: Option<ChatId>,
}

impl ChatListController {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            chats: Vec::new(),
            selected: None,
        }
    }

    /// Fetches the user's chats, most recently active first. On failure the
    /// previous listing is retained rather than destructively cleared.
    pub async fn refresh(&mut self, owner_id: UserId) -> EngineResult<&[ChatRecord]> {
        match self.storage.list_chats(owner_id).await {
            Ok(chats) => {
                tracing::debug!(chat_count = chats.len(), "chat list refreshed");
                self.chats = chats;
                Ok(&self.chats)
            }
            Err(source) => {
                let error = ListFetchSnafu {
                    stage: "chat-list-refresh",
                }
                .into_error(source);
                tracing::warn!(error = %error, "chat list refresh failed; keeping previous listing");
                Err(error)
            }
        }
    }

    pub fn chats(&self) -> &[ChatRecord] {
        &self.chats
    }

    /// Case-insensitive substring filter over titles, pure over the last
    /// successful refresh. An empty query returns the full list.
    pub fn search(&self, query: &str) -> Vec<&ChatRecord> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.chats.iter().collect();
        }

        self.chats
            .iter()
            .filter(|chat| chat.title.to_lowercase().contains(&needle))
            .collect()
    }

    /// Selects a chat; the return value is handed to
    /// `ChatSessionEngine::load_chat`.
    pub fn select(&mut self, chat_id: ChatId) -> Option<ChatId> {
        self.selected = Some(chat_id);
        self.selected
    }

    /// Clears the selection without creating anything; the chat record is
    /// minted by the engine on the first submitted message.
    pub fn start_new(&mut self) -> Option<ChatId> {
        self.selected = None;
        None
    }

    pub fn selected(&self) -> Option<ChatId> {
        self.selected
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pesu_storage::{
        BoxFuture, ChatStore, MessageId, MessageRecord, MessageStore, NewChat, NewMessage,
        SqliteStorage, StorageError, StorageResult,
    };

    use super::*;
    use crate::error::EngineError;

    /// Delegates to a real store until `fail_listing` is flipped.
    struct FlakyStorage {
        inner: SqliteStorage,
        fail_listing: AtomicBool,
    }

    impl FlakyStorage {
        fn new(inner: SqliteStorage) -> Self {
            Self {
                inner,
                fail_listing: AtomicBool::new(false),
            }
        }

        fn break_listing(&self) {
            self.fail_listing.store(true, Ordering::SeqCst);
        }
    }

    impl ChatStore for FlakyStorage {
        fn insert_chat(&self, input: NewChat) -> BoxFuture<'_, StorageResult<ChatRecord>> {
            self.inner.insert_chat(input)
        }

        fn list_chats(&self, owner_id: UserId) -> BoxFuture<'_, StorageResult<Vec<ChatRecord>>> {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Box::pin(async {
                    Err(StorageError::InvariantViolation {
                        stage: "test-forced-failure",
                        details: "listing disabled".to_string(),
                    })
                });
            }
            self.inner.list_chats(owner_id)
        }
    }

    impl MessageStore for FlakyStorage {
        fn insert_message(
            &self,
            chat_id: ChatId,
            input: NewMessage,
        ) -> BoxFuture<'_, StorageResult<MessageRecord>> {
            self.inner.insert_message(chat_id, input)
        }

        fn list_messages(&self, chat_id: ChatId) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
            self.inner.list_messages(chat_id)
        }

        fn update_message_pin(
            &self,
            message_id: MessageId,
            is_pinned: bool,
        ) -> BoxFuture<'_, StorageResult<()>> {
            self.inner.update_message_pin(message_id, is_pinned)
        }
    }

    async fn seeded_store(owner_id: UserId, titles: &[&str]) -> SqliteStorage {
        let storage = SqliteStorage::open(":memory:")
            .await
            .expect("in-memory sqlite store must open");
        for title in titles {
            storage
                .insert_chat(NewChat {
                    owner_id,
                    title: (*title).to_string(),
                })
                .await
                .expect("chat insert must succeed");
        }
        storage
    }

    #[tokio::test]
    async fn search_matches_case_insensitive_substrings() {
        let owner_id = UserId::new_v7();
        let storage = seeded_store(
            owner_id,
            &["AIADMK History", "Leaders", "history of policies"],
        )
        .await;
        let mut list = ChatListController::new(Arc::new(storage));
        list.refresh(owner_id).await.expect("refresh must succeed");

        let hits = list.search("history");
        let mut titles: Vec<&str> = hits.iter().map(|chat| chat.title.as_str()).collect();
        titles.sort_unstable();
        assert_eq!(titles, vec!["AIADMK History", "history of policies"]);
    }

    #[tokio::test]
    async fn empty_query_returns_the_full_list() {
        let owner_id = UserId::new_v7();
        let storage = seeded_store(owner_id, &["one", "two"]).await;
        let mut list = ChatListController::new(Arc::new(storage));
        list.refresh(owner_id).await.expect("refresh must succeed");

        assert_eq!(list.search("").len(), 2);
        assert_eq!(list.search("   ").len(), 2);
    }

    #[tokio::test]
    async fn refresh_orders_by_recency() {
        let owner_id = UserId::new_v7();
        let storage = seeded_store(owner_id, &["older", "newer"]).await;
        let mut list = ChatListController::new(Arc::new(storage));
        list.refresh(owner_id).await.expect("refresh must succeed");

        assert_eq!(list.chats()[0].title, "newer");
        assert_eq!(list.chats()[1].title, "older");
    }

    #[tokio::test]
    async fn failed_refresh_retains_the_previous_listing() {
        let owner_id = UserId::new_v7();
        let storage = Arc::new(FlakyStorage::new(seeded_store(owner_id, &["kept"]).await));
        let mut list = ChatListController::new(storage.clone());
        list.refresh(owner_id).await.expect("refresh must succeed");
        assert_eq!(list.chats().len(), 1);

        storage.break_listing();
        let outcome = list.refresh(owner_id).await;
        assert!(matches!(outcome, Err(EngineError::ListFetch { .. })));
        assert_eq!(list.chats().len(), 1);
        assert_eq!(list.chats()[0].title, "kept");
    }

    #[tokio::test]
    async fn selection_transitions_are_pure() {
        let owner_id = UserId::new_v7();
        let storage = seeded_store(owner_id, &["only"]).await;
        let mut list = ChatListController::new(Arc::new(storage));
        list.refresh(owner_id).await.expect("refresh must succeed");

        let chat_id = list.chats()[0].id;
        assert_eq!(list.select(chat_id), Some(chat_id));
        assert_eq!(list.selected(), Some(chat_id));

        assert_eq!(list.start_new(), None);
        assert_eq!(list.selected(), None);
        // startNew creates nothing; the store still holds exactly one chat.
        let refreshed = list.refresh(owner_id).await.expect("refresh must succeed");
        assert_eq!(refreshed.len(), 1);
    }
}

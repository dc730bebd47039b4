use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snafu::IntoError;

use pesu_llm::{
    CancelToken, GenerateRequest, GeneratorError, Language as GeneratorLanguage, ResponseGenerator,
};
use pesu_storage::{
    ChatId, ChatStore, DEFAULT_CHAT_TITLE, Language, MessageId, MessageRecord, MessageRole,
    MessageStore, NewChat, NewMessage, Storage,
};

use crate::config::LanguagePreference;
use crate::error::{
    ChatCreationSnafu, EngineError, EngineResult, GenerationSnafu, HistoryFetchSnafu,
    MessageAppendSnafu, NotAuthenticatedSnafu, PinUpdateSnafu, UnknownMessageSnafu,
};
use crate::identity::IdentityProvider;
use crate::language::{self, LANGUAGE_NEGOTIATION_PROMPT};
use crate::state::{GenerationTarget, GenerationTurn, PhaseTransition, SessionPhase};

/// Maximum characters of the first user message kept as the chat title.
pub const TITLE_MAX_CHARS: usize = 50;

/// Derives a chat title from the first user message: a 50-character prefix
/// with `...` appended when truncated. Derived once, never regenerated.
pub fn derive_chat_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return DEFAULT_CHAT_TITLE.to_string();
    }

    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

/// How one submission concluded.
///
/// `created_chat` reports a lazily created chat id so the chat list can
/// refresh and adopt the new selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    Negotiated { created_chat: Option<ChatId> },
    Answered { created_chat: Option<ChatId> },
    Cancelled { created_chat: Option<ChatId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyInput,
    Busy,
}

enum Reservation {
    CreateChat,
    UseChat(ChatId),
}

#[derive(Debug, Default)]
struct SessionState {
    chat_id: Option<ChatId>,
    messages: Vec<MessageRecord>,
    phase: SessionPhase,
    draft: String,
    active_cancel: Option<CancelToken>,
    next_turn: u64,
}

/// Owns one chat's message sequence: submit, cancel, pin, load.
///
/// All state sits behind a mutex that is never held across an await, so the
/// engine can be shared (`Arc`) between the submitting task and whoever calls
/// `cancel`. At most one generation is outstanding at a time; a second submit
/// while generating is ignored rather than queued, which keeps message order
/// identical to submission order.
pub struct ChatSessionEngine {
    storage: Arc<dyn Storage>,
    generator: Arc<dyn ResponseGenerator>,
    identity: Arc<dyn IdentityProvider>,
    preference: LanguagePreference,
    state: Mutex<SessionState>,
}

impl ChatSessionEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        generator: Arc<dyn ResponseGenerator>,
        identity: Arc<dyn IdentityProvider>,
        preference: LanguagePreference,
    ) -> Self {
        Self {
            storage,
            generator,
            identity,
            preference,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Submits one user utterance and drives the turn to completion.
    ///
    /// No-op while a chat is being created or a response is generating. The
    /// returned outcome distinguishes a negotiation turn, a generated answer,
    /// and a cancelled turn.
    pub async fn submit(&self, text: &str) -> EngineResult<SubmitOutcome> {
        let utterance = text.trim();
        if utterance.is_empty() {
            return Ok(SubmitOutcome::Ignored(IgnoreReason::EmptyInput));
        }

        let detected = language::detect(utterance);
        let preferred = self.preference.current();

        let reservation = {
            let mut state = self.state();
            match state.chat_id {
                Some(chat_id) => {
                    if !state.phase.accepts_submission() {
                        tracing::debug!(phase = ?state.phase, "submission ignored while busy");
                        return Ok(SubmitOutcome::Ignored(IgnoreReason::Busy));
                    }
                    Reservation::UseChat(chat_id)
                }
                None => match state.phase.apply(PhaseTransition::BeginChatCreation) {
                    Ok(next) => {
                        state.phase = next;
                        Reservation::CreateChat
                    }
                    Err(rejection) => {
                        tracing::debug!(?rejection, "submission ignored while busy");
                        return Ok(SubmitOutcome::Ignored(IgnoreReason::Busy));
                    }
                },
            }
        };

        let (chat_id, created_chat) = match reservation {
            Reservation::UseChat(chat_id) => (chat_id, None),
            Reservation::CreateChat => {
                let chat_id = self.create_chat_for(utterance).await?;
                (chat_id, Some(chat_id))
            }
        };

        // The user turn is awaited before it becomes visible locally, so the
        // sequence never shows un-persisted state as persisted.
        let user_turn = NewMessage::new(MessageRole::User, utterance, detected);
        let appended = match self.storage.insert_message(chat_id, user_turn).await {
            Ok(record) => record,
            Err(source) => {
                let error = MessageAppendSnafu {
                    stage: "submit-append-user",
                }
                .into_error(source);
                self.note_failure(&error);
                return Err(error);
            }
        };

        {
            let mut state = self.state();
            state.messages.push(appended);
            if created_chat.is_some()
                && let Ok(next) = state.phase.apply(PhaseTransition::FinishChatCreation)
            {
                state.phase = next;
            }
        }

        if language::needs_negotiation(detected, preferred) {
            return self.negotiate(chat_id, created_chat).await;
        }

        self.generate_reply(chat_id, created_chat, utterance, detected)
            .await
    }

    /// Requests cancellation of the in-flight generation.
    ///
    /// Only observable while generating; idempotent no-op otherwise.
    pub fn cancel(&self) {
        let state = self.state();
        if state.phase.is_generating()
            && let Some(token) = &state.active_cancel
        {
            token.cancel();
            tracing::debug!("generation cancellation requested");
        }
    }

    /// Flips `is_pinned` on a message of the active chat. The store update is
    /// awaited before the local flip; on failure local state is untouched.
    pub async fn toggle_pin(&self, message_id: MessageId) -> EngineResult<bool> {
        let currently_pinned = {
            let state = self.state();
            state
                .messages
                .iter()
                .find(|message| message.id == message_id)
                .map(|message| message.is_pinned)
        };
        let Some(currently_pinned) = currently_pinned else {
            return UnknownMessageSnafu {
                stage: "toggle-pin-lookup",
                message_id,
            }
            .fail();
        };

        let next = !currently_pinned;
        if let Err(source) = self.storage.update_message_pin(message_id, next).await {
            let error = PinUpdateSnafu {
                stage: "toggle-pin-apply",
            }
            .into_error(source);
            tracing::warn!(error = %error, message_id = %message_id, "pin update failed");
            return Err(error);
        }

        let mut state = self.state();
        if let Some(message) = state
            .messages
            .iter_mut()
            .find(|message| message.id == message_id)
        {
            message.is_pinned = next;
        }
        Ok(next)
    }

    /// Replaces the active sequence from the store, or clears it for a fresh
    /// unselected session. Cancels any in-flight generation first; its
    /// eventual result fails the target handshake and is discarded.
    pub async fn load_chat(&self, chat_id: Option<ChatId>) -> EngineResult<()> {
        {
            let mut state = self.state();
            if let Some(token) = state.active_cancel.take() {
                token.cancel();
            }
        }

        let Some(chat_id) = chat_id else {
            let mut state = self.state();
            state.chat_id = None;
            state.messages.clear();
            state.phase = SessionPhase::Idle;
            return Ok(());
        };

        let records = match self.storage.list_messages(chat_id).await {
            Ok(records) => records,
            Err(source) => {
                let error = HistoryFetchSnafu {
                    stage: "load-chat-fetch",
                }
                .into_error(source);
                self.note_failure(&error);
                return Err(error);
            }
        };

        let mut state = self.state();
        state.chat_id = Some(chat_id);
        state.messages = records;
        state.phase = SessionPhase::Idle;
        Ok(())
    }

    /// Content lookup for the copy side-action; the clipboard itself belongs
    /// to the presentation layer.
    pub fn message_text(&self, message_id: MessageId) -> EngineResult<String> {
        self.state()
            .messages
            .iter()
            .find(|message| message.id == message_id)
            .map(|message| message.content.clone())
            .ok_or_else(|| {
                UnknownMessageSnafu {
                    stage: "message-text-lookup",
                    message_id,
                }
                .build()
            })
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.state().messages.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase.clone()
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.state().chat_id
    }

    pub fn last_error_message(&self) -> Option<String> {
        match &self.state().phase {
            SessionPhase::Failed { message } => Some(message.clone()),
            _ => None,
        }
    }

    pub fn preferred_language(&self) -> Language {
        self.preference.current()
    }

    pub fn set_preferred_language(&self, language: Language) {
        self.preference.set(language);
    }

    pub fn set_draft(&self, draft: impl Into<String>) {
        self.state().draft = draft.into();
    }

    pub fn draft(&self) -> String {
        self.state().draft.clone()
    }

    /// Submits the draft buffer. The draft is cleared only when the
    /// submission was accepted, so a failed submit keeps the user's text for
    /// retry.
    pub async fn submit_draft(&self) -> EngineResult<SubmitOutcome> {
        let draft = self.draft();
        let outcome = self.submit(&draft).await?;
        if !matches!(outcome, SubmitOutcome::Ignored(_)) {
            self.state().draft.clear();
        }
        Ok(outcome)
    }

    async fn create_chat_for(&self, utterance: &str) -> EngineResult<ChatId> {
        let Some(user) = self.identity.current_user() else {
            let error = NotAuthenticatedSnafu {
                stage: "submit-create-chat",
            }
            .build();
            self.note_failure(&error);
            return Err(error);
        };

        let new_chat = NewChat {
            owner_id: user.id,
            title: derive_chat_title(utterance),
        };
        match self.storage.insert_chat(new_chat).await {
            Ok(record) => {
                tracing::info!(chat_id = %record.id, "chat created on first submission");
                // Remember the id immediately: even if the rest of this turn
                // fails, a retry must reuse the chat instead of minting another.
                self.state().chat_id = Some(record.id);
                Ok(record.id)
            }
            Err(source) => {
                let error = ChatCreationSnafu {
                    stage: "submit-create-chat",
                }
                .into_error(source);
                self.note_failure(&error);
                Err(error)
            }
        }
    }

    async fn negotiate(
        &self,
        chat_id: ChatId,
        created_chat: Option<ChatId>,
    ) -> EngineResult<SubmitOutcome> {
        // Negotiation turns are terminal: the prompt is appended, tagged
        // Tamil, and no generator call happens until the next submission.
        let prompt = NewMessage::new(
            MessageRole::Assistant,
            LANGUAGE_NEGOTIATION_PROMPT,
            Language::Ta,
        );
        match self.storage.insert_message(chat_id, prompt).await {
            Ok(record) => {
                let mut state = self.state();
                state.messages.push(record);
                if let Ok(next) = state.phase.apply(PhaseTransition::AwaitNegotiation) {
                    state.phase = next;
                }
                tracing::debug!(chat_id = %chat_id, "language negotiation prompt issued");
                Ok(SubmitOutcome::Negotiated { created_chat })
            }
            Err(source) => {
                let error = MessageAppendSnafu {
                    stage: "submit-append-negotiation",
                }
                .into_error(source);
                self.note_failure(&error);
                Err(error)
            }
        }
    }

    async fn generate_reply(
        &self,
        chat_id: ChatId,
        created_chat: Option<ChatId>,
        utterance: &str,
        detected: Language,
    ) -> EngineResult<SubmitOutcome> {
        let (target, cancel) = {
            let mut state = self.state();
            let target = GenerationTarget::new(chat_id, GenerationTurn(state.next_turn));
            state.next_turn += 1;
            match state.phase.apply(PhaseTransition::BeginGeneration(target)) {
                Ok(next) => state.phase = next,
                Err(rejection) => {
                    tracing::warn!(?rejection, "generation could not start");
                    return Ok(SubmitOutcome::Ignored(IgnoreReason::Busy));
                }
            }
            let cancel = CancelToken::new();
            state.active_cancel = Some(cancel.clone());
            (target, cancel)
        };

        tracing::debug!(
            chat_id = %chat_id,
            turn = target.turn.0,
            language = detected.tag(),
            "response generation started"
        );

        let request = GenerateRequest::new(utterance, generator_language(detected));
        // Race the generator against the token: even a generator that ignores
        // the token gets its eventual result dropped here.
        let generation = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.generator.generate(request, cancel.clone()) => match result {
                Err(GeneratorError::Cancelled { .. }) => None,
                other => Some(other),
            },
        };

        let Some(result) = generation else {
            return Ok(self.discard_cancelled(target, created_chat));
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(source) => {
                let error = GenerationSnafu {
                    stage: "submit-generate",
                }
                .into_error(source);
                let mut state = self.state();
                if let Ok(next) = state.phase.apply(PhaseTransition::FailGeneration {
                    target,
                    message: error.to_string(),
                }) {
                    state.phase = next;
                }
                state.active_cancel = None;
                drop(state);
                tracing::warn!(error = %error, "response generation failed");
                return Err(error);
            }
        };

        // Commit decision: once the token is disarmed under the lock, a late
        // cancel() can no longer affect this turn.
        {
            let mut state = self.state();
            if cancel.is_cancelled() || state.phase.active_target() != Some(target) {
                drop(state);
                return Ok(self.discard_cancelled(target, created_chat));
            }
            state.active_cancel = None;
        }

        let assistant_turn = NewMessage::new(MessageRole::Assistant, reply, detected);
        match self.storage.insert_message(chat_id, assistant_turn).await {
            Ok(record) => {
                let mut state = self.state();
                // load_chat may have replaced the session while the append
                // was in flight; only the matching target may publish.
                if state.phase.active_target() == Some(target) {
                    state.messages.push(record);
                    if let Ok(next) = state.phase.apply(PhaseTransition::CompleteGeneration(target))
                    {
                        state.phase = next;
                    }
                }
                Ok(SubmitOutcome::Answered { created_chat })
            }
            Err(source) => {
                let error = MessageAppendSnafu {
                    stage: "submit-append-assistant",
                }
                .into_error(source);
                self.note_failure(&error);
                Err(error)
            }
        }
    }

    fn discard_cancelled(
        &self,
        target: GenerationTarget,
        created_chat: Option<ChatId>,
    ) -> SubmitOutcome {
        let mut state = self.state();
        if let Ok(next) = state.phase.apply(PhaseTransition::CancelGeneration(target)) {
            state.phase = next;
        }
        state.active_cancel = None;
        tracing::debug!(
            chat_id = %target.chat_id,
            turn = target.turn.0,
            "generation result discarded after cancellation"
        );
        SubmitOutcome::Cancelled { created_chat }
    }

    fn note_failure(&self, error: &EngineError) {
        tracing::warn!(error = %error, "chat session operation failed");
        let mut state = self.state();
        if let Ok(next) = state.phase.apply(PhaseTransition::Fail {
            message: error.to_string(),
        }) {
            state.phase = next;
        }
        state.active_cancel = None;
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn generator_language(language: Language) -> GeneratorLanguage {
    match language {
        Language::Ta => GeneratorLanguage::Tamil,
        Language::En => GeneratorLanguage::English,
    }
}

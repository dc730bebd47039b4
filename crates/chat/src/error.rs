use snafu::Snafu;

use pesu_llm::GeneratorError;
use pesu_storage::{MessageId, StorageError};

/// Session/list failure taxonomy. Every variant is recoverable by retry; the
/// engine reverts any speculative local change before surfacing one of these.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("cannot create a chat without a signed-in user"))]
    NotAuthenticated { stage: &'static str },
    #[snafu(display("failed to create chat: {source}"))]
    ChatCreation {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to append message: {source}"))]
    MessageAppend {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to load chat history: {source}"))]
    HistoryFetch {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("response generation failed: {source}"))]
    Generation {
        stage: &'static str,
        source: GeneratorError,
    },
    #[snafu(display("failed to update message pin: {source}"))]
    PinUpdate {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("message '{message_id}' is not part of the active chat"))]
    UnknownMessage {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("failed to fetch chat list: {source}"))]
    ListFetch {
        stage: &'static str,
        source: StorageError,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

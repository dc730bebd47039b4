use std::sync::Arc;

use snafu::Snafu;
use tokio::sync::watch;

use super::BoxFuture;

/// Generator-local language tag, intentionally decoupled from the storage
/// layer's persisted enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Tamil,
    English,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Self::Tamil => "ta",
            Self::English => "en",
        }
    }
}

/// One utterance handed to a generator, tagged with the language the reply
/// must be produced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub text: String,
    pub language: Language,
}

impl GenerateRequest {
    pub fn new(text: impl Into<String>, language: Language) -> Self {
        Self {
            text: text.into(),
            language,
        }
    }
}

/// Clonable cooperative cancellation signal.
///
/// Both the generator implementation and the caller racing it observe the
/// same token, so cancellation is a local disposal guarantee even when the
/// underlying provider call cannot be interrupted.
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (signal, _initial_watcher) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once `cancel` has been called. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut watcher = self.signal.subscribe();
        // subscribe() marks the current value as seen, so check it directly
        // before waiting on changes.
        if *watcher.borrow() {
            return;
        }

        while watcher.changed().await.is_ok() {
            if *watcher.borrow() {
                return;
            }
        }

        // The sender lives inside this token, so the channel cannot close
        // while we are waiting; stay pending rather than resolve spuriously.
        std::future::pending::<()>().await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GeneratorError {
    #[snafu(display("missing API key for generator provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completion failed on `{stage}`, {source}"))]
    CompletionFailed {
        stage: &'static str,
        source: rig::completion::PromptError,
    },
    #[snafu(display("generator returned an empty completion"))]
    EmptyCompletion { stage: &'static str },
    #[snafu(display("generation was cancelled"))]
    Cancelled { stage: &'static str },
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;

/// Asynchronously produces assistant text for one user utterance.
///
/// Implementations must observe the token where they can; callers are still
/// expected to race the returned future against the token themselves.
pub trait ResponseGenerator: Send + Sync {
    fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancelToken,
    ) -> BoxFuture<'_, GeneratorResult<String>>;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wakes_a_pending_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let observed = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        token.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(2), observed)
            .await
            .expect("waiter must wake after cancel")
            .expect("waiter task must not panic");
        assert!(outcome);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_on_an_already_cancelled_token() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("already-cancelled token must resolve immediately");
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}

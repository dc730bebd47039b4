pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod language;
pub mod list;
pub mod state;

pub use config::{
    ChatSettings, GeneratorSettings, LanguagePreference, SettingsError, SettingsStore,
};
pub use engine::{
    ChatSessionEngine, IgnoreReason, SubmitOutcome, TITLE_MAX_CHARS, derive_chat_title,
};
pub use error::{EngineError, EngineResult};
pub use identity::{AuthenticatedUser, IdentityProvider, SwapIdentity};
pub use language::{LANGUAGE_NEGOTIATION_PROMPT, detect, needs_negotiation};
pub use list::ChatListController;
pub use state::{GenerationTarget, GenerationTurn, PhaseRejection, PhaseTransition, SessionPhase};

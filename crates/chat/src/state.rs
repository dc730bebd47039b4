use pesu_storage::ChatId;

/// Monotonic counter identifying one generation attempt.
///
/// A fresh turn is minted for every generation so a result arriving after
/// cancellation or a chat switch can be recognized as stale and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationTurn(pub u64);

/// Routing key for one in-flight generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationTarget {
    pub chat_id: ChatId,
    pub turn: GenerationTurn,
}

impl GenerationTarget {
    pub const fn new(chat_id: ChatId, turn: GenerationTurn) -> Self {
        Self { chat_id, turn }
    }
}

/// Lifecycle of one chat session.
///
/// `Failed` is the error state of the session machine: it records the last
/// failure for display but accepts submissions exactly like `Idle`, so every
/// failure leaves the session retryable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingChatCreation,
    AwaitingNegotiation,
    Generating(GenerationTarget),
    Failed {
        message: String,
    },
}

/// State transition input for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    BeginChatCreation,
    FinishChatCreation,
    AwaitNegotiation,
    BeginGeneration(GenerationTarget),
    CompleteGeneration(GenerationTarget),
    CancelGeneration(GenerationTarget),
    FailGeneration {
        target: GenerationTarget,
        message: String,
    },
    Fail {
        message: String,
    },
    Reset,
}

/// Rejection reason for illegal phase transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseRejection {
    /// A chat creation or generation is already holding the session.
    SubmissionLocked,
    NotCreatingChat,
    NoActiveGeneration,
    TargetMismatch {
        active: GenerationTarget,
        attempted: GenerationTarget,
    },
}

pub type PhaseResult = Result<SessionPhase, PhaseRejection>;

impl SessionPhase {
    /// New submissions are accepted everywhere except while a chat record is
    /// being created or a response is being generated.
    pub fn accepts_submission(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::AwaitingNegotiation | Self::Failed { .. }
        )
    }

    pub fn is_generating(&self) -> bool {
        matches!(self, Self::Generating(_))
    }

    /// Returns the in-flight generation target if and only if generating.
    pub fn active_target(&self) -> Option<GenerationTarget> {
        match self {
            Self::Generating(target) => Some(*target),
            _ => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// Terminal generation transitions (`Complete`/`Cancel`/`FailGeneration`)
    /// must name the currently active target exactly.
    pub fn apply(&self, transition: PhaseTransition) -> PhaseResult {
        match transition {
            PhaseTransition::BeginChatCreation => self.apply_begin_chat_creation(),
            PhaseTransition::FinishChatCreation => self.apply_finish_chat_creation(),
            PhaseTransition::AwaitNegotiation => self.apply_await_negotiation(),
            PhaseTransition::BeginGeneration(target) => self.apply_begin_generation(target),
            PhaseTransition::CompleteGeneration(target) => {
                self.apply_generation_end(target, SessionPhase::Idle)
            }
            PhaseTransition::CancelGeneration(target) => {
                self.apply_generation_end(target, SessionPhase::Idle)
            }
            PhaseTransition::FailGeneration { target, message } => {
                self.apply_generation_end(target, SessionPhase::Failed { message })
            }
            PhaseTransition::Fail { message } => Ok(SessionPhase::Failed { message }),
            PhaseTransition::Reset => Ok(SessionPhase::Idle),
        }
    }

    fn apply_begin_chat_creation(&self) -> PhaseResult {
        if self.accepts_submission() {
            Ok(Self::AwaitingChatCreation)
        } else {
            Err(PhaseRejection::SubmissionLocked)
        }
    }

    fn apply_finish_chat_creation(&self) -> PhaseResult {
        match self {
            Self::AwaitingChatCreation => Ok(Self::Idle),
            _ => Err(PhaseRejection::NotCreatingChat),
        }
    }

    fn apply_await_negotiation(&self) -> PhaseResult {
        if self.accepts_submission() {
            Ok(Self::AwaitingNegotiation)
        } else {
            Err(PhaseRejection::SubmissionLocked)
        }
    }

    fn apply_begin_generation(&self, target: GenerationTarget) -> PhaseResult {
        if self.accepts_submission() {
            Ok(Self::Generating(target))
        } else {
            Err(PhaseRejection::SubmissionLocked)
        }
    }

    fn apply_generation_end(&self, target: GenerationTarget, next: SessionPhase) -> PhaseResult {
        match self {
            Self::Generating(active) if *active == target => Ok(next),
            Self::Generating(active) => Err(PhaseRejection::TargetMismatch {
                active: *active,
                attempted: target,
            }),
            _ => Err(PhaseRejection::NoActiveGeneration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(turn: u64) -> GenerationTarget {
        GenerationTarget::new(ChatId::new_v7(), GenerationTurn(turn))
    }

    #[test]
    fn idle_accepts_chat_creation_and_generation() {
        let idle = SessionPhase::Idle;
        assert_eq!(
            idle.apply(PhaseTransition::BeginChatCreation),
            Ok(SessionPhase::AwaitingChatCreation)
        );

        let generation_target = target(1);
        assert_eq!(
            idle.apply(PhaseTransition::BeginGeneration(generation_target)),
            Ok(SessionPhase::Generating(generation_target))
        );
    }

    #[test]
    fn generating_locks_out_new_submissions() {
        let generating = SessionPhase::Generating(target(1));
        assert!(!generating.accepts_submission());
        assert_eq!(
            generating.apply(PhaseTransition::BeginChatCreation),
            Err(PhaseRejection::SubmissionLocked)
        );
        assert_eq!(
            generating.apply(PhaseTransition::BeginGeneration(target(2))),
            Err(PhaseRejection::SubmissionLocked)
        );
    }

    #[test]
    fn awaiting_chat_creation_locks_out_new_submissions() {
        let creating = SessionPhase::AwaitingChatCreation;
        assert!(!creating.accepts_submission());
        assert_eq!(
            creating.apply(PhaseTransition::BeginGeneration(target(1))),
            Err(PhaseRejection::SubmissionLocked)
        );
        assert_eq!(
            creating.apply(PhaseTransition::FinishChatCreation),
            Ok(SessionPhase::Idle)
        );
    }

    #[test]
    fn generation_end_requires_the_matching_target() {
        let active = target(7);
        let stale = GenerationTarget::new(active.chat_id, GenerationTurn(8));
        let generating = SessionPhase::Generating(active);

        assert_eq!(
            generating.apply(PhaseTransition::CompleteGeneration(active)),
            Ok(SessionPhase::Idle)
        );
        assert_eq!(
            generating.apply(PhaseTransition::CancelGeneration(active)),
            Ok(SessionPhase::Idle)
        );
        assert_eq!(
            generating.apply(PhaseTransition::CompleteGeneration(stale)),
            Err(PhaseRejection::TargetMismatch {
                active,
                attempted: stale,
            })
        );
    }

    #[test]
    fn generation_end_outside_generating_is_rejected() {
        assert_eq!(
            SessionPhase::Idle.apply(PhaseTransition::CompleteGeneration(target(1))),
            Err(PhaseRejection::NoActiveGeneration)
        );
    }

    #[test]
    fn failed_behaves_like_idle_for_acceptance() {
        let failed = SessionPhase::Failed {
            message: "storage unavailable".to_string(),
        };
        assert!(failed.accepts_submission());
        assert_eq!(
            failed.apply(PhaseTransition::BeginChatCreation),
            Ok(SessionPhase::AwaitingChatCreation)
        );
        assert_eq!(
            failed.apply(PhaseTransition::AwaitNegotiation),
            Ok(SessionPhase::AwaitingNegotiation)
        );
    }

    #[test]
    fn negotiation_can_repeat_while_awaiting_negotiation() {
        let awaiting = SessionPhase::AwaitingNegotiation;
        assert!(awaiting.accepts_submission());
        assert_eq!(
            awaiting.apply(PhaseTransition::AwaitNegotiation),
            Ok(SessionPhase::AwaitingNegotiation)
        );
    }

    #[test]
    fn failure_and_reset_are_total() {
        let generating = SessionPhase::Generating(target(3));
        assert_eq!(
            generating.apply(PhaseTransition::Fail {
                message: "boom".to_string(),
            }),
            Ok(SessionPhase::Failed {
                message: "boom".to_string(),
            })
        );
        assert_eq!(generating.apply(PhaseTransition::Reset), Ok(SessionPhase::Idle));
    }
}

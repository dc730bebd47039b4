use std::env;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};

use pesu::{
    AuthenticatedUser, ChatListController, ChatSessionEngine, LANGUAGE_NEGOTIATION_PROMPT,
    LanguagePreference, SessionPhase, SubmitOutcome, SwapIdentity, detect,
};
use pesu_llm::ScriptedGenerator;
use pesu_storage::{
    ChatStore, Language, MessageRole, MessageStore, NewChat, NewMessage, SqliteStorage,
    StorageError, UserId,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    DetectLanguage,
    SessionBootstrap,
    Negotiation,
    PinRoundtrip,
    ListSearch,
    RecencyOrder,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "detect_language" => Some(Self::DetectLanguage),
            "session_bootstrap" => Some(Self::SessionBootstrap),
            "negotiation" => Some(Self::Negotiation),
            "pin_roundtrip" => Some(Self::PinRoundtrip),
            "list_search" => Some(Self::ListSearch),
            "recency_order" => Some(Self::RecencyOrder),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::DetectLanguage => "detect_language",
            Self::SessionBootstrap => "session_bootstrap",
            Self::Negotiation => "negotiation",
            Self::PinRoundtrip => "pin_roundtrip",
            Self::ListSearch => "list_search",
            Self::RecencyOrder => "recency_order",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("storage validation failed: {source}"))]
    StorageValidation {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("engine validation failed: {source}"))]
    EngineValidation {
        stage: &'static str,
        source: pesu::EngineError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::DetectLanguage => run_detect_language(),
        Scenario::SessionBootstrap => run_session_bootstrap(&args).await,
        Scenario::Negotiation => run_negotiation(&args).await,
        Scenario::PinRoundtrip => run_pin_roundtrip(&args).await,
        Scenario::ListSearch => run_list_search(&args).await,
        Scenario::RecencyOrder => run_recency_order(&args).await,
        Scenario::All => {
            run_detect_language()?;
            run_session_bootstrap(&args).await?;
            run_negotiation(&args).await?;
            run_pin_roundtrip(&args).await?;
            run_list_search(&args).await?;
            run_recency_order(&args).await?;
            println!("all_passed=true");
            Ok(())
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut db_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--db" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-db-value",
                    arg: "--db",
                })?;
                db_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        db_path,
    })
}

async fn open_storage(args: &RunnerArgs) -> RunnerResult<Arc<SqliteStorage>> {
    let location = args.db_path.as_deref().unwrap_or(":memory:");
    let storage = SqliteStorage::open(location)
        .await
        .context(StorageValidationSnafu {
            stage: "runner-open-storage",
        })?;
    Ok(Arc::new(storage))
}

fn scripted_engine(
    storage: Arc<SqliteStorage>,
    preferred: Language,
) -> (ChatSessionEngine, UserId) {
    let user_id = UserId::new_v7();
    let identity = Arc::new(SwapIdentity::signed_in(AuthenticatedUser {
        id: user_id,
        email: "qa-runner@example.test".to_string(),
    }));
    let engine = ChatSessionEngine::new(
        storage,
        Arc::new(ScriptedGenerator::with_default_replies()),
        identity,
        LanguagePreference::new(preferred),
    );
    (engine, user_id)
}

fn run_detect_language() -> RunnerResult<()> {
    let tamil_detected = detect("வணக்கம்") == Language::Ta;
    let english_detected = detect("What is AIADMK?") == Language::En;
    let mixed_detected = detect("hello வணக்கம்") == Language::Ta;

    println!("tamil_detected={tamil_detected}");
    println!("english_detected={english_detected}");
    println!("mixed_detected={mixed_detected}");

    if !(tamil_detected && english_detected && mixed_detected) {
        return ScenarioFailedSnafu {
            stage: "scenario-detect-language-assert",
            scenario: "detect_language",
            reason: "script heuristic misclassified a probe string".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_session_bootstrap(args: &RunnerArgs) -> RunnerResult<()> {
    let storage = open_storage(args).await?;
    let (engine, user_id) = scripted_engine(storage.clone(), Language::En);

    let outcome = engine
        .submit("What is AIADMK?")
        .await
        .context(EngineValidationSnafu {
            stage: "scenario-session-bootstrap-submit",
        })?;
    let chat_created = matches!(
        outcome,
        SubmitOutcome::Answered {
            created_chat: Some(_)
        }
    );

    let chats = storage
        .list_chats(user_id)
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-session-bootstrap-list-chats",
        })?;
    let messages = engine.messages();
    let title_ok = chats.len() == 1 && chats[0].title == "What is AIADMK?";
    let turn_shape_ok = messages.len() == 2
        && messages[0].role == MessageRole::User
        && messages[1].role == MessageRole::Assistant
        && messages[1].language == Language::En;

    println!("chat_created={chat_created}");
    println!("title_ok={title_ok}");
    println!("turn_shape_ok={turn_shape_ok}");

    if !(chat_created && title_ok && turn_shape_ok) {
        return ScenarioFailedSnafu {
            stage: "scenario-session-bootstrap-assert",
            scenario: "session_bootstrap",
            reason: "first submission did not produce one chat with a user/assistant pair"
                .to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_negotiation(args: &RunnerArgs) -> RunnerResult<()> {
    let storage = open_storage(args).await?;
    let (engine, _user_id) = scripted_engine(storage, Language::Ta);

    let outcome = engine
        .submit("Hello")
        .await
        .context(EngineValidationSnafu {
            stage: "scenario-negotiation-submit",
        })?;

    let negotiated = matches!(outcome, SubmitOutcome::Negotiated { .. });
    let messages = engine.messages();
    let prompt_ok = messages.len() == 2
        && messages[1].content == LANGUAGE_NEGOTIATION_PROMPT
        && messages[1].language == Language::Ta;
    let awaiting = engine.phase() == SessionPhase::AwaitingNegotiation;

    println!("negotiated={negotiated}");
    println!("prompt_ok={prompt_ok}");
    println!("awaiting_negotiation={awaiting}");

    if !(negotiated && prompt_ok && awaiting) {
        return ScenarioFailedSnafu {
            stage: "scenario-negotiation-assert",
            scenario: "negotiation",
            reason: "english input under tamil preference did not produce a terminal \
                     negotiation turn"
                .to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_pin_roundtrip(args: &RunnerArgs) -> RunnerResult<()> {
    let storage = open_storage(args).await?;
    let (engine, _user_id) = scripted_engine(storage, Language::En);

    engine
        .submit("pin this message")
        .await
        .context(EngineValidationSnafu {
            stage: "scenario-pin-roundtrip-submit",
        })?;
    let message_id = engine.messages()[0].id;

    let pinned = engine
        .toggle_pin(message_id)
        .await
        .context(EngineValidationSnafu {
            stage: "scenario-pin-roundtrip-pin",
        })?;
    let unpinned = engine
        .toggle_pin(message_id)
        .await
        .context(EngineValidationSnafu {
            stage: "scenario-pin-roundtrip-unpin",
        })?;

    let pin_roundtrip = pinned && !unpinned;
    println!("pin_roundtrip={pin_roundtrip}");

    if !pin_roundtrip {
        return ScenarioFailedSnafu {
            stage: "scenario-pin-roundtrip-assert",
            scenario: "pin_roundtrip",
            reason: "two consecutive toggles did not restore the original pin state".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_list_search(args: &RunnerArgs) -> RunnerResult<()> {
    let storage = open_storage(args).await?;
    let owner_id = UserId::new_v7();
    for title in ["AIADMK History", "Leaders", "history of policies"] {
        storage
            .insert_chat(NewChat {
                owner_id,
                title: title.to_string(),
            })
            .await
            .context(StorageValidationSnafu {
                stage: "scenario-list-search-seed",
            })?;
    }

    let mut list = ChatListController::new(storage);
    list.refresh(owner_id)
        .await
        .context(EngineValidationSnafu {
            stage: "scenario-list-search-refresh",
        })?;

    let hits = list.search("history");
    let mut titles: Vec<&str> = hits.iter().map(|chat| chat.title.as_str()).collect();
    titles.sort_unstable();
    let search_ok = titles == ["AIADMK History", "history of policies"];
    let unfiltered_ok = list.search("").len() == 3;

    println!("search_ok={search_ok}");
    println!("unfiltered_ok={unfiltered_ok}");

    if !(search_ok && unfiltered_ok) {
        return ScenarioFailedSnafu {
            stage: "scenario-list-search-assert",
            scenario: "list_search",
            reason: "case-insensitive substring search returned the wrong chats".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_recency_order(args: &RunnerArgs) -> RunnerResult<()> {
    let storage = open_storage(args).await?;
    let owner_id = UserId::new_v7();

    let older = storage
        .insert_chat(NewChat {
            owner_id,
            title: "older".to_string(),
        })
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-recency-order-seed-older",
        })?;
    storage
        .insert_chat(NewChat {
            owner_id,
            title: "newer".to_string(),
        })
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-recency-order-seed-newer",
        })?;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    storage
        .insert_message(
            older.id,
            NewMessage::new(MessageRole::User, "bump", Language::En),
        )
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-recency-order-bump",
        })?;

    let chats = storage
        .list_chats(owner_id)
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-recency-order-list",
        })?;
    let recency_ok = chats.len() == 2 && chats[0].id == older.id;

    println!("recency_ok={recency_ok}");

    if !recency_ok {
        return ScenarioFailedSnafu {
            stage: "scenario-recency-order-assert",
            scenario: "recency_order",
            reason: "message append did not move the chat to the front of the listing".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

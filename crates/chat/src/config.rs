use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::{ResultExt, Snafu};

use pesu_llm::{DEFAULT_OPENAI_MODEL, GeneratorConfig};
use pesu_storage::Language;

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "pesu";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
        }
    }
}

impl GeneratorSettings {
    /// Builds a generator config from these settings.
    /// Returns None while no API key is configured.
    pub fn to_generator_config(&self) -> Option<GeneratorConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        Some(GeneratorConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            &self.model,
        ))
    }
}

/// Settings that persist across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(
        default = "default_language",
        serialize_with = "serialize_language",
        deserialize_with = "deserialize_language"
    )]
    pub preferred_language: Language,
    #[serde(default)]
    pub generator: GeneratorSettings,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            preferred_language: default_language(),
            generator: GeneratorSettings::default(),
        }
    }
}

impl ChatSettings {
    pub fn normalized(mut self) -> Self {
        self.generator.provider_id = if self.generator.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.generator.provider_id.trim().to_string()
        };
        self.generator.api_key = self.generator.api_key.trim().to_string();
        self.generator.endpoint = if self.generator.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.generator.endpoint.trim().to_string()
        };
        self.generator.model = if self.generator.model.trim().is_empty() {
            default_model()
        } else {
            self.generator.model.trim().to_string()
        };
        self
    }
}

/// Settings persistence behind an `ArcSwap`, so readers never block writers.
pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".pesu"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    pub fn update_preferred_language(&self, language: Language) -> Result<(), SettingsError> {
        let mut next = (*self.settings()).clone();
        next.preferred_language = language;
        self.update(next)
    }

    /// Hands out the engine's preference handle, wired to persist changes
    /// back through this store.
    pub fn language_preference(self: &Arc<Self>) -> LanguagePreference {
        let store = Arc::clone(self);
        LanguagePreference::with_persist(self.settings().preferred_language, move |language| {
            if let Err(error) = store.update_preferred_language(language) {
                tracing::warn!(error = %error, "failed to persist language preference");
            }
        })
    }

    fn load_from_disk(path: &PathBuf) -> ChatSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return ChatSettings::default();
        }

        let figment =
            Figment::from(Serialized::defaults(ChatSettings::default())).merge(Json::file(path));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// The engine's standing language preference: an explicit injected value with
/// an injected persistence callback, instead of ambient global state.
#[derive(Clone)]
pub struct LanguagePreference {
    current: Arc<ArcSwap<Language>>,
    persist: Option<Arc<dyn Fn(Language) + Send + Sync>>,
}

impl LanguagePreference {
    pub fn new(initial: Language) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            persist: None,
        }
    }

    pub fn with_persist(
        initial: Language,
        persist: impl Fn(Language) + Send + Sync + 'static,
    ) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            persist: Some(Arc::new(persist)),
        }
    }

    pub fn current(&self) -> Language {
        **self.current.load()
    }

    pub fn set(&self, language: Language) {
        self.current.store(Arc::new(language));
        if let Some(persist) = &self.persist {
            persist(language);
        }
    }
}

impl fmt::Debug for LanguagePreference {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LanguagePreference")
            .field("current", &self.current())
            .field("persist", &self.persist.is_some())
            .finish()
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_language() -> Language {
    Language::Ta
}

fn serialize_language<S>(value: &Language, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.tag())
}

fn deserialize_language<'de, D>(deserializer: D) -> Result<Language, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(Language::from_tag(value.trim()).unwrap_or_else(default_language))
}

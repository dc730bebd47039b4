use rig::completion::Prompt;
use rig::prelude::CompletionClient;
use rig::providers::openai;
use snafu::{ResultExt, ensure};

use super::BoxFuture;
use super::generator::{
    CancelToken, CancelledSnafu, CompletionFailedSnafu, EmptyCompletionSnafu, GenerateRequest,
    GeneratorResult, HttpClientSnafu, Language, MissingApiKeySnafu, ResponseGenerator,
};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model_id: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl GeneratorConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model_id: model_id.into().trim().to_string(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// OpenAI-compatible generator backed by Rig.
///
/// Generation is one deferred completion per turn, raced against the cancel
/// token; there is no token-by-token delivery at this boundary.
pub struct RigGeneratorAdapter {
    config: GeneratorConfig,
}

impl RigGeneratorAdapter {
    pub fn new(config: GeneratorConfig) -> GeneratorResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn build_client(config: &GeneratorConfig) -> GeneratorResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "rig-build-client",
        })
    }
}

impl ResponseGenerator for RigGeneratorAdapter {
    fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancelToken,
    ) -> BoxFuture<'_, GeneratorResult<String>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return CancelledSnafu {
                    stage: "rig-generate-precheck",
                }
                .fail();
            }

            let client = Self::build_client(&self.config)?;
            let mut agent_builder = client
                .agent(self.config.model_id.as_str())
                .preamble(language_preamble(request.language));
            if let Some(temperature) = self.config.temperature {
                agent_builder = agent_builder.temperature(temperature);
            }
            if let Some(max_tokens) = self.config.max_tokens {
                agent_builder = agent_builder.max_tokens(max_tokens);
            }
            let agent = agent_builder.build();

            let completion = async { agent.prompt(request.text.as_str()).await };
            let reply = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(
                        model_id = %self.config.model_id,
                        language = request.language.code(),
                        "generation cancelled before completion"
                    );
                    return CancelledSnafu {
                        stage: "rig-generate-cancelled",
                    }
                    .fail();
                }
                result = completion => {
                    result.context(CompletionFailedSnafu {
                        stage: "rig-generate-prompt",
                    })?
                }
            };

            ensure!(
                !reply.trim().is_empty(),
                EmptyCompletionSnafu {
                    stage: "rig-generate-empty-reply",
                }
            );

            Ok(reply)
        })
    }
}

fn language_preamble(language: Language) -> &'static str {
    match language {
        Language::Tamil => {
            "You are a bilingual Tamil/English assistant. The user wrote in Tamil; \
             answer entirely in Tamil."
        }
        Language::English => {
            "You are a bilingual Tamil/English assistant. The user wrote in English; \
             answer entirely in English."
        }
    }
}

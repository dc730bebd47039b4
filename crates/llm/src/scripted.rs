use std::sync::atomic::{AtomicUsize, Ordering};

use super::BoxFuture;
use super::generator::{
    CancelToken, CancelledSnafu, GenerateRequest, GeneratorResult, Language, ResponseGenerator,
};

/// Deterministic generator cycling through canned bilingual replies.
///
/// Serves as the offline generator and as the test substitute for the real
/// provider adapter; replies are selected round-robin, never randomly, so
/// scripted conversations replay identically.
pub struct ScriptedGenerator {
    tamil_replies: Vec<String>,
    english_replies: Vec<String>,
    cursor: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(tamil_replies: Vec<String>, english_replies: Vec<String>) -> Self {
        let defaults = Self::default_replies();
        Self {
            tamil_replies: non_empty_or(tamil_replies, defaults.0),
            english_replies: non_empty_or(english_replies, defaults.1),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_default_replies() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// One reply repeated forever, for tests that assert on exact content.
    pub fn repeating(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(vec![reply.clone()], vec![reply])
    }

    fn default_replies() -> (Vec<String>, Vec<String>) {
        (
            vec![
                "உங்கள் கேள்விக்கு உதவ முயற்சிக்கிறேன். மேலும் விவரங்களைச் சொல்லுங்கள்."
                    .to_string(),
                "இந்தத் தலைப்பில் மேலும் அறிய விரும்புகிறீர்களா?".to_string(),
            ],
            vec![
                "I can help with that. Could you share a little more detail?".to_string(),
                "Would you like to know more about this topic?".to_string(),
            ],
        )
    }

    fn next_reply(&self, language: Language) -> String {
        let pool = match language {
            Language::Tamil => &self.tamil_replies,
            Language::English => &self.english_replies,
        };
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        pool[index % pool.len()].clone()
    }
}

impl ResponseGenerator for ScriptedGenerator {
    fn generate(
        &self,
        request: GenerateRequest,
        cancel: CancelToken,
    ) -> BoxFuture<'_, GeneratorResult<String>> {
        let reply = self.next_reply(request.language);
        Box::pin(async move {
            if cancel.is_cancelled() {
                return CancelledSnafu {
                    stage: "scripted-generate-cancelled",
                }
                .fail();
            }

            Ok(reply)
        })
    }
}

fn non_empty_or(replies: Vec<String>, fallback: Vec<String>) -> Vec<String> {
    if replies.is_empty() { fallback } else { replies }
}

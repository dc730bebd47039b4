use pesu_storage::Language;

/// Prompt issued when an English utterance arrives under a Tamil preference,
/// asking whether to continue in Tamil or English. Tagged `ta` when appended.
pub const LANGUAGE_NEGOTIATION_PROMPT: &str = "நீங்கள் ஆங்கிலத்தில் கேள்வி கேட்டுள்ளீர்கள். \
     நான் தமிழில் பதில் சொல்லட்டுமா அல்லது ஆங்கிலத்தில் பதில் சொல்லட்டுமா?\n\
     You asked in English. Would you like me to reply in Tamil or English?";

/// Returns true for code points in the Tamil Unicode block (U+0B80..=U+0BFF).
pub fn is_tamil_code_point(character: char) -> bool {
    ('\u{0B80}'..='\u{0BFF}').contains(&character)
}

/// Classifies text by script: any Tamil-block code point means `Ta`,
/// otherwise `En`. Pure and total; empty text classifies as `En`.
pub fn detect(text: &str) -> Language {
    if text.chars().any(is_tamil_code_point) {
        Language::Ta
    } else {
        Language::En
    }
}

/// The negotiation rule fires only for English input under a Tamil
/// preference. The mirror case deliberately does not negotiate.
pub fn needs_negotiation(detected: Language, preferred: Language) -> bool {
    matches!((detected, preferred), (Language::En, Language::Ta))
}

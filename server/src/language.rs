// Language detection for multilingual prompt selection
//
// A character-class heuristic is enough here: if more than 10% of the
// meaningful characters are Hangul syllables the text is treated as Korean,
// otherwise English. Ambiguous or empty input defaults to English.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Language;

/// Hangul syllable ratio above which text counts as Korean
const KOREAN_RATIO_THRESHOLD: f64 = 0.1;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
    })
}

/// Strip URLs and email addresses so they don't skew the character counts
fn clean_text(text: &str) -> String {
    let text = url_regex().replace_all(text, " ");
    let text = email_regex().replace_all(&text, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

/// Detect the primary language of the input text
pub fn detect(text: &str) -> Language {
    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return Language::En;
    }

    let mut korean = 0usize;
    let mut total = 0usize;
    for c in cleaned.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if is_hangul(c) {
            korean += 1;
        }
    }

    if total > 0 && (korean as f64 / total as f64) > KOREAN_RATIO_THRESHOLD {
        Language::Ko
    } else {
        Language::En
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_english() {
        assert_eq!(detect("Latest trends in quantum computing"), Language::En);
    }

    #[test]
    fn test_detect_korean() {
        assert_eq!(detect("AI 기술의 최신 동향"), Language::Ko);
    }

    #[test]
    fn test_empty_defaults_to_english() {
        assert_eq!(detect(""), Language::En);
        assert_eq!(detect("   "), Language::En);
    }

    #[test]
    fn test_urls_do_not_skew_detection() {
        // The URL dominates by character count but must be ignored
        assert_eq!(
            detect("양자 컴퓨팅 https://example.com/a/very/long/path/to/an/article"),
            Language::Ko
        );
    }

    #[test]
    fn test_mostly_latin_with_few_hangul() {
        // Below the 10% threshold stays English
        let text = "quantum computing error correction topological qubits 혁신";
        let cleaned = clean_text(text);
        let hangul: usize = cleaned.chars().filter(|c| is_hangul(*c)).count();
        assert!(hangul > 0);
        assert_eq!(detect(text), Language::En);
    }

    #[test]
    fn test_clean_text_strips_emails() {
        let cleaned = clean_text("contact admin@example.com for info");
        assert!(!cleaned.contains('@'));
    }
}

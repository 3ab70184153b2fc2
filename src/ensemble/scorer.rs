//! Heuristic answer quality.

use std::collections::HashSet;

/// Content shorter than this (in characters) is not an answer.
pub const MIN_CONTENT_CHARS: usize = 10;
/// Length at which the length bonus saturates.
pub const LENGTH_CAP_CHARS: usize = 500;

const BASE_SCORE: f64 = 0.5;
const LENGTH_WEIGHT: f64 = 0.2;
const RELEVANCE_WEIGHT: f64 = 0.3;

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Fraction of the prompt's distinct tokens that also appear in `content`.
pub fn token_overlap(content: &str, prompt: &str) -> f64 {
    let prompt_tokens = token_set(prompt);
    if prompt_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens = token_set(content);
    let shared = prompt_tokens.intersection(&content_tokens).count();
    (shared as f64 / prompt_tokens.len() as f64).min(1.0)
}

/// Quality of `content` as an answer to `prompt`, in [0, 1].
///
/// Zero for empty or very short content. Otherwise a 0.5 base, up to 0.2 for
/// length (saturating at 500 chars) and up to 0.3 for prompt token overlap.
pub fn quality(content: &str, prompt: &str) -> f64 {
    let chars = content.chars().count();
    if chars < MIN_CONTENT_CHARS {
        return 0.0;
    }

    let length = (chars as f64 / LENGTH_CAP_CHARS as f64).min(1.0);
    let relevance = token_overlap(content, prompt);

    (BASE_SCORE + LENGTH_WEIGHT * length + RELEVANCE_WEIGHT * relevance).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_content_scores_zero() {
        assert_eq!(quality("", "anything"), 0.0);
        assert_eq!(quality("ok", "anything"), 0.0);
        assert_eq!(quality("123456789", "anything"), 0.0);
        assert!(quality("1234567890", "anything") > 0.0);
    }

    #[test]
    fn test_short_content_counts_chars_not_bytes() {
        // 9 chars, 27 bytes
        assert_eq!(quality("海海海海海海海海海", "海"), 0.0);
    }

    #[test]
    fn test_length_component() {
        let ten = "x".repeat(10);
        let expected = 0.5 + 0.2 * (10.0 / 500.0);
        assert!((quality(&ten, "unrelated") - expected).abs() < 1e-12);

        let long = "x".repeat(5000);
        assert!((quality(&long, "unrelated") - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_full_overlap_and_cap() {
        let prompt = "tell me about rust";
        let content = format!("{} {}", "Tell me about Rust", "y".repeat(600));
        assert!((quality(&content, prompt) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_overlap_uses_distinct_tokens() {
        assert!((token_overlap("sea sea", "sea sea sky") - 0.5).abs() < 1e-12);
        assert_eq!(token_overlap("anything", ""), 0.0);
        assert_eq!(token_overlap("anything", "   "), 0.0);
    }

    #[test]
    fn test_monotonic_in_length() {
        let prompt = "write a short poem about the sea";
        let mut last = 0.0;
        for len in (10..=600).step_by(7) {
            let content = format!("sea {}", "w".repeat(len));
            let q = quality(&content, prompt);
            assert!(q >= last, "quality dropped at length {}", len);
            assert!((0.0..=1.0).contains(&q));
            last = q;
        }
    }
}

//! Fuzzy matching of transcribed speech against escape and forbidden phrases.

use rapidfuzz::fuzz;

/// Score two strings from 0 to 100 using the indel ratio:
/// `2 * LCS(a, b) / (len(a) + len(b))`, counted in chars.
///
/// Symmetric and case-sensitive. Two empty strings are identical (100).
pub fn similarity(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    let ratio = fuzz::ratio(a.chars(), b.chars());
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Split an utterance into candidate sentences.
///
/// `,` `!` and `?` are treated as sentence boundaries. When the utterance
/// splits into several sentences, the whole normalised utterance is appended
/// last, since transcripts often put boundaries in the wrong place.
pub fn split_sentences(text: &str) -> Vec<String> {
    let normalized: String = text
        .trim()
        .chars()
        .map(|c| match c {
            ',' | '!' | '?' => '.',
            other => other,
        })
        .collect();

    let mut sentences: Vec<String> = normalized
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if sentences.len() > 1 {
        sentences.push(normalized);
    }

    sentences
}

/// How a sentence relates to a prisoner's escape phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeVerdict {
    Escape(u8),
    Close(u8),
    Miss(u8),
}

/// Act/warn cut-offs for escape and forbidden phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchThresholds {
    pub act: u8,
    pub warn: u8,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self { act: 80, warn: 50 }
    }
}

impl MatchThresholds {
    pub fn judge_escape(&self, sentence: &str, escape_phrase: &str) -> EscapeVerdict {
        let score = similarity(sentence, escape_phrase);
        if score >= self.act {
            EscapeVerdict::Escape(score)
        } else if score >= self.warn {
            EscapeVerdict::Close(score)
        } else {
            EscapeVerdict::Miss(score)
        }
    }

    /// First forbidden phrase the sentence matches, with its score.
    pub fn find_forbidden<'a>(
        &self,
        sentence: &str,
        forbidden: &'a [String],
    ) -> Option<(&'a str, u8)> {
        forbidden.iter().find_map(|line| {
            let score = similarity(sentence, line);
            (score >= self.act).then_some((line.as_str(), score))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_score_100() {
        assert_eq!(similarity("let me out", "let me out"), 100);
        assert_eq!(similarity("", ""), 100);
    }

    #[test]
    fn test_similarity_is_symmetric_and_bounded() {
        let pairs = [
            ("lemme out please", "let me out"),
            ("the banned word", "banned word"),
            ("hello there", "let me out"),
            ("", "abc"),
            ("привет", "привет мир"),
        ];
        for (a, b) in pairs {
            let ab = similarity(a, b);
            assert_eq!(ab, similarity(b, a), "{a:?} vs {b:?}");
            assert!(ab <= 100);
        }
    }

    #[test]
    fn test_known_scores() {
        assert_eq!(similarity("lemme out please", "let me out"), 62);
        assert_eq!(similarity("the banned word", "banned word"), 85);
        assert_eq!(similarity("banned words", "banned word"), 96);
        assert_eq!(similarity("", "abc"), 0);
    }

    #[test]
    fn test_case_sensitive() {
        assert!(similarity("Let me out", "let me out") < 100);
    }

    #[test]
    fn test_split_sentences_punctuation() {
        let sentences = split_sentences(" Hello, let me out! Please? ");
        assert_eq!(
            sentences,
            vec![
                "Hello".to_string(),
                "let me out".to_string(),
                "Please".to_string(),
                "Hello. let me out. Please.".to_string(),
            ]
        );
    }

    #[test]
    fn test_single_sentence_is_not_repeated() {
        assert_eq!(split_sentences("let me out"), vec!["let me out".to_string()]);
        assert_eq!(split_sentences("let me out!"), vec!["let me out".to_string()]);
        assert!(split_sentences("   ").is_empty());
        assert!(split_sentences("?!").is_empty());
    }

    #[test]
    fn test_judge_escape() {
        let thresholds = MatchThresholds::default();
        assert_eq!(
            thresholds.judge_escape("let me out", "let me out"),
            EscapeVerdict::Escape(100)
        );
        assert_eq!(
            thresholds.judge_escape("lemme out please", "let me out"),
            EscapeVerdict::Close(62)
        );
        assert!(matches!(
            thresholds.judge_escape("hello there", "let me out"),
            EscapeVerdict::Miss(_)
        ));
    }

    #[test]
    fn test_find_forbidden_returns_first_match() {
        let thresholds = MatchThresholds::default();
        let forbidden = vec!["cabbage".to_string(), "banned word".to_string()];
        assert_eq!(
            thresholds.find_forbidden("the banned word", &forbidden),
            Some(("banned word", 85))
        );
        assert_eq!(thresholds.find_forbidden("hello", &forbidden), None);
    }
}

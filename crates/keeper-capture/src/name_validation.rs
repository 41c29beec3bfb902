//! Validates inbound text as a plausible personal name.
//!
//! People reply to the name prompt with greetings, sentences, and junk;
//! accepting those would write garbage contacts. Every rejection carries the
//! specific rule that fired so the retry prompt can tell the contact exactly
//! what to fix.

use thiserror::Error;

/// Maximum alphabetic characters across the whole name.
const MAX_NAME_LETTERS: usize = 12;
/// Minimum alphabetic characters in the first token.
const MIN_FIRST_TOKEN_LETTERS: usize = 3;

/// Tokens nobody is actually called. Lowercase.
const JUNK_TOKENS: &[&str] = &[
    "abc", "asdf", "hello", "hey", "hmm", "lol", "name", "nil", "none", "null", "ok", "okay",
    "test", "testing", "yes",
];

/// First tokens that start a sentence rather than a name. Lowercase.
const SENTENCE_OPENERS: &[&str] = &[
    "am", "good", "i", "i'm", "im", "it's", "its", "my", "please", "the", "this",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameRejection {
    #[error("name is empty")]
    Empty,
    #[error("expected one or two words, got {0}")]
    TooManyWords(usize),
    #[error("'{0}' is not usable in a name")]
    ForbiddenCharacter(char),
    #[error("'{0}' reads like the start of a sentence, not a name")]
    SentenceOpener(String),
    #[error("'{0}' does not look like a real name")]
    JunkToken(String),
    #[error("first word needs at least {MIN_FIRST_TOKEN_LETTERS} letters, got {0}")]
    FirstTokenTooShort(usize),
    #[error("name is too long: {0} letters, the limit is {MAX_NAME_LETTERS}")]
    TooLong(usize),
}

/// Checks `input` against the name rules and returns the normalized form
/// (tokens joined by single spaces).
pub fn validate_name(input: &str) -> Result<String, NameRejection> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(NameRejection::Empty);
    }
    if tokens.len() > 2 {
        return Err(NameRejection::TooManyWords(tokens.len()));
    }

    for token in &tokens {
        if let Some(bad) = token
            .chars()
            .find(|c| !c.is_alphabetic() && !matches!(c, '-' | '\''))
        {
            return Err(NameRejection::ForbiddenCharacter(bad));
        }
    }

    let first_lower = tokens[0].to_lowercase();
    if SENTENCE_OPENERS.contains(&first_lower.as_str()) {
        return Err(NameRejection::SentenceOpener(tokens[0].to_string()));
    }
    for token in &tokens {
        let lower = token.to_lowercase();
        if JUNK_TOKENS.contains(&lower.as_str()) {
            return Err(NameRejection::JunkToken((*token).to_string()));
        }
    }

    let first_letters = letter_count(tokens[0]);
    if first_letters < MIN_FIRST_TOKEN_LETTERS {
        return Err(NameRejection::FirstTokenTooShort(first_letters));
    }
    let total_letters: usize = tokens.iter().map(|token| letter_count(token)).sum();
    if total_letters > MAX_NAME_LETTERS {
        return Err(NameRejection::TooLong(total_letters));
    }

    Ok(tokens.join(" "))
}

fn letter_count(token: &str) -> usize {
    token.chars().filter(|c| c.is_alphabetic()).count()
}

/// What a reply at the confirmation step means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySignal {
    Affirmative,
    Negative,
    Unrecognized,
}

/// Classifies a confirmation reply. Anything ambiguous is `Unrecognized`;
/// the dialog never guesses.
pub fn classify_reply(input: &str) -> ReplySignal {
    let normalized: String = input
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase();
    match normalized.as_str() {
        "yes" | "y" | "yeah" | "yep" | "sure" | "correct" | "confirm" | "ok" | "okay" => {
            ReplySignal::Affirmative
        }
        "no" | "n" | "nope" | "nah" | "wrong" | "change" | "change it" => ReplySignal::Negative,
        _ => ReplySignal::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_single_and_double_token_names() {
        assert_eq!(validate_name("Justice").expect("valid"), "Justice");
        assert_eq!(validate_name("Justice Tech").expect("valid"), "Justice Tech");
        assert_eq!(validate_name("  Justice   Tech ").expect("valid"), "Justice Tech");
    }

    #[test]
    fn accepts_diacritics_hyphens_and_apostrophes() {
        assert!(validate_name("Chiné").is_ok());
        assert!(validate_name("Mary-Ann").is_ok());
        assert!(validate_name("O'Neil").is_ok());
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(validate_name(""), Err(NameRejection::Empty));
        assert_eq!(validate_name("   "), Err(NameRejection::Empty));
    }

    #[test]
    fn rejects_three_word_names() {
        assert_eq!(
            validate_name("Justice Tech Hub"),
            Err(NameRejection::TooManyWords(3))
        );
    }

    #[test]
    fn rejects_short_first_word() {
        assert_eq!(
            validate_name("Al Haruna"),
            Err(NameRejection::FirstTokenTooShort(2))
        );
    }

    #[test]
    fn rejects_digits() {
        assert_eq!(
            validate_name("Justice2"),
            Err(NameRejection::ForbiddenCharacter('2'))
        );
    }

    #[test]
    fn rejects_sentence_openers_and_narratives() {
        assert_eq!(
            validate_name("I am testing this bot"),
            Err(NameRejection::TooManyWords(5))
        );
        assert!(matches!(
            validate_name("I am"),
            Err(NameRejection::SentenceOpener(_))
        ));
        assert!(matches!(
            validate_name("My name"),
            Err(NameRejection::SentenceOpener(_))
        ));
    }

    #[test]
    fn rejects_junk_tokens() {
        assert!(matches!(
            validate_name("Testing"),
            Err(NameRejection::JunkToken(_))
        ));
        assert!(matches!(
            validate_name("hello"),
            Err(NameRejection::JunkToken(_))
        ));
    }

    #[test]
    fn rejects_over_long_names() {
        assert_eq!(
            validate_name("Bartholomew Nnamdiukwu"),
            Err(NameRejection::TooLong(21))
        );
    }

    #[test]
    fn reply_classification_never_guesses() {
        assert_eq!(classify_reply("yes"), ReplySignal::Affirmative);
        assert_eq!(classify_reply("Yes!"), ReplySignal::Affirmative);
        assert_eq!(classify_reply("no"), ReplySignal::Negative);
        assert_eq!(classify_reply("Nah."), ReplySignal::Negative);
        assert_eq!(classify_reply("maybe"), ReplySignal::Unrecognized);
        assert_eq!(classify_reply("what?"), ReplySignal::Unrecognized);
    }
}

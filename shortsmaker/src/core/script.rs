//! Narration Script Preparation
//!
//! Cleans post text before it goes to speech synthesis: typographic
//! characters are folded to ASCII, control whitespace and parentheses are
//! removed, Reddit abbreviations are spelled out and tokens mixing letters
//! and digits are split so the voice reads them naturally.

use std::path::Path;

use tracing::debug;

use crate::core::fs::atomic_write_bytes;
use crate::core::CoreResult;

/// Abbreviations spelled out for narration, matched on whole words
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("AITA", "Am I the asshole"),
    ("WIBTA", "Would I be the asshole"),
    ("NTA", "Not the asshole"),
    ("YTA", "You're the asshole"),
    ("YWBTA", "You would be the asshole"),
    ("YWNBTA", "You would not be the asshole"),
    ("ESH", "Everyone sucks here"),
    ("NAH", "No assholes here"),
    ("INFO", "Not enough info"),
    ("FIL", "father in law"),
    ("BIL", "brother in law"),
    ("MIL", "mother in law"),
    ("SIL", "sister in law"),
    ("BF", "boyfriend"),
    ("GF", "girlfriend"),
    ("bf", "boyfriend"),
    ("gf", "girlfriend"),
];

/// True when `word` contains at least one letter and one digit
pub fn has_alpha_and_digit(word: &str) -> bool {
    word.chars().any(char::is_alphabetic) && word.chars().any(|c| c.is_ascii_digit())
}

/// Inserts a space wherever a run of letters meets a run of digits.
///
/// `"5pm"` becomes `"5 pm"`, `"a1!b2@"` becomes `"a 1! b 2@"`. Other
/// characters are copied unchanged and do not end a run.
pub fn split_alpha_and_digit(word: &str) -> String {
    #[derive(PartialEq)]
    enum Run {
        None,
        Alpha,
        Digit,
    }

    let mut out = String::with_capacity(word.len() + 4);
    let mut run = Run::None;
    for c in word.chars() {
        if c.is_alphabetic() {
            if run == Run::Digit {
                out.push(' ');
            }
            run = Run::Alpha;
        } else if c.is_ascii_digit() {
            if run == Run::Alpha {
                out.push(' ');
            }
            run = Run::Digit;
        }
        out.push(c);
    }
    out
}

fn fold_typography(c: char) -> Option<&'static str> {
    Some(match c {
        '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{2032}' => "'",
        '\u{201C}' | '\u{201D}' | '\u{201F}' | '\u{2033}' => "\"",
        '\u{2013}' | '\u{2014}' | '\u{2212}' => "-",
        '\u{2026}' => "...",
        '\u{00A0}' | '\u{2009}' | '\u{200A}' | '\u{202F}' => " ",
        '\u{200B}' | '\u{FEFF}' => "",
        _ => return None,
    })
}

/// Replaces a token whose alphanumeric core is a known abbreviation
fn expand_token(token: &str) -> String {
    let core_start = token
        .find(char::is_alphanumeric)
        .unwrap_or(token.len());
    let core_len = token[core_start..]
        .find(|c: char| !c.is_alphanumeric())
        .unwrap_or(token.len() - core_start);
    let core = &token[core_start..core_start + core_len];

    match ABBREVIATIONS.iter().find(|(abbr, _)| *abbr == core) {
        Some((_, expansion)) => format!(
            "{}{}{}",
            &token[..core_start],
            expansion,
            &token[core_start + core_len..]
        ),
        None => token.to_string(),
    }
}

/// Cleans post text for narration
pub fn prepare_script(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.chars() {
        match fold_typography(c) {
            Some(s) => folded.push_str(s),
            None if c == '(' || c == ')' => {}
            None if c.is_control() => folded.push(' '),
            None => folded.push(c),
        }
    }

    let words: Vec<String> = folded
        .split_whitespace()
        .map(expand_token)
        .map(|w| {
            if has_alpha_and_digit(&w) {
                split_alpha_and_digit(&w)
            } else {
                w
            }
        })
        .collect();
    let script = words.join(" ");
    debug!("Prepared script: {} -> {} chars", text.len(), script.len());
    script
}

/// Writes the prepared script next to the narration audio
pub fn save_script(path: &Path, script: &str) -> CoreResult<()> {
    atomic_write_bytes(path, script.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_alpha_and_digit() {
        assert!(has_alpha_and_digit("a1"));
        assert!(has_alpha_and_digit("A1"));
        assert!(has_alpha_and_digit("a@1"));
        assert!(!has_alpha_and_digit("abc"));
        assert!(!has_alpha_and_digit("1234"));
        assert!(!has_alpha_and_digit(""));
    }

    #[test]
    fn test_split_alpha_and_digit() {
        assert_eq!(split_alpha_and_digit("abc123"), "abc 123");
        assert_eq!(split_alpha_and_digit("a1b2c3"), "a 1 b 2 c 3");
        assert_eq!(split_alpha_and_digit("a1!b2@"), "a 1! b 2@");
        assert_eq!(split_alpha_and_digit("ABC123"), "ABC 123");
        assert_eq!(split_alpha_and_digit("abcdef"), "abcdef");
        assert_eq!(split_alpha_and_digit("123456"), "123456");
        assert_eq!(split_alpha_and_digit(""), "");
    }

    #[test]
    fn test_abbreviations_expand_on_whole_words_only() {
        assert_eq!(
            prepare_script("AITA for telling my MIL's friend NTA?"),
            "Am I the asshole for telling my mother in law's friend Not the asshole?"
        );
        assert_eq!(prepare_script("MILITARY INFOrmation"), "MILITARY INFOrmation");
        assert_eq!(prepare_script("my bf and GF."), "my boyfriend and girlfriend.");
    }

    #[test]
    fn test_whitespace_and_parentheses() {
        assert_eq!(
            prepare_script("  Hello\tthere (quietly)\r\nfriend  "),
            "Hello there quietly friend"
        );
    }

    #[test]
    fn test_mixed_tokens_split_and_typography_folded() {
        assert_eq!(
            prepare_script("We met at 5pm \u{2014} she said \u{201C}it\u{2019}s 2x\u{201D}\u{2026}"),
            "We met at 5 pm - she said \"it's 2 x\"..."
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(prepare_script(""), "");
        assert_eq!(prepare_script(" \n\t "), "");
    }
}

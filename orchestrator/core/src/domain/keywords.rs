// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Token-based keyword matching shared by the router and the registry.
//!
//! Text is split into lower-cased alphanumeric tokens and a trailing plural
//! `s` is folded, so `"Motors"` matches the keyword `motor` while `"arm"`
//! never matches inside `"alarm"`. Multi-word keywords match as contiguous
//! token runs.

/// Lower-cased, plural-folded word tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(fold)
        .collect()
}

fn fold(token: &str) -> String {
    let lower = token.to_lowercase();
    if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    }
}

/// A set of keywords, each a phrase of one or more tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    phrases: Vec<Vec<String>>,
}

impl KeywordSet {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            phrases: keywords
                .iter()
                .map(|k| tokenize(k.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Normalized phrases, each joined by a single space.
    pub fn phrases(&self) -> impl Iterator<Item = String> + '_ {
        self.phrases.iter().map(|p| p.join(" "))
    }

    /// Whether any phrase starts at token `index`.
    pub fn matches_at(&self, tokens: &[String], index: usize) -> bool {
        self.phrases
            .iter()
            .any(|phrase| tokens.get(index..index + phrase.len()) == Some(phrase.as_slice()))
    }

    /// Token index of the earliest match.
    pub fn first_match(&self, tokens: &[String]) -> Option<usize> {
        (0..tokens.len()).find(|&i| self.matches_at(tokens, i))
    }

    pub fn matches(&self, tokens: &[String]) -> bool {
        self.first_match(tokens).is_some()
    }
}

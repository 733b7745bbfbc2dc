//! Ecosystem-aware version ordering.
//!
//! [`VersionComparator::compare`] dispatches on the ecosystem of the
//! [`VersionKey`]. Maven consults a per-artifact override table first, see
//! [`maven::MAVEN_OVERRIDES`].
//!
//! Every ordering here derives a key from each version string alone and
//! compares keys, so the result is always a strict weak ordering, including
//! for strings that are not valid versions at all.
//!
//! # Example
//!
//! ```
//! use depscan::model::Ecosystem;
//! use depscan::version::{VersionComparator, VersionKey};
//!
//! let key = VersionKey::new(Ecosystem::Maven, "com.google.guava:guava", "31.1-jre");
//! let comparator = VersionComparator::new();
//!
//! assert_eq!(comparator.compare_i32(&key, "1.2.3-android", "1.2.3-jre"), -1);
//! ```

pub mod maven;

use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::model::Ecosystem;

pub use maven::{MavenOverride, MAVEN_OVERRIDES};

/// A dependency as declared: ecosystem, package name, and the version it
/// asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionKey {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: String,
}

impl VersionKey {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VersionComparator;

impl VersionComparator {
    pub fn new() -> Self {
        Self
    }

    pub fn compare(&self, key: &VersionKey, a: &str, b: &str) -> Ordering {
        match key.ecosystem {
            Ecosystem::Maven => match MAVEN_OVERRIDES.get(key.name.as_str()) {
                Some(rule) => rule.compare(&key.version, a, b),
                None => maven::compare(a, b),
            },
            Ecosystem::Npm
            | Ecosystem::CratesIo
            | Ecosystem::Go
            | Ecosystem::Packagist
            | Ecosystem::Hex
            | Ecosystem::Pub
            | Ecosystem::NuGet => coerce_semver(a).cmp(&coerce_semver(b)),
            _ => compare_tokens(a, b),
        }
    }

    /// [`compare`](Self::compare) as -1, 0 or 1.
    pub fn compare_i32(&self, key: &VersionKey, a: &str, b: &str) -> i32 {
        match self.compare(key, a, b) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// Whether `candidate` is a later release than `current`.
    pub fn is_newer(&self, key: &VersionKey, candidate: &str, current: &str) -> bool {
        self.compare(key, candidate, current) == Ordering::Greater
    }
}

/// Reads any string as a SemVer version: a leading `v` is dropped, missing
/// or non-numeric release parts count as zero, build metadata is ignored and
/// an invalid prerelease is dropped.
fn coerce_semver(raw: &str) -> Version {
    let raw = raw.trim().trim_start_matches(['v', 'V']);
    let raw = raw.split_once('+').map_or(raw, |(version, _build)| version);
    let (release, pre) = raw.split_once('-').unwrap_or((raw, ""));

    let mut parts = release.split('.').map(|part| {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u64>().unwrap_or(0)
    });

    Version {
        major: parts.next().unwrap_or(0),
        minor: parts.next().unwrap_or(0),
        patch: parts.next().unwrap_or(0),
        pre: Prerelease::new(pre).unwrap_or(Prerelease::EMPTY),
        build: BuildMetadata::EMPTY,
    }
}

/// Fallback for ecosystems without a dedicated ordering: alternating runs
/// of digits and letters, numbers numerically, letters before numbers (so
/// `1.0a1 < 1.0 < 1.0.1`), trailing zeros insignificant.
fn compare_tokens(a: &str, b: &str) -> Ordering {
    let (a, b) = (tokens(a), tokens(b));
    let zero = Token::Number(String::new());
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).unwrap_or(&zero).cmp(b.get(i).unwrap_or(&zero)))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    /// Digits without leading zeros.
    Number(String),
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Text(x), Token::Text(y)) => x.cmp(y),
            (Token::Text(_), Token::Number(_)) => Ordering::Less,
            (Token::Number(_), Token::Text(_)) => Ordering::Greater,
            (Token::Number(x), Token::Number(y)) => x.len().cmp(&y.len()).then_with(|| x.cmp(y)),
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn tokens(version: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = version.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                digits.push(d);
            }
            tokens.push(Token::Number(digits.trim_start_matches('0').to_string()));
        } else if c.is_alphabetic() {
            let mut text = String::new();
            while let Some(l) = chars.next_if(|l| l.is_alphabetic()) {
                text.extend(l.to_lowercase());
            }
            tokens.push(Token::Text(text));
        } else {
            chars.next();
        }
    }

    while tokens.last() == Some(&Token::Number(String::new())) {
        tokens.pop();
    }
    tokens
}

//! Wildcard matching for ignore rules.
//!
//! Patterns are translated to regular expressions once and served from the
//! process-wide pattern cache afterwards.

use regex::Regex;
use std::path::Path;
use std::sync::Arc;

use crate::cachedregex;

/// Matches a package name against a pattern where `*` matches any run of
/// characters, `/` included (e.g. `@types/*`, `github.com/acme/*`).
pub fn name_matches(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }
    match name_regex(pattern) {
        Ok(regex) => regex.is_match(name),
        Err(_) => false,
    }
}

/// Matches a path against a glob. `**` spans directories, `*` and `?` stay
/// within one component. Relative globs may match at any directory boundary,
/// absolute ones must match from the root.
pub fn path_matches(pattern: &str, path: &Path) -> bool {
    let text = normalize_path_text(&path.to_string_lossy());
    match path_regex(pattern) {
        Ok(regex) => regex.is_match(&text),
        Err(_) => false,
    }
}

pub(crate) fn name_regex(pattern: &str) -> Result<Arc<Regex>, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    cachedregex::compile(&format!("^{body}$"))
}

pub(crate) fn path_regex(pattern: &str) -> Result<Arc<Regex>, regex::Error> {
    let pattern = normalize_path_text(pattern);
    let (anchor, pattern) = match pattern.strip_prefix('/') {
        Some(rest) => ("^/", rest.to_string()),
        None => ("^(?:.*/)?", pattern),
    };

    let mut body = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    // `**/` also matches zero directories
                    chars.next();
                    body.push_str("(?:.*/)?");
                } else {
                    body.push_str(".*");
                }
            }
            '*' => body.push_str("[^/]*"),
            '?' => body.push_str("[^/]"),
            c => body.push_str(&regex::escape(&c.to_string())),
        }
    }

    cachedregex::compile(&format!("{anchor}{body}$"))
}

/// Uses `/` as the only separator and, on case-insensitive platforms,
/// folds case.
pub(crate) fn normalize_path_text(text: &str) -> String {
    let text = text.replace('\\', "/");
    if cfg!(windows) {
        text.to_lowercase()
    } else {
        text
    }
}

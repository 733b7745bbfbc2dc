//! Process-wide cache of compiled regular expressions.
//!
//! Ignore rules and version overrides build their patterns at runtime from
//! config text. Compiling the same pattern for every package is wasteful, so
//! each distinct pattern is compiled once and shared afterwards.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

static CACHE: LazyLock<RwLock<HashMap<String, Arc<Regex>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Returns the compiled form of `pattern`, compiling it on first use.
///
/// Every call with the same pattern text returns the same `Arc`.
pub fn compile(pattern: &str) -> Result<Arc<Regex>, regex::Error> {
    if let Some(regex) = read_cache().get(pattern) {
        return Ok(Arc::clone(regex));
    }

    let mut cache = CACHE.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    // Another writer may have won the race while we waited for the lock.
    if let Some(regex) = cache.get(pattern) {
        return Ok(Arc::clone(regex));
    }

    let regex = Arc::new(Regex::new(pattern)?);
    cache.insert(pattern.to_string(), Arc::clone(&regex));
    Ok(regex)
}

/// Like [`compile`], for patterns that are constants in this crate.
///
/// # Panics
///
/// Panics if the pattern does not compile.
pub fn must_compile(pattern: &str) -> Arc<Regex> {
    match compile(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("invalid built-in pattern {pattern:?}: {err}"),
    }
}

fn read_cache() -> std::sync::RwLockReadGuard<'static, HashMap<String, Arc<Regex>>> {
    CACHE.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

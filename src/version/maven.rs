//! Maven version ordering.
//!
//! Versions are split into numbers and qualifiers on `.`. A `-` or a change
//! between digits and letters starts a nested list holding the rest of the
//! version. Qualifiers order as
//!
//! `alpha` < `beta` < `milestone` < `rc` < `snapshot` < release < `sp` <
//! any other qualifier (lexically)
//!
//! where release is `ga`, `final`, `release` or the empty qualifier. Numbers
//! outrank nested lists, which outrank qualifiers. Missing items count as
//! `0` or release, and trailing ones are dropped, so `1`, `1.0` and
//! `1.0.0-ga` are the same version and `1.0-rc1 < 1.0 < 1.0-sp1 < 1.0.1`.
//!
//! Some artifacts have release histories the general rules get wrong. Those
//! are listed in [`MAVEN_OVERRIDES`] and consulted before the general rules.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::cachedregex;

/// Per-artifact ordering exceptions, keyed by `groupId:artifactId`.
pub static MAVEN_OVERRIDES: LazyLock<HashMap<&'static str, MavenOverride>> =
    LazyLock::new(|| {
        HashMap::from([
            (
                // Guava ships every release twice, as `-jre` and `-android`.
                // A dependency on one flavor must keep resolving to that flavor.
                "com.google.guava:guava",
                MavenOverride::PreferChannel {
                    channels: &["android", "jre"],
                    default: "jre",
                },
            ),
            (
                // commons-io published 2003-era builds as e.g. 20030203.000550.
                // They predate 1.0 but outrank every real release numerically.
                "commons-io:commons-io",
                MavenOverride::DemoteTimestamps,
            ),
        ])
    });

const TIMESTAMP_PATTERN: &str = r"^\d{8}(\.\d{6})?$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MavenOverride {
    /// The release channel is a qualifier suffix (`1.2.3-jre`). Versions on
    /// the channel the dependency's own version is on rank above versions on
    /// any other channel; `default` is assumed when its version names none.
    PreferChannel {
        channels: &'static [&'static str],
        default: &'static str,
    },
    /// Timestamp-shaped versions rank below every dotted release.
    DemoteTimestamps,
}

impl MavenOverride {
    /// Orders `a` and `b` for a dependency whose declared version is
    /// `key_version`. Falls through to the general rules on a tie.
    pub fn compare(&self, key_version: &str, a: &str, b: &str) -> Ordering {
        let preference = match self {
            MavenOverride::PreferChannel { channels, default } => {
                let channel = channels
                    .iter()
                    .copied()
                    .find(|c| has_channel(key_version, c))
                    .unwrap_or(*default);
                has_channel(a, channel).cmp(&has_channel(b, channel))
            }
            MavenOverride::DemoteTimestamps => {
                (!is_timestamp(a)).cmp(&!is_timestamp(b))
            }
        };
        preference.then_with(|| compare(a, b))
    }
}

fn has_channel(version: &str, channel: &str) -> bool {
    version
        .to_lowercase()
        .strip_suffix(channel)
        .is_some_and(|rest| rest.ends_with('-'))
}

fn is_timestamp(version: &str) -> bool {
    cachedregex::must_compile(TIMESTAMP_PATTERN).is_match(version.trim())
}

/// General Maven ordering, without per-artifact overrides.
pub fn compare(a: &str, b: &str) -> Ordering {
    compare_lists(&parse(a), &parse(b))
}

fn compare_lists(a: &[Item], b: &[Item]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| match (a.get(i), b.get(i)) {
            (Some(x), y) => x.compare(y),
            (None, Some(y)) => y.compare(None).reverse(),
            (None, None) => Ordering::Equal,
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    /// Digits without leading zeros; zero is the empty string.
    Number(Digits),
    Qualifier(Qualifier),
    /// Everything after a `-` or a digit/letter change.
    List(Vec<Item>),
}

impl Item {
    /// Items that padding stands in for: `0`, the release qualifier and
    /// empty lists.
    fn is_null(&self) -> bool {
        match self {
            Item::Number(n) => n.0.is_empty(),
            Item::Qualifier(q) => *q == Qualifier::Release,
            Item::List(items) => items.is_empty(),
        }
    }

    /// Compares against another item, `None` being padding.
    fn compare(&self, other: Option<&Item>) -> Ordering {
        match (self, other) {
            (Item::Number(n), None) if n.0.is_empty() => Ordering::Equal,
            (Item::Number(_), None) => Ordering::Greater,
            (Item::Number(a), Some(Item::Number(b))) => a.cmp(b),
            (Item::Number(_), Some(_)) => Ordering::Greater,

            (Item::Qualifier(q), None) => q.cmp(&Qualifier::Release),
            (Item::Qualifier(_), Some(Item::Number(_) | Item::List(_))) => Ordering::Less,
            (Item::Qualifier(a), Some(Item::Qualifier(b))) => a.cmp(b),

            (Item::List(items), None) => items.first().map_or(Ordering::Equal, |i| i.compare(None)),
            (Item::List(_), Some(Item::Number(_))) => Ordering::Less,
            (Item::List(_), Some(Item::Qualifier(_))) => Ordering::Greater,
            (Item::List(a), Some(Item::List(b))) => compare_lists(a, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Digits(String);

impl Ord for Digits {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Digits {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Variant order is the qualifier order from the module docs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Qualifier {
    Alpha,
    Beta,
    Milestone,
    Rc,
    Snapshot,
    Release,
    Sp,
    Other(String),
}

impl Qualifier {
    fn parse(token: &str, followed_by_digit: bool) -> Self {
        match token {
            "alpha" => Qualifier::Alpha,
            "a" if followed_by_digit => Qualifier::Alpha,
            "beta" => Qualifier::Beta,
            "b" if followed_by_digit => Qualifier::Beta,
            "milestone" => Qualifier::Milestone,
            "m" if followed_by_digit => Qualifier::Milestone,
            "rc" | "cr" => Qualifier::Rc,
            "snapshot" => Qualifier::Snapshot,
            "" | "ga" | "final" | "release" => Qualifier::Release,
            "sp" => Qualifier::Sp,
            other => Qualifier::Other(other.to_string()),
        }
    }
}

/// Parses a version into its normalized item list.
///
/// `.` separates items. `-` and every change between digits and letters
/// also open a nested list that holds the rest of the version. Each list
/// drops null items from its end, looking through trailing nested lists, so
/// `1.0.0-jre` and `1-jre` are both `[1, [jre]]`.
fn parse(version: &str) -> Vec<Item> {
    let version = version.trim().to_lowercase();
    let mut stack: Vec<Vec<Item>> = vec![Vec::new()];
    let mut token = String::new();

    for c in version.chars() {
        let open_list = match c {
            '.' | '-' => {
                let item = if token.is_empty() {
                    Item::Number(Digits(String::new()))
                } else {
                    parse_item(&std::mem::take(&mut token), false)
                };
                push(&mut stack, item);
                if c == '.' {
                    continue;
                }
                true
            }
            _ => {
                let changed = token
                    .chars()
                    .last()
                    .is_some_and(|last| last.is_ascii_digit() != c.is_ascii_digit());
                if changed {
                    let item = parse_item(&std::mem::take(&mut token), c.is_ascii_digit());
                    push(&mut stack, item);
                }
                token.push(c);
                changed
            }
        };
        if open_list {
            stack.push(Vec::new());
        }
    }
    if !token.is_empty() {
        let item = parse_item(&token, false);
        push(&mut stack, item);
    }

    // Lists only ever nest as the last item of their parent.
    let mut list = stack.pop().unwrap_or_default();
    normalize(&mut list);
    while let Some(mut parent) = stack.pop() {
        parent.push(Item::List(list));
        normalize(&mut parent);
        list = parent;
    }
    list
}

fn push(stack: &mut [Vec<Item>], item: Item) {
    if let Some(list) = stack.last_mut() {
        list.push(item);
    }
}

fn parse_item(token: &str, followed_by_digit: bool) -> Item {
    if token.starts_with(|c: char| c.is_ascii_digit()) {
        Item::Number(Digits(token.trim_start_matches('0').to_string()))
    } else {
        Item::Qualifier(Qualifier::parse(token, followed_by_digit))
    }
}

/// Drops null items from the end of `list`, skipping over nested lists.
fn normalize(list: &mut Vec<Item>) {
    for i in (0..list.len()).rev() {
        if list[i].is_null() {
            list.remove(i);
        } else if !matches!(list[i], Item::List(_)) {
            break;
        }
    }
}

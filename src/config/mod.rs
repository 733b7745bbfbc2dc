//! Ignore and license policy.
//!
//! A [`Config`] is an ordered list of [`IgnoreEntry`] rules plus a
//! [`LicensePolicy`]. Policies live in `depscan.toml` files next to the
//! manifests they govern; [`ConfigManager`] resolves which one applies to a
//! given path.
//!
//! # Example Configuration
//!
//! ```toml
//! [[ignore]]
//! id = "GHSA-xxxx-yyyy-zzzz"
//! reason = "Not reachable from our code"
//! ignore_until = "2027-01-01"
//!
//! [[ignore]]
//! ecosystem = "npm"
//! name = "left-pad"
//! version = "1.0.0"
//!
//! [[ignore]]
//! name = "@types/*"
//!
//! [[ignore]]
//! path = "**/testdata/**"
//!
//! [licenses]
//! allowlist = ["MIT", "Apache-2.0"]
//! ```

mod glob;
mod manager;

pub use glob::{name_matches, path_matches};
pub use manager::ConfigManager;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::model::{Ecosystem, License, PackageInfo};

/// File name policy files are discovered by.
pub const CONFIG_FILE_NAME: &str = "depscan.toml";

/// Policy for one directory tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rules in file order; the first match wins.
    pub ignore: Vec<IgnoreEntry>,

    pub licenses: LicensePolicy,

    /// The file this config was read from, if any.
    #[serde(skip)]
    pub load_path: Option<PathBuf>,
}

/// A single ignore rule.
///
/// A rule with an `id` suppresses that vulnerability (and, through grouping,
/// its aliases). A rule without an `id` suppresses packages: every criterion
/// it sets must match. `name` accepts `*` wildcards and `path` is a glob over
/// the package's location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// The rule stops applying on this date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_until: Option<NaiveDate>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl IgnoreEntry {
    pub fn vulnerability(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn package(ecosystem: &str, name: &str, version: &str) -> Self {
        Self {
            ecosystem: Some(ecosystem.to_string()),
            name: Some(name.to_string()),
            version: Some(version.to_string()),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_ignore_until(mut self, date: NaiveDate) -> Self {
        self.ignore_until = Some(date);
        self
    }

    /// The reason for log lines, with a placeholder when none was given.
    pub fn reason_or_default(&self) -> &str {
        if self.reason.is_empty() {
            "(no reason given)"
        } else {
            &self.reason
        }
    }

    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.ignore_until.is_none_or(|until| today < until)
    }

    fn is_package_rule(&self) -> bool {
        self.id.is_none()
            && (self.ecosystem.is_some()
                || self.name.is_some()
                || self.version.is_some()
                || self.path.is_some())
    }

    pub fn matches_vulnerability(&self, id: &str, today: NaiveDate) -> bool {
        self.is_active_on(today)
            && self
                .id
                .as_deref()
                .is_some_and(|rule_id| rule_id.eq_ignore_ascii_case(id))
    }

    pub fn matches_package(&self, pkg: &PackageInfo, today: NaiveDate) -> bool {
        if !self.is_package_rule() || !self.is_active_on(today) {
            return false;
        }

        if let Some(ecosystem) = &self.ecosystem {
            if Ecosystem::parse(ecosystem) != pkg.ecosystem {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !name_matches(name, &pkg.name) {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if version != &pkg.version {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if !path_matches(path, &pkg.location) {
                return false;
            }
        }

        true
    }

    fn validate(&self) -> Result<(), String> {
        if self.id.is_none() && !self.is_package_rule() {
            return Err("ignore entry has neither an id nor any package criteria".to_string());
        }
        if let Some(name) = &self.name {
            glob::name_regex(name).map_err(|e| format!("invalid name pattern {name:?}: {e}"))?;
        }
        if let Some(path) = &self.path {
            glob::path_regex(path).map_err(|e| format!("invalid path glob {path:?}: {e}"))?;
        }
        Ok(())
    }
}

/// Licenses a project accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicensePolicy {
    /// Accepted license ids. An empty allowlist disables license checks.
    pub allowlist: Vec<String>,
}

impl LicensePolicy {
    pub fn is_enabled(&self) -> bool {
        !self.allowlist.is_empty()
    }

    pub fn allows(&self, license: &License) -> bool {
        self.allowlist
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(license.as_str()))
    }

    /// Licenses that are not on the allowlist, `UNKNOWN` included.
    pub fn violations(&self, licenses: &[License]) -> Vec<License> {
        if !self.is_enabled() {
            return Vec::new();
        }
        licenses
            .iter()
            .filter(|license| !self.allows(license))
            .cloned()
            .collect()
    }
}

impl Config {
    /// The first package rule matching `pkg`, if any.
    pub fn should_ignore_package(&self, pkg: &PackageInfo) -> Option<&IgnoreEntry> {
        self.should_ignore_package_on(pkg, Utc::now().date_naive())
    }

    /// The first vulnerability rule matching `id`, if any.
    pub fn should_ignore(&self, id: &str) -> Option<&IgnoreEntry> {
        self.should_ignore_on(id, Utc::now().date_naive())
    }

    pub fn should_ignore_package_on(
        &self,
        pkg: &PackageInfo,
        today: NaiveDate,
    ) -> Option<&IgnoreEntry> {
        self.ignore
            .iter()
            .find(|entry| entry.matches_package(pkg, today))
    }

    pub fn should_ignore_on(&self, id: &str, today: NaiveDate) -> Option<&IgnoreEntry> {
        self.ignore
            .iter()
            .find(|entry| entry.matches_vulnerability(id, today))
    }

    /// Parses and validates a policy document.
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let config: Config = toml::from_str(content).map_err(|e| e.to_string())?;
        for (i, entry) in config.ignore.iter().enumerate() {
            entry
                .validate()
                .map_err(|reason| format!("ignore entry #{}: {reason}", i + 1))?;
        }
        Ok(config)
    }

    /// Loads a policy file.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Io`] if the file cannot be read and
    /// [`ScanError::Configuration`] if it is not a valid policy.
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let content = fs::read_to_string(path).map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config =
            Self::from_toml_str(&content).map_err(|reason| ScanError::Configuration {
                path: path.to_path_buf(),
                reason,
            })?;
        config.load_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Loads the user-wide policy, or the empty policy if there is none.
    pub fn load_default() -> Result<Self, ScanError> {
        let path = Self::default_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Returns the path to the user-wide policy file.
    ///
    /// # Example
    ///
    /// ```
    /// use depscan::Config;
    ///
    /// let path = Config::default_path();
    /// println!("Config file: {}", path.display());
    /// ```
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depscan")
            .join(CONFIG_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_should_ignore_first_match_wins() {
        let config = Config {
            ignore: vec![
                IgnoreEntry::vulnerability("GHSA-1").with_reason("first"),
                IgnoreEntry::vulnerability("ghsa-1").with_reason("second"),
            ],
            ..Default::default()
        };

        let entry = config.should_ignore("GHSA-1").unwrap();
        assert_eq!(entry.reason, "first");
        assert!(config.should_ignore("GHSA-2").is_none());
    }

    #[test]
    fn test_should_ignore_is_case_insensitive() {
        let config = Config {
            ignore: vec![IgnoreEntry::vulnerability("CVE-2021-12345")],
            ..Default::default()
        };
        assert!(config.should_ignore("cve-2021-12345").is_some());
    }

    #[test]
    fn test_should_ignore_respects_expiry() {
        let config = Config {
            ignore: vec![IgnoreEntry::vulnerability("GHSA-1").with_ignore_until(day("2025-06-01"))],
            ..Default::default()
        };

        assert!(config.should_ignore_on("GHSA-1", day("2025-05-31")).is_some());
        assert!(config.should_ignore_on("GHSA-1", day("2025-06-01")).is_none());
    }

    #[test]
    fn test_should_ignore_package_exact() {
        let config = Config {
            ignore: vec![IgnoreEntry::package("npm", "left-pad", "1.0.0")],
            ..Default::default()
        };

        let hit = PackageInfo::new(Ecosystem::Npm, "left-pad", "1.0.0");
        let other_version = PackageInfo::new(Ecosystem::Npm, "left-pad", "1.0.1");
        let other_ecosystem = PackageInfo::new(Ecosystem::PyPI, "left-pad", "1.0.0");

        assert!(config.should_ignore_package(&hit).is_some());
        assert!(config.should_ignore_package(&other_version).is_none());
        assert!(config.should_ignore_package(&other_ecosystem).is_none());
    }

    #[test]
    fn test_should_ignore_package_name_wildcard() {
        let config = Config {
            ignore: vec![IgnoreEntry {
                name: Some("@types/*".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert!(config
            .should_ignore_package(&PackageInfo::new(Ecosystem::Npm, "@types/node", "20.0.0"))
            .is_some());
        assert!(config
            .should_ignore_package(&PackageInfo::new(Ecosystem::Npm, "@babel/core", "7.0.0"))
            .is_none());
    }

    #[test]
    fn test_should_ignore_package_path_glob() {
        let config = Config {
            ignore: vec![IgnoreEntry {
                path: Some("**/testdata/**".to_string()),
                reason: "fixtures".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let fixture = PackageInfo::new(Ecosystem::Go, "golang.org/x/net", "0.1.0")
            .with_location("/repo/internal/testdata/go.mod");
        let real = PackageInfo::new(Ecosystem::Go, "golang.org/x/net", "0.1.0")
            .with_location("/repo/go.mod");

        assert_eq!(config.should_ignore_package(&fixture).unwrap().reason, "fixtures");
        assert!(config.should_ignore_package(&real).is_none());
    }

    #[test]
    fn test_vulnerability_rules_do_not_ignore_packages() {
        let config = Config {
            ignore: vec![IgnoreEntry::vulnerability("left-pad")],
            ..Default::default()
        };
        let pkg = PackageInfo::new(Ecosystem::Npm, "left-pad", "1.0.0");
        assert!(config.should_ignore_package(&pkg).is_none());
    }

    #[test]
    fn test_reason_or_default() {
        assert_eq!(IgnoreEntry::vulnerability("X").reason_or_default(), "(no reason given)");
        assert_eq!(
            IgnoreEntry::vulnerability("X").with_reason("fp").reason_or_default(),
            "fp"
        );
    }

    #[test]
    fn test_from_toml_str() {
        let config = Config::from_toml_str(
            r#"
            [[ignore]]
            id = "GHSA-xxxx"
            reason = "not reachable"
            ignore_until = "2027-01-01"

            [[ignore]]
            ecosystem = "npm"
            name = "left-pad"

            [licenses]
            allowlist = ["MIT"]
            "#,
        )
        .unwrap();

        assert_eq!(config.ignore.len(), 2);
        assert_eq!(config.ignore[0].ignore_until, Some(day("2027-01-01")));
        assert_eq!(config.ignore[1].name.as_deref(), Some("left-pad"));
        assert_eq!(config.licenses.allowlist, vec!["MIT"]);
    }

    #[test]
    fn test_from_toml_str_rejects_empty_entry() {
        let err = Config::from_toml_str("[[ignore]]\nreason = \"why\"\n").unwrap_err();
        assert!(err.contains("ignore entry #1"));
    }

    #[test]
    fn test_from_toml_str_rejects_malformed() {
        assert!(Config::from_toml_str("ignore = 5").is_err());
    }

    #[test]
    fn test_license_policy_violations() {
        let policy = LicensePolicy {
            allowlist: vec!["MIT".to_string(), "Apache-2.0".to_string()],
        };
        let licenses = vec![
            License::new("mit"),
            License::new("GPL-3.0"),
            License::unknown(),
        ];

        assert_eq!(
            policy.violations(&licenses),
            vec![License::new("GPL-3.0"), License::unknown()]
        );
    }

    #[test]
    fn test_license_policy_disabled() {
        let policy = LicensePolicy::default();
        assert!(policy.violations(&[License::new("GPL-3.0")]).is_empty());
    }

    #[test]
    fn test_load_reports_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[[ignore]]\nname = 3\n").unwrap();

        match Config::load(&path) {
            Err(ScanError::Configuration { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_load_sets_load_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[[ignore]]\nid = \"CVE-1\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.load_path.as_deref(), Some(path.as_path()));
    }
}

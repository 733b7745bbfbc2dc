//! Post-match filtering.
//!
//! [`FilterPipeline::apply`] prunes the package list before it is rendered:
//!
//! 1. packages without enough identity to be scanned,
//! 2. kernel packages, in image scans only,
//! 3. packages matched by an ignore rule.
//!
//! [`FilterPipeline::filter_vulnerabilities`] then drops ignored
//! vulnerabilities from the rendered report. Ignoring any alias of a
//! vulnerability ignores every alias in its group.
//!
//! All stages keep the relative order of what survives, and log what they
//! removed at info level.

use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::config::{Config, ConfigManager};
use crate::error::invariant_violation;
use crate::model::{Ecosystem, PackageInfo, PackageVulns, ScanResults, VulnerabilityResults};

/// Name shared by Maven aggregator projects that have no real coordinates.
const MAVEN_UNKNOWN_NAME: &str = "unknown";

/// Kernel packages; a container runs on the host's kernel.
const KERNEL_PACKAGE_NAME: &str = "linux";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanMode {
    /// Manifests and lockfiles.
    #[default]
    Source,
    /// A container image.
    Image,
}

/// Applies ignore policy and relevance rules to scan results.
///
/// Ignore rules with an expiry date are evaluated against the pipeline's
/// date, which is today unless set with [`FilterPipeline::on`].
#[derive(Debug, Clone, Copy)]
pub struct FilterPipeline {
    today: NaiveDate,
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::on(Utc::now().date_naive())
    }

    /// A pipeline that evaluates rule expiry as of `today`.
    pub fn on(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Runs the package-level stages in order.
    pub fn apply(
        &self,
        mut results: ScanResults,
        configs: &ConfigManager,
        mode: ScanMode,
    ) -> ScanResults {
        self.filter_unscannable(&mut results);
        if mode == ScanMode::Image {
            self.filter_non_container_relevant(&mut results);
        }
        self.filter_ignored(&mut results, configs);
        results
    }

    /// Drops packages that cannot be looked up. Returns the number removed.
    pub fn filter_unscannable(&self, results: &mut ScanResults) -> usize {
        let before = results.packages.len();
        results.packages.retain(|r| is_scannable(&r.package));

        let removed = before - results.packages.len();
        if removed > 0 {
            info!("Filtered {} local/unscannable package/s from the scan.", removed);
        }
        removed
    }

    /// Drops kernel packages. Returns the number removed.
    pub fn filter_non_container_relevant(&self, results: &mut ScanResults) -> usize {
        let before = results.packages.len();
        results
            .packages
            .retain(|r| r.package.name != KERNEL_PACKAGE_NAME);

        let removed = before - results.packages.len();
        if removed > 0 {
            info!("Filtered {} non container relevant package/s from the scan.", removed);
        }
        removed
    }

    /// Drops packages matched by a package rule of the config that governs
    /// their location. Returns the number removed.
    pub fn filter_ignored(&self, results: &mut ScanResults, configs: &ConfigManager) -> usize {
        let before = results.packages.len();
        results.packages.retain(|r| {
            let pkg = &r.package;
            let config = configs.get(&pkg.location);
            match config.should_ignore_package_on(pkg, self.today) {
                Some(entry) => {
                    info!(
                        "Package {} has been filtered out because: {}",
                        pkg.identity(),
                        entry.reason_or_default()
                    );
                    false
                }
                None => true,
            }
        });

        let removed = before - results.packages.len();
        if removed > 0 {
            info!("Filtered {} ignored package/s from the scan.", removed);
        }
        removed
    }

    /// Drops ignored vulnerabilities from the rendered report.
    ///
    /// Packages left without vulnerabilities or license violations are
    /// dropped unless `include_all` is set, and sources left without
    /// packages are always dropped. Returns the number of vulnerabilities
    /// removed.
    pub fn filter_vulnerabilities(
        &self,
        results: &mut VulnerabilityResults,
        configs: &ConfigManager,
        include_all: bool,
    ) -> usize {
        let before = results.vulnerability_count();
        let mut removed = 0;

        for source in &mut results.results {
            let config = configs.get(&source.source.path);
            for pkg in &mut source.packages {
                removed += self.filter_package_vulns(pkg, config);
            }
            source.packages.retain(|pkg| {
                include_all || !pkg.vulnerabilities.is_empty() || !pkg.license_violations.is_empty()
            });
        }
        results.results.retain(|source| !source.packages.is_empty());

        // Dropped packages had no vulnerabilities left, so they do not
        // affect the total.
        check_removed_count(before, results.vulnerability_count(), removed);

        removed
    }

    fn filter_package_vulns(&self, pkg: &mut PackageVulns, config: &Config) -> usize {
        check_unique_aliases(pkg);

        let original = pkg.vulnerabilities.len();
        let mut suppressed: HashSet<String> = HashSet::new();

        pkg.groups.retain(|group| {
            let matched = group.aliases.iter().find_map(|alias| {
                config
                    .should_ignore_on(alias, self.today)
                    .map(|entry| (alias, entry))
            });
            let Some((alias, entry)) = matched else {
                return true;
            };

            suppressed.extend(group.aliases.iter().cloned());

            // Only the first matching rule is reported, even if other
            // aliases match different rules.
            let id = entry.id.as_deref().unwrap_or(alias);
            let reason = entry.reason_or_default();
            match group.aliases.len() {
                0 | 1 => info!("{} has been filtered out because: {}", id, reason),
                2 => info!("{} and 1 alias have been filtered out because: {}", id, reason),
                n => info!(
                    "{} and {} aliases have been filtered out because: {}",
                    id,
                    n - 1,
                    reason
                ),
            }
            false
        });

        if pkg.groups.is_empty() {
            pkg.vulnerabilities.clear();
        } else {
            pkg.vulnerabilities.retain(|v| !suppressed.contains(&v.id));
        }

        original - pkg.vulnerabilities.len()
    }
}

fn is_scannable(pkg: &PackageInfo) -> bool {
    let identified = pkg.ecosystem.is_some() && !pkg.name.is_empty() && !pkg.version.is_empty();
    let maven_aggregator =
        pkg.ecosystem == Some(Ecosystem::Maven) && pkg.name == MAVEN_UNKNOWN_NAME;
    identified || pkg.has_commit() || maven_aggregator
}

/// The report must shrink by exactly the number of removals counted.
fn check_removed_count(before: usize, after: usize, removed: usize) {
    if before.checked_sub(after) != Some(removed) {
        invariant_violation(format!(
            "removed {removed} vulnerabilities but the report went from {before} to {after}"
        ));
    }
}

/// Each alias may belong to at most one group of a package.
fn check_unique_aliases(pkg: &PackageVulns) {
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (index, group) in pkg.groups.iter().enumerate() {
        for alias in &group.aliases {
            if let Some(previous) = owner.insert(alias, index) {
                if previous != index {
                    invariant_violation(format!(
                        "alias {alias} of {} appears in groups {previous} and {index}",
                        pkg.package.identity()
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreEntry;
    use crate::model::{
        License, PackageScanResult, PackageSource, SourceInfo, Vulnerability, VulnerabilityGroup,
    };
    use std::path::{Path, PathBuf};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    fn pipeline() -> FilterPipeline {
        FilterPipeline::on(today())
    }

    fn scan(packages: Vec<PackageInfo>) -> ScanResults {
        ScanResults::new(packages.into_iter().map(PackageScanResult::new).collect())
    }

    fn names(results: &ScanResults) -> Vec<&str> {
        results.packages.iter().map(|r| r.package.name.as_str()).collect()
    }

    fn npm(name: &str, version: &str) -> PackageInfo {
        PackageInfo::new(Ecosystem::Npm, name, version)
    }

    fn config(entries: Vec<IgnoreEntry>) -> Config {
        Config {
            ignore: entries,
            ..Default::default()
        }
    }

    fn vuln(id: &str, aliases: &[&str]) -> Vulnerability {
        Vulnerability::new(id).with_aliases(aliases.iter().copied())
    }

    fn report(path: &str, packages: Vec<PackageVulns>) -> VulnerabilityResults {
        VulnerabilityResults {
            results: vec![PackageSource {
                source: SourceInfo {
                    path: PathBuf::from(path),
                    kind: "lockfile".to_string(),
                },
                packages,
            }],
        }
    }

    fn ids(pkg: &PackageVulns) -> Vec<&str> {
        pkg.vulnerabilities.iter().map(|v| v.id.as_str()).collect()
    }

    #[test]
    fn test_unscannable_scenario() {
        let mut results = scan(vec![
            PackageInfo {
                ecosystem: None,
                name: String::new(),
                version: String::new(),
                commit: None,
                location: PathBuf::new(),
            },
            npm("left-pad", "1.0.0"),
            PackageInfo::from_commit("abc123"),
        ]);

        let removed = pipeline().filter_unscannable(&mut results);

        assert_eq!(removed, 1);
        assert_eq!(results.packages.len(), 2);
        assert_eq!(results.packages[0].package.name, "left-pad");
        assert_eq!(results.packages[1].package.commit.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_unscannable_keep_predicate() {
        let mut results = scan(vec![
            npm("no-version", ""),
            npm("", "1.0.0"),
            PackageInfo::new(Ecosystem::Maven, "unknown", ""),
            PackageInfo::new(Ecosystem::Npm, "unknown", ""),
            PackageInfo::new(Ecosystem::Maven, "org.example:lib", "1.0"),
            PackageInfo::from_commit(""),
        ]);

        pipeline().filter_unscannable(&mut results);

        assert_eq!(names(&results), vec!["unknown", "org.example:lib"]);
        assert_eq!(results.packages[0].package.ecosystem, Some(Ecosystem::Maven));
    }

    #[test]
    fn test_non_container_relevant_only_in_image_mode() {
        let packages = vec![
            PackageInfo::new(Ecosystem::Debian, "libc6", "2.36"),
            PackageInfo::new(Ecosystem::Debian, "linux", "6.1.0"),
            PackageInfo::new(Ecosystem::Debian, "openssl", "3.0.11"),
        ];
        let configs = ConfigManager::default();

        let source = pipeline().apply(scan(packages.clone()), &configs, ScanMode::Source);
        assert_eq!(names(&source), vec!["libc6", "linux", "openssl"]);

        let image = pipeline().apply(scan(packages), &configs, ScanMode::Image);
        assert_eq!(names(&image), vec!["libc6", "openssl"]);
    }

    #[test]
    fn test_ignored_packages_by_identity_and_path() {
        let mut configs = ConfigManager::new(Config::default());
        configs.insert(
            Path::new("/repo"),
            config(vec![
                IgnoreEntry::package("npm", "left-pad", "1.0.0").with_reason("vendored"),
                IgnoreEntry {
                    path: Some("**/testdata/**".to_string()),
                    ..Default::default()
                },
            ]),
        );

        let results = scan(vec![
            npm("a", "1.0.0").with_location("/repo/package-lock.json"),
            npm("left-pad", "1.0.0").with_location("/repo/package-lock.json"),
            npm("left-pad", "1.0.1").with_location("/repo/package-lock.json"),
            npm("b", "2.0.0").with_location("/repo/testdata/fixture/package-lock.json"),
            npm("left-pad", "1.0.0").with_location("/other/package-lock.json"),
            npm("c", "3.0.0").with_location("/repo/web/package-lock.json"),
        ]);

        let filtered = pipeline().apply(results, &configs, ScanMode::Source);

        let kept: Vec<(&str, &str)> = filtered
            .packages
            .iter()
            .map(|r| (r.package.name.as_str(), r.package.version.as_str()))
            .collect();
        assert_eq!(
            kept,
            vec![("a", "1.0.0"), ("left-pad", "1.0.1"), ("left-pad", "1.0.0"), ("c", "3.0.0")]
        );
    }

    #[test]
    fn test_expired_package_rule_no_longer_applies() {
        let expired = IgnoreEntry::package("npm", "left-pad", "1.0.0")
            .with_ignore_until(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let configs = ConfigManager::with_override(config(vec![expired]));

        let mut results = scan(vec![npm("left-pad", "1.0.0")]);
        assert_eq!(pipeline().filter_ignored(&mut results, &configs), 0);

        let earlier = FilterPipeline::on(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert_eq!(earlier.filter_ignored(&mut results, &configs), 1);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let configs = ConfigManager::with_override(config(vec![IgnoreEntry {
            name: Some("@types/*".to_string()),
            ..Default::default()
        }]));
        let results = scan(vec![
            npm("@types/node", "20.0.0"),
            npm("express", "4.18.2"),
            npm("", ""),
            PackageInfo::new(Ecosystem::Debian, "linux", "6.1.0"),
        ]);

        let once = pipeline().apply(results, &configs, ScanMode::Image);
        let twice = pipeline().apply(once.clone(), &configs, ScanMode::Image);

        assert_eq!(names(&once), vec!["express"]);
        assert_eq!(names(&twice), names(&once));
    }

    #[test]
    fn test_ignoring_one_alias_suppresses_group() {
        let pkg = PackageVulns::new(
            npm("lodash", "4.17.20"),
            vec![
                vuln("CVE-1", &["GHSA-1"]),
                vuln("GHSA-1", &["CVE-1"]),
                vuln("CVE-2", &[]),
            ],
        );
        let mut results = report("/repo/package-lock.json", vec![pkg]);
        let configs = ConfigManager::with_override(config(vec![
            IgnoreEntry::vulnerability("GHSA-1").with_reason("not reachable"),
        ]));

        let removed = pipeline().filter_vulnerabilities(&mut results, &configs, false);

        assert_eq!(removed, 2);
        let pkg = &results.results[0].packages[0];
        assert_eq!(ids(pkg), vec!["CVE-2"]);
        assert_eq!(pkg.groups, vec![VulnerabilityGroup::new(["CVE-2"])]);
    }

    #[test]
    fn test_vulnerability_ids_match_case_insensitively() {
        let pkg = PackageVulns::new(npm("a", "1.0.0"), vec![vuln("GHSA-abcd", &[]), vuln("CVE-9", &[])]);
        let mut results = report("/repo/package-lock.json", vec![pkg]);
        let configs =
            ConfigManager::with_override(config(vec![IgnoreEntry::vulnerability("ghsa-ABCD")]));

        assert_eq!(pipeline().filter_vulnerabilities(&mut results, &configs, false), 1);
        assert_eq!(ids(&results.results[0].packages[0]), vec!["CVE-9"]);
    }

    #[test]
    fn test_fully_ignored_package_is_dropped_unless_include_all() {
        let make = || {
            report(
                "/repo/go.mod",
                vec![
                    PackageVulns::new(npm("a", "1.0.0"), vec![vuln("CVE-1", &[])]),
                    PackageVulns::new(npm("b", "1.0.0"), vec![vuln("CVE-2", &[])]),
                ],
            )
        };
        let configs = ConfigManager::with_override(config(vec![IgnoreEntry::vulnerability("CVE-1")]));

        let mut dropped = make();
        assert_eq!(pipeline().filter_vulnerabilities(&mut dropped, &configs, false), 1);
        let kept: Vec<&str> = dropped.results[0]
            .packages
            .iter()
            .map(|p| p.package.name.as_str())
            .collect();
        assert_eq!(kept, vec!["b"]);

        let mut all = make();
        assert_eq!(pipeline().filter_vulnerabilities(&mut all, &configs, true), 1);
        assert_eq!(all.results[0].packages.len(), 2);
        assert!(all.results[0].packages[0].vulnerabilities.is_empty());
    }

    #[test]
    fn test_license_violations_keep_package() {
        let mut pkg = PackageVulns::new(npm("a", "1.0.0"), vec![vuln("CVE-1", &[])]);
        pkg.license_violations = vec![License::new("GPL-3.0")];
        let mut results = report("/repo/package-lock.json", vec![pkg]);
        let configs = ConfigManager::with_override(config(vec![IgnoreEntry::vulnerability("CVE-1")]));

        assert_eq!(pipeline().filter_vulnerabilities(&mut results, &configs, false), 1);
        assert_eq!(results.results[0].packages.len(), 1);
        assert!(results.results[0].packages[0].vulnerabilities.is_empty());
    }

    #[test]
    fn test_empty_sources_are_dropped() {
        let mut results = report(
            "/repo/package-lock.json",
            vec![PackageVulns::new(npm("a", "1.0.0"), vec![vuln("CVE-1", &[])])],
        );
        results.results.push(PackageSource {
            source: SourceInfo {
                path: PathBuf::from("/repo/web/package-lock.json"),
                kind: "lockfile".to_string(),
            },
            packages: vec![PackageVulns::new(npm("b", "1.0.0"), vec![vuln("CVE-2", &[])])],
        });

        let mut configs = ConfigManager::new(Config::default());
        configs.insert(Path::new("/repo/web"), config(vec![IgnoreEntry::vulnerability("CVE-2")]));

        assert_eq!(pipeline().filter_vulnerabilities(&mut results, &configs, false), 1);
        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results[0].source.path, PathBuf::from("/repo/package-lock.json"));
    }

    #[test]
    fn test_no_surviving_groups_clears_vulnerabilities() {
        // A record outside every group does not survive once all groups are gone.
        let mut pkg = PackageVulns::new(npm("a", "1.0.0"), vec![vuln("CVE-1", &[])]);
        pkg.vulnerabilities.push(vuln("CVE-orphan", &[]));
        let mut results = report("/repo/package-lock.json", vec![pkg]);
        let configs = ConfigManager::with_override(config(vec![IgnoreEntry::vulnerability("CVE-1")]));

        assert_eq!(pipeline().filter_vulnerabilities(&mut results, &configs, true), 2);
        assert!(results.results[0].packages[0].vulnerabilities.is_empty());
    }

    #[test]
    fn test_removed_count_matches_per_package_sum_for_random_configs() {
        let pool: Vec<String> = (0..12).map(|i| format!("ID-{i}")).collect();
        let mut rng = fastrand::Rng::with_seed(0x5eed);

        for _ in 0..200 {
            // Random alias clusters, shuffled into per-package record lists.
            let packages: Vec<PackageVulns> = (0..rng.usize(1..5))
                .map(|p| {
                    let mut records = Vec::new();
                    for id in &pool {
                        if rng.bool() {
                            let alias = &pool[rng.usize(..pool.len())];
                            let aliases: Vec<&str> =
                                if alias != id { vec![alias.as_str()] } else { vec![] };
                            records.push(vuln(id, &aliases));
                        }
                    }
                    PackageVulns::new(npm(&format!("pkg{p}"), "1.0.0"), records)
                })
                .collect();

            let rules: Vec<IgnoreEntry> = pool
                .iter()
                .filter(|_| rng.u8(..) < 40)
                .map(|id| IgnoreEntry::vulnerability(id.to_lowercase()))
                .collect();
            let configs = ConfigManager::with_override(config(rules));

            let mut results = report("/repo/package-lock.json", packages);
            let expected_before: Vec<usize> = results.results[0]
                .packages
                .iter()
                .map(|p| p.vulnerabilities.len())
                .collect();

            let mut dropped = results.clone();
            let removed = pipeline().filter_vulnerabilities(&mut results, &configs, true);
            let removed_dropping = pipeline().filter_vulnerabilities(&mut dropped, &configs, false);

            let survivors = &results.results.first().map(|s| s.packages.clone()).unwrap_or_default();
            let expected: usize = expected_before
                .iter()
                .zip(survivors)
                .map(|(before, pkg)| before - pkg.vulnerabilities.len())
                .sum();
            assert_eq!(survivors.len(), expected_before.len());
            assert_eq!(removed, expected);
            assert_eq!(removed_dropping, removed);

            // Nothing that matches a rule survives, directly or through an alias.
            let config = configs.get(Path::new("/"));
            for pkg in survivors {
                for v in &pkg.vulnerabilities {
                    assert!(config.should_ignore_on(&v.id, today()).is_none());
                    for alias in &v.aliases {
                        assert!(config.should_ignore_on(alias, today()).is_none());
                    }
                }
            }
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invariant violation")]
    fn test_alias_shared_between_groups_panics() {
        let mut pkg = PackageVulns::new(
            npm("a", "1.0.0"),
            vec![vuln("CVE-1", &[]), vuln("GHSA-1", &[])],
        );
        pkg.groups = vec![
            VulnerabilityGroup::new(["CVE-1", "GHSA-1"]),
            VulnerabilityGroup::new(["GHSA-1"]),
        ];
        let mut results = report("/repo/package-lock.json", vec![pkg]);

        pipeline().filter_vulnerabilities(&mut results, &ConfigManager::default(), true);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invariant violation")]
    fn test_removed_count_mismatch_panics() {
        check_removed_count(5, 3, 1);
    }

    #[test]
    fn test_removed_count_consistent() {
        check_removed_count(5, 3, 2);
        check_removed_count(0, 0, 0);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::PackageInfo;

/// A license identifier, usually an SPDX expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct License(pub String);

impl License {
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::UNKNOWN)
    }
}

impl std::fmt::Display for License {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A vulnerability record as returned by the vulnerability database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_version: Option<String>,
}

impl Vulnerability {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            summary: None,
            details: None,
            fixed_version: None,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }
}

/// Identifiers that denote one real-world vulnerability.
///
/// `ids` are the records of the owning package that belong to the group,
/// `aliases` is every identifier known for the group (ids included), without
/// duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityGroup {
    #[serde(default)]
    pub ids: Vec<String>,
    pub aliases: Vec<String>,
}

impl VulnerabilityGroup {
    pub fn new<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut group = Self::default();
        for alias in aliases {
            let alias = alias.into();
            if !group.aliases.contains(&alias) {
                group.ids.push(alias.clone());
                group.aliases.push(alias);
            }
        }
        group
    }

    /// Groups records that share an id or alias, transitively.
    ///
    /// Groups come out in the order their first record appears.
    pub fn group(vulns: &[Vulnerability]) -> Vec<VulnerabilityGroup> {
        let mut parent: Vec<usize> = (0..vulns.len()).collect();
        let mut owner: HashMap<&str, usize> = HashMap::new();

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for (i, vuln) in vulns.iter().enumerate() {
            for id in std::iter::once(&vuln.id).chain(vuln.aliases.iter()) {
                match owner.get(id.as_str()) {
                    Some(&j) => {
                        let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                        if a != b {
                            parent[a.max(b)] = a.min(b);
                        }
                    }
                    None => {
                        owner.insert(id.as_str(), i);
                    }
                }
            }
        }

        let mut groups: Vec<VulnerabilityGroup> = Vec::new();
        let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
        for (i, vuln) in vulns.iter().enumerate() {
            let root = find(&mut parent, i);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                groups.push(VulnerabilityGroup::default());
                groups.len() - 1
            });
            let group = &mut groups[slot];
            if !group.ids.contains(&vuln.id) {
                group.ids.push(vuln.id.clone());
            }
            for id in std::iter::once(&vuln.id).chain(vuln.aliases.iter()) {
                if !group.aliases.contains(id) {
                    group.aliases.push(id.clone());
                }
            }
        }

        groups
    }
}

/// A package with its vulnerabilities, as rendered into the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVulns {
    pub package: PackageInfo,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub groups: Vec<VulnerabilityGroup>,
    #[serde(default)]
    pub licenses: Vec<License>,
    #[serde(default)]
    pub license_violations: Vec<License>,
}

impl PackageVulns {
    /// Builds the rendered form, grouping the records by alias.
    pub fn new(package: PackageInfo, vulnerabilities: Vec<Vulnerability>) -> Self {
        let groups = VulnerabilityGroup::group(&vulnerabilities);
        Self {
            package,
            vulnerabilities,
            groups,
            licenses: Vec::new(),
            license_violations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: PathBuf,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// All packages found in one manifest, lockfile or image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSource {
    pub source: SourceInfo,
    pub packages: Vec<PackageVulns>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VulnerabilityResults {
    pub results: Vec<PackageSource>,
}

impl VulnerabilityResults {
    pub fn vulnerability_count(&self) -> usize {
        self.results
            .iter()
            .flat_map(|source| source.packages.iter())
            .map(|pkg| pkg.vulnerabilities.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_new_deduplicates_aliases() {
        let group = VulnerabilityGroup::new(["CVE-1", "GHSA-1", "CVE-1"]);
        assert_eq!(group.aliases, vec!["CVE-1", "GHSA-1"]);
    }

    #[test]
    fn test_group_by_shared_alias() {
        let vulns = vec![
            Vulnerability::new("GHSA-1").with_aliases(["CVE-1"]),
            Vulnerability::new("OSV-2"),
            Vulnerability::new("PYSEC-1").with_aliases(["CVE-1"]),
        ];

        let groups = VulnerabilityGroup::group(&vulns);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].ids, vec!["GHSA-1", "PYSEC-1"]);
        assert_eq!(groups[0].aliases, vec!["GHSA-1", "CVE-1", "PYSEC-1"]);
        assert_eq!(groups[1].ids, vec!["OSV-2"]);
    }

    #[test]
    fn test_group_transitive() {
        // A-B linked through B's alias, B-C through C's alias
        let vulns = vec![
            Vulnerability::new("A"),
            Vulnerability::new("C").with_aliases(["B"]),
            Vulnerability::new("B").with_aliases(["A"]),
        ];

        let groups = VulnerabilityGroup::group(&vulns);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ids, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_group_empty() {
        assert!(VulnerabilityGroup::group(&[]).is_empty());
    }

    #[test]
    fn test_license_unknown() {
        assert!(License::unknown().is_unknown());
        assert!(License::new("unknown").is_unknown());
        assert!(!License::new("MIT").is_unknown());
    }
}

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

use super::{LayerDetails, License, Vulnerability};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Ecosystem {
    Npm,
    PyPI,
    Maven,
    Go,
    CratesIo,
    NuGet,
    RubyGems,
    Packagist,
    Hex,
    Pub,
    Debian,
    Alpine,
    Other(String),
}

impl Ecosystem {
    pub fn as_str(&self) -> &str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::PyPI => "PyPI",
            Ecosystem::Maven => "Maven",
            Ecosystem::Go => "Go",
            Ecosystem::CratesIo => "crates.io",
            Ecosystem::NuGet => "NuGet",
            Ecosystem::RubyGems => "RubyGems",
            Ecosystem::Packagist => "Packagist",
            Ecosystem::Hex => "Hex",
            Ecosystem::Pub => "Pub",
            Ecosystem::Debian => "Debian",
            Ecosystem::Alpine => "Alpine",
            Ecosystem::Other(name) => name,
        }
    }

    /// Parses an ecosystem tag. Release suffixes such as `Debian:12` are
    /// folded into the base ecosystem. Returns `None` for an empty tag.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        if tag.is_empty() {
            return None;
        }

        let base = tag.split(':').next().unwrap_or(tag);
        let ecosystem = match base.to_lowercase().as_str() {
            "npm" => Ecosystem::Npm,
            "pypi" => Ecosystem::PyPI,
            "maven" => Ecosystem::Maven,
            "go" => Ecosystem::Go,
            "crates.io" => Ecosystem::CratesIo,
            "nuget" => Ecosystem::NuGet,
            "rubygems" => Ecosystem::RubyGems,
            "packagist" => Ecosystem::Packagist,
            "hex" => Ecosystem::Hex,
            "pub" => Ecosystem::Pub,
            "debian" => Ecosystem::Debian,
            "alpine" => Ecosystem::Alpine,
            _ => Ecosystem::Other(tag.to_string()),
        };
        Some(ecosystem)
    }
}

impl From<String> for Ecosystem {
    fn from(tag: String) -> Self {
        Ecosystem::parse(&tag).unwrap_or(Ecosystem::Other(tag))
    }
}

impl From<Ecosystem> for String {
    fn from(ecosystem: Ecosystem) -> Self {
        ecosystem.as_str().to_string()
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A package as produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    #[serde(
        default,
        deserialize_with = "empty_ecosystem_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub ecosystem: Option<Ecosystem>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// The manifest, lockfile or image path the package was extracted from.
    #[serde(default)]
    pub location: PathBuf,
}

impl PackageInfo {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            ecosystem: Some(ecosystem),
            name: name.into(),
            version: version.into(),
            commit: None,
            location: PathBuf::new(),
        }
    }

    /// A package known only by its source commit (e.g. a git submodule).
    pub fn from_commit(commit: impl Into<String>) -> Self {
        Self {
            ecosystem: None,
            name: String::new(),
            version: String::new(),
            commit: Some(commit.into()),
            location: PathBuf::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn has_commit(&self) -> bool {
        self.commit.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// `ecosystem/name/version`, as used in log lines.
    pub fn identity(&self) -> String {
        format!(
            "{}/{}/{}",
            self.ecosystem.as_ref().map(Ecosystem::as_str).unwrap_or(""),
            self.name,
            self.version
        )
    }
}

fn empty_ecosystem_as_none<'de, D>(deserializer: D) -> Result<Option<Ecosystem>, D::Error>
where
    D: Deserializer<'de>,
{
    let tag = Option::<String>::deserialize(deserializer)?;
    Ok(tag.as_deref().and_then(Ecosystem::parse))
}

/// One extracted package together with everything the matching phase
/// attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageScanResult {
    pub package: PackageInfo,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub licenses: Vec<License>,
    #[serde(default)]
    pub license_violations: Vec<License>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<LayerDetails>,
}

impl PackageScanResult {
    pub fn new(package: PackageInfo) -> Self {
        Self {
            package,
            vulnerabilities: Vec::new(),
            licenses: Vec::new(),
            license_violations: Vec::new(),
            layer: None,
        }
    }
}

/// The package-level results of one scan run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResults {
    pub packages: Vec<PackageScanResult>,
}

impl ScanResults {
    pub fn new(packages: Vec<PackageScanResult>) -> Self {
        Self { packages }
    }
}

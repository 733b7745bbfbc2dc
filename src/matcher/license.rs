use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::fmt;

use super::{BatchLookup, MatcherConfig, ResilientBatchMatcher, DEPS_DEV_API};
use crate::config::ConfigManager;
use crate::error::{RemoteError, ScanError};
use crate::model::{Ecosystem, License, PackageInfo, ScanResults};

/// Resolves package licenses via deps.dev.
pub type LicenseMatcher = ResilientBatchMatcher<DepsDevLicenseLookup>;

/// The licenses of one package. Defaults to `[UNKNOWN]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLicenses(pub Vec<License>);

impl Default for PackageLicenses {
    fn default() -> Self {
        Self(vec![License::unknown()])
    }
}

impl fmt::Display for PackageLicenses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.0.iter().map(License::as_str).collect();
        write!(f, "{}", ids.join(", "))
    }
}

pub struct DepsDevLicenseLookup {
    client: reqwest::Client,
    base_url: String,
}

impl DepsDevLicenseLookup {
    pub fn new(config: &MatcherConfig) -> Result<Self, ScanError> {
        Ok(Self {
            client: config.http_client()?,
            base_url: DEPS_DEV_API.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The version endpoint for `pkg`, or `None` if deps.dev cannot know it.
    fn version_url(&self, pkg: &PackageInfo) -> Option<String> {
        if pkg.version.is_empty() || pkg.name.is_empty() {
            return None;
        }
        let system = deps_dev_system(pkg.ecosystem.as_ref()?)?;
        Some(format!(
            "{}/v3/systems/{}/packages/{}/versions/{}",
            self.base_url,
            system,
            utf8_percent_encode(&pkg.name, NON_ALPHANUMERIC),
            utf8_percent_encode(&pkg.version, NON_ALPHANUMERIC),
        ))
    }
}

/// deps.dev's name for an ecosystem.
fn deps_dev_system(ecosystem: &Ecosystem) -> Option<&'static str> {
    match ecosystem {
        Ecosystem::Npm => Some("NPM"),
        Ecosystem::PyPI => Some("PYPI"),
        Ecosystem::Maven => Some("MAVEN"),
        Ecosystem::Go => Some("GO"),
        Ecosystem::CratesIo => Some("CARGO"),
        Ecosystem::NuGet => Some("NUGET"),
        Ecosystem::RubyGems => Some("RUBYGEMS"),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    licenses: Vec<String>,
}

fn parse_response(body: &str) -> Result<PackageLicenses, RemoteError> {
    let response: VersionResponse = serde_json::from_str(body)
        .map_err(|e| RemoteError::Permanent(format!("invalid version response: {e}")))?;

    let licenses: Vec<License> = response
        .licenses
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .map(License::new)
        .collect();
    if licenses.is_empty() {
        return Ok(PackageLicenses::default());
    }
    Ok(PackageLicenses(licenses))
}

#[async_trait]
impl BatchLookup for DepsDevLicenseLookup {
    type Item = PackageInfo;
    type Output = PackageLicenses;

    fn name(&self) -> &'static str {
        "license matcher"
    }

    async fn lookup(&self, pkg: &PackageInfo) -> Result<PackageLicenses, RemoteError> {
        let Some(url) = self.version_url(pkg) else {
            return Ok(PackageLicenses::default());
        };

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(PackageLicenses::default());
        }
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), "version query"));
        }

        parse_response(&response.text().await?)
    }
}

impl<L> ResilientBatchMatcher<L>
where
    L: BatchLookup<Item = PackageInfo, Output = PackageLicenses>,
{
    /// Licenses for each package, in input order.
    pub async fn match_licenses(&self, packages: &[PackageInfo]) -> Vec<PackageLicenses> {
        self.match_batch(packages).await.into_results()
    }

    /// Fills in every package's licenses and checks them against the license
    /// policy that applies to the package's location.
    pub async fn annotate_licenses(&self, results: &mut ScanResults, configs: &ConfigManager) {
        let packages: Vec<PackageInfo> =
            results.packages.iter().map(|r| r.package.clone()).collect();
        let matched = self.match_licenses(&packages).await;

        for (result, PackageLicenses(licenses)) in results.packages.iter_mut().zip(matched) {
            let policy = &configs.get(&result.package.location).licenses;
            result.license_violations = policy.violations(&licenses);
            result.licenses = licenses;
        }
    }
}

pub mod cachedregex;
pub mod config;
pub mod error;
pub mod filter;
pub mod matcher;
pub mod model;
pub mod version;

pub use config::{Config, ConfigManager, IgnoreEntry};
pub use error::{RemoteError, ScanError};
pub use filter::{FilterPipeline, ScanMode};
pub use matcher::{
    BaseImageMatcher, BatchLookup, BatchOutcome, LicenseMatcher, MatcherConfig,
    ResilientBatchMatcher,
};
pub use model::{PackageInfo, ScanResults, VulnerabilityResults};
pub use version::{VersionComparator, VersionKey};

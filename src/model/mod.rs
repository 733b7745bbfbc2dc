//! Core data types for packages, vulnerabilities, and scan results.
//!
//! This module contains the fundamental types used throughout depscan:
//!
//! - [`PackageInfo`] - A package produced by extraction
//! - [`Ecosystem`] - The package ecosystem (npm, Maven, ...)
//! - [`PackageScanResult`] - A package plus its matcher output
//! - [`VulnerabilityResults`] - The source-grouped report the vulnerability filter works on
//! - [`LayerMetadata`] / [`BaseImageDetails`] - Container image provenance
//!
//! # Example
//!
//! ```
//! use depscan::model::{Ecosystem, PackageInfo, PackageScanResult, ScanResults};
//!
//! let package = PackageInfo::new(Ecosystem::Npm, "left-pad", "1.0.0");
//! let results = ScanResults::new(vec![PackageScanResult::new(package)]);
//!
//! println!("Scanned {} packages", results.packages.len());
//! ```

mod image;
mod package;
mod vulnerability;

pub use image::*;
pub use package::*;
pub use vulnerability::*;

//! Concurrent, retrying batch lookups against remote services.
//!
//! A [`BatchLookup`] knows how to look up a single item. Wrapping it in a
//! [`ResilientBatchMatcher`] adds bounded concurrency, exponential backoff
//! with jitter for transient failures, and cancellation. A batch never fails
//! as a whole: an item whose lookup cannot succeed yields the lookup's
//! default ("no match") output in its slot.
//!
//! Two lookups ship with the crate: [`DepsDevBaseImageLookup`] attributes
//! container layers to known base images, [`DepsDevLicenseLookup`] resolves
//! package licenses.
//!
//! # Example
//!
//! ```no_run
//! use depscan::matcher::{DepsDevLicenseLookup, LicenseMatcher, MatcherConfig};
//! use depscan::model::{Ecosystem, PackageInfo};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MatcherConfig::default();
//!     let matcher = LicenseMatcher::new(DepsDevLicenseLookup::new(&config)?, config)?;
//!
//!     let packages = vec![PackageInfo::new(Ecosystem::Npm, "left-pad", "1.3.0")];
//!     for licenses in matcher.match_licenses(&packages).await {
//!         println!("{licenses}");
//!     }
//!     Ok(())
//! }
//! ```

mod base_image;
mod license;

pub use base_image::{
    assign_package_layers, attribute_layers, chain_ids, BaseImageMatcher, DepsDevBaseImageLookup,
};
pub use license::{DepsDevLicenseLookup, LicenseMatcher, PackageLicenses};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RemoteError, ScanError};

/// Base URL of the deps.dev API.
pub const DEPS_DEV_API: &str = "https://api.deps.dev";

/// Per-request timeout for the bundled HTTP lookups.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry and concurrency settings for a [`ResilientBatchMatcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Retries after the first attempt, for transient failures only.
    pub max_retry_attempts: u32,
    /// Delay before the first retry, in seconds.
    pub backoff_duration_multiplier: f64,
    /// Growth factor of the delay per retry.
    pub backoff_duration_exponential: f64,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter_multiplier: f64,
    /// Lookups in flight at any time.
    pub max_concurrent_batch_requests: usize,
    pub user_agent: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 4,
            backoff_duration_multiplier: 1.0,
            backoff_duration_exponential: 2.0,
            jitter_multiplier: 0.5,
            max_concurrent_batch_requests: 100,
            user_agent: concat!("depscan/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl MatcherConfig {
    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidMatcherConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ScanError> {
        fn invalid(field: &'static str, reason: String) -> Result<(), ScanError> {
            Err(ScanError::InvalidMatcherConfig { field, reason })
        }

        if self.max_retry_attempts == 0 {
            return invalid("max_retry_attempts", "must be positive".to_string());
        }
        if !(self.backoff_duration_multiplier.is_finite() && self.backoff_duration_multiplier > 0.0)
        {
            return invalid(
                "backoff_duration_multiplier",
                format!("must be positive, got {}", self.backoff_duration_multiplier),
            );
        }
        if !(self.backoff_duration_exponential.is_finite()
            && self.backoff_duration_exponential > 0.0)
        {
            return invalid(
                "backoff_duration_exponential",
                format!("must be positive, got {}", self.backoff_duration_exponential),
            );
        }
        if !(self.jitter_multiplier.is_finite() && self.jitter_multiplier >= 0.0) {
            return invalid(
                "jitter_multiplier",
                format!("must not be negative, got {}", self.jitter_multiplier),
            );
        }
        if self.max_concurrent_batch_requests == 0 {
            return invalid("max_concurrent_batch_requests", "must be positive".to_string());
        }
        if self.user_agent.trim().is_empty() {
            return invalid("user_agent", "must not be empty".to_string());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (counting from 0), without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_duration_multiplier * self.backoff_duration_exponential.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// [`backoff_delay`](Self::backoff_delay) plus a random extra drawn
    /// from the half-open interval `[0, delay * jitter_multiplier)`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let jitter = delay.as_secs_f64() * self.jitter_multiplier * fastrand::f64();
        delay.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or(Duration::ZERO))
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ScanError> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ScanError::InvalidMatcherConfig {
                field: "user_agent",
                reason: e.to_string(),
            })
    }
}

/// Looks up one item at a time against some remote service.
#[async_trait]
pub trait BatchLookup: Send + Sync {
    type Item: Send + Sync;
    /// `Default` is the "no match" value.
    type Output: Default + Send;

    /// Human-readable name for log lines.
    fn name(&self) -> &'static str;

    async fn lookup(&self, item: &Self::Item) -> Result<Self::Output, RemoteError>;
}

/// Result of [`ResilientBatchMatcher::match_batch`].
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    /// One entry per input item, in input order.
    pub results: Vec<T>,
    /// Items whose lookup succeeded.
    pub matched: usize,
    /// Items that hit a permanent error or ran out of retries.
    pub degraded: usize,
    /// Items that were never started or were interrupted by cancellation.
    pub cancelled: usize,
}

impl<T> BatchOutcome<T> {
    /// Whether more than half of the attempted lookups failed.
    pub fn is_degraded(&self) -> bool {
        let attempted = self.matched + self.degraded;
        attempted > 0 && self.degraded * 2 > attempted
    }

    pub fn into_results(self) -> Vec<T> {
        self.results
    }
}

enum ItemOutcome<T> {
    Matched(T),
    Degraded,
    Cancelled,
}

/// Runs a [`BatchLookup`] over many items with bounded concurrency and
/// retries.
pub struct ResilientBatchMatcher<L> {
    lookup: L,
    config: MatcherConfig,
    cancel: CancellationToken,
}

impl<L: BatchLookup> ResilientBatchMatcher<L> {
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidMatcherConfig`] if `config` does not
    /// validate.
    pub fn new(lookup: L, config: MatcherConfig) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self {
            lookup,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Stops dispatching items and retries once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Looks up every item, returning exactly one result per item in input
    /// order.
    pub async fn match_batch(&self, items: &[L::Item]) -> BatchOutcome<L::Output> {
        let mut outcome = BatchOutcome {
            results: std::iter::repeat_with(Default::default)
                .take(items.len())
                .collect(),
            matched: 0,
            degraded: 0,
            cancelled: 0,
        };

        let mut finished = std::pin::pin!(stream::iter(items.iter().enumerate())
            .take_until(self.cancel.cancelled())
            .map(|(index, item)| async move { (index, self.lookup_with_retry(item).await) })
            .buffer_unordered(self.config.max_concurrent_batch_requests));

        // Each index is yielded once, so every slot is written at most once.
        while let Some((index, result)) = finished.next().await {
            match result {
                ItemOutcome::Matched(output) => {
                    outcome.results[index] = output;
                    outcome.matched += 1;
                }
                ItemOutcome::Degraded => outcome.degraded += 1,
                ItemOutcome::Cancelled => {}
            }
        }
        // Interrupted and never-dispatched items alike.
        outcome.cancelled = items.len() - outcome.matched - outcome.degraded;

        if outcome.is_degraded() {
            warn!(
                "{}: {} of {} lookups failed, results are incomplete",
                self.lookup.name(),
                outcome.degraded,
                outcome.matched + outcome.degraded
            );
        }
        if outcome.cancelled > 0 {
            debug!(
                "{}: batch cancelled with {} of {} items unresolved",
                self.lookup.name(),
                outcome.cancelled,
                items.len()
            );
        }

        outcome
    }

    async fn lookup_with_retry(&self, item: &L::Item) -> ItemOutcome<L::Output> {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ItemOutcome::Cancelled,
                result = self.lookup.lookup(item) => result,
            };

            let err = match result {
                Ok(output) => return ItemOutcome::Matched(output),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.config.max_retry_attempts {
                debug!("{}: giving up on lookup: {}", self.lookup.name(), err);
                return ItemOutcome::Degraded;
            }

            let delay = self.config.retry_delay(attempt);
            debug!(
                "{}: retry {} in {:?} after: {}",
                self.lookup.name(),
                attempt + 1,
                delay,
                err
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ItemOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

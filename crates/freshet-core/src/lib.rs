//! Caching and freshness primitives shared by every Freshet upstream integration.
//!
//! - [`RevalidatingCache`]: per-key stale-while-revalidate cache with request coalescing
//! - [`RetryingFetcher`]: bounded exponential backoff with jitter for upstream calls
//! - [`ExpirationPolicy`]: jittered TTLs that desynchronize expiry
//! - [`BackgroundPoller`]: dedicated-thread polling of large blobs
//! - [`DayFanOut`]: concurrent per-day reads merged through an eligibility predicate

pub mod error;
pub mod expiration;
pub mod fanout;
pub mod key;
pub mod metrics;
pub mod poller;
pub mod retry;
pub mod revalidate;

pub use error::{Error, Result};
pub use expiration::ExpirationPolicy;
pub use fanout::DayFanOut;
pub use key::CacheKey;
pub use poller::{
    BackgroundPoller, BlobMetadata, BlobSource, FileBlobSource, PollOutcome, PollerConfig,
};
pub use retry::{RetryPolicy, RetryingFetcher};
pub use revalidate::{CacheStats, RevalidatingCache};

//! Assignments precomputed by the server for a single subject.
mod eval;
mod fetcher;
mod models;

pub use eval::{PrecomputedAssignment, PrecomputedBanditAction};
pub use fetcher::{PrecomputedFetcher, PrecomputedFetcherConfig, DEFAULT_BASE_URL};
pub use models::{PrecomputedBandit, PrecomputedConfiguration, PrecomputedFlag};

pub(crate) use models::PrecomputedRequest;

#[cfg(test)]
pub(crate) use eval::tests::response_json;

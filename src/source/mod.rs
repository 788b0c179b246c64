//! Fetch and parse collaborators.
//!
//! - [`fetcher`] - [`PageFetcher`] seam and the reqwest-backed [`HttpPageFetcher`]
//! - [`provider`] - [`Provider`] parsing seam and [`ProgressSink`]
//! - [`registry`] - [`ProviderRegistry`], URL pattern based provider lookup

mod fetcher;
mod provider;
mod registry;

pub use fetcher::{HttpPageFetcher, PageFetcher};
pub use provider::{NoProgress, ProgressSink, Provider};
pub use registry::ProviderRegistry;

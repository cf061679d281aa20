//! Pipeline entry points.
//!
//! - `run_scraper`: incremental fetch of every channel into day partitions
//! - `run_loader`: upsert the day partitions into the warehouse

pub mod fetch;
#[cfg(feature = "warehouse")]
pub mod load;
pub mod merge;
pub mod retry;
pub mod scrape;

pub use fetch::{ChannelFetcher, FetchOptions, FetchedBatch};
#[cfg(feature = "warehouse")]
pub use load::run_loader;
pub use merge::{merge_partitions, merge_records};
pub use retry::RetryPolicy;
pub use scrape::{ChannelReport, ChannelStatus, RunSummary, run_scraper};

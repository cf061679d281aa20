//! Service layer for the fetcher application.
//!
//! - Photo downloads during a fetch pass (`MediaDownloader`)
//! - Partition file discovery and row extraction for the warehouse loader

mod media;
pub mod warehouse;

pub use media::MediaDownloader;

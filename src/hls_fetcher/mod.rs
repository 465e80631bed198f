//! HLS Fetcher: given a playlist URL and output location, materializes a
//! single `<base>.mp4`, emitting progress. Two interchangeable backends,
//! selected once at construction.

mod muxing;
mod sanitize;
mod segmented;
mod trait_def;

pub use muxing::MuxingFetcher;
pub use sanitize::sanitize_filename;
pub use segmented::{SegmentedConfig, SegmentedFetcher};
pub use trait_def::{FetchProgress, HlsFetcher};

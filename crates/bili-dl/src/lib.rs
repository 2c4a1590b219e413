//! Download engine for the bilibili client.
//!
//! Takes the negotiated stream pair from `bili-client`, fetches both streams
//! to disk with retry and byte-range resume, and hands the finished pair to
//! an external muxer. The [`engine::Downloader`] facade at the top is what a
//! presentation layer consumes.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod job;
pub mod mux;
pub mod retry;
pub mod transport;

pub use config::EngineConfig;
pub use engine::{Downloader, EngineError};
pub use error::{FetchError, TransferError};
pub use fetch::PartDownloader;
pub use job::{DownloadJob, JobStatus, PartReport, PartSelection};
pub use mux::{FfmpegMuxer, Muxer};
pub use retry::RetryPolicy;
pub use transport::{FetchRequest, FetchResponse, HttpTransport, StreamTransport};

use std::path::PathBuf;

use crate::retry::RetryPolicy;

/// Configurable knobs of the download engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ceiling on simultaneously running part downloads.
    pub concurrency: usize,

    /// Retry behavior for stream fetches.
    pub retry: RetryPolicy,

    /// External muxer executable, resolved through the search path.
    pub muxer_program: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry: RetryPolicy::default(),
            muxer_program: PathBuf::from("ffmpeg"),
        }
    }
}

impl EngineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_muxer_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.muxer_program = program.into();
        self
    }
}

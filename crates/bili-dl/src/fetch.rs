//! Fetching one part's streams to local storage.
//!
//! Each stream goes to a `.part` temp file and is renamed into place only
//! when complete. Retries resume from the last confirmed offset when the
//! server honors byte ranges, otherwise the partial write is discarded before
//! the next attempt.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use bili_client::{Credentials, StreamOption};

use crate::error::{FetchError, TransferError};
use crate::job::{DownloadJob, JobProgress};
use crate::retry::{RetryAction, RetryOutcome, RetryPolicy, retry_with_backoff};
use crate::transport::{FetchRequest, StreamTransport};

/// Fetches the video and audio streams of one [`DownloadJob`].
#[derive(Clone)]
pub struct PartDownloader {
    transport: Arc<dyn StreamTransport>,
    retry: RetryPolicy,
}

impl PartDownloader {
    pub fn new(transport: Arc<dyn StreamTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Run both stream fetches of `job` concurrently.
    ///
    /// On success both paths are finalized and the job is `Completed`. On the
    /// first stream failure the sibling fetch is abandoned and both temp
    /// files are discarded.
    pub async fn run(
        &self,
        job: &DownloadJob,
        credentials: Option<&Credentials>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        job.progress().begin();
        debug!(
            part = job.part_index,
            video = %job.pair.video,
            audio = %job.pair.audio,
            "starting part download"
        );

        let video = fetch_stream_to_file(
            self.transport.as_ref(),
            &job.pair.video,
            credentials,
            &job.video_path,
            &self.retry,
            cancel,
            job.progress(),
        );
        let audio = fetch_stream_to_file(
            self.transport.as_ref(),
            &job.pair.audio,
            credentials,
            &job.audio_path,
            &self.retry,
            cancel,
            job.progress(),
        );

        match tokio::try_join!(video, audio) {
            Ok(((), ())) => {
                job.progress().complete();
                Ok(())
            }
            Err(e) => {
                job.progress().fail();
                // The abandoned sibling may have left a temp file behind.
                let _ = tokio::fs::remove_file(part_path(&job.video_path)).await;
                let _ = tokio::fs::remove_file(part_path(&job.audio_path)).await;
                Err(e)
            }
        }
    }
}

/// Temp-file name for an in-flight download.
pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

/// Fetch one stream option to `dest` with retry.
///
/// Attempts rotate through the option's candidate URLs (primary, then the
/// platform's backup CDNs).
#[allow(clippy::too_many_arguments)]
pub(crate) async fn fetch_stream_to_file(
    transport: &dyn StreamTransport,
    option: &StreamOption,
    credentials: Option<&Credentials>,
    dest: &Path,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    progress: &JobProgress,
) -> Result<(), TransferError> {
    let tmp = part_path(dest);
    let candidates: Vec<String> = option.candidate_urls().map(str::to_owned).collect();
    let server_resumable = AtomicBool::new(false);
    let confirmed_offset = AtomicU64::new(0);

    let result = retry_with_backoff(policy, cancel, |attempt| {
        let url = candidates[attempt as usize % candidates.len()].clone();
        let tmp = tmp.clone();
        let server_resumable = &server_resumable;
        let confirmed_offset = &confirmed_offset;
        async move {
            progress.record_attempt(attempt);
            let outcome = run_attempt(
                transport,
                &url,
                credentials,
                &tmp,
                dest,
                server_resumable,
                confirmed_offset,
                cancel,
            )
            .await;
            match outcome {
                Ok(()) => RetryAction::Success(()),
                Err(e) if e.is_retryable() => RetryAction::Retry(e),
                Err(e) => RetryAction::Fail(e),
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(outcome) => {
            // Out of attempts: the partial write is of no further use.
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(map_outcome(outcome, option, credentials.is_some()))
        }
    }
}

fn map_outcome(outcome: RetryOutcome, option: &StreamOption, authenticated: bool) -> TransferError {
    match outcome {
        RetryOutcome::Cancelled => TransferError::Cancelled,
        RetryOutcome::Fatal {
            error: FetchError::Cancelled,
            ..
        } => TransferError::Cancelled,
        RetryOutcome::Fatal {
            error: error @ FetchError::AuthRejected { .. },
            attempts,
        } => {
            if authenticated {
                TransferError::AuthExpired {
                    url: option.url.clone(),
                }
            } else {
                TransferError::DownloadExhausted {
                    attempts,
                    source: error,
                }
            }
        }
        RetryOutcome::Exhausted { attempts, last } => TransferError::DownloadExhausted {
            attempts,
            source: last,
        },
        RetryOutcome::Fatal { attempts, error } => TransferError::DownloadExhausted {
            attempts,
            source: error,
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    transport: &dyn StreamTransport,
    url: &str,
    credentials: Option<&Credentials>,
    tmp: &Path,
    dest: &Path,
    server_resumable: &AtomicBool,
    confirmed_offset: &AtomicU64,
    cancel: &CancellationToken,
) -> Result<(), FetchError> {
    let resume_from = if server_resumable.load(Ordering::Acquire) {
        confirmed_offset.load(Ordering::Acquire)
    } else {
        // No range support: discard the previous partial write.
        match tokio::fs::remove_file(tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        confirmed_offset.store(0, Ordering::Release);
        0
    };

    let response = transport
        .fetch(FetchRequest {
            url,
            range_start: (resume_from > 0).then_some(resume_from),
            credentials,
        })
        .await?;

    // Remember range support before streaming so a mid-stream failure can
    // still resume.
    server_resumable.store(response.resumable, Ordering::Release);

    // The server may decline the range and restart from zero.
    let mut written = response.resumed_from;
    let mut file = if written > 0 {
        let on_disk = tokio::fs::metadata(tmp).await.map(|m| m.len()).unwrap_or(0);
        if on_disk != written {
            server_resumable.store(false, Ordering::Release);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("partial file out of sync: {on_disk} on disk, {written} confirmed"),
            )
            .into());
        }
        tokio::fs::OpenOptions::new().append(true).open(tmp).await?
    } else {
        confirmed_offset.store(0, Ordering::Release);
        tokio::fs::File::create(tmp).await?
    };

    let mut stream = response.stream;
    let mut stream_error: Option<FetchError> = None;
    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            stream_error = Some(FetchError::Cancelled);
            break;
        }
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                stream_error = Some(e);
                break;
            }
        };
        if let Err(e) = file.write_all(&bytes).await {
            stream_error = Some(e.into());
            break;
        }
        written += bytes.len() as u64;
        confirmed_offset.store(written, Ordering::Release);
    }
    // Flush even on a failed attempt so the confirmed offset matches what is
    // on disk before the next attempt resumes.
    let flush_result = file.flush().await;
    drop(file);
    if let Some(e) = stream_error {
        return Err(e);
    }
    flush_result?;

    if let Some(total) = response.total_len
        && written < total
    {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short body: {written} of {total} bytes"),
        )
        .into());
    }

    tokio::fs::rename(tmp, dest).await?;
    debug!(dest = %dest.display(), bytes = written, "stream finalized");
    Ok(())
}

//! Caller-facing engine: login operations plus the download pipeline.
//!
//! `download` resolves the identifier, negotiates every selected part before
//! a single stream byte is fetched, then runs the part jobs under the
//! configured concurrency ceiling and hands each finished pair to the muxer.
//! Reports come back in job creation order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bili_client::{
    AuthError, AuthSession, AuthState, CatalogResolver, HttpCatalog, LoginChallenge,
    NegotiationError, PartDescriptor, ResolutionError, VideoDescriptor, VideoQuality,
    client::default_client, negotiate, parse_identifier,
};

use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::fetch::PartDownloader;
use crate::job::{DownloadJob, JobStatus, PartReport, PartSelection};
use crate::mux::{FfmpegMuxer, Muxer};
use crate::transport::{HttpTransport, StreamTransport};

/// Operation-level failures of [`Downloader::download`]. Per-part transfer
/// failures land in the [`PartReport`]s instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("part {part}: {source}")]
    Negotiation {
        part: u32,
        #[source]
        source: NegotiationError,
    },

    #[error("part {part} does not exist (video has {total} part(s))")]
    PartNotFound { part: u32, total: usize },

    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// The engine facade consumed by the presentation layer.
pub struct Downloader {
    session: Arc<AuthSession>,
    catalog: Arc<dyn CatalogResolver>,
    part_downloader: PartDownloader,
    muxer: Arc<dyn Muxer>,
    config: EngineConfig,
}

impl Downloader {
    /// Build with the real HTTP components.
    pub fn new(session: Arc<AuthSession>, config: EngineConfig) -> Self {
        let client = default_client();
        Self::with_components(
            session,
            Arc::new(HttpCatalog::new(client.clone())),
            Arc::new(HttpTransport::new(client)),
            Arc::new(FfmpegMuxer::new(config.muxer_program.clone())),
            config,
        )
    }

    /// Component seam used by tests and embedders.
    pub fn with_components(
        session: Arc<AuthSession>,
        catalog: Arc<dyn CatalogResolver>,
        transport: Arc<dyn StreamTransport>,
        muxer: Arc<dyn Muxer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            session,
            catalog,
            part_downloader: PartDownloader::new(transport, config.retry.clone()),
            muxer,
            config,
        }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Start a QR login; render the returned challenge and pass it to
    /// [`Self::await_login`].
    pub async fn begin_login(&self) -> Result<LoginChallenge, AuthError> {
        self.session.begin_login().await
    }

    pub async fn await_login(
        &self,
        challenge: &LoginChallenge,
        cancel: &CancellationToken,
    ) -> Result<AuthState, AuthError> {
        self.session.await_login(challenge, cancel).await
    }

    pub async fn import_cookie(&self, raw: &str) -> Result<(), AuthError> {
        self.session.import_cookie(raw).await
    }

    pub fn check_status(&self) -> AuthState {
        self.session.state()
    }

    pub async fn logout(&self) {
        self.session.logout().await
    }

    /// Download `identifier` into `output_dir`.
    pub async fn download(
        &self,
        identifier: &str,
        quality: Option<VideoQuality>,
        parts: PartSelection,
        output_dir: &Path,
    ) -> Result<Vec<PartReport>, EngineError> {
        self.download_with_cancel(identifier, quality, parts, output_dir, &CancellationToken::new())
            .await
    }

    pub async fn download_with_cancel(
        &self,
        identifier: &str,
        quality: Option<VideoQuality>,
        parts: PartSelection,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<PartReport>, EngineError> {
        let parsed = parse_identifier(identifier)?;
        let credentials = self.session.credentials();
        let tier = self.session.tier();

        let descriptor = self
            .catalog
            .resolve(&parsed.id, credentials.as_ref())
            .await?;
        debug!(id = %descriptor.id, title = %descriptor.title, tier = ?tier, "resolved catalog");

        // A `?p=` hint in the identifier narrows an unrestricted selection.
        let selection = match parsed.part_hint {
            Some(hint) if parts == PartSelection::All => PartSelection::Single(hint),
            _ => parts,
        };

        let available: Vec<u32> = descriptor.parts.iter().map(|p| p.index).collect();
        if let Some(&missing) = selection.missing_from(&available).first() {
            return Err(EngineError::PartNotFound {
                part: missing,
                total: descriptor.parts.len(),
            });
        }
        let selected: Vec<&PartDescriptor> = descriptor
            .parts
            .iter()
            .filter(|p| selection.includes(p.index))
            .collect();
        if selected.is_empty() {
            return Err(EngineError::PartNotFound {
                part: 1,
                total: descriptor.parts.len(),
            });
        }

        // Negotiate every part up front; a tier or label mismatch must fail
        // before any stream byte moves.
        let mut negotiated = Vec::with_capacity(selected.len());
        for part in &selected {
            let pair = negotiate(part, tier, quality).map_err(|source| {
                EngineError::Negotiation {
                    part: part.index,
                    source,
                }
            })?;
            negotiated.push((*part, pair));
        }

        tokio::fs::create_dir_all(output_dir).await?;

        let jobs: Vec<Arc<DownloadJob>> = negotiated
            .into_iter()
            .map(|(part, pair)| {
                let stem = file_stem(&descriptor, part);
                Arc::new(DownloadJob::new(
                    part.index,
                    part.title.clone(),
                    pair,
                    output_dir.join(format!("{stem}.video.m4s")),
                    output_dir.join(format!("{stem}.audio.m4s")),
                    output_dir.join(format!("{stem}.mp4")),
                ))
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let job = Arc::clone(job);
            let semaphore = Arc::clone(&semaphore);
            let session = Arc::clone(&self.session);
            let part_downloader = self.part_downloader.clone();
            let muxer = Arc::clone(&self.muxer);
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return report_for(&job, None, None, Some(TransferError::Cancelled));
                };

                let credentials = session.credentials();
                match part_downloader
                    .run(&job, credentials.as_ref(), &cancel)
                    .await
                {
                    Ok(()) => match muxer
                        .mux(&job.video_path, &job.audio_path, &job.output_path)
                        .await
                    {
                        Ok(()) => {
                            let _ = tokio::fs::remove_file(&job.video_path).await;
                            let _ = tokio::fs::remove_file(&job.audio_path).await;
                            report_for(&job, Some(job.output_path.clone()), None, None)
                        }
                        Err(e) => {
                            // Sources stay on disk for a manual mux retry.
                            warn!(part = job.part_index, error = %e, "mux failed; sources preserved");
                            report_for(
                                &job,
                                None,
                                Some((job.video_path.clone(), job.audio_path.clone())),
                                Some(e),
                            )
                        }
                    },
                    Err(e) => {
                        if matches!(e, TransferError::AuthExpired { .. }) {
                            session.mark_expired().await;
                        }
                        report_for(&job, None, None, Some(e))
                    }
                }
            }));
        }

        // Completion order is free; report order follows job creation.
        let mut reports = Vec::with_capacity(handles.len());
        for (job, handle) in jobs.iter().zip(handles) {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(part = job.part_index, error = %e, "download task aborted");
                    reports.push(report_for(
                        job,
                        None,
                        None,
                        Some(TransferError::Io {
                            source: std::io::Error::other(e),
                        }),
                    ));
                }
            }
        }
        Ok(reports)
    }
}

fn report_for(
    job: &DownloadJob,
    output: Option<PathBuf>,
    media_paths: Option<(PathBuf, PathBuf)>,
    error: Option<TransferError>,
) -> PartReport {
    let status = match job.status() {
        // A job that never ran (cancelled before its permit) stays reported
        // as failed rather than pending.
        JobStatus::Pending | JobStatus::InProgress | JobStatus::Retrying if error.is_some() => {
            JobStatus::Failed
        }
        status => status,
    };
    PartReport {
        part_index: job.part_index,
        part_title: job.part_title.clone(),
        status,
        attempts: job.attempts(),
        output,
        media_paths,
        error,
    }
}

fn file_stem(descriptor: &VideoDescriptor, part: &PartDescriptor) -> String {
    let name = if descriptor.parts.len() > 1 {
        if part.title.is_empty() {
            format!("{}_P{}", descriptor.title, part.index)
        } else {
            format!("{}_P{}_{}", descriptor.title, part.index, part.title)
        }
    } else {
        descriptor.title.clone()
    };
    sanitize_filename(&name)
}

/// Replace filesystem-hostile characters, trim dot/space edges and cap the
/// length; falls back to "video" for degenerate titles.
fn sanitize_filename(name: &str) -> String {
    const MAX_LEN: usize = 200;

    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if (c as u32) < 0x20 => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches([' ', '.']);
    let capped: String = trimmed.chars().take(MAX_LEN).collect();

    if capped.is_empty() {
        "video".to_string()
    } else {
        capped
    }
}

//! Handoff to the external muxer.
//!
//! The engine never touches media internals; a finished job's video and audio
//! files go to an external executable that copies both tracks into one
//! container. Source files are left in place on failure so the caller can
//! retry the mux alone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransferError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), TransferError>;
}

/// ffmpeg-based muxer: `ffmpeg -i video -i audio -c copy -y output`.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }

    /// Probe for the executable (`ffmpeg -version`).
    pub async fn is_available(&self) -> bool {
        self.command()
            .arg("-version")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), TransferError> {
        debug!(
            video = %video.display(),
            audio = %audio.display(),
            output = %output.display(),
            "invoking muxer"
        );

        let result = self
            .command()
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c:v", "copy", "-c:a", "copy", "-y"])
            .arg(output)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .output()
            .await;

        let output_data = match result {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::MuxerNotFound {
                    program: self.program.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !output_data.status.success() {
            return Err(TransferError::MuxFailed {
                detail: stderr_tail(&output_data.stderr, output_data.status.code()),
            });
        }
        Ok(())
    }
}

/// Condense ffmpeg's stderr to the trailing lines that carry the error.
fn stderr_tail(stderr: &[u8], exit_code: Option<i32>) -> String {
    let text = String::from_utf8_lossy(stderr);
    let tail: Vec<&str> = text
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(4)
        .collect();
    let mut detail = match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    };
    if !tail.is_empty() {
        detail.push_str(": ");
        detail.push_str(&tail.into_iter().rev().collect::<Vec<_>>().join(" | "));
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr = b"line1\nline2\n\nline3\nline4\nline5\n";
        let detail = stderr_tail(stderr, Some(1));
        assert!(detail.starts_with("exit code 1: "));
        assert!(detail.contains("line5"));
        assert!(!detail.contains("line1"));
    }

    #[test]
    fn stderr_tail_without_output() {
        assert_eq!(stderr_tail(b"", Some(2)), "exit code 2");
        assert_eq!(stderr_tail(b"", None), "terminated by signal");
    }

    #[tokio::test]
    async fn missing_executable_is_muxer_not_found() {
        let muxer = FfmpegMuxer::new("definitely-not-a-real-muxer-binary");
        assert!(!muxer.is_available().await);

        let err = muxer
            .mux(
                Path::new("v.m4s"),
                Path::new("a.m4s"),
                Path::new("out.mp4"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MuxerNotFound { .. }));
    }
}

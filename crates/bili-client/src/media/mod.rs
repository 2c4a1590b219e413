pub mod negotiate;
pub mod quality;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auth::session::EntitlementTier;
use crate::catalog::ids::VideoId;
use quality::{AudioQuality, VideoQuality};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Quality label of a stream option, video or audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLabel {
    Video(VideoQuality),
    Audio(AudioQuality),
}

impl QualityLabel {
    pub fn as_video(self) -> Option<VideoQuality> {
        match self {
            Self::Video(q) => Some(q),
            Self::Audio(_) => None,
        }
    }

    pub fn as_audio(self) -> Option<AudioQuality> {
        match self {
            Self::Audio(q) => Some(q),
            Self::Video(_) => None,
        }
    }

    pub fn required_tier(self) -> EntitlementTier {
        match self {
            Self::Video(q) => q.required_tier(),
            Self::Audio(q) => q.required_tier(),
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video(q) => q.fmt(f),
            Self::Audio(q) => q.fmt(f),
        }
    }
}

/// One concrete, independently downloadable rendition of a part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOption {
    pub kind: StreamKind,
    pub quality: QualityLabel,
    /// RFC 6381 codecs string as delivered by the platform.
    pub codec: String,
    /// Nominal bandwidth in bits per second.
    pub bitrate: u64,
    pub url: String,
    pub backup_urls: Vec<String>,
}

impl StreamOption {
    pub fn required_tier(&self) -> EntitlementTier {
        self.quality.required_tier()
    }

    pub fn is_dolby(&self) -> bool {
        self.quality.as_audio().is_some_and(AudioQuality::is_dolby)
    }

    pub fn is_hires(&self) -> bool {
        self.quality.as_audio().is_some_and(AudioQuality::is_hires)
    }

    /// Primary URL followed by the platform's backup CDNs.
    pub fn candidate_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.backup_urls.iter().map(String::as_str))
    }
}

impl fmt::Display for StreamOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.quality, self.codec)
    }
}

/// One segment of a (possibly multi-part) video with its competing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartDescriptor {
    /// 1-based part index as shown on the platform.
    pub index: u32,
    pub cid: u64,
    pub title: String,
    pub video: Vec<StreamOption>,
    pub audio: Vec<StreamOption>,
}

/// Immutable result of resolving one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub id: VideoId,
    pub title: String,
    pub owner: String,
    pub parts: Vec<PartDescriptor>,
}

impl VideoDescriptor {
    pub fn part(&self, index: u32) -> Option<&PartDescriptor> {
        self.parts.iter().find(|p| p.index == index)
    }
}

/// The negotiated selection for one part: exactly one video and one audio
/// option, both within the tier that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiatedPair {
    pub video: StreamOption,
    pub audio: StreamOption,
}

//! Quality and codec tables for DASH stream options.
//!
//! The precedence orderings live in the variant declaration order so that the
//! derived `Ord` is the negotiation ranking. Platform `qn`/`id` codes follow
//! the web playurl API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::session::EntitlementTier;

/// Video rendition labels, declared in ascending precedence.
///
/// Note that `1080p+` (high bitrate) outranks `1080p60` even though the
/// platform assigns it a lower qn code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    P240,
    P360,
    P480,
    P720,
    P720F60,
    P1080,
    P1080F60,
    P1080Plus,
    FourK,
    Hdr,
    DolbyVision,
    EightK,
}

impl VideoQuality {
    /// Platform quality code (`qn`).
    pub fn qn(self) -> u32 {
        match self {
            Self::P240 => 6,
            Self::P360 => 16,
            Self::P480 => 32,
            Self::P720 => 64,
            Self::P720F60 => 74,
            Self::P1080 => 80,
            Self::P1080Plus => 112,
            Self::P1080F60 => 116,
            Self::FourK => 120,
            Self::Hdr => 125,
            Self::DolbyVision => 126,
            Self::EightK => 127,
        }
    }

    pub fn from_qn(qn: i64) -> Option<Self> {
        match qn {
            6 => Some(Self::P240),
            16 => Some(Self::P360),
            32 => Some(Self::P480),
            64 => Some(Self::P720),
            74 => Some(Self::P720F60),
            80 => Some(Self::P1080),
            112 => Some(Self::P1080Plus),
            116 => Some(Self::P1080F60),
            120 => Some(Self::FourK),
            125 => Some(Self::Hdr),
            126 => Some(Self::DolbyVision),
            127 => Some(Self::EightK),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::P240 => "240p",
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P720F60 => "720p60",
            Self::P1080 => "1080p",
            Self::P1080Plus => "1080p+",
            Self::P1080F60 => "1080p60",
            Self::FourK => "4k",
            Self::Hdr => "hdr",
            Self::DolbyVision => "dolby_vision",
            Self::EightK => "8k",
        }
    }

    /// Minimum account tier the platform demands for this rendition.
    ///
    /// The playurl payload does not label options with tiers; this mapping is
    /// the observed platform policy: 1080p+ and above need a premium
    /// membership, 720p and above need a logged-in account.
    pub fn required_tier(self) -> EntitlementTier {
        if self.qn() >= 112 {
            EntitlementTier::PremiumMember
        } else if self.qn() >= 64 {
            EntitlementTier::Member
        } else {
            EntitlementTier::Guest
        }
    }
}

impl fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VideoQuality {
    type Err = UnknownQualityLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let quality = match lower.as_str() {
            "240p" => Self::P240,
            "360p" => Self::P360,
            "480p" => Self::P480,
            "720p" => Self::P720,
            "720p60" => Self::P720F60,
            "1080p" => Self::P1080,
            "1080p+" => Self::P1080Plus,
            "1080p60" => Self::P1080F60,
            "4k" => Self::FourK,
            "hdr" => Self::Hdr,
            "dolby_vision" => Self::DolbyVision,
            "8k" => Self::EightK,
            _ => return Err(UnknownQualityLabel { input: lower }),
        };
        Ok(quality)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown quality label `{input}`")]
pub struct UnknownQualityLabel {
    pub input: String,
}

/// Audio rendition labels, declared in ascending precedence:
/// Hi-Res lossless > Dolby Atmos > 192k > 132k > 64k.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    K64,
    K132,
    K192,
    Dolby,
    HiRes,
}

impl AudioQuality {
    /// Platform audio stream id.
    pub fn id(self) -> u32 {
        match self {
            Self::K64 => 30216,
            Self::K132 => 30232,
            Self::K192 => 30280,
            Self::Dolby => 30250,
            Self::HiRes => 30251,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            30216 => Some(Self::K64),
            30232 => Some(Self::K132),
            30280 => Some(Self::K192),
            30250 => Some(Self::Dolby),
            30251 => Some(Self::HiRes),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::K64 => "64k",
            Self::K132 => "132k",
            Self::K192 => "192k",
            Self::Dolby => "dolby",
            Self::HiRes => "hires",
        }
    }

    pub fn is_dolby(self) -> bool {
        self == Self::Dolby
    }

    pub fn is_hires(self) -> bool {
        self == Self::HiRes
    }

    /// Dolby Atmos and Hi-Res tracks are premium-only; the rest are served to
    /// anonymous sessions as well.
    pub fn required_tier(self) -> EntitlementTier {
        match self {
            Self::Dolby | Self::HiRes => EntitlementTier::PremiumMember,
            _ => EntitlementTier::Guest,
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Video codec families, ascending preference: HEVC > AV1 > AVC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Avc,
    Av1,
    Hevc,
}

impl Codec {
    /// Platform `codecid` (7 AVC, 12 HEVC, 13 AV1).
    pub fn from_codecid(codecid: i64) -> Option<Self> {
        match codecid {
            7 => Some(Self::Avc),
            12 => Some(Self::Hevc),
            13 => Some(Self::Av1),
            _ => None,
        }
    }

    /// Classify an RFC 6381 codecs string such as `hev1.1.6.L120.90`.
    pub fn from_codec_string(codecs: &str) -> Option<Self> {
        let lower = codecs.to_ascii_lowercase();
        if lower.starts_with("hev") || lower.starts_with("hvc") {
            Some(Self::Hevc)
        } else if lower.starts_with("av01") {
            Some(Self::Av1)
        } else if lower.starts_with("avc") {
            Some(Self::Avc)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Avc => "avc",
            Self::Av1 => "av1",
            Self::Hevc => "hevc",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

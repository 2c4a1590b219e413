//! Quality negotiation: pick one video and one audio option for a part.
//!
//! Pure and deterministic; all platform/tier knowledge lives in the rank
//! tables of [`crate::media::quality`]. Filtering never substitutes silently:
//! an explicit request either matches exactly or fails.

use tracing::debug;

use crate::auth::session::EntitlementTier;
use crate::error::NegotiationError;
use crate::media::quality::{Codec, VideoQuality};
use crate::media::{NegotiatedPair, PartDescriptor, StreamKind, StreamOption};

/// Select the stream pair for `part` under `tier`.
///
/// With no explicit request the highest-ranked eligible video option wins
/// (quality, then codec family, then bitrate). The audio pick is independent
/// of any requested video label.
pub fn negotiate(
    part: &PartDescriptor,
    tier: EntitlementTier,
    requested: Option<VideoQuality>,
) -> Result<NegotiatedPair, NegotiationError> {
    let video = select_video(&part.video, tier, requested)?;
    let audio = select_audio(&part.audio, tier)?;
    debug!(part = part.index, video = %video, audio = %audio, "negotiated stream pair");
    Ok(NegotiatedPair {
        video: video.clone(),
        audio: audio.clone(),
    })
}

fn select_video<'a>(
    options: &'a [StreamOption],
    tier: EntitlementTier,
    requested: Option<VideoQuality>,
) -> Result<&'a StreamOption, NegotiationError> {
    if options.is_empty() {
        return Err(NegotiationError::EmptyCatalog {
            kind: StreamKind::Video,
        });
    }

    let eligible: Vec<&StreamOption> = options
        .iter()
        .filter(|o| o.required_tier() <= tier)
        .collect();

    if let Some(want) = requested {
        // Exact label match only; an ineligible or absent label is an error,
        // never a downgrade.
        return eligible
            .iter()
            .filter(|o| o.quality.as_video() == Some(want))
            .max_by_key(|o| (Codec::from_codec_string(&o.codec), o.bitrate))
            .copied()
            .ok_or_else(|| NegotiationError::QualityUnavailable {
                requested: want,
                known_to_platform: options
                    .iter()
                    .any(|o| o.quality.as_video() == Some(want)),
            });
    }

    eligible
        .into_iter()
        .max_by_key(|o| {
            (
                o.quality.as_video(),
                Codec::from_codec_string(&o.codec),
                o.bitrate,
            )
        })
        .ok_or(NegotiationError::NoEligibleStream {
            kind: StreamKind::Video,
            tier,
        })
}

fn select_audio<'a>(
    options: &'a [StreamOption],
    tier: EntitlementTier,
) -> Result<&'a StreamOption, NegotiationError> {
    if options.is_empty() {
        return Err(NegotiationError::EmptyCatalog {
            kind: StreamKind::Audio,
        });
    }

    options
        .iter()
        .filter(|o| o.required_tier() <= tier)
        .max_by_key(|o| (o.quality.as_audio(), o.bitrate))
        .ok_or(NegotiationError::NoEligibleStream {
            kind: StreamKind::Audio,
            tier,
        })
}

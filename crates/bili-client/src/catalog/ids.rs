//! Video identifier normalization.
//!
//! Accepted forms: a bare `BV` code, a bare `av` number, or an http(s) URL
//! containing either, with an optional `?p=` part hint.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ResolutionError;

static BARE_BVID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[Bb][Vv]([0-9A-Za-z]{10})$").unwrap());
static BARE_AVID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[Aa][Vv](\d+)$").unwrap());
static URL_BVID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Bb][Vv][0-9A-Za-z]{10}").unwrap());
static URL_AVID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bav(\d+)").unwrap());

/// Canonical identity of one video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoId {
    Bvid(String),
    Aid(u64),
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bvid(bvid) => f.write_str(bvid),
            Self::Aid(aid) => write!(f, "av{aid}"),
        }
    }
}

/// A normalized identifier plus the part hint a URL may carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIdentifier {
    pub id: VideoId,
    pub part_hint: Option<u32>,
}

/// Normalize a raw identifier string.
pub fn parse_identifier(raw: &str) -> Result<ParsedIdentifier, ResolutionError> {
    let trimmed = raw.trim();

    if let Some(caps) = BARE_BVID.captures(trimmed) {
        return Ok(ParsedIdentifier {
            id: VideoId::Bvid(format!("BV{}", &caps[1])),
            part_hint: None,
        });
    }

    if let Some(caps) = BARE_AVID.captures(trimmed)
        && let Ok(aid) = caps[1].parse::<u64>()
    {
        return Ok(ParsedIdentifier {
            id: VideoId::Aid(aid),
            part_hint: None,
        });
    }

    let url = Url::parse(trimmed)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .ok_or_else(|| ResolutionError::invalid_identifier(trimmed))?;

    let part_hint = url
        .query_pairs()
        .find(|(k, _)| k == "p")
        .and_then(|(_, v)| v.parse::<u32>().ok())
        .filter(|&p| p >= 1);

    if let Some(m) = URL_BVID.find(url.path()) {
        let code = m.as_str();
        return Ok(ParsedIdentifier {
            id: VideoId::Bvid(format!("BV{}", &code[2..])),
            part_hint,
        });
    }

    if let Some(caps) = URL_AVID.captures(url.path())
        && let Ok(aid) = caps[1].parse::<u64>()
    {
        return Ok(ParsedIdentifier {
            id: VideoId::Aid(aid),
            part_hint,
        });
    }

    Err(ResolutionError::invalid_identifier(trimmed))
}

//! Catalog resolution: identifier → [`VideoDescriptor`].
//!
//! Issues the metadata request plus one stream-option request per part,
//! authorized with the current credentials when present. This component never
//! retries; transient failures are surfaced for the caller to retry whole.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::debug;

use crate::auth::credential::Credentials;
use crate::catalog::ids::VideoId;
use crate::catalog::models::{ApiEnvelope, Dash, DashStream, PlayData, ViewData};
use crate::catalog::wbi::WbiSigner;
use crate::client::{DEFAULT_UA, WEB_REFERER};
use crate::error::ResolutionError;
use crate::media::quality::{AudioQuality, VideoQuality};
use crate::media::{PartDescriptor, QualityLabel, StreamKind, StreamOption, VideoDescriptor};

const VIEW_URL: &str = "https://api.bilibili.com/x/web-interface/view";
const PLAYURL_URL: &str = "https://api.bilibili.com/x/player/wbi/playurl";

// fnval bitmask: dash | hdr | 4k | dolby audio | dolby vision | 8k | av1.
const PLAYURL_FNVAL: &str = "4048";

#[async_trait]
pub trait CatalogResolver: Send + Sync {
    async fn resolve(
        &self,
        id: &VideoId,
        credentials: Option<&Credentials>,
    ) -> Result<VideoDescriptor, ResolutionError>;
}

/// Real resolver over the web API.
pub struct HttpCatalog {
    client: Client,
    signer: WbiSigner,
    /// Synthetic device cookie sent on anonymous requests.
    device_buvid3: String,
}

impl HttpCatalog {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            signer: WbiSigner::new(),
            device_buvid3: synth_buvid3(),
        }
    }

    fn request(&self, url: &str, credentials: Option<&Credentials>) -> RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, DEFAULT_UA)
            .header(reqwest::header::REFERER, WEB_REFERER);
        match credentials {
            Some(c) => builder.header(reqwest::header::COOKIE, c.cookie_header()),
            None => builder.header(
                reqwest::header::COOKIE,
                format!("buvid3={}", self.device_buvid3),
            ),
        }
    }

    async fn get_envelope<T: serde::de::DeserializeOwned>(
        &self,
        id: &VideoId,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<ApiEnvelope<T>, ResolutionError> {
        let response = self
            .request(url, credentials)
            .send()
            .await
            .map_err(|e| ResolutionError::transient(id.to_string(), e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolutionError::transient(
                id.to_string(),
                format!("HTTP {status}"),
            ));
        }
        if !status.is_success() {
            return Err(ResolutionError::decode(
                id.to_string(),
                format!("unexpected HTTP {status}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ResolutionError::decode(id.to_string(), e.to_string()))
    }

    async fn fetch_view(
        &self,
        id: &VideoId,
        credentials: Option<&Credentials>,
    ) -> Result<ViewData, ResolutionError> {
        let url = match id {
            VideoId::Bvid(bvid) => format!("{VIEW_URL}?bvid={bvid}"),
            VideoId::Aid(aid) => format!("{VIEW_URL}?aid={aid}"),
        };

        let envelope: ApiEnvelope<ViewData> = self.get_envelope(id, &url, credentials).await?;
        if envelope.code != 0 {
            return Err(map_api_code(id, envelope.code, envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| ResolutionError::decode(id.to_string(), "view response has no data"))
    }

    async fn fetch_part_streams(
        &self,
        id: &VideoId,
        bvid: &str,
        cid: u64,
        credentials: Option<&Credentials>,
    ) -> Result<(Vec<StreamOption>, Vec<StreamOption>), ResolutionError> {
        let params = vec![
            ("bvid", bvid.to_string()),
            ("cid", cid.to_string()),
            ("qn", VideoQuality::EightK.qn().to_string()),
            ("fnver", "0".to_string()),
            ("fnval", PLAYURL_FNVAL.to_string()),
            ("fourk", "1".to_string()),
        ];
        let query = self.signer.sign(&self.client, params).await?;
        let url = format!("{PLAYURL_URL}?{query}");

        let envelope: ApiEnvelope<PlayData> = self.get_envelope(id, &url, credentials).await?;
        if envelope.code != 0 {
            return Err(map_api_code(id, envelope.code, envelope.message));
        }
        let play = envelope
            .data
            .ok_or_else(|| ResolutionError::decode(id.to_string(), "playurl response has no data"))?;

        // A missing dash block (legacy single-stream delivery) surfaces as an
        // empty catalog downstream.
        Ok(play.dash.map(options_from_dash).unwrap_or_default())
    }
}

#[async_trait]
impl CatalogResolver for HttpCatalog {
    async fn resolve(
        &self,
        id: &VideoId,
        credentials: Option<&Credentials>,
    ) -> Result<VideoDescriptor, ResolutionError> {
        let view = self.fetch_view(id, credentials).await?;
        debug!(id = %id, title = %view.title, parts = view.pages.len(), "resolved metadata");

        let mut parts = Vec::with_capacity(view.pages.len());
        for page in &view.pages {
            let (video, audio) = self
                .fetch_part_streams(id, &view.bvid, page.cid, credentials)
                .await?;
            parts.push(PartDescriptor {
                index: page.page,
                cid: page.cid,
                title: page.part.clone(),
                video,
                audio,
            });
        }

        Ok(VideoDescriptor {
            id: VideoId::Bvid(view.bvid),
            title: view.title,
            owner: view.owner.name,
            parts,
        })
    }
}

fn map_api_code(id: &VideoId, code: i64, message: String) -> ResolutionError {
    match code {
        -404 | 62002 | 62012 => ResolutionError::NotFound { id: id.to_string() },
        -403 | -10403 | 62011 => ResolutionError::GeoOrAgeRestricted { id: id.to_string() },
        _ => ResolutionError::decode(id.to_string(), format!("api error {code}: {message}")),
    }
}

fn options_from_dash(dash: Dash) -> (Vec<StreamOption>, Vec<StreamOption>) {
    let mut video = Vec::with_capacity(dash.video.len());
    for stream in &dash.video {
        let Some(quality) = VideoQuality::from_qn(stream.id) else {
            debug!(qn = stream.id, "skipping video stream with unknown qn");
            continue;
        };
        if let Some(option) = stream_option(stream, StreamKind::Video, QualityLabel::Video(quality))
        {
            video.push(option);
        }
    }

    let mut audio = Vec::with_capacity(dash.audio.len() + 2);
    for stream in &dash.audio {
        let Some(quality) = AudioQuality::from_id(stream.id) else {
            debug!(id = stream.id, "skipping audio stream with unknown id");
            continue;
        };
        if let Some(option) = stream_option(stream, StreamKind::Audio, QualityLabel::Audio(quality))
        {
            audio.push(option);
        }
    }

    // Hi-Res and Dolby Atmos tracks live outside the regular audio list.
    if let Some(flac) = dash.flac.as_ref().and_then(|f| f.audio.as_ref()) {
        let quality = AudioQuality::from_id(flac.id).unwrap_or(AudioQuality::HiRes);
        if let Some(option) = stream_option(flac, StreamKind::Audio, QualityLabel::Audio(quality)) {
            audio.push(option);
        }
    }
    if let Some(dolby) = dash
        .dolby
        .as_ref()
        .and_then(|d| d.audio.as_ref())
        .and_then(|tracks| tracks.first())
    {
        let quality = AudioQuality::from_id(dolby.id).unwrap_or(AudioQuality::Dolby);
        if let Some(option) = stream_option(dolby, StreamKind::Audio, QualityLabel::Audio(quality)) {
            audio.push(option);
        }
    }

    (video, audio)
}

/// Build an option from a dash stream; primary URL falls back to the first
/// backup CDN when `base_url` is missing.
fn stream_option(
    stream: &DashStream,
    kind: StreamKind,
    quality: QualityLabel,
) -> Option<StreamOption> {
    let mut backups = stream.backup_url.clone().unwrap_or_default();
    let url = if stream.base_url.is_empty() {
        if backups.is_empty() {
            debug!(id = stream.id, "dash stream has no usable url");
            return None;
        }
        backups.remove(0)
    } else {
        stream.base_url.clone()
    };

    Some(StreamOption {
        kind,
        quality,
        codec: stream.codecs.clone(),
        bitrate: stream.bandwidth,
        url,
        backup_urls: backups,
    })
}

fn synth_buvid3() -> String {
    let u = uuid::Uuid::new_v4().to_string().to_uppercase().replace('-', "");
    format!(
        "{}-{}-{}-{}-{}infoc",
        &u[0..8],
        &u[8..12],
        &u[12..16],
        &u[16..20],
        &u[20..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::models::{DolbyTrack, FlacTrack};

    fn dash_stream(id: i64, base_url: &str, codecs: &str, bandwidth: u64) -> DashStream {
        DashStream {
            id,
            base_url: base_url.to_string(),
            backup_url: None,
            bandwidth,
            codecs: codecs.to_string(),
        }
    }

    #[test]
    fn flattens_dash_into_options() {
        let dash = Dash {
            video: vec![
                dash_stream(80, "https://cdn/v80", "avc1.640032", 3_000_000),
                dash_stream(64, "https://cdn/v64", "hev1.1.6.L120.90", 1_600_000),
                dash_stream(999, "https://cdn/v999", "avc1.640032", 1), // unknown qn
            ],
            audio: vec![dash_stream(30280, "https://cdn/a192", "mp4a.40.2", 192_000)],
            flac: Some(FlacTrack {
                audio: Some(dash_stream(30251, "https://cdn/flac", "fLaC", 1_400_000)),
            }),
            dolby: Some(DolbyTrack {
                audio: Some(vec![dash_stream(30250, "https://cdn/atmos", "ec-3", 640_000)]),
            }),
        };

        let (video, audio) = options_from_dash(dash);
        assert_eq!(video.len(), 2);
        assert!(video.iter().all(|o| o.kind == StreamKind::Video));
        assert_eq!(audio.len(), 3);
        assert!(audio.iter().any(|o| o.is_hires()));
        assert!(audio.iter().any(|o| o.is_dolby()));
    }

    #[test]
    fn empty_base_url_falls_back_to_backup() {
        let stream = DashStream {
            id: 80,
            base_url: String::new(),
            backup_url: Some(vec![
                "https://backup1/v".to_string(),
                "https://backup2/v".to_string(),
            ]),
            bandwidth: 1,
            codecs: "avc1".to_string(),
        };
        let option = stream_option(
            &stream,
            StreamKind::Video,
            QualityLabel::Video(VideoQuality::P1080),
        )
        .unwrap();
        assert_eq!(option.url, "https://backup1/v");
        assert_eq!(option.backup_urls, vec!["https://backup2/v".to_string()]);
    }

    #[test]
    fn stream_without_any_url_is_dropped() {
        let stream = dash_stream(80, "", "avc1", 1);
        assert!(
            stream_option(
                &stream,
                StreamKind::Video,
                QualityLabel::Video(VideoQuality::P1080),
            )
            .is_none()
        );
    }

    #[test]
    fn api_code_mapping() {
        let id = VideoId::Bvid("BV1xx411c7mD".into());
        assert!(matches!(
            map_api_code(&id, -404, String::new()),
            ResolutionError::NotFound { .. }
        ));
        assert!(matches!(
            map_api_code(&id, -403, String::new()),
            ResolutionError::GeoOrAgeRestricted { .. }
        ));
        assert!(matches!(
            map_api_code(&id, -500, String::new()),
            ResolutionError::Decode { .. }
        ));
    }

    #[test]
    fn synthetic_buvid3_shape() {
        let buvid = synth_buvid3();
        assert!(buvid.ends_with("infoc"));
        assert_eq!(buvid.matches('-').count(), 4);
    }

    #[tokio::test]
    #[ignore]
    async fn live_resolve() {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
        let catalog = HttpCatalog::new(crate::client::default_client());
        let descriptor = catalog
            .resolve(&VideoId::Bvid("BV1xx411c7mD".into()), None)
            .await
            .unwrap();
        println!("{descriptor:?}");
    }
}

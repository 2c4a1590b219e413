//! Serde models for the catalog endpoints.
//!
//! Only the consumed fields are modeled. The playurl payload spells stream
//! URLs camelCase on the web API and snake_case on the app API; aliases cover
//! both.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ViewData {
    pub bvid: String,
    pub title: String,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub pages: Vec<PageInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Owner {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageInfo {
    pub cid: u64,
    pub page: u32,
    #[serde(default)]
    pub part: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlayData {
    pub dash: Option<Dash>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Dash {
    #[serde(default)]
    pub video: Vec<DashStream>,
    #[serde(default)]
    pub audio: Vec<DashStream>,
    pub flac: Option<FlacTrack>,
    pub dolby: Option<DolbyTrack>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlacTrack {
    pub audio: Option<DashStream>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DolbyTrack {
    #[serde(default)]
    pub audio: Option<Vec<DashStream>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashStream {
    pub id: i64,
    #[serde(rename = "baseUrl", alias = "base_url", default)]
    pub base_url: String,
    #[serde(rename = "backupUrl", alias = "backup_url", default)]
    pub backup_url: Option<Vec<String>>,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub codecs: String,
}

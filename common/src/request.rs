use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobKind, JobState};

fn default_quality() -> String {
    "best".to_string()
}

fn default_true() -> bool {
    true
}

/* --------- Opciones comunes --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Best,
    Mp3,
    M4a,
}

/// Tipo de contenido de plataforma (post, reel, story).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformContent {
    Post,
    Reel,
    Story,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReelDownloadType {
    #[default]
    Video,
    AudioOnly,
    VideoOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryPackaging {
    #[default]
    Individual,
    Zip,
}

/* --------- Requests de entrada --------- */

/// Descarga de un único video/audio (también se usa para "playlist completa").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleFetchRequest {
    pub url: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    /// Si viene, pisa a `quality`
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(rename = "type", default)]
    pub media_kind: MediaKind,
    #[serde(default)]
    pub audio_format: AudioFormat,
}

impl SingleFetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            quality: default_quality(),
            format_id: None,
            media_kind: MediaKind::default(),
            audio_format: AudioFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFetchRequest {
    pub urls: Vec<String>,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(rename = "type", default)]
    pub media_kind: MediaKind,
    #[serde(default)]
    pub audio_format: AudioFormat,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

impl Default for BatchFetchRequest {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            quality: default_quality(),
            media_kind: MediaKind::default(),
            audio_format: AudioFormat::default(),
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSelectRequest {
    pub url: String,
    pub video_indices: Vec<usize>,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(rename = "type", default)]
    pub media_kind: MediaKind,
    #[serde(default)]
    pub audio_format: AudioFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformPostRequest {
    /// URL o shortcode del post
    pub url: String,
    #[serde(default = "default_quality")]
    pub quality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformReelRequest {
    pub url: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default)]
    pub download_type: ReelDownloadType,
    #[serde(default)]
    pub audio_format: AudioFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformStoryRequest {
    pub username: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default)]
    pub format: StoryPackaging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformCarouselRequest {
    pub url: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformBatchItem {
    pub url: String,
    #[serde(rename = "type")]
    pub content: PlatformContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformBatchRequest {
    pub items: Vec<PlatformBatchItem>,
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
}

/// Parámetros originales de un job, etiquetados por tipo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum JobRequest {
    Single(SingleFetchRequest),
    Batch(BatchFetchRequest),
    Playlist(SingleFetchRequest),
    PlaylistSelect(PlaylistSelectRequest),
    PlatformPost(PlatformPostRequest),
    PlatformReel(PlatformReelRequest),
    PlatformStory(PlatformStoryRequest),
    PlatformCarousel(PlatformCarouselRequest),
    PlatformBatch(PlatformBatchRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Single(_) => JobKind::Single,
            JobRequest::Batch(_) => JobKind::Batch,
            JobRequest::Playlist(_) => JobKind::Playlist,
            JobRequest::PlaylistSelect(_) => JobKind::PlaylistSelect,
            JobRequest::PlatformPost(_) => JobKind::PlatformPost,
            JobRequest::PlatformReel(_) => JobKind::PlatformReel,
            JobRequest::PlatformStory(_) => JobKind::PlatformStory,
            JobRequest::PlatformCarousel(_) => JobKind::PlatformCarousel,
            JobRequest::PlatformBatch(_) => JobKind::PlatformBatch,
        }
    }

    /// Cantidad de items conocida al momento de crear el job.
    pub fn item_count(&self) -> Option<usize> {
        match self {
            JobRequest::Batch(r) => Some(r.urls.len()),
            JobRequest::PlatformBatch(r) => Some(r.items.len()),
            _ => None,
        }
    }
}

/* --------- Respuestas --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,
    pub status_url: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub message: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Metadata devuelta por el resolver (video suelto o playlist).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub is_playlist: bool,
    #[serde(default)]
    pub entries: Vec<PlaylistEntry>,
    /// Formatos disponibles (vacío en playlists)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// Un formato concreto que ofrece el resolver para un video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub format_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// codec ausente o "none" => no hay esa pista
fn has_track(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| c != "none")
}

impl MediaFormat {
    pub fn has_video(&self) -> bool {
        has_track(&self.vcodec)
    }

    pub fn has_audio(&self) -> bool {
        has_track(&self.acodec)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatGroups {
    pub video_only: Vec<MediaFormat>,
    pub audio_only: Vec<MediaFormat>,
    pub combined: Vec<MediaFormat>,
}

impl FormatGroups {
    /// Reparte los formatos según sus pistas; los que no tienen ninguna se descartan.
    pub fn from_formats(formats: &[MediaFormat]) -> Self {
        let mut groups = Self::default();
        for f in formats {
            match (f.has_video(), f.has_audio()) {
                (true, true) => groups.combined.push(f.clone()),
                (true, false) => groups.video_only.push(f.clone()),
                (false, true) => groups.audio_only.push(f.clone()),
                (false, false) => {}
            }
        }
        groups
    }
}

/// Respuesta de la consulta de formatos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub formats: FormatGroups,
    /// Selectores listos para usar como `format_id`
    pub recommended: BTreeMap<String, String>,
}

impl FormatsResponse {
    pub fn from_info(info: &MediaInfo) -> Self {
        let recommended = [
            ("best_video", "bestvideo+bestaudio/best"),
            ("best_audio", "bestaudio/best"),
            ("720p", "bestvideo[height<=720]+bestaudio"),
            ("1080p", "bestvideo[height<=1080]+bestaudio"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            video_id: info.id.clone(),
            title: info.title.clone(),
            formats: FormatGroups::from_formats(&info.formats),
            recommended,
        }
    }
}

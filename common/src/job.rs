use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::request::{JobRequest, PlatformContent};

pub type JobId = String;

/// Genera un id nuevo para un job (uuid v4 como string).
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Prefijo de las URLs de descarga de artefactos en el server.
pub const FILES_ROUTE: &str = "/api/v1/files";

// Todo lo que no puede ir crudo dentro de un segmento de path.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// URL de descarga de un artefacto, con el nombre codificado.
pub fn file_url(filename: &str) -> String {
    format!("{}/{}", FILES_ROUTE, utf8_percent_encode(filename, PATH_SEGMENT))
}

/* --------- Tipos y estados de un job --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Single,
    Batch,
    Playlist,
    PlaylistSelect,
    PlatformPost,
    PlatformReel,
    PlatformStory,
    PlatformCarousel,
    PlatformBatch,
}

impl JobKind {
    /// Jobs que agregan varios sub-items (tienen total_items / completed_items).
    pub fn is_multi_item(self) -> bool {
        matches!(
            self,
            JobKind::Batch | JobKind::Playlist | JobKind::PlaylistSelect | JobKind::PlatformBatch
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Single => "single",
            JobKind::Batch => "batch",
            JobKind::Playlist => "playlist",
            JobKind::PlaylistSelect => "playlist_select",
            JobKind::PlatformPost => "platform_post",
            JobKind::PlatformReel => "platform_reel",
            JobKind::PlatformStory => "platform_story",
            JobKind::PlatformCarousel => "platform_carousel",
            JobKind::PlatformBatch => "platform_batch",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// Máquina de estados:
    /// pending -> processing -> {completed, failed, cancelled}
    /// pending -> cancelled
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Pending, JobState::Cancelled)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
                | (JobState::Processing, JobState::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/* --------- Artefactos y errores por item --------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Video,
    Audio,
    Image,
    Archive,
    Other,
}

impl MediaType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp4" | "webm" | "mkv" | "mov" | "flv" | "avi" => MediaType::Video,
            "mp3" | "m4a" | "opus" | "ogg" | "wav" | "aac" | "flac" => MediaType::Audio,
            "jpg" | "jpeg" | "png" | "webp" | "gif" | "heic" => MediaType::Image,
            "zip" => MediaType::Archive,
            _ => MediaType::Other,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(MediaType::from_extension)
            .unwrap_or(MediaType::Other)
    }
}

/// Archivo producido por un job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub size: u64,
    /// Ruta local dentro del server
    pub path: String,
    pub download_url: String,
    pub media_type: MediaType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Índice del item de origen (batch / playlist)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<PlatformContent>,
    /// Cantidad de archivos empaquetados (sólo para zips)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_count: Option<usize>,
}

impl Artifact {
    pub fn new(path: &Path, size: u64) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            download_url: file_url(&filename),
            media_type: MediaType::from_path(path),
            filename,
            size,
            path: path.to_string_lossy().to_string(),
            title: None,
            source_index: None,
            source: None,
            source_type: None,
            items_count: None,
        }
    }
}

/// Falla de un sub-item dentro de un job multi-item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<PlatformContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
}

/* --------- Registro de job --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub progress: u8,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Parámetros originales, nunca se modifican
    pub request: JobRequest,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub errors: Vec<ItemError>,
    #[serde(default)]
    pub failure_reason: Option<String>,

    /// -------- Sólo jobs multi-item --------
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_items: Option<u32>,
}

impl Job {
    pub fn new(id: JobId, request: JobRequest) -> Self {
        let kind = request.kind();
        let (total_items, completed_items) = if kind.is_multi_item() {
            // las playlists recién conocen su tamaño al leer la metadata
            (request.item_count().map(|n| n as u32), Some(0))
        } else {
            (None, None)
        };

        Self {
            id,
            kind,
            state: JobState::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            request,
            title: None,
            artifacts: Vec::new(),
            errors: Vec::new(),
            failure_reason: None,
            total_items,
            completed_items,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Aplica una transición válida y actualiza los timestamps.
    pub fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        let now = Utc::now();
        if next == JobState::Processing && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            kind: self.kind,
            state: self.state,
            progress: self.progress,
            created_at: self.created_at,
            title: self.title.clone(),
            artifact_count: self.artifacts.len(),
            error_count: self.errors.len(),
            total_items: self.total_items,
            completed_items: self.completed_items,
        }
    }
}

/// Versión reducida de un job para los listados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub artifact_count: usize,
    pub error_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_items: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    pub has_more: bool,
    pub jobs: Vec<JobSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BatchFetchRequest, SingleFetchRequest};

    fn single() -> JobRequest {
        JobRequest::Single(SingleFetchRequest::new("https://example.com/v"))
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let mut job = Job::new(new_job_id(), single());
        assert_eq!(job.state, JobState::Pending);

        assert!(job.transition(JobState::Completed).is_err());
        job.transition(JobState::Processing).unwrap();
        assert!(job.started_at.is_some());

        job.transition(JobState::Completed).unwrap();
        assert!(job.finished_at.is_some());

        let err = job.transition(JobState::Cancelled).unwrap_err();
        assert_eq!(err.from, JobState::Completed);
        assert!(job.transition(JobState::Pending).is_err());
    }

    #[test]
    fn pending_job_can_be_cancelled() {
        let mut job = Job::new(new_job_id(), single());
        job.transition(JobState::Cancelled).unwrap();
        assert!(job.is_terminal());
        assert!(job.transition(JobState::Processing).is_err());
    }

    #[test]
    fn multi_item_jobs_carry_counters() {
        let req = JobRequest::Batch(BatchFetchRequest {
            urls: vec!["a".into(), "b".into()],
            ..BatchFetchRequest::default()
        });
        let job = Job::new(new_job_id(), req);
        assert_eq!(job.kind, JobKind::Batch);
        assert_eq!(job.total_items, Some(2));
        assert_eq!(job.completed_items, Some(0));

        let job = Job::new(new_job_id(), single());
        assert_eq!(job.total_items, None);
        assert_eq!(job.completed_items, None);
    }

    #[test]
    fn artifact_descriptor_from_path() {
        let a = Artifact::new(Path::new("/tmp/downloads/ab12cd34_clip.mp4"), 42);
        assert_eq!(a.filename, "ab12cd34_clip.mp4");
        assert_eq!(a.download_url, "/api/v1/files/ab12cd34_clip.mp4");
        assert_eq!(a.media_type, MediaType::Video);
        assert_eq!(a.size, 42);

        assert_eq!(MediaType::from_extension("M4A"), MediaType::Audio);
        assert_eq!(MediaType::from_extension("zip"), MediaType::Archive);
        assert_eq!(MediaType::from_extension("txt"), MediaType::Other);
    }

    #[test]
    fn download_url_escapes_title_characters() {
        let a = Artifact::new(Path::new("/tmp/downloads/ab12cd34_Top 10?#shorts 100%.mp4"), 1);
        assert_eq!(a.filename, "ab12cd34_Top 10?#shorts 100%.mp4");
        assert_eq!(
            a.download_url,
            "/api/v1/files/ab12cd34_Top%2010%3F%23shorts%20100%25.mp4"
        );
        assert_eq!(file_url("canción.mp3"), "/api/v1/files/canci%C3%B3n.mp3");
    }
}

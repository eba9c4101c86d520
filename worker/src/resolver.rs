use std::path::PathBuf;

use common::{FormatSpec, MediaInfo};
use thiserror::Error;

/// Evento de progreso emitido por el resolver durante un fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Downloading { downloaded: u64, total: Option<u64> },
    Finished,
}

impl ProgressEvent {
    /// Porcentaje entero (piso). `None` si no se conoce el total.
    pub fn percent(&self) -> Option<u8> {
        match *self {
            ProgressEvent::Downloading {
                downloaded,
                total: Some(total),
            } if total > 0 => {
                let pct = (downloaded as u128 * 100) / total as u128;
                Some(pct.min(100) as u8)
            }
            ProgressEvent::Downloading { .. } => None,
            ProgressEvent::Finished => Some(100),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Descarta el progreso (sub-items de un batch).
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Qué bajar y dónde dejarlo.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSpec {
    pub source: String,
    pub format: FormatSpec,
    pub output_dir: PathBuf,
    /// Todos los archivos del fetch empiezan con `<file_prefix>_`
    pub file_prefix: String,
    /// Resto del nombre, en sintaxis de template del resolver
    pub name_template: String,
    pub allow_playlist: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub title: Option<String>,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("could not start resolver: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("{0}")]
    Failed(String),
    #[error("unexpected resolver output: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Herramienta externa que resuelve metadata y baja contenido.
/// Las dos operaciones son bloqueantes; se llaman fuera del runtime async.
pub trait ContentResolver: Send + Sync + 'static {
    fn probe(&self, source: &str) -> Result<MediaInfo, ResolverError>;

    fn fetch(
        &self,
        spec: &FetchSpec,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome, ResolverError>;
}

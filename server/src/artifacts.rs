use std::path::PathBuf;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;
use worker::OutputDirs;

use crate::error::ApiError;
use crate::state::AppState;

const GONE: &str = "File not found or has been cleaned up";

/// Sólo nombres planos: nada de separadores ni `..`.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.contains('\0')
}

/// Busca el archivo en descargas y después en plataforma.
pub fn locate(dirs: &OutputDirs, name: &str) -> Option<PathBuf> {
    if !is_safe_name(name) {
        return None;
    }
    dirs.all()
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

pub async fn serve_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    req: Request,
) -> Result<Response, ApiError> {
    let path = locate(state.jobs.dirs(), &filename).ok_or_else(|| ApiError::not_found(GONE))?;
    debug!("sirviendo {}", path.display());

    let mut res = match ServeFile::new(&path).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    };

    if res.status() == StatusCode::OK {
        if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
            res.headers_mut().insert(header::CONTENT_DISPOSITION, v);
        }
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_traversal() {
        assert!(is_safe_name("ab12cd34_clip.mp4"));
        assert!(!is_safe_name("../secret"));
        assert!(!is_safe_name("a/b.mp4"));
        assert!(!is_safe_name("..\\b.mp4"));
        assert!(!is_safe_name(""));
    }

    #[test]
    fn downloads_dir_wins_over_platform() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = OutputDirs::new(tmp.path().join("d"), tmp.path().join("p"));
        fs::create_dir_all(&dirs.downloads).unwrap();
        fs::create_dir_all(&dirs.platform).unwrap();

        fs::write(dirs.platform.join("only_p.jpg"), b"p").unwrap();
        fs::write(dirs.platform.join("both.mp4"), b"p").unwrap();
        fs::write(dirs.downloads.join("both.mp4"), b"d").unwrap();

        assert_eq!(locate(&dirs, "both.mp4"), Some(dirs.downloads.join("both.mp4")));
        assert_eq!(locate(&dirs, "only_p.jpg"), Some(dirs.platform.join("only_p.jpg")));
        assert_eq!(locate(&dirs, "missing.mp4"), None);
        assert_eq!(locate(&dirs, "../d/both.mp4"), None);
    }
}

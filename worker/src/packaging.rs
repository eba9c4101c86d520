//! Empaquetado en zip de salidas con varios archivos (carrusel, stories).

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use common::{Artifact, MediaInfo};
use thiserror::Error;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error while packaging: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

fn options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated)
}

/// Escribe `entries` (nombre dentro del zip, archivo) y devuelve el tamaño final.
fn write_zip(
    target: &Path,
    entries: &[(String, &Path)],
    extra: Option<(&str, Vec<u8>)>,
) -> Result<u64, PackagingError> {
    let mut zip = ZipWriter::new(File::create(target)?);

    for (name, path) in entries {
        zip.start_file(name.as_str(), options())?;
        let mut src = File::open(path)?;
        io::copy(&mut src, &mut zip)?;
    }

    if let Some((name, bytes)) = extra {
        zip.start_file(name, options())?;
        zip.write_all(&bytes)?;
    }

    zip.finish()?;
    Ok(fs::metadata(target)?.len())
}

fn remove_originals(files: &[PathBuf]) {
    for f in files {
        if let Err(e) = fs::remove_file(f) {
            warn!("no se pudo borrar {}: {}", f.display(), e);
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Carrusel -> `<prefix>_<shortcode>_carousel.zip` con `item_01.ext`, `item_02.ext`, ...
/// y opcionalmente `metadata.json`. El prefijo es el del fetch, así dos jobs
/// del mismo post no pisan el mismo zip.
pub fn bundle_carousel(
    files: &[PathBuf],
    dir: &Path,
    prefix: &str,
    shortcode: Option<&str>,
    metadata: Option<&MediaInfo>,
) -> Result<Artifact, PackagingError> {
    let mut sorted = files.to_vec();
    sorted.sort();

    let entries: Vec<(String, &Path)> = sorted
        .iter()
        .enumerate()
        .map(|(i, p)| (format!("item_{:02}{}", i + 1, extension_of(p)), p.as_path()))
        .collect();

    let extra = match metadata {
        Some(info) => Some(("metadata.json", serde_json::to_vec_pretty(info)?)),
        None => None,
    };

    let name = match shortcode {
        Some(code) => format!("{}_{}_carousel.zip", prefix, code),
        None => format!("{}_carousel.zip", prefix),
    };
    let target = dir.join(name);
    let size = write_zip(&target, &entries, extra)?;
    debug!("carrusel empaquetado en {} ({} items)", target.display(), entries.len());

    remove_originals(&sorted);

    let mut artifact = Artifact::new(&target, size);
    artifact.items_count = Some(entries.len());
    Ok(artifact)
}

/// Stories -> `<prefix>_stories.zip` conservando los nombres originales.
pub fn bundle_stories(
    files: &[PathBuf],
    dir: &Path,
    prefix: &str,
) -> Result<Artifact, PackagingError> {
    let mut sorted = files.to_vec();
    sorted.sort();

    let entries: Vec<(String, &Path)> = sorted
        .iter()
        .map(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            (name, p.as_path())
        })
        .collect();

    let target = dir.join(format!("{}_stories.zip", prefix));
    let size = write_zip(&target, &entries, None)?;
    debug!("stories empaquetadas en {} ({} archivos)", target.display(), entries.len());

    remove_originals(&sorted);

    let mut artifact = Artifact::new(&target, size);
    artifact.items_count = Some(entries.len());
    Ok(artifact)
}

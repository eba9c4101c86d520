use std::fs;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::state::AppState;

/// Borra los archivos de `dirs` modificados hace más de `retention`.
pub fn sweep(dirs: &[&Path], retention: Duration, now: SystemTime) -> usize {
    let mut removed = 0;

    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            let expired = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .is_some_and(|age| age > retention);

            if expired {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("borrado {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("no se pudo borrar {}: {}", path.display(), e),
                }
            }
        }
    }

    removed
}

/// Loop de limpieza: archivos vencidos y clientes inactivos del rate limiter.
pub async fn run(state: AppState, interval: Duration, retention: Duration) {
    loop {
        tokio::time::sleep(interval).await;

        let dirs = state.jobs.dirs().clone();
        let removed = tokio::task::spawn_blocking(move || {
            sweep(&dirs.all(), retention, SystemTime::now())
        })
        .await
        .unwrap_or(0);

        let evicted = state.jobs.limiter().evict_idle(Instant::now());

        if removed > 0 || evicted > 0 {
            info!(
                "limpieza: {} archivos borrados, {} clientes liberados",
                removed, evicted
            );
        }
    }
}

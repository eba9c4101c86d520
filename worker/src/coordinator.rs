//! Jobs multi-item: batches y playlists.
//!
//! Los items se procesan de a uno y en orden. El progreso sale de la
//! cantidad de items terminados, no de los bytes de cada fetch. Antes de cada
//! item se vuelve a leer el estado del job para cortar si fue cancelado.

use common::{ItemError, JobState};
use tracing::{info, warn};

use crate::plan::{PlaylistPlan, WorkItem};
use crate::resolver::NoProgress;
use crate::runner::JobRunner;
use crate::store::JobStore;

#[derive(Clone)]
pub struct Coordinator {
    runner: JobRunner,
}

impl Coordinator {
    pub fn new(runner: JobRunner) -> Self {
        Self { runner }
    }

    fn store(&self) -> &JobStore {
        self.runner.store()
    }

    /// Batch de items ya conocidos.
    pub fn run(&self, job_id: &str, items: &[WorkItem], continue_on_error: bool) {
        if let Err(e) = self.store().mark_processing(job_id) {
            info!("job {} no se ejecuta: {}", job_id, e);
            return;
        }
        self.run_items(job_id, items, continue_on_error);
    }

    /// Playlist: primero la metadata, después los videos elegidos.
    pub fn run_playlist(&self, job_id: &str, plan: &PlaylistPlan) {
        if let Err(e) = self.store().mark_processing(job_id) {
            info!("job {} no se ejecuta: {}", job_id, e);
            return;
        }

        let info = match self.runner.resolver().probe(&plan.url) {
            Ok(info) => info,
            Err(e) => {
                warn!("job {}: no se pudo leer la playlist: {}", job_id, e);
                let outcome = self
                    .store()
                    .fail(job_id, format!("could not extract playlist info: {}", e));
                self.runner.settle(job_id, outcome);
                return;
            }
        };

        if !info.is_playlist {
            let outcome = self.store().fail(job_id, "url is not a playlist");
            self.runner.settle(job_id, outcome);
            return;
        }

        let items = plan.select(&info);
        info!(
            "job {} playlist {:?}: {} de {} videos",
            job_id,
            info.title.as_deref().unwrap_or("-"),
            items.len(),
            info.entries.len()
        );

        if let Err(e) = self.store().set_plan(job_id, items.len() as u32, info.title.clone()) {
            self.runner.settle(job_id, Err(e));
            return;
        }

        if items.is_empty() {
            let outcome = self.store().fail(
                job_id,
                "no output produced: playlist selection matched no entries",
            );
            self.runner.settle(job_id, outcome);
            return;
        }

        self.run_items(job_id, &items, true);
    }

    fn run_items(&self, job_id: &str, items: &[WorkItem], continue_on_error: bool) {
        let total = items.len();

        for (i, item) in items.iter().enumerate() {
            // cancelación en el borde de cada item
            if self.store().state(job_id) != Some(JobState::Processing) {
                info!("job {} cortado antes del item {}/{}", job_id, i + 1, total);
                return;
            }

            let progress = ((i + 1) * 100 / total) as u8;

            let outcome = self
                .runner
                .fetch_item(item, &NoProgress)
                .and_then(|fetched| {
                    let mut artifacts = fetched.artifacts()?;
                    for a in &mut artifacts {
                        a.source_index = Some(item.index);
                        a.source = Some(item.label.clone());
                        a.source_type = item.source_type;
                        a.title = fetched.title.clone();
                    }
                    Ok(artifacts)
                })
                .map_err(|e| e.to_string());

            let recorded = match outcome {
                Ok(artifacts) => {
                    info!("job {} item {}/{} ok", job_id, i + 1, total);
                    self.store().record_item_success(job_id, artifacts, progress)
                }
                Err(message) => {
                    warn!("job {} item {}/{} falló: {}", job_id, i + 1, total, message);
                    let error = ItemError {
                        source: item.label.clone(),
                        index: Some(item.index),
                        source_type: item.source_type,
                        title: item.title.clone(),
                        message: message.clone(),
                    };

                    if !continue_on_error {
                        let reason = format!(
                            "stopped at item {}/{} ({}): {}",
                            i + 1,
                            total,
                            item.label,
                            message
                        );
                        let outcome = self.store().fail_with_item(job_id, error, progress, reason);
                        self.runner.settle(job_id, outcome);
                        return;
                    }
                    self.store().record_item_failure(job_id, error, progress)
                }
            };

            if let Err(e) = recorded {
                // cancelado mientras corría el item
                self.runner.settle(job_id, Err(e));
                return;
            }
        }

        let outcome = self.store().complete(job_id, None, Vec::new());
        if outcome.is_ok() {
            info!("job {} completado", job_id);
        }
        self.runner.settle(job_id, outcome);
    }
}

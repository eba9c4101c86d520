//! Tabla de jobs en memoria.
//!
//! Es la única fuente de verdad del estado de cada job. Todas las
//! mutaciones toman el lock de escritura, aplican el cambio completo y lo
//! sueltan; las lecturas devuelven copias.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::{Artifact, ItemError, Job, JobId, JobState, JobSummary, TransitionError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {id} is already {state}")]
    Terminal { id: JobId, state: JobState },
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job: Job) {
        self.write().insert(job.id.clone(), job);
    }

    /// Copia consistente del registro.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.read().get(id).cloned()
    }

    pub fn state(&self, id: &str) -> Option<JobState> {
        self.read().get(id).map(|j| j.state)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn summaries<F>(&self, filter: F) -> Vec<JobSummary>
    where
        F: Fn(&Job) -> bool,
    {
        self.read()
            .values()
            .filter(|j| filter(j))
            .map(Job::summary)
            .collect()
    }

    /// Aplica `f` con lock exclusivo sobre un job todavía activo.
    /// `f` tiene que validar antes de mutar: si devuelve error no debe haber
    /// tocado el registro.
    fn update<R, F>(&self, id: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<R, StoreError>,
    {
        let mut jobs = self.write();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if job.is_terminal() {
            return Err(StoreError::Terminal {
                id: id.to_string(),
                state: job.state,
            });
        }

        f(job)
    }

    fn check(job: &Job, next: JobState) -> Result<(), StoreError> {
        if job.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                from: job.state,
                to: next,
            }
            .into())
        }
    }

    /* ---------------- transiciones ---------------- */

    pub fn mark_processing(&self, id: &str) -> Result<(), StoreError> {
        self.update(id, |job| Ok(job.transition(JobState::Processing)?))
    }

    /// Termina un job en `completed`, agregando los artefactos finales.
    pub fn complete(
        &self,
        id: &str,
        title: Option<String>,
        artifacts: Vec<Artifact>,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            Self::check(job, JobState::Completed)?;
            job.artifacts.extend(artifacts);
            if title.is_some() {
                job.title = title;
            }
            job.transition(JobState::Completed)?;
            Ok(())
        })
    }

    pub fn fail(&self, id: &str, reason: impl Into<String>) -> Result<(), StoreError> {
        let reason = reason.into();
        self.update(id, |job| {
            Self::check(job, JobState::Failed)?;
            job.failure_reason = Some(reason);
            job.transition(JobState::Failed)?;
            Ok(())
        })
    }

    /// Falla de un item que corta el batch: registra el error del item, el
    /// progreso y el estado final en una sola operación.
    pub fn fail_with_item(
        &self,
        id: &str,
        error: ItemError,
        progress: u8,
        reason: impl Into<String>,
    ) -> Result<(), StoreError> {
        let reason = reason.into();
        self.update(id, |job| {
            Self::check(job, JobState::Failed)?;
            job.errors.push(error);
            job.progress = progress.min(100);
            job.failure_reason = Some(reason);
            job.transition(JobState::Failed)?;
            Ok(())
        })
    }

    /// Falla forzada desde el supervisor (panic / abort de la tarea).
    /// Si el job seguía pending pasa por processing antes de fallar.
    pub fn abort(&self, id: &str, reason: impl Into<String>) -> Result<(), StoreError> {
        let reason = reason.into();
        self.update(id, |job| {
            if job.state == JobState::Pending {
                job.transition(JobState::Processing)?;
            }
            job.failure_reason = Some(reason);
            job.transition(JobState::Failed)?;
            Ok(())
        })
    }

    /// Cancela un job activo y devuelve la copia resultante.
    pub fn cancel(&self, id: &str, reason: impl Into<String>) -> Result<Job, StoreError> {
        let reason = reason.into();
        self.update(id, |job| {
            Self::check(job, JobState::Cancelled)?;
            job.failure_reason = Some(reason);
            job.transition(JobState::Cancelled)?;
            Ok(job.clone())
        })
    }

    /* ---------------- progreso ---------------- */

    /// Progreso de un fetch: nunca baja.
    pub fn record_progress(&self, id: &str, percent: u8) -> Result<u8, StoreError> {
        self.update(id, |job| {
            job.progress = job.progress.max(percent.min(100));
            Ok(job.progress)
        })
    }

    /// Cantidad de items y título, una vez que se conoce la playlist.
    pub fn set_plan(
        &self,
        id: &str,
        total_items: u32,
        title: Option<String>,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            job.total_items = Some(total_items);
            job.completed_items = Some(job.completed_items.unwrap_or(0));
            if title.is_some() {
                job.title = title;
            }
            Ok(())
        })
    }

    pub fn record_item_success(
        &self,
        id: &str,
        artifacts: Vec<Artifact>,
        progress: u8,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            job.artifacts.extend(artifacts);
            job.completed_items = Some(job.completed_items.unwrap_or(0) + 1);
            job.progress = progress.min(100);
            Ok(())
        })
    }

    pub fn record_item_failure(
        &self,
        id: &str,
        error: ItemError,
        progress: u8,
    ) -> Result<(), StoreError> {
        self.update(id, |job| {
            job.errors.push(error);
            job.progress = progress.min(100);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{new_job_id, JobRequest, SingleFetchRequest};
    use std::path::Path;

    fn pending(store: &JobStore) -> JobId {
        let job = Job::new(
            new_job_id(),
            JobRequest::Single(SingleFetchRequest::new("https://example.com/v")),
        );
        let id = job.id.clone();
        store.insert(job);
        id
    }

    #[test]
    fn reads_are_copies() {
        let store = JobStore::new();
        let id = pending(&store);

        let mut snapshot = store.get(&id).unwrap();
        snapshot.progress = 99;
        assert_eq!(store.get(&id).unwrap().progress, 0);
        assert_eq!(store.get(&id), store.get(&id));
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn progress_never_goes_down() {
        let store = JobStore::new();
        let id = pending(&store);
        store.mark_processing(&id).unwrap();

        assert_eq!(store.record_progress(&id, 40).unwrap(), 40);
        assert_eq!(store.record_progress(&id, 10).unwrap(), 40);
        assert_eq!(store.record_progress(&id, 250).unwrap(), 100);
    }

    #[test]
    fn terminal_jobs_reject_mutations() {
        let store = JobStore::new();
        let id = pending(&store);
        store.mark_processing(&id).unwrap();
        store
            .complete(&id, Some("t".into()), vec![Artifact::new(Path::new("/x/a.mp4"), 1)])
            .unwrap();

        let err = store.fail(&id, "late").unwrap_err();
        assert_eq!(
            err,
            StoreError::Terminal {
                id: id.clone(),
                state: JobState::Completed
            }
        );
        assert!(store.record_progress(&id, 5).is_err());
        assert!(store.cancel(&id, "x").is_err());

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.failure_reason, None);
        assert_eq!(job.artifacts.len(), 1);
    }

    #[test]
    fn invalid_transition_leaves_record_untouched() {
        let store = JobStore::new();
        let id = pending(&store);

        // pending -> completed no existe
        let err = store
            .complete(&id, None, vec![Artifact::new(Path::new("/x/a.mp4"), 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::Transition(_)));

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.artifacts.is_empty());
    }

    #[test]
    fn abort_moves_pending_jobs_to_failed() {
        let store = JobStore::new();
        let id = pending(&store);
        store.abort(&id, "boom").unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.started_at.is_some());
        assert_eq!(job.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_records_reason() {
        let store = JobStore::new();
        let id = pending(&store);
        let job = store.cancel(&id, "Job was cancelled by user").unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(store.state(&id), Some(JobState::Cancelled));
        assert!(matches!(
            store.mark_processing(&id),
            Err(StoreError::Terminal { .. })
        ));
        assert!(matches!(
            store.cancel("missing", "x"),
            Err(StoreError::NotFound(_))
        ));
    }
}

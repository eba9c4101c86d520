use std::any::Any;
use std::sync::Arc;

use common::JobKind;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info_span, Instrument};

use crate::coordinator::Coordinator;
use crate::plan::Plan;
use crate::resolver::ContentResolver;
use crate::runner::{JobRunner, OutputDirs};
use crate::store::JobStore;

/// Lanza cada job en su propia tarea y vigila que termine.
#[derive(Clone)]
pub struct Dispatcher {
    runner: JobRunner,
    coordinator: Coordinator,
}

impl Dispatcher {
    pub fn new(store: JobStore, resolver: Arc<dyn ContentResolver>, dirs: OutputDirs) -> Self {
        let runner = JobRunner::new(store, resolver, dirs);
        Self {
            coordinator: Coordinator::new(runner.clone()),
            runner,
        }
    }

    pub fn store(&self) -> &JobStore {
        self.runner.store()
    }

    pub fn resolver(&self) -> &Arc<dyn ContentResolver> {
        self.runner.resolver()
    }

    pub fn dirs(&self) -> &OutputDirs {
        self.runner.dirs()
    }

    /// Bloqueante: corre el plan completo en el hilo actual.
    pub fn execute(&self, job_id: &str, plan: &Plan) {
        match plan {
            Plan::Single { item, packaging } => self.runner.run(job_id, item, packaging.as_ref()),
            Plan::Items {
                items,
                continue_on_error,
            } => self.coordinator.run(job_id, items, *continue_on_error),
            Plan::Playlist(p) => self.coordinator.run_playlist(job_id, p),
        }
    }

    /// Tarea desacoplada. El trabajo bloqueante va al pool de `spawn_blocking`;
    /// si entra en pánico el job queda `failed`.
    pub fn spawn(&self, job_id: String, kind: JobKind, plan: Plan) -> JoinHandle<()> {
        let this = self.clone();
        let span = info_span!("job", job_id = %job_id, kind = %kind);

        tokio::spawn(
            async move {
                let worker = this.clone();
                let id = job_id.clone();
                let current = tracing::Span::current();
                let res = tokio::task::spawn_blocking(move || {
                    let _entered = current.enter();
                    worker.execute(&id, &plan);
                })
                .await;

                if let Err(e) = res {
                    this.supervise(&job_id, e);
                }
            }
            .instrument(span),
        )
    }

    fn supervise(&self, job_id: &str, err: JoinError) {
        let reason = if err.is_panic() {
            format!("job task panicked: {}", panic_message(err.into_panic()))
        } else {
            "job task was aborted".to_string()
        };
        error!("job {}: {}", job_id, reason);

        if let Err(e) = self.store().abort(job_id, reason) {
            self.runner.settle(job_id, Err(e));
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

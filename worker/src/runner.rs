use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use common::{Artifact, MediaInfo};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::packaging::{self, PackagingError};
use crate::plan::{Destination, Packaging, WorkItem};
use crate::resolver::{ContentResolver, FetchSpec, ProgressEvent, ProgressSink, ResolverError};
use crate::store::{JobStore, StoreError};

/// Progreso del carrusel después de leer la metadata.
const CAROUSEL_PROBED: u8 = 10;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("no output produced")]
    NoOutput,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Packaging(#[from] PackagingError),
}

/// Directorios donde quedan los artefactos.
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub downloads: PathBuf,
    pub platform: PathBuf,
}

impl OutputDirs {
    pub fn new(downloads: impl Into<PathBuf>, platform: impl Into<PathBuf>) -> Self {
        Self {
            downloads: downloads.into(),
            platform: platform.into(),
        }
    }

    pub fn for_destination(&self, dest: Destination) -> &Path {
        match dest {
            Destination::Downloads => &self.downloads,
            Destination::Platform => &self.platform,
        }
    }

    /// Orden de búsqueda al servir un archivo.
    pub fn all(&self) -> [&Path; 2] {
        [&self.downloads, &self.platform]
    }
}

/// Resultado crudo de un fetch, antes de empaquetar.
#[derive(Debug)]
pub struct Fetched {
    pub title: Option<String>,
    pub prefix: String,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl Fetched {
    pub fn artifacts(&self) -> io::Result<Vec<Artifact>> {
        self.files
            .iter()
            .map(|f| Ok(Artifact::new(f, fs::metadata(f)?.len())))
            .collect()
    }
}

fn file_prefix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Traduce eventos del resolver a progreso del job, sin retrocesos.
struct ProgressReporter<'a> {
    store: &'a JobStore,
    job_id: &'a str,
    last: AtomicU8,
}

impl ProgressSink for ProgressReporter<'_> {
    fn report(&self, event: ProgressEvent) {
        let Some(pct) = event.percent() else {
            return;
        };
        if self.last.fetch_max(pct, Ordering::Relaxed) >= pct {
            return;
        }
        match self.store.record_progress(self.job_id, pct) {
            Ok(p) => debug!("job {} progreso {}%", self.job_id, p),
            Err(e) => debug!("progreso descartado para {}: {}", self.job_id, e),
        }
    }
}

/// Ejecuta jobs de un solo item: fetch + empaquetado opcional.
#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    resolver: Arc<dyn ContentResolver>,
    dirs: Arc<OutputDirs>,
}

impl JobRunner {
    pub fn new(store: JobStore, resolver: Arc<dyn ContentResolver>, dirs: OutputDirs) -> Self {
        Self {
            store,
            resolver,
            dirs: Arc::new(dirs),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<dyn ContentResolver> {
        &self.resolver
    }

    pub fn dirs(&self) -> &OutputDirs {
        &self.dirs
    }

    /// Bloqueante. Lleva el job de pending a un estado terminal.
    pub fn run(&self, job_id: &str, item: &WorkItem, packaging: Option<&Packaging>) {
        // 1) pending -> processing; si ya fue cancelado no se hace nada
        if let Err(e) = self.store.mark_processing(job_id) {
            info!("job {} no se ejecuta: {}", job_id, e);
            return;
        }
        info!("job {} procesando {}", job_id, item.source);

        // 2) carrusel: metadata primero (si falla se sigue igual)
        let mut metadata: Option<MediaInfo> = None;
        if let Some(Packaging::Carousel { .. }) = packaging {
            match self.resolver.probe(&item.source) {
                Ok(info) => metadata = Some(info),
                Err(e) => warn!("job {} sin metadata de carrusel: {}", job_id, e),
            }
            // cancelado mientras se leía la metadata: no se descarga nada
            if let Err(e) = self.store.record_progress(job_id, CAROUSEL_PROBED) {
                self.settle(job_id, Err(e));
                return;
            }
        }

        // 3) fetch + empaquetado
        let reporter = ProgressReporter {
            store: &self.store,
            job_id,
            last: AtomicU8::new(0),
        };
        let result = self
            .fetch_item(item, &reporter)
            .and_then(|fetched| self.package(fetched, packaging, metadata.as_ref()));

        // 4) estado final
        let outcome = match result {
            Ok((title, artifacts)) => {
                info!("job {} completado ({} archivos)", job_id, artifacts.len());
                self.store.complete(job_id, title, artifacts)
            }
            Err(e) => {
                warn!("job {} falló: {}", job_id, e);
                self.store.fail(job_id, e.to_string())
            }
        };
        self.settle(job_id, outcome);
    }

    /// Un fetch completo de `item`. Sin archivos de salida es error.
    pub fn fetch_item(
        &self,
        item: &WorkItem,
        progress: &dyn ProgressSink,
    ) -> Result<Fetched, FetchError> {
        let dir = self.dirs.for_destination(item.destination).to_path_buf();
        fs::create_dir_all(&dir)?;

        let spec = FetchSpec {
            source: item.source.clone(),
            format: item.format.clone(),
            output_dir: dir.clone(),
            file_prefix: file_prefix(),
            name_template: item.name_template.clone(),
            allow_playlist: item.allow_playlist,
        };

        let outcome = self.resolver.fetch(&spec, progress)?;
        if outcome.files.is_empty() {
            return Err(FetchError::NoOutput);
        }

        Ok(Fetched {
            title: outcome.title.or_else(|| item.title.clone()),
            prefix: spec.file_prefix,
            dir,
            files: outcome.files,
        })
    }

    fn package(
        &self,
        fetched: Fetched,
        packaging: Option<&Packaging>,
        metadata: Option<&MediaInfo>,
    ) -> Result<(Option<String>, Vec<Artifact>), FetchError> {
        let artifacts = match packaging {
            Some(Packaging::Carousel {
                include_metadata,
                shortcode,
            }) => {
                let meta = if *include_metadata { metadata } else { None };
                vec![packaging::bundle_carousel(
                    &fetched.files,
                    &fetched.dir,
                    &fetched.prefix,
                    shortcode.as_deref(),
                    meta,
                )?]
            }
            Some(Packaging::Stories) if fetched.files.len() > 1 => {
                vec![packaging::bundle_stories(
                    &fetched.files,
                    &fetched.dir,
                    &fetched.prefix,
                )?]
            }
            _ => fetched.artifacts()?,
        };

        let title = fetched
            .title
            .or_else(|| metadata.and_then(|m| m.title.clone()));
        Ok((title, artifacts))
    }

    /// Loguea un resultado que el store rechazó (job cancelado mientras corría).
    pub(crate) fn settle(&self, job_id: &str, outcome: Result<(), StoreError>) {
        match outcome {
            Ok(()) => {}
            Err(StoreError::Terminal { state, .. }) => {
                info!("job {} ya estaba {}; se descarta el resultado", job_id, state)
            }
            Err(e) => warn!("job {}: no se pudo registrar el resultado: {}", job_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Plan;
    use crate::testing::{Outcome, Script, ScriptedResolver};
    use common::{
        new_job_id, Job, JobRequest, JobState, MediaType, PlatformCarouselRequest,
        SingleFetchRequest,
    };
    use std::fs::File;

    fn setup(resolver: ScriptedResolver) -> (tempfile::TempDir, JobRunner, Arc<ScriptedResolver>) {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = Arc::new(resolver);
        let runner = JobRunner::new(
            JobStore::new(),
            resolver.clone(),
            OutputDirs::new(tmp.path().join("downloads"), tmp.path().join("platform")),
        );
        (tmp, runner, resolver)
    }

    fn submit(runner: &JobRunner, request: JobRequest) -> (String, WorkItem, Option<Packaging>) {
        let job = Job::new(new_job_id(), request.clone());
        let id = job.id.clone();
        runner.store().insert(job);
        match Plan::from_request(&request) {
            Plan::Single { item, packaging } => (id, item, packaging),
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn single_fetch_completes_with_artifacts_and_progress() {
        let resolver = ScriptedResolver::new().script(
            "https://youtu.be/ok",
            Script::files(&["clip.mp4"])
                .with_title("Clip")
                .with_progress(vec![
                    ProgressEvent::Downloading {
                        downloaded: 50,
                        total: Some(100),
                    },
                    ProgressEvent::Downloading {
                        downloaded: 20,
                        total: Some(100),
                    },
                ]),
        );
        let (_tmp, runner, _) = setup(resolver);
        let (id, item, packaging) = submit(
            &runner,
            JobRequest::Single(SingleFetchRequest::new("https://youtu.be/ok")),
        );

        runner.run(&id, &item, packaging.as_ref());

        let job = runner.store().get(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.title.as_deref(), Some("Clip"));
        assert_eq!(job.artifacts.len(), 1);
        assert!(job.artifacts[0].filename.ends_with("_clip.mp4"));
        assert_eq!(job.artifacts[0].media_type, MediaType::Video);
        // el segundo evento (20%) no hace retroceder el progreso
        assert_eq!(job.progress, 50);
    }

    #[test]
    fn zero_files_is_a_failure() {
        let resolver =
            ScriptedResolver::new().script("https://youtu.be/empty", Script::files(&[]));
        let (_tmp, runner, _) = setup(resolver);
        let (id, item, packaging) = submit(
            &runner,
            JobRequest::Single(SingleFetchRequest::new("https://youtu.be/empty")),
        );

        runner.run(&id, &item, packaging.as_ref());

        let job = runner.store().get(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure_reason.as_deref(), Some("no output produced"));
        assert!(job.artifacts.is_empty());
    }

    #[test]
    fn resolver_failure_is_recorded() {
        let resolver = ScriptedResolver::new().script(
            "https://youtu.be/bad",
            Script::new(Outcome::Fail("Video unavailable".into())),
        );
        let (_tmp, runner, _) = setup(resolver);
        let (id, item, packaging) = submit(
            &runner,
            JobRequest::Single(SingleFetchRequest::new("https://youtu.be/bad")),
        );

        runner.run(&id, &item, packaging.as_ref());

        let job = runner.store().get(&id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure_reason.as_deref(), Some("Video unavailable"));
    }

    #[test]
    fn cancelled_before_start_does_nothing() {
        let resolver = ScriptedResolver::new().script("https://youtu.be/ok", Script::files(&["a.mp4"]));
        let (_tmp, runner, resolver) = setup(resolver);
        let (id, item, packaging) = submit(
            &runner,
            JobRequest::Single(SingleFetchRequest::new("https://youtu.be/ok")),
        );

        runner.store().cancel(&id, "Job was cancelled by user").unwrap();
        runner.run(&id, &item, packaging.as_ref());

        assert_eq!(runner.store().state(&id), Some(JobState::Cancelled));
        assert!(resolver.fetched().is_empty());
    }

    #[test]
    fn result_after_cancel_does_not_overwrite() {
        let store_slot: Arc<std::sync::Mutex<Option<(JobStore, String)>>> =
            Arc::new(std::sync::Mutex::new(None));
        let slot = store_slot.clone();
        let resolver = ScriptedResolver::new().script(
            "https://youtu.be/slow",
            Script::files(&["a.mp4"]).on_fetch(move || {
                if let Some((store, id)) = slot.lock().unwrap().as_ref() {
                    store.cancel(id, "Job was cancelled by user").unwrap();
                }
            }),
        );
        let (_tmp, runner, _) = setup(resolver);
        let (id, item, packaging) = submit(
            &runner,
            JobRequest::Single(SingleFetchRequest::new("https://youtu.be/slow")),
        );
        *store_slot.lock().unwrap() = Some((runner.store().clone(), id.clone()));

        runner.run(&id, &item, packaging.as_ref());

        let job = runner.store().get(&id).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.artifacts.is_empty());
        assert_eq!(
            job.failure_reason.as_deref(),
            Some("Job was cancelled by user")
        );
    }

    #[test]
    fn carousel_is_zipped_with_metadata() {
        let source = "https://www.instagram.com/p/CxAbc/";
        let resolver = ScriptedResolver::new()
            .script(source, Script::files(&["00001.jpg", "00002.mp4"]))
            .probe(
                source,
                MediaInfo {
                    title: Some("A post".into()),
                    ..MediaInfo::default()
                },
            );
        let (tmp, runner, _) = setup(resolver);
        let (id, item, packaging) = submit(
            &runner,
            JobRequest::PlatformCarousel(PlatformCarouselRequest {
                url: "CxAbc".into(),
                quality: "best".into(),
                include_metadata: true,
            }),
        );

        runner.run(&id, &item, packaging.as_ref());

        let job = runner.store().get(&id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.title.as_deref(), Some("A post"));
        assert_eq!(job.artifacts.len(), 1);
        let artifact = &job.artifacts[0];
        assert!(artifact.filename.ends_with("_CxAbc_carousel.zip"));
        assert_eq!(artifact.items_count, Some(2));

        let zip_path = tmp.path().join("platform").join(&artifact.filename);
        let archive = zip::ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
    }

    fn carousel_request() -> JobRequest {
        JobRequest::PlatformCarousel(PlatformCarouselRequest {
            url: "CxAbc".into(),
            quality: "best".into(),
            include_metadata: false,
        })
    }

    #[test]
    fn same_carousel_twice_keeps_both_archives() {
        let source = "https://www.instagram.com/p/CxAbc/";
        let resolver = ScriptedResolver::new()
            .script(source, Script::files(&["00001.jpg", "00002.jpg"]))
            .probe(source, MediaInfo::default());
        let (tmp, runner, _) = setup(resolver);

        let (first, item, packaging) = submit(&runner, carousel_request());
        let (second, _, _) = submit(&runner, carousel_request());
        runner.run(&first, &item, packaging.as_ref());
        runner.run(&second, &item, packaging.as_ref());

        let a = runner.store().get(&first).unwrap().artifacts[0].clone();
        let b = runner.store().get(&second).unwrap().artifacts[0].clone();
        assert_ne!(a.filename, b.filename);
        for artifact in [a, b] {
            let path = tmp.path().join("platform").join(&artifact.filename);
            let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
            assert_eq!(archive.len(), 2);
        }
    }

    #[test]
    fn cancel_during_carousel_metadata_skips_fetch() {
        let source = "https://www.instagram.com/p/CxAbc/";
        let store = JobStore::new();
        let job = Job::new(new_job_id(), carousel_request());
        let id = job.id.clone();
        store.insert(job);

        let (hook_store, hook_id) = (store.clone(), id.clone());
        let resolver = Arc::new(
            ScriptedResolver::new()
                .script(source, Script::files(&["00001.jpg"]))
                .probe(source, MediaInfo::default())
                .on_probe(source, move || {
                    hook_store.cancel(&hook_id, "stop").unwrap();
                }),
        );
        let tmp = tempfile::tempdir().unwrap();
        let runner = JobRunner::new(
            store,
            resolver.clone(),
            OutputDirs::new(tmp.path().join("downloads"), tmp.path().join("platform")),
        );
        let (item, packaging) = match Plan::from_request(&carousel_request()) {
            Plan::Single { item, packaging } => (item, packaging),
            other => panic!("unexpected plan {:?}", other),
        };

        runner.run(&id, &item, packaging.as_ref());

        let job = runner.store().get(&id).unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(job.progress, 0);
        assert!(job.artifacts.is_empty());
        assert!(resolver.fetched().is_empty());
    }
}

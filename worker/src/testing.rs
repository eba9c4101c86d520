//! Resolver en memoria para tests (también lo usa el crate `server`).

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};

use common::MediaInfo;

use crate::resolver::{
    ContentResolver, FetchOutcome, FetchSpec, ProgressEvent, ProgressSink, ResolverError,
};

#[derive(Clone, Debug)]
pub enum Outcome {
    /// Crea estos archivos como `<prefix>_<name>` en el directorio de salida
    Files(Vec<String>),
    Fail(String),
    Panic(String),
}

#[derive(Clone)]
pub struct Script {
    outcome: Outcome,
    title: Option<String>,
    progress: Vec<ProgressEvent>,
    on_fetch: Option<Hook>,
}

impl Script {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            title: None,
            progress: Vec::new(),
            on_fetch: None,
        }
    }

    pub fn files(names: &[&str]) -> Self {
        Self::new(Outcome::Files(names.iter().map(|s| s.to_string()).collect()))
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_progress(mut self, events: Vec<ProgressEvent>) -> Self {
        self.progress = events;
        self
    }

    /// Se llama al empezar el fetch, antes de producir archivos.
    pub fn on_fetch(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_fetch = Some(Arc::new(hook));
        self
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct ScriptedResolver {
    scripts: HashMap<String, Script>,
    probes: HashMap<String, Result<MediaInfo, String>>,
    probe_hooks: HashMap<String, Hook>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, source: &str, script: Script) -> Self {
        self.scripts.insert(source.to_string(), script);
        self
    }

    pub fn probe(mut self, source: &str, info: MediaInfo) -> Self {
        self.probes.insert(source.to_string(), Ok(info));
        self
    }

    pub fn probe_error(mut self, source: &str, message: &str) -> Self {
        self.probes
            .insert(source.to_string(), Err(message.to_string()));
        self
    }

    /// Se llama al probar `source`, antes de devolver la metadata.
    pub fn on_probe(mut self, source: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.probe_hooks.insert(source.to_string(), Arc::new(hook));
        self
    }

    /// Fuentes pedidas a `fetch`, en orden.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }
}

impl ContentResolver for ScriptedResolver {
    fn probe(&self, source: &str) -> Result<MediaInfo, ResolverError> {
        if let Some(hook) = self.probe_hooks.get(source) {
            hook();
        }
        match self.probes.get(source) {
            Some(Ok(info)) => Ok(info.clone()),
            Some(Err(msg)) => Err(ResolverError::Failed(msg.clone())),
            None => Err(ResolverError::Failed(format!("no probe scripted for {}", source))),
        }
    }

    fn fetch(
        &self,
        spec: &FetchSpec,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome, ResolverError> {
        if let Ok(mut f) = self.fetched.lock() {
            f.push(spec.source.clone());
        }

        let script = self
            .scripts
            .get(&spec.source)
            .ok_or_else(|| ResolverError::Failed(format!("no script for {}", spec.source)))?;

        if let Some(hook) = &script.on_fetch {
            hook();
        }
        for ev in &script.progress {
            progress.report(*ev);
        }

        match &script.outcome {
            Outcome::Files(names) => {
                fs::create_dir_all(&spec.output_dir)?;
                let mut files = Vec::new();
                for name in names {
                    let path = spec
                        .output_dir
                        .join(format!("{}_{}", spec.file_prefix, name));
                    fs::write(&path, name.as_bytes())?;
                    files.push(path);
                }
                Ok(FetchOutcome {
                    title: script.title.clone(),
                    files,
                })
            }
            Outcome::Fail(msg) => Err(ResolverError::Failed(msg.clone())),
            Outcome::Panic(msg) => panic!("{}", msg),
        }
    }
}

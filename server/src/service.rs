//! Operaciones de la API sobre jobs, independientes de HTTP.

use std::sync::Arc;

use chrono::Utc;
use common::{
    new_job_id, normalize_for, CancelResponse, FormatsResponse, Job, JobKind, JobPage, JobRequest,
    JobState, MediaInfo, PlatformContent, SubmitResponse,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;
use worker::{Dispatcher, OutputDirs, Plan, StoreError};

use crate::rate_limit::RateLimiter;

pub const CANCEL_REASON: &str = "Job was cancelled by user";

const DEFAULT_PAGE: usize = 10;
const MAX_PAGE: usize = 100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("{0}")]
    Invalid(String),
    #[error("Job not found")]
    NotFound,
    #[error("Cannot cancel job with status '{0}'. Only pending or processing jobs can be cancelled.")]
    InvalidState(JobState),
    #[error("resolver error: {0}")]
    Upstream(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_batch: usize,
    pub max_platform_batch: usize,
}

/// Job recién aceptado. `task` es la tarea que lo ejecuta.
pub struct Submitted {
    pub response: SubmitResponse,
    pub task: JoinHandle<()>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: usize,
    pub limit: Option<usize>,
    pub status: Option<JobState>,
    #[serde(rename = "type")]
    pub kind: Option<JobKind>,
}

#[derive(Clone)]
pub struct JobService {
    dispatcher: Dispatcher,
    limiter: Arc<RateLimiter>,
    limits: Limits,
}

impl JobService {
    pub fn new(dispatcher: Dispatcher, limiter: Arc<RateLimiter>, limits: Limits) -> Self {
        Self {
            dispatcher,
            limiter,
            limits,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn dirs(&self) -> &OutputDirs {
        self.dispatcher.dirs()
    }

    fn admit(&self, client: &str) -> Result<(), ServiceError> {
        if self.limiter.allow(client) {
            Ok(())
        } else {
            info!("rate limit para {}", client);
            Err(ServiceError::RateLimited)
        }
    }

    /// Valida, aplica rate limit, crea el job `pending` y lo lanza.
    /// Tiene que llamarse dentro del runtime de tokio.
    pub fn submit(&self, client: &str, request: JobRequest) -> Result<Submitted, ServiceError> {
        validate(&request, self.limits)?;
        self.admit(client)?;

        let job = Job::new(new_job_id(), request);
        let job_id = job.id.clone();
        let kind = job.kind;
        let plan = Plan::from_request(&job.request);
        let total_items = job.request.item_count();
        let message = submit_message(&job.request);

        self.dispatcher.store().insert(job);
        info!("job {} ({}) creado por {}", job_id, kind, client);

        let task = self.dispatcher.spawn(job_id.clone(), kind, plan);

        Ok(Submitted {
            response: SubmitResponse {
                status_url: format!("/api/v1/jobs/{}", job_id),
                job_id,
                state: JobState::Pending,
                total_items,
                message,
            },
            task,
        })
    }

    pub fn status(&self, id: &str) -> Result<Job, ServiceError> {
        self.dispatcher
            .store()
            .get(id)
            .ok_or(ServiceError::NotFound)
    }

    /// No interrumpe un fetch en curso: el runner lo nota al terminar.
    pub fn cancel(&self, id: &str) -> Result<CancelResponse, ServiceError> {
        let job = self
            .dispatcher
            .store()
            .cancel(id, CANCEL_REASON)
            .map_err(|e| match e {
                StoreError::NotFound(_) => ServiceError::NotFound,
                StoreError::Terminal { state, .. } => ServiceError::InvalidState(state),
                StoreError::Transition(t) => ServiceError::InvalidState(t.from),
            })?;
        info!("job {} cancelado", id);

        Ok(CancelResponse {
            job_id: job.id,
            state: job.state,
            message: "Job cancelled successfully".to_string(),
            cancelled_at: job.finished_at.unwrap_or_else(Utc::now),
        })
    }

    pub fn list(&self, query: &ListQuery) -> Result<JobPage, ServiceError> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE);
        if !(1..=MAX_PAGE).contains(&limit) {
            return Err(ServiceError::Invalid(format!(
                "limit must be between 1 and {}",
                MAX_PAGE
            )));
        }

        let mut all = self.dispatcher.store().summaries(|j| {
            query.status.map_or(true, |s| j.state == s) && query.kind.map_or(true, |k| j.kind == k)
        });
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        let total = all.len();
        let jobs: Vec<_> = all.into_iter().skip(query.skip).take(limit).collect();

        Ok(JobPage {
            total,
            skip: query.skip,
            limit,
            has_more: query.skip + jobs.len() < total,
            jobs,
        })
    }

    /// Metadata de un video o playlist, consultada en el momento.
    pub async fn probe(
        &self,
        client: &str,
        url: &str,
        require_playlist: bool,
    ) -> Result<MediaInfo, ServiceError> {
        let info = self.resolve(client, url, "URL").await?;
        if require_playlist && !info.is_playlist {
            return Err(ServiceError::Invalid("URL is not a valid playlist".into()));
        }
        Ok(info)
    }

    /// Formatos de un video, agrupados por pistas.
    pub async fn formats(&self, client: &str, url: &str) -> Result<FormatsResponse, ServiceError> {
        let info = self.resolve(client, url, "URL").await?;
        if info.is_playlist {
            return Err(ServiceError::Invalid(
                "Formats are only available for single videos".into(),
            ));
        }
        Ok(FormatsResponse::from_info(&info))
    }

    /// Metadata de un post, un reel o las stories de un usuario.
    /// Acepta shortcodes y usuarios igual que los jobs de plataforma.
    pub async fn platform_info(
        &self,
        client: &str,
        content: PlatformContent,
        target: &str,
    ) -> Result<MediaInfo, ServiceError> {
        let what = match content {
            PlatformContent::Story => "Username",
            PlatformContent::Post | PlatformContent::Reel => "URL",
        };
        require(target, what)?;
        let url = normalize_for(content, target);
        self.resolve(client, &url, what).await
    }

    // rate limit + probe en el pool bloqueante
    async fn resolve(&self, client: &str, url: &str, what: &str) -> Result<MediaInfo, ServiceError> {
        let url = url.trim().to_string();
        require(&url, what)?;
        self.admit(client)?;

        let resolver = self.dispatcher.resolver().clone();
        tokio::task::spawn_blocking(move || resolver.probe(&url))
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?
            .map_err(|e| ServiceError::Upstream(e.to_string()))
    }
}

fn require(value: &str, what: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        Err(ServiceError::Invalid(format!("{} must be provided", what)))
    } else {
        Ok(())
    }
}

/// Chequeos de forma, antes de crear nada.
pub fn validate(request: &JobRequest, limits: Limits) -> Result<(), ServiceError> {
    match request {
        JobRequest::Single(r) | JobRequest::Playlist(r) => require(&r.url, "URL"),

        JobRequest::Batch(r) => {
            if r.urls.is_empty() {
                return Err(ServiceError::Invalid(
                    "At least one URL must be provided".into(),
                ));
            }
            if r.urls.len() > limits.max_batch {
                return Err(ServiceError::Invalid(format!(
                    "Maximum {} URLs per batch download",
                    limits.max_batch
                )));
            }
            r.urls.iter().try_for_each(|u| require(u, "URL"))
        }

        JobRequest::PlaylistSelect(r) => {
            require(&r.url, "URL")?;
            if r.video_indices.is_empty() {
                return Err(ServiceError::Invalid(
                    "At least one video index must be provided".into(),
                ));
            }
            Ok(())
        }

        JobRequest::PlatformPost(r) => require(&r.url, "URL or shortcode"),
        JobRequest::PlatformReel(r) => require(&r.url, "URL or shortcode"),
        JobRequest::PlatformCarousel(r) => require(&r.url, "URL or shortcode"),
        JobRequest::PlatformStory(r) => require(r.username.trim_start_matches('@'), "Username"),

        JobRequest::PlatformBatch(r) => {
            if r.items.is_empty() {
                return Err(ServiceError::Invalid(
                    "At least one item must be provided".into(),
                ));
            }
            if r.items.len() > limits.max_platform_batch {
                return Err(ServiceError::Invalid(format!(
                    "Maximum {} items per batch download",
                    limits.max_platform_batch
                )));
            }
            r.items.iter().try_for_each(|i| require(&i.url, "URL"))
        }
    }
}

fn submit_message(request: &JobRequest) -> String {
    match request {
        JobRequest::Batch(r) => format!("Batch download started with {} URLs", r.urls.len()),
        JobRequest::PlatformBatch(r) => {
            format!("Batch download started with {} items", r.items.len())
        }
        JobRequest::Playlist(_) => "Playlist download started".to_string(),
        JobRequest::PlaylistSelect(r) => format!(
            "Playlist download started for {} selected videos",
            r.video_indices.len()
        ),
        JobRequest::PlatformStory(_) => "Stories download started".to_string(),
        JobRequest::PlatformCarousel(_) => "Carousel download started".to_string(),
        _ => "Download started".to_string(),
    }
}

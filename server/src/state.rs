use std::sync::Arc;

use worker::{ContentResolver, Dispatcher, JobStore, OutputDirs};

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::service::{JobService, Limits};

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
}

impl AppState {
    pub fn new(config: &Config, resolver: Arc<dyn ContentResolver>) -> Self {
        let dispatcher = Dispatcher::new(
            JobStore::new(),
            resolver,
            OutputDirs::new(&config.download_dir, &config.platform_dir),
        );
        let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_window));

        Self {
            jobs: JobService::new(
                dispatcher,
                limiter,
                Limits {
                    max_batch: config.max_batch,
                    max_platform_batch: config.max_platform_batch,
                },
            ),
        }
    }
}

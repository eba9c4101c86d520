//! Ejecución de jobs: store, resolver externo, runner, coordinador de
//! batches/playlists y el dispatcher que los lanza.

pub mod coordinator;
pub mod dispatch;
pub mod packaging;
pub mod plan;
pub mod resolver;
pub mod runner;
pub mod store;
pub mod ytdlp;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use coordinator::Coordinator;
pub use dispatch::Dispatcher;
pub use plan::{Destination, Packaging, Plan, PlaylistPlan, WorkItem};
pub use resolver::{
    ContentResolver, FetchOutcome, FetchSpec, NoProgress, ProgressEvent, ProgressSink,
    ResolverError,
};
pub use runner::{FetchError, JobRunner, OutputDirs};
pub use store::{JobStore, StoreError};
pub use ytdlp::YtDlpResolver;

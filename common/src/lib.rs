pub mod format;
pub mod job;
pub mod platform;
pub mod request;

pub use format::{format_spec, platform_audio_spec, platform_format_spec, AudioCodec, FormatSpec};
pub use job::{
    file_url, new_job_id, Artifact, ItemError, Job, JobId, JobKind, JobPage, JobState, JobSummary,
    MediaType, TransitionError, FILES_ROUTE,
};
pub use platform::{
    clean_username, extract_shortcode, normalize_for, normalize_post_url, normalize_reel_url,
    stories_url,
};
pub use request::{
    AudioFormat, BatchFetchRequest, CancelResponse, FormatGroups, FormatsResponse, JobRequest,
    MediaFormat, MediaInfo, MediaKind, PlatformBatchItem, PlatformBatchRequest,
    PlatformCarouselRequest, PlatformContent, PlatformPostRequest, PlatformReelRequest,
    PlatformStoryRequest, PlaylistEntry, PlaylistSelectRequest, ReelDownloadType,
    SingleFetchRequest, StoryPackaging, SubmitResponse,
};

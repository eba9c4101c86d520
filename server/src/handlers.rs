use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, ConnectInfo, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use common::{
    BatchFetchRequest, CancelResponse, FormatsResponse, Job, JobPage, JobRequest, MediaInfo,
    PlatformBatchRequest, PlatformContent, PlatformCarouselRequest, PlatformPostRequest, PlatformReelRequest,
    PlatformStoryRequest, PlaylistSelectRequest, SingleFetchRequest, SubmitResponse,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::artifacts;
use crate::error::ApiError;
use crate::service::ListQuery;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/single", post(submit_single))
        .route("/api/v1/jobs/batch", post(submit_batch))
        .route("/api/v1/jobs/playlist", post(submit_playlist))
        .route("/api/v1/jobs/playlist/select", post(submit_playlist_select))
        .route("/api/v1/jobs/platform/post", post(submit_platform_post))
        .route("/api/v1/jobs/platform/reel", post(submit_platform_reel))
        .route("/api/v1/jobs/platform/story", post(submit_platform_story))
        .route("/api/v1/jobs/platform/carousel", post(submit_platform_carousel))
        .route("/api/v1/jobs/platform/batch", post(submit_platform_batch))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job))
        .route("/api/v1/files/:filename", get(artifacts::serve_file))
        .route("/api/v1/info", get(media_info))
        .route("/api/v1/playlist/info", get(playlist_info))
        .route("/api/v1/formats", get(media_formats))
        .route("/api/v1/platform/post/info", get(platform_post_info))
        .route("/api/v1/platform/reel/info", get(platform_reel_info))
        .route("/api/v1/platform/story/info", get(platform_story_info))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- helpers ---------------- */

type Peer = Option<ConnectInfo<SocketAddr>>;

/// Clave del rate limiter: IP del cliente o "unknown".
fn client_key(peer: &Peer) -> String {
    peer.as_ref()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn accept(state: &AppState, peer: &Peer, request: JobRequest) -> Result<Json<SubmitResponse>, ApiError> {
    let submitted = state.jobs.submit(&client_key(peer), request)?;
    // la tarea queda corriendo sola
    Ok(Json(submitted.response))
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn submit_single(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<SingleFetchRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::Single(req))
}

async fn submit_batch(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<BatchFetchRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::Batch(req))
}

async fn submit_playlist(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<SingleFetchRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::Playlist(req))
}

async fn submit_playlist_select(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<PlaylistSelectRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::PlaylistSelect(req))
}

async fn submit_platform_post(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<PlatformPostRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::PlatformPost(req))
}

async fn submit_platform_reel(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<PlatformReelRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::PlatformReel(req))
}

async fn submit_platform_story(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<PlatformStoryRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::PlatformStory(req))
}

async fn submit_platform_carousel(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<PlatformCarouselRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::PlatformCarousel(req))
}

async fn submit_platform_batch(
    State(state): State<AppState>,
    peer: Peer,
    payload: Result<Json<PlatformBatchRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = payload?;
    accept(&state, &peer, JobRequest::PlatformBatch(req))
}

async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<JobPage>, ApiError> {
    let Query(q) = query?;
    Ok(Json(state.jobs.list(&q)?))
}

// Snapshot del job
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.jobs.status(&id)?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    Ok(Json(state.jobs.cancel(&id)?))
}

#[derive(Debug, Deserialize)]
struct UrlQuery {
    url: String,
}

async fn media_info(
    State(state): State<AppState>,
    peer: Peer,
    query: Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Json<MediaInfo>, ApiError> {
    let Query(q) = query?;
    Ok(Json(state.jobs.probe(&client_key(&peer), &q.url, false).await?))
}

async fn playlist_info(
    State(state): State<AppState>,
    peer: Peer,
    query: Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Json<MediaInfo>, ApiError> {
    let Query(q) = query?;
    Ok(Json(state.jobs.probe(&client_key(&peer), &q.url, true).await?))
}

async fn media_formats(
    State(state): State<AppState>,
    peer: Peer,
    query: Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Json<FormatsResponse>, ApiError> {
    let Query(q) = query?;
    Ok(Json(state.jobs.formats(&client_key(&peer), &q.url).await?))
}

/* ---------------- info de plataforma ---------------- */

async fn platform_post_info(
    State(state): State<AppState>,
    peer: Peer,
    query: Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Json<MediaInfo>, ApiError> {
    let Query(q) = query?;
    let info = state
        .jobs
        .platform_info(&client_key(&peer), PlatformContent::Post, &q.url)
        .await?;
    Ok(Json(info))
}

async fn platform_reel_info(
    State(state): State<AppState>,
    peer: Peer,
    query: Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Json<MediaInfo>, ApiError> {
    let Query(q) = query?;
    let info = state
        .jobs
        .platform_info(&client_key(&peer), PlatformContent::Reel, &q.url)
        .await?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
struct UsernameQuery {
    username: String,
}

async fn platform_story_info(
    State(state): State<AppState>,
    peer: Peer,
    query: Result<Query<UsernameQuery>, QueryRejection>,
) -> Result<Json<MediaInfo>, ApiError> {
    let Query(q) = query?;
    let info = state
        .jobs
        .platform_info(&client_key(&peer), PlatformContent::Story, &q.username)
        .await?;
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use common::{JobState, MediaFormat};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use worker::testing::{Script, ScriptedResolver};

    fn app_with(resolver: ScriptedResolver, rate_limit: usize) -> (tempfile::TempDir, Router) {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            download_dir: tmp.path().join("downloads"),
            platform_dir: tmp.path().join("platform"),
            rate_limit,
            ..Config::default()
        };
        let state = AppState::new(&config, Arc::new(resolver));
        (tmp, build_router(state))
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_terminal(app: &Router, id: &str) -> Value {
        for _ in 0..500 {
            let (_, job) = send(app, get(&format!("/api/v1/jobs/{}", id))).await;
            let state: JobState = serde_json::from_value(job["state"].clone()).unwrap();
            if state.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", id);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_tmp, app) = app_with(ScriptedResolver::new(), 30);
        let res = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn single_job_lifecycle_and_file_download() {
        let (_tmp, app) = app_with(
            ScriptedResolver::new().script("https://youtu.be/ok", Script::files(&["clip.mp4"])),
            30,
        );

        let (status, body) = send(
            &app,
            post("/api/v1/jobs/single", json!({"url": "https://youtu.be/ok"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "pending");
        let id = body["job_id"].as_str().unwrap().to_string();

        let job = wait_for_terminal(&app, &id).await;
        assert_eq!(job["state"], "completed");
        assert_eq!(job["kind"], "single");

        let url = job["artifacts"][0]["download_url"].as_str().unwrap().to_string();
        let res = app.clone().oneshot(get(&url)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res
            .headers()
            .get("content-disposition")
            .is_some());
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"clip.mp4");
    }

    #[tokio::test]
    async fn files_with_url_characters_in_the_title_are_served() {
        let name = "Top 10?#shorts 100%.mp4";
        let (_tmp, app) = app_with(
            ScriptedResolver::new().script("https://youtu.be/top", Script::files(&[name])),
            30,
        );

        let (_, body) = send(
            &app,
            post("/api/v1/jobs/single", json!({"url": "https://youtu.be/top"})),
        )
        .await;
        let id = body["job_id"].as_str().unwrap().to_string();
        let job = wait_for_terminal(&app, &id).await;
        assert_eq!(job["state"], "completed");

        let filename = job["artifacts"][0]["filename"].as_str().unwrap();
        assert!(filename.ends_with(name));
        let url = job["artifacts"][0]["download_url"].as_str().unwrap().to_string();
        assert!(!url.contains('?') && !url.contains('#') && !url.contains(' '));

        let res = app.clone().oneshot(get(&url)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], name.as_bytes());
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let (_tmp, app) = app_with(ScriptedResolver::new(), 30);
        let (status, body) = send(&app, get("/api/v1/jobs/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Job not found");

        let (status, _) = send(&app, post("/api/v1/jobs/nope/cancel", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn batch_size_is_validated() {
        let (_tmp, app) = app_with(ScriptedResolver::new(), 30);

        let urls: Vec<String> = (0..11).map(|i| format!("u{}", i)).collect();
        let (status, body) = send(&app, post("/api/v1/jobs/batch", json!({ "urls": urls }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Maximum 10 URLs per batch download");

        let (status, _) = send(&app, post("/api/v1/jobs/batch", json!({ "urls": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let items: Vec<Value> = (0..21).map(|i| json!({"url": format!("p{}", i), "type": "post"})).collect();
        let (status, _) = send(
            &app,
            post("/api/v1/jobs/platform/batch", json!({ "items": items })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (_tmp, app) = app_with(ScriptedResolver::new(), 30);
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/jobs/single")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert!(status.is_client_error());
        assert!(body["detail"].is_string());

        let (status, _) = send(&app, post("/api/v1/jobs/single", json!({"quality": "best"}))).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn rate_limit_returns_429() {
        let (_tmp, app) = app_with(ScriptedResolver::new(), 2);
        for _ in 0..2 {
            let (status, _) = send(&app, post("/api/v1/jobs/single", json!({"url": "x"}))).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = send(&app, post("/api/v1/jobs/single", json!({"url": "x"}))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["detail"].as_str().unwrap().starts_with("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn cancel_of_finished_job_is_400() {
        let (_tmp, app) = app_with(
            ScriptedResolver::new().script("ok", Script::files(&["a.mp4"])),
            30,
        );
        let (_, body) = send(&app, post("/api/v1/jobs/single", json!({"url": "ok"}))).await;
        let id = body["job_id"].as_str().unwrap().to_string();
        let before = wait_for_terminal(&app, &id).await;

        let (status, body) = send(
            &app,
            post(&format!("/api/v1/jobs/{}/cancel", id), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("completed"));

        let (_, after) = send(&app, get(&format!("/api/v1/jobs/{}", id))).await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn list_rejects_bad_paging() {
        let (_tmp, app) = app_with(ScriptedResolver::new(), 30);
        let (status, body) = send(&app, get("/api/v1/jobs?limit=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());

        let (status, _) = send(&app, get("/api/v1/jobs?skip=-1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, get("/api/v1/jobs?status=pending&type=batch")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
        assert_eq!(body["has_more"], false);
    }

    #[tokio::test]
    async fn file_names_cannot_escape() {
        let (tmp, app) = app_with(ScriptedResolver::new(), 30);
        std::fs::write(tmp.path().join("secret.txt"), b"s").unwrap();

        let res = app
            .clone()
            .oneshot(get("/api/v1/files/..%2Fsecret.txt"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app.clone().oneshot(get("/api/v1/files/missing.mp4")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn probes_map_to_http_errors() {
        let (_tmp, app) = app_with(
            ScriptedResolver::new()
                .probe("https://youtu.be/v", MediaInfo {
                    title: Some("Clip".into()),
                    ..MediaInfo::default()
                })
                .probe_error("https://youtu.be/gone", "Video unavailable"),
            30,
        );

        let (status, body) = send(&app, get("/api/v1/info?url=https://youtu.be/v")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Clip");

        let (status, _) = send(&app, get("/api/v1/info?url=https://youtu.be/gone")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, body) = send(&app, get("/api/v1/playlist/info?url=https://youtu.be/v")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "URL is not a valid playlist");
    }

    #[tokio::test]
    async fn formats_and_platform_info_routes() {
        let video = MediaInfo {
            id: Some("v".into()),
            formats: vec![MediaFormat {
                format_id: "22".into(),
                vcodec: Some("avc1".into()),
                acodec: Some("mp4a".into()),
                ..MediaFormat::default()
            }],
            ..MediaInfo::default()
        };
        let (_tmp, app) = app_with(
            ScriptedResolver::new()
                .probe("https://youtu.be/v", video)
                .probe(
                    "https://www.instagram.com/reel/R1/",
                    MediaInfo {
                        title: Some("Reel".into()),
                        ..MediaInfo::default()
                    },
                )
                .probe_error("https://www.instagram.com/stories/ghost/", "Profile not found"),
            30,
        );

        let (status, body) = send(&app, get("/api/v1/formats?url=https://youtu.be/v")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["formats"]["combined"][0]["format_id"], "22");
        assert_eq!(body["recommended"]["best_video"], "bestvideo+bestaudio/best");

        let (status, body) = send(&app, get("/api/v1/platform/reel/info?url=R1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Reel");

        let (status, _) = send(&app, get("/api/v1/platform/story/info?username=%40ghost")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = send(&app, get("/api/v1/platform/post/info")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

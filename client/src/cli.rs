use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::{
    file_url, normalize_for, AudioFormat, BatchFetchRequest, CancelResponse, FormatsResponse, Job,
    JobPage, MediaFormat, MediaInfo, MediaKind, PlatformBatchItem, PlatformBatchRequest,
    PlatformCarouselRequest, PlatformContent, PlatformPostRequest, PlatformReelRequest,
    PlatformStoryRequest, PlaylistSelectRequest, ReelDownloadType, SingleFetchRequest,
    StoryPackaging, SubmitResponse,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// - En Docker: MEDIAFETCH_URL=http://server:5000
/// - Local: default http://localhost:5000
fn server_base_url() -> String {
    env::var("MEDIAFETCH_URL").unwrap_or_else(|_| "http://localhost:5000".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el server de descargas")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Video,
    Audio,
    Both,
}

impl From<KindArg> for MediaKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Video => MediaKind::Video,
            KindArg::Audio => MediaKind::Audio,
            KindArg::Both => MediaKind::Both,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AudioArg {
    Best,
    Mp3,
    M4a,
}

impl From<AudioArg> for AudioFormat {
    fn from(a: AudioArg) -> Self {
        match a {
            AudioArg::Best => AudioFormat::Best,
            AudioArg::Mp3 => AudioFormat::Mp3,
            AudioArg::M4a => AudioFormat::M4a,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReelArg {
    Video,
    AudioOnly,
    VideoOnly,
}

impl From<ReelArg> for ReelDownloadType {
    fn from(r: ReelArg) -> Self {
        match r {
            ReelArg::Video => ReelDownloadType::Video,
            ReelArg::AudioOnly => ReelDownloadType::AudioOnly,
            ReelArg::VideoOnly => ReelDownloadType::VideoOnly,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ContentArg {
    Post,
    Reel,
    Story,
}

impl From<ContentArg> for PlatformContent {
    fn from(c: ContentArg) -> Self {
        match c {
            ContentArg::Post => PlatformContent::Post,
            ContentArg::Reel => PlatformContent::Reel,
            ContentArg::Story => PlatformContent::Story,
        }
    }
}

/// Opciones de formato compartidas por los comandos de video.
#[derive(clap::Args)]
struct FormatArgs {
    /// best, worst, 720p, 1080p, 1440p, 4k, audio_only
    #[arg(long, default_value = "best")]
    quality: String,
    #[arg(long = "type", value_enum, default_value = "video")]
    kind: KindArg,
    #[arg(long, value_enum, default_value = "best")]
    audio_format: AudioArg,
}

#[derive(Subcommand)]
enum Commands {
    /// Descarga un video
    Single {
        #[arg(value_name = "URL")]
        url: String,
        #[command(flatten)]
        format: FormatArgs,
        /// Formato exacto del resolver (pisa a --quality)
        #[arg(long)]
        format_id: Option<String>,
    },
    /// Descarga varias URLs en un solo job
    Batch {
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,
        #[command(flatten)]
        format: FormatArgs,
        /// Corta en el primer error
        #[arg(long)]
        stop_on_error: bool,
    },
    /// Descarga una playlist completa
    Playlist {
        #[arg(value_name = "URL")]
        url: String,
        #[command(flatten)]
        format: FormatArgs,
    },
    /// Descarga videos elegidos de una playlist (índices desde 0)
    Select {
        #[arg(value_name = "URL")]
        url: String,
        #[arg(value_name = "INDICE", required = true)]
        indices: Vec<usize>,
        #[command(flatten)]
        format: FormatArgs,
    },
    /// Post de la plataforma (URL o shortcode)
    Post {
        url: String,
        #[arg(long, default_value = "best")]
        quality: String,
    },
    /// Reel de la plataforma
    Reel {
        url: String,
        #[arg(long, default_value = "best")]
        quality: String,
        #[arg(long, value_enum, default_value = "video")]
        download_type: ReelArg,
        #[arg(long, value_enum, default_value = "best")]
        audio_format: AudioArg,
    },
    /// Stories activas de un usuario
    Story {
        username: String,
        #[arg(long, default_value = "best")]
        quality: String,
        /// Empaqueta todo en un zip
        #[arg(long)]
        zip: bool,
    },
    /// Carrusel completo como zip
    Carousel {
        url: String,
        #[arg(long, default_value = "best")]
        quality: String,
        #[arg(long)]
        no_metadata: bool,
    },
    /// Varios items de la plataforma: TIPO=URL (post, reel o story)
    PlatformBatch {
        #[arg(value_name = "TIPO=URL", required = true, value_parser = parse_item)]
        items: Vec<PlatformBatchItem>,
        #[arg(long, default_value = "best")]
        quality: String,
        #[arg(long)]
        stop_on_error: bool,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
        /// Espera hasta que termine
        #[arg(long)]
        wait: bool,
    },
    /// Cancela un job pendiente o en curso
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista jobs
    Jobs {
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Metadata de un video o playlist
    Info {
        url: String,
        #[arg(long)]
        playlist: bool,
    },
    /// Formatos disponibles de un video (para --format-id)
    Formats {
        url: String,
    },
    /// Metadata de un post, reel o de las stories de un usuario
    PlatformInfo {
        #[arg(value_enum)]
        content: ContentArg,
        /// URL, shortcode o usuario
        target: String,
    },
    /// Baja un archivo producido por un job
    Fetch {
        #[arg(value_name = "ARCHIVO")]
        filename: String,
        /// Directorio destino
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}

fn parse_item(s: &str) -> std::result::Result<PlatformBatchItem, String> {
    let (kind, url) = s
        .split_once('=')
        .ok_or_else(|| format!("se esperaba TIPO=URL, llegó '{}'", s))?;
    let content = match kind.trim() {
        "post" => PlatformContent::Post,
        "reel" => PlatformContent::Reel,
        "story" => PlatformContent::Story,
        other => return Err(format!("tipo desconocido '{}'", other)),
    };
    Ok(PlatformBatchItem {
        url: url.trim().to_string(),
        content,
    })
}

/* ---------------- HTTP ---------------- */

/// Corta con el `detail` del server si la respuesta no es 2xx.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    let detail = body["detail"].as_str().unwrap_or("sin detalle").to_string();
    bail!("error {}: {}", status, detail)
}

async fn post_json<B: Serialize, T: DeserializeOwned>(
    client: &Client,
    url: &str,
    body: &B,
) -> Result<T> {
    let resp = check(client.post(url).json(body).send().await?).await?;
    Ok(resp.json().await?)
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let resp = check(client.get(url).send().await?).await?;
    Ok(resp.json().await?)
}

async fn submit<B: Serialize>(client: &Client, base: &str, path: &str, body: &B) -> Result<()> {
    let url = format!("{}/api/v1/jobs/{}", base, path);
    let r: SubmitResponse = post_json(client, &url, body).await?;

    println!("Job creado:");
    println!("  id: {}", r.job_id);
    println!("  estado: {}", r.state);
    if let Some(n) = r.total_items {
        println!("  items: {}", n);
    }
    println!("  {}", r.message);
    println!("  consultar en: {}{}", base, r.status_url);
    Ok(())
}

fn print_job(job: &Job) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  tipo: {}", job.kind);
    println!("  estado: {}", job.state);
    println!("  progreso: {}%", job.progress);
    if let Some(t) = &job.title {
        println!("  título: {}", t);
    }
    if let (Some(total), Some(done)) = (job.total_items, job.completed_items) {
        println!("  items: {}/{}", done, total);
    }
    println!("  creado: {}", job.created_at);
    if let Some(started) = job.started_at {
        println!("  iniciado: {}", started);
    }
    if let Some(done) = job.finished_at {
        println!("  finalizado: {}", done);
    }
    if let Some(reason) = &job.failure_reason {
        println!("  motivo: {}", reason);
    }

    if !job.artifacts.is_empty() {
        println!("  archivos:");
        for a in &job.artifacts {
            println!("    - {} ({} bytes) {}", a.filename, a.size, a.download_url);
        }
    }
    if !job.errors.is_empty() {
        println!("  errores:");
        for e in &job.errors {
            println!("    - {}: {}", e.source, e.message);
        }
    }
}

fn print_info(info: &MediaInfo) {
    println!("Metadata:");
    println!("  título: {}", info.title.as_deref().unwrap_or("-"));
    println!("  autor: {}", info.uploader.as_deref().unwrap_or("-"));
    if let Some(d) = info.duration {
        println!("  duración: {:.0}s", d);
    }
    if info.is_playlist {
        println!("  videos: {}", info.entries.len());
        for e in &info.entries {
            println!("    [{}] {}", e.index, e.title.as_deref().unwrap_or(&e.url));
        }
    }
}

fn print_format_group(name: &str, formats: &[MediaFormat]) {
    if formats.is_empty() {
        return;
    }
    println!("  {}:", name);
    for f in formats {
        println!(
            "    {:<8} {:<5} {:<10} {}",
            f.format_id,
            f.ext.as_deref().unwrap_or("-"),
            f.resolution.as_deref().unwrap_or("-"),
            f.note.as_deref().unwrap_or("")
        );
    }
}

fn print_formats(res: &FormatsResponse) {
    println!("Formatos de {}:", res.title.as_deref().unwrap_or("-"));
    print_format_group("video+audio", &res.formats.combined);
    print_format_group("sólo video", &res.formats.video_only);
    print_format_group("sólo audio", &res.formats.audio_only);
    println!("  recomendados:");
    for (name, selector) in &res.recommended {
        println!("    {:<10} {}", name, selector);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base = server_base_url();

    match cli.command {
        Commands::Single {
            url,
            format,
            format_id,
        } => {
            let req = SingleFetchRequest {
                url,
                quality: format.quality,
                format_id,
                media_kind: format.kind.into(),
                audio_format: format.audio_format.into(),
            };
            submit(&client, &base, "single", &req).await?;
        }

        Commands::Batch {
            urls,
            format,
            stop_on_error,
        } => {
            let req = BatchFetchRequest {
                urls,
                quality: format.quality,
                media_kind: format.kind.into(),
                audio_format: format.audio_format.into(),
                continue_on_error: !stop_on_error,
            };
            submit(&client, &base, "batch", &req).await?;
        }

        Commands::Playlist { url, format } => {
            let req = SingleFetchRequest {
                url,
                quality: format.quality,
                format_id: None,
                media_kind: format.kind.into(),
                audio_format: format.audio_format.into(),
            };
            submit(&client, &base, "playlist", &req).await?;
        }

        Commands::Select {
            url,
            indices,
            format,
        } => {
            let req = PlaylistSelectRequest {
                url,
                video_indices: indices,
                quality: format.quality,
                media_kind: format.kind.into(),
                audio_format: format.audio_format.into(),
            };
            submit(&client, &base, "playlist/select", &req).await?;
        }

        Commands::Post { url, quality } => {
            submit(&client, &base, "platform/post", &PlatformPostRequest { url, quality }).await?;
        }

        Commands::Reel {
            url,
            quality,
            download_type,
            audio_format,
        } => {
            let req = PlatformReelRequest {
                url,
                quality,
                download_type: download_type.into(),
                audio_format: audio_format.into(),
            };
            submit(&client, &base, "platform/reel", &req).await?;
        }

        Commands::Story {
            username,
            quality,
            zip,
        } => {
            let req = PlatformStoryRequest {
                username,
                quality,
                format: if zip {
                    StoryPackaging::Zip
                } else {
                    StoryPackaging::Individual
                },
            };
            submit(&client, &base, "platform/story", &req).await?;
        }

        Commands::Carousel {
            url,
            quality,
            no_metadata,
        } => {
            let req = PlatformCarouselRequest {
                url,
                quality,
                include_metadata: !no_metadata,
            };
            submit(&client, &base, "platform/carousel", &req).await?;
        }

        Commands::PlatformBatch {
            items,
            quality,
            stop_on_error,
        } => {
            let req = PlatformBatchRequest {
                items,
                quality,
                continue_on_error: !stop_on_error,
            };
            submit(&client, &base, "platform/batch", &req).await?;
        }

        Commands::Status { id, wait } => {
            let url = format!("{}/api/v1/jobs/{}", base, id);
            let mut job: Job = get_json(&client, &url).await?;

            // polling hasta estado terminal
            while wait && !job.is_terminal() {
                println!("  ... {} {}%", job.state, job.progress);
                tokio::time::sleep(Duration::from_secs(1)).await;
                job = get_json(&client, &url).await?;
            }
            print_job(&job);
        }

        Commands::Cancel { id } => {
            let url = format!("{}/api/v1/jobs/{}/cancel", base, id);
            let resp = check(client.post(&url).send().await?).await?;
            let r: CancelResponse = resp.json().await?;
            println!("Job {} -> {} ({})", r.job_id, r.state, r.message);
        }

        Commands::Jobs {
            status,
            kind,
            skip,
            limit,
        } => {
            let mut url = format!("{}/api/v1/jobs?skip={}&limit={}", base, skip, limit);
            if let Some(s) = status {
                url.push_str(&format!("&status={}", s));
            }
            if let Some(k) = kind {
                url.push_str(&format!("&type={}", k));
            }

            let page: JobPage = get_json(&client, &url).await?;
            if page.jobs.is_empty() {
                println!("No hay jobs.");
            }
            for j in &page.jobs {
                println!(
                    "{}  {:<17} {:<10} {:>3}%  {}",
                    j.job_id,
                    j.kind,
                    j.state,
                    j.progress,
                    j.title.as_deref().unwrap_or("")
                );
            }
            println!(
                "({} de {}{})",
                page.jobs.len(),
                page.total,
                if page.has_more { ", hay más" } else { "" }
            );
        }

        Commands::Info { url, playlist } => {
            let path = if playlist { "playlist/info" } else { "info" };
            let resp = check(
                client
                    .get(format!("{}/api/v1/{}", base, path))
                    .query(&[("url", url.as_str())])
                    .send()
                    .await?,
            )
            .await?;
            let info: MediaInfo = resp.json().await?;
            print_info(&info);
        }

        Commands::Formats { url } => {
            let resp = check(
                client
                    .get(format!("{}/api/v1/formats", base))
                    .query(&[("url", url.as_str())])
                    .send()
                    .await?,
            )
            .await?;
            let res: FormatsResponse = resp.json().await?;
            print_formats(&res);
        }

        Commands::PlatformInfo { content, target } => {
            let content = PlatformContent::from(content);
            let (path, param) = match content {
                PlatformContent::Post => ("post", "url"),
                PlatformContent::Reel => ("reel", "url"),
                PlatformContent::Story => ("story", "username"),
            };
            println!("Consultando {}", normalize_for(content, &target));
            let resp = check(
                client
                    .get(format!("{}/api/v1/platform/{}/info", base, path))
                    .query(&[(param, target.as_str())])
                    .send()
                    .await?,
            )
            .await?;
            let info: MediaInfo = resp.json().await?;
            print_info(&info);
        }

        Commands::Fetch { filename, output } => {
            let url = format!("{}{}", base, file_url(&filename));
            let resp = check(client.get(&url).send().await?).await?;
            let bytes = resp.bytes().await?;

            tokio::fs::create_dir_all(&output).await?;
            let target = output.join(&filename);
            tokio::fs::write(&target, &bytes).await?;
            println!("Guardado {} ({} bytes)", target.display(), bytes.len());
        }
    }

    Ok(())
}

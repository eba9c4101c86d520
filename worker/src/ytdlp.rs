//! Resolver basado en el binario `yt-dlp`.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use common::{MediaFormat, MediaInfo, PlaylistEntry};
use glob::Pattern;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::resolver::{
    ContentResolver, FetchOutcome, FetchSpec, ProgressEvent, ProgressSink, ResolverError,
};

const PROGRESS_MARK: &str = "mf-progress";
const TITLE_MARK: &str = "mf-title";

/// Restos que deja yt-dlp a medio bajar / mergear.
const LEFTOVER_EXTENSIONS: &[&str] = &["part", "ytdl", "temp", "tmp"];

pub struct YtDlpResolver {
    binary: PathBuf,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn fetch_command(&self, spec: &FetchSpec) -> Command {
        let template = spec
            .output_dir
            .join(format!("{}_{}", spec.file_prefix, spec.name_template));

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--newline")
            .arg("--no-warnings")
            .arg("--progress")
            .arg("--progress-template")
            .arg(format!(
                "download:{} %(progress.status)s %(progress.downloaded_bytes)s \
                 %(progress.total_bytes)s %(progress.total_bytes_estimate)s",
                PROGRESS_MARK
            ))
            .arg("--print")
            .arg(format!("after_move:{} %(title)s", TITLE_MARK))
            .arg("-f")
            .arg(&spec.format.selector)
            .arg("-o")
            .arg(template);

        if !spec.allow_playlist {
            cmd.arg("--no-playlist");
        }

        if let Some(codec) = spec.format.extract_audio {
            cmd.args(["-x", "--audio-format", codec.as_str(), "--audio-quality", "192K"]);
        }

        cmd.arg("--")
            .arg(&spec.source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl ContentResolver for YtDlpResolver {
    fn probe(&self, source: &str) -> Result<MediaInfo, ResolverError> {
        debug!("yt-dlp probe {}", source);

        let output = Command::new(&self.binary)
            .args(["-J", "--flat-playlist", "--no-warnings", "--"])
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .map_err(ResolverError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<String> = stderr.lines().map(str::to_string).collect();
            return Err(ResolverError::Failed(error_message(&lines, output.status)));
        }

        parse_media_info(&output.stdout)
    }

    fn fetch(
        &self,
        spec: &FetchSpec,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome, ResolverError> {
        debug!(
            "yt-dlp fetch {} (format={}, dir={})",
            spec.source,
            spec.format.selector,
            spec.output_dir.display()
        );

        let mut child = self
            .fetch_command(spec)
            .spawn()
            .map_err(ResolverError::Spawn)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut title: Option<String> = None;

        // stderr en otro hilo para que ninguno de los dos pipes se llene
        let stderr_lines = thread::scope(|scope| {
            let err_reader = scope.spawn(move || {
                let mut lines = Vec::new();
                if let Some(stderr) = stderr {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        match parse_progress_line(&line) {
                            Some(ev) => progress.report(ev),
                            None => lines.push(line),
                        }
                    }
                }
                lines
            });

            if let Some(stdout) = stdout {
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    if let Some(ev) = parse_progress_line(&line) {
                        progress.report(ev);
                    } else if let Some(t) = parse_title_line(&line) {
                        title.get_or_insert(t);
                    }
                }
            }

            err_reader.join().unwrap_or_default()
        });

        let status = child.wait()?;
        if !status.success() {
            let msg = error_message(&stderr_lines, status);
            warn!("yt-dlp falló para {}: {}", spec.source, msg);
            return Err(ResolverError::Failed(msg));
        }

        let files = collect_outputs(&spec.output_dir, &spec.file_prefix)?;
        Ok(FetchOutcome { title, files })
    }
}

/* ---------------- parsing de la salida ---------------- */

fn parse_number(token: Option<&str>) -> Option<u64> {
    let t = token?;
    if t == "NA" {
        return None;
    }
    t.parse::<u64>()
        .ok()
        .or_else(|| t.parse::<f64>().ok().map(|f| f.max(0.0) as u64))
}

/// `mf-progress <status> <downloaded> <total> <total_estimate>`
pub(crate) fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let start = line.find(PROGRESS_MARK)?;
    let mut parts = line[start + PROGRESS_MARK.len()..].split_whitespace();

    match parts.next()? {
        "finished" => Some(ProgressEvent::Finished),
        "downloading" => {
            let downloaded = parse_number(parts.next())?;
            let total_tok = parts.next();
            let estimate_tok = parts.next();
            let total = parse_number(total_tok).or_else(|| parse_number(estimate_tok));
            Some(ProgressEvent::Downloading { downloaded, total })
        }
        _ => None,
    }
}

pub(crate) fn parse_title_line(line: &str) -> Option<String> {
    let start = line.find(TITLE_MARK)?;
    let title = line[start + TITLE_MARK.len()..].trim();
    if title.is_empty() || title == "NA" {
        None
    } else {
        Some(title.to_string())
    }
}

fn error_message(stderr_lines: &[String], status: ExitStatus) -> String {
    if let Some(line) = stderr_lines
        .iter()
        .rev()
        .find(|l| l.trim_start().starts_with("ERROR:"))
    {
        return line.trim_start().trim_start_matches("ERROR:").trim().to_string();
    }

    stderr_lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("resolver exited with {}", status))
}

#[derive(Deserialize)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    #[serde(rename = "_type")]
    kind: Option<String>,
    #[serde(default)]
    entries: Vec<Option<RawEntry>>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    resolution: Option<String>,
    height: Option<u32>,
    fps: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
    filesize: Option<u64>,
    filesize_approx: Option<f64>,
    format_note: Option<String>,
}

impl RawFormat {
    fn into_format(self) -> Option<MediaFormat> {
        Some(MediaFormat {
            format_id: self.format_id?,
            ext: self.ext,
            resolution: self.resolution,
            height: self.height,
            fps: self.fps,
            vcodec: self.vcodec,
            acodec: self.acodec,
            filesize: self
                .filesize
                .or_else(|| self.filesize_approx.map(|n| n as u64)),
            note: self.format_note,
        })
    }
}

#[derive(Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
}

/// JSON de `yt-dlp -J --flat-playlist` -> MediaInfo.
/// Las entradas nulas se descartan pero conservan su índice original.
pub fn parse_media_info(json: &[u8]) -> Result<MediaInfo, ResolverError> {
    let raw: RawInfo =
        serde_json::from_slice(json).map_err(|e| ResolverError::Parse(e.to_string()))?;

    let entries = raw
        .entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let entry = entry?;
            let url = entry.url.or_else(|| {
                entry
                    .id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/watch?v={}", id))
            })?;
            Some(PlaylistEntry {
                index,
                id: entry.id,
                title: entry.title,
                url,
                duration: entry.duration,
            })
        })
        .collect();

    Ok(MediaInfo {
        id: raw.id,
        title: raw.title,
        uploader: raw.uploader.or(raw.channel),
        duration: raw.duration,
        webpage_url: raw.webpage_url,
        is_playlist: raw.kind.as_deref() == Some("playlist"),
        entries,
        formats: raw
            .formats
            .into_iter()
            .filter_map(RawFormat::into_format)
            .collect(),
    })
}

/// Archivos `<dir>/<prefix>_*` ya terminados, ordenados por nombre.
pub fn collect_outputs(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, ResolverError> {
    let pattern = format!(
        "{}/{}_*",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(prefix)
    );

    let paths = glob::glob(&pattern).map_err(|e| ResolverError::Parse(e.to_string()))?;

    let mut files: Vec<PathBuf> = paths
        .flatten()
        .filter(|p| p.is_file())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            !LEFTOVER_EXTENSIONS.contains(&ext)
        })
        .collect();
    files.sort();
    Ok(files)
}

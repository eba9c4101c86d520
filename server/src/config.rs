use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};

/// Configuración del server, leída de variables de entorno (y `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub download_dir: PathBuf,
    pub platform_dir: PathBuf,
    pub ytdlp_bin: String,

    /// Requests por cliente dentro de `rate_window`
    pub rate_limit: usize,
    pub rate_window: Duration,

    pub max_batch: usize,
    pub max_platform_batch: usize,

    pub file_retention: Duration,
    pub cleanup_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            download_dir: PathBuf::from("tmp/downloads"),
            platform_dir: PathBuf::from("tmp/platform"),
            ytdlp_bin: "yt-dlp".to_string(),
            rate_limit: 30,
            rate_window: Duration::from_secs(60),
            max_batch: 10,
            max_platform_batch: 20,
            file_retention: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let d = Config::default();

        let bind_addr = env_var("MEDIAFETCH_BIND_ADDR")
            .map(|s| {
                s.parse::<SocketAddr>()
                    .with_context(|| format!("MEDIAFETCH_BIND_ADDR inválido: {}", s))
            })
            .transpose()?
            .unwrap_or(d.bind_addr);

        let rate_limit: usize = env_parse("MEDIAFETCH_RATE_LIMIT", d.rate_limit)?;
        if rate_limit == 0 {
            return Err(anyhow!("MEDIAFETCH_RATE_LIMIT tiene que ser mayor a 0"));
        }

        let retention_mins: u64 = env_parse("MEDIAFETCH_FILE_RETENTION_MINS", 30)?;

        Ok(Self {
            bind_addr,
            download_dir: env_var("MEDIAFETCH_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.download_dir),
            platform_dir: env_var("MEDIAFETCH_PLATFORM_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.platform_dir),
            ytdlp_bin: env_var("MEDIAFETCH_YTDLP_BIN").unwrap_or(d.ytdlp_bin),
            rate_limit,
            rate_window: Duration::from_secs(env_parse("MEDIAFETCH_RATE_WINDOW_SECS", 60)?),
            max_batch: env_parse("MEDIAFETCH_MAX_BATCH", d.max_batch)?,
            max_platform_batch: env_parse("MEDIAFETCH_MAX_PLATFORM_BATCH", d.max_platform_batch)?,
            file_retention: Duration::from_secs(retention_mins * 60),
            cleanup_interval: Duration::from_secs(env_parse(
                "MEDIAFETCH_CLEANUP_INTERVAL_SECS",
                300,
            )?),
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_or(key, env_var(key), default)
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(s) => s
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{} inválido ({}): {}", key, s, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_uses_default_when_missing() {
        assert_eq!(parse_or::<usize>("X", None, 7).unwrap(), 7);
        assert_eq!(parse_or::<usize>("X", Some(" 12 ".into()), 7).unwrap(), 12);
        let err = parse_or::<usize>("MEDIAFETCH_MAX_BATCH", Some("ten".into()), 7).unwrap_err();
        assert!(err.to_string().contains("MEDIAFETCH_MAX_BATCH"));
    }

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.bind_addr.port(), 5000);
        assert_eq!(c.rate_limit, 30);
        assert_eq!(c.max_batch, 10);
        assert_eq!(c.max_platform_batch, 20);
        assert_eq!(c.file_retention, Duration::from_secs(1800));
    }
}

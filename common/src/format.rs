use serde::{Deserialize, Serialize};

use crate::request::{AudioFormat, MediaKind};

/// Selector de formato para el resolver + extracción de audio opcional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract_audio: Option<AudioCodec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    Mp3,
    M4a,
}

impl AudioCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::M4a => "m4a",
        }
    }

    fn from_format(audio: AudioFormat) -> Option<Self> {
        match audio {
            AudioFormat::Best => None,
            AudioFormat::Mp3 => Some(AudioCodec::Mp3),
            AudioFormat::M4a => Some(AudioCodec::M4a),
        }
    }
}

const BEST_AUDIO: &str = "bestaudio/best";

/// Traduce calidad + tipo al selector de formato del resolver.
/// - `format_id` explícito pisa la calidad
/// - audio mp3/m4a fuerza bestaudio + extracción
pub fn format_spec(
    quality: &str,
    kind: MediaKind,
    format_id: Option<&str>,
    audio: AudioFormat,
) -> FormatSpec {
    if let Some(codec) = AudioCodec::from_format(audio) {
        return FormatSpec {
            selector: BEST_AUDIO.to_string(),
            extract_audio: Some(codec),
        };
    }

    let selector = match format_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => quality_selector(quality, kind).to_string(),
    };

    FormatSpec {
        selector,
        extract_audio: None,
    }
}

fn quality_selector(quality: &str, kind: MediaKind) -> &'static str {
    if quality == "audio_only" || kind == MediaKind::Audio {
        return BEST_AUDIO;
    }

    match quality {
        "best" => "bestvideo+bestaudio/best",
        "worst" => "worstvideo+worstaudio/worst",
        "720p" => "bestvideo[height<=720]+bestaudio/best[height<=720]",
        "1080p" => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
        "1440p" => "bestvideo[height<=1440]+bestaudio/best[height<=1440]",
        "4k" => "bestvideo[height<=2160]+bestaudio/best[height<=2160]",
        _ => "bestvideo+bestaudio/best",
    }
}

/// Selector para contenido de plataforma (posts, reels, stories).
pub fn platform_format_spec(quality: &str) -> FormatSpec {
    let selector = match quality {
        "1080p" | "high" => "best[height<=1080]/best",
        "720p" | "medium" => "best[height<=720]/best",
        "480p" | "low" => "best[height<=480]/best",
        _ => "best",
    };

    FormatSpec {
        selector: selector.to_string(),
        extract_audio: None,
    }
}

/// Sólo audio de un reel.
pub fn platform_audio_spec(audio: AudioFormat) -> FormatSpec {
    FormatSpec {
        selector: BEST_AUDIO.to_string(),
        extract_audio: AudioCodec::from_format(audio),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_maps_to_selector() {
        let spec = format_spec("720p", MediaKind::Video, None, AudioFormat::Best);
        assert_eq!(
            spec.selector,
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
        assert_eq!(spec.extract_audio, None);

        let spec = format_spec("unknown", MediaKind::Both, None, AudioFormat::Best);
        assert_eq!(spec.selector, "bestvideo+bestaudio/best");
    }

    #[test]
    fn audio_requests_use_best_audio() {
        let spec = format_spec("1080p", MediaKind::Audio, None, AudioFormat::Best);
        assert_eq!(spec.selector, "bestaudio/best");

        let spec = format_spec("audio_only", MediaKind::Video, None, AudioFormat::Best);
        assert_eq!(spec.selector, "bestaudio/best");
    }

    #[test]
    fn format_id_overrides_quality_but_not_audio_extraction() {
        let spec = format_spec("best", MediaKind::Video, Some("137"), AudioFormat::Best);
        assert_eq!(spec.selector, "137");

        let spec = format_spec("best", MediaKind::Video, Some("137"), AudioFormat::Mp3);
        assert_eq!(spec.selector, "bestaudio/best");
        assert_eq!(spec.extract_audio, Some(AudioCodec::Mp3));
    }

    #[test]
    fn platform_qualities() {
        assert_eq!(platform_format_spec("high").selector, "best[height<=1080]/best");
        assert_eq!(platform_format_spec("480p").selector, "best[height<=480]/best");
        assert_eq!(platform_format_spec("whatever").selector, "best");
        assert_eq!(
            platform_audio_spec(AudioFormat::M4a).extract_audio,
            Some(AudioCodec::M4a)
        );
    }
}

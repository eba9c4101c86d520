//! Normalización de URLs / shortcodes / usuarios de la plataforma social.

use regex::Regex;
use std::sync::LazyLock;

use crate::request::PlatformContent;

const PLATFORM_HOST: &str = "https://www.instagram.com";

static RE_SHORTCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"instagram\.com/(?:p|reels?|tv)/([A-Za-z0-9_-]+)").unwrap());

fn is_absolute(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Shortcode o URL de un post -> URL completa.
pub fn normalize_post_url(url_or_code: &str) -> String {
    let s = url_or_code.trim();
    if is_absolute(s) {
        return s.to_string();
    }
    if s.contains("/p/") || s.contains("/reel/") || s.contains("/reels/") {
        return format!("{}{}", PLATFORM_HOST, s);
    }
    format!("{}/p/{}/", PLATFORM_HOST, s)
}

/// Shortcode o URL de un reel -> URL completa.
pub fn normalize_reel_url(url_or_code: &str) -> String {
    let s = url_or_code.trim();
    if is_absolute(s) {
        return s.to_string();
    }
    if s.contains("/reel/") || s.contains("/reels/") {
        return format!("{}{}", PLATFORM_HOST, s);
    }
    format!("{}/reel/{}/", PLATFORM_HOST, s)
}

pub fn clean_username(username: &str) -> String {
    username.trim().trim_start_matches('@').to_string()
}

/// Usuario -> URL de sus stories.
pub fn stories_url(username: &str) -> String {
    format!("{}/stories/{}/", PLATFORM_HOST, clean_username(username))
}

pub fn normalize_for(content: PlatformContent, raw: &str) -> String {
    match content {
        PlatformContent::Post => normalize_post_url(raw),
        PlatformContent::Reel => normalize_reel_url(raw),
        PlatformContent::Story => stories_url(raw),
    }
}

pub fn extract_shortcode(url: &str) -> Option<String> {
    RE_SHORTCODE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

//! Traducción de un `JobRequest` al trabajo concreto que hace el worker.
//!
//! Acá se resuelven los selectores de formato, se normalizan las URLs de la
//! plataforma y se decide el directorio destino y el empaquetado. No hay I/O.

use common::{
    extract_shortcode, format_spec, normalize_for, platform_audio_spec, platform_format_spec,
    FormatSpec, JobRequest, MediaInfo, PlatformContent, ReelDownloadType, StoryPackaging,
};

const DEFAULT_TEMPLATE: &str = "%(title)s.%(ext)s";
const STORY_TEMPLATE: &str = "story_%(autonumber)s.%(ext)s";
const CAROUSEL_TEMPLATE: &str = "%(autonumber)s.%(ext)s";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Downloads,
    Platform,
}

/// Un fetch individual.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Posición en el batch o índice del video en la playlist
    pub index: usize,
    /// URL ya normalizada que recibe el resolver
    pub source: String,
    /// Lo que mandó el cliente (para errores / artefactos)
    pub label: String,
    pub source_type: Option<PlatformContent>,
    pub title: Option<String>,
    pub format: FormatSpec,
    pub destination: Destination,
    pub allow_playlist: bool,
    pub name_template: String,
}

impl WorkItem {
    fn media(index: usize, url: &str, format: FormatSpec) -> Self {
        Self {
            index,
            source: url.trim().to_string(),
            label: url.to_string(),
            source_type: None,
            title: None,
            format,
            destination: Destination::Downloads,
            allow_playlist: false,
            name_template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    fn platform(index: usize, raw: &str, content: PlatformContent, format: FormatSpec) -> Self {
        let name_template = match content {
            PlatformContent::Story => STORY_TEMPLATE,
            _ => DEFAULT_TEMPLATE,
        };
        Self {
            index,
            source: normalize_for(content, raw),
            label: raw.to_string(),
            source_type: Some(content),
            title: None,
            format,
            destination: Destination::Platform,
            // posts y stories pueden traer varios archivos
            allow_playlist: true,
            name_template: name_template.to_string(),
        }
    }
}

/// Post-proceso de un fetch simple.
#[derive(Debug, Clone, PartialEq)]
pub enum Packaging {
    /// Zip de stories (sólo si hay más de un archivo)
    Stories,
    /// Zip de carrusel, siempre
    Carousel {
        include_metadata: bool,
        shortcode: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistPlan {
    pub url: String,
    /// `None` = todos los videos
    pub selection: Option<Vec<usize>>,
    pub format: FormatSpec,
}

impl PlaylistPlan {
    /// Items a bajar según la metadata de la playlist.
    /// Respeta el orden pedido; índices fuera de rango se ignoran.
    pub fn select(&self, info: &MediaInfo) -> Vec<WorkItem> {
        let to_item = |entry: &common::PlaylistEntry| {
            let mut item = WorkItem::media(entry.index, &entry.url, self.format.clone());
            item.title = entry.title.clone();
            item
        };

        match &self.selection {
            None => info.entries.iter().map(to_item).collect(),
            Some(indices) => indices
                .iter()
                .filter_map(|i| info.entries.iter().find(|e| e.index == *i))
                .map(to_item)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Single {
        item: WorkItem,
        packaging: Option<Packaging>,
    },
    Items {
        items: Vec<WorkItem>,
        continue_on_error: bool,
    },
    Playlist(PlaylistPlan),
}

impl Plan {
    pub fn from_request(request: &JobRequest) -> Plan {
        match request {
            JobRequest::Single(r) => {
                let format = format_spec(
                    &r.quality,
                    r.media_kind,
                    r.format_id.as_deref(),
                    r.audio_format,
                );
                Plan::Single {
                    item: WorkItem::media(0, &r.url, format),
                    packaging: None,
                }
            }

            JobRequest::Batch(r) => {
                let format = format_spec(&r.quality, r.media_kind, None, r.audio_format);
                Plan::Items {
                    items: r
                        .urls
                        .iter()
                        .enumerate()
                        .map(|(i, url)| WorkItem::media(i, url, format.clone()))
                        .collect(),
                    continue_on_error: r.continue_on_error,
                }
            }

            JobRequest::Playlist(r) => Plan::Playlist(PlaylistPlan {
                url: r.url.trim().to_string(),
                selection: None,
                format: format_spec(
                    &r.quality,
                    r.media_kind,
                    r.format_id.as_deref(),
                    r.audio_format,
                ),
            }),

            JobRequest::PlaylistSelect(r) => Plan::Playlist(PlaylistPlan {
                url: r.url.trim().to_string(),
                selection: Some(r.video_indices.clone()),
                format: format_spec(&r.quality, r.media_kind, None, r.audio_format),
            }),

            JobRequest::PlatformPost(r) => Plan::Single {
                item: WorkItem::platform(
                    0,
                    &r.url,
                    PlatformContent::Post,
                    platform_format_spec(&r.quality),
                ),
                packaging: None,
            },

            JobRequest::PlatformReel(r) => {
                let format = match r.download_type {
                    ReelDownloadType::AudioOnly => platform_audio_spec(r.audio_format),
                    ReelDownloadType::VideoOnly => FormatSpec {
                        selector: "bestvideo/best".to_string(),
                        extract_audio: None,
                    },
                    ReelDownloadType::Video => platform_format_spec(&r.quality),
                };
                let mut item = WorkItem::platform(0, &r.url, PlatformContent::Reel, format);
                item.allow_playlist = false;
                Plan::Single {
                    item,
                    packaging: None,
                }
            }

            JobRequest::PlatformStory(r) => Plan::Single {
                item: WorkItem::platform(
                    0,
                    &r.username,
                    PlatformContent::Story,
                    platform_format_spec(&r.quality),
                ),
                packaging: match r.format {
                    StoryPackaging::Zip => Some(Packaging::Stories),
                    StoryPackaging::Individual => None,
                },
            },

            JobRequest::PlatformCarousel(r) => {
                let mut item = WorkItem::platform(
                    0,
                    &r.url,
                    PlatformContent::Post,
                    platform_format_spec(&r.quality),
                );
                item.name_template = CAROUSEL_TEMPLATE.to_string();
                Plan::Single {
                    packaging: Some(Packaging::Carousel {
                        include_metadata: r.include_metadata,
                        shortcode: extract_shortcode(&item.source),
                    }),
                    item,
                }
            }

            JobRequest::PlatformBatch(r) => {
                let format = platform_format_spec(&r.quality);
                Plan::Items {
                    items: r
                        .items
                        .iter()
                        .enumerate()
                        .map(|(i, it)| WorkItem::platform(i, &it.url, it.content, format.clone()))
                        .collect(),
                    continue_on_error: r.continue_on_error,
                }
            }
        }
    }
}

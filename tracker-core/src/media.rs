use crate::source::PostHandle;
use crate::types::MediaType;
use url::Url;

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];
const IMAGE_HOSTS: &[&str] = &["i.redd.it", "i.imgur.com", "imgur.com", "preview.redd.it"];
const VIDEO_HOSTS: &[&str] = &[
    "v.redd.it",
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "youtu.be",
    "vimeo.com",
    "streamable.com",
    "gfycat.com",
];

/// Lowercased host of `raw` when it parses as an absolute URL.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_ascii_lowercase()))
}

fn post_domain(handle: &PostHandle) -> Option<String> {
    handle
        .domain
        .as_ref()
        .map(|domain| domain.to_ascii_lowercase())
        .or_else(|| handle.url.as_deref().and_then(host_of))
}

fn has_image_extension(raw: &str) -> bool {
    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_ascii_lowercase(),
        Err(_) => raw.to_ascii_lowercase(),
    };
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn classify(handle: &PostHandle) -> MediaType {
    if handle.is_self {
        return MediaType::Text;
    }

    let domain = post_domain(handle);
    let domain = domain.as_deref();

    let image_by_url = handle.url.as_deref().is_some_and(has_image_extension);
    if image_by_url || domain.is_some_and(|d| IMAGE_HOSTS.contains(&d)) {
        return MediaType::Image;
    }

    if handle.is_gallery || !handle.gallery_urls.is_empty() {
        return MediaType::Gallery;
    }

    if handle.is_video || domain.is_some_and(|d| VIDEO_HOSTS.contains(&d)) {
        return MediaType::Video;
    }

    MediaType::Link
}

/// URLs of the media attached to a post, empty for text posts and plain links.
pub fn media_urls(handle: &PostHandle, media_type: MediaType) -> Vec<String> {
    match media_type {
        MediaType::Text | MediaType::Link => Vec::new(),
        MediaType::Image => handle.url.iter().cloned().collect(),
        MediaType::Gallery => handle.gallery_urls.clone(),
        MediaType::Video => handle
            .video_url
            .clone()
            .or_else(|| handle.url.clone())
            .into_iter()
            .collect(),
    }
}

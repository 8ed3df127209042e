use serde::Serialize;

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".gif"];
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".m4v", ".ogv"];
const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "videoId", rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    #[serde(rename = "youtube_video")]
    YouTubeVideo(String),
    DirectVideo,
    Unsupported,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::YouTubeVideo(_) => "youtube_video",
            MediaKind::DirectVideo => "direct_video",
            MediaKind::Unsupported => "unsupported",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::YouTubeVideo(_) | MediaKind::DirectVideo)
    }

    pub fn embed_url(&self) -> Option<String> {
        match self {
            MediaKind::YouTubeVideo(id) => Some(format!("https://www.youtube.com/embed/{id}")),
            _ => None,
        }
    }
}

/// Suffix checks run before the host check, so an image hosted on a
/// YouTube domain is still an image.
pub fn classify_media(url: &str) -> MediaKind {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return MediaKind::Unsupported;
    }

    let path = strip_query(trimmed).to_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return MediaKind::Image;
    }
    if VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return MediaKind::DirectVideo;
    }

    let lowered = trimmed.to_lowercase();
    if YOUTUBE_HOSTS.iter().any(|host| lowered.contains(host)) {
        return youtube_video_id(trimmed)
            .map(MediaKind::YouTubeVideo)
            .unwrap_or(MediaKind::Unsupported);
    }

    MediaKind::Unsupported
}

/// Supports `youtu.be/<id>`, `youtube.com/watch?v=<id>` and `.../embed/<id>`.
pub fn youtube_video_id(url: &str) -> Option<String> {
    let lowered = url.to_ascii_lowercase();

    if let Some(start) = lowered.find("youtu.be/") {
        return take_segment(&url[start + "youtu.be/".len()..]);
    }

    if lowered.contains("youtube.com") {
        if let Some(id) = query_param(url, "v") {
            return Some(id);
        }
        if let Some(start) = lowered.find("/embed/") {
            return take_segment(&url[start + "/embed/".len()..]);
        }
    }

    None
}

fn strip_query(url: &str) -> &str {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    &url[..end]
}

fn take_segment(rest: &str) -> Option<String> {
    let end = rest
        .find(|c| matches!(c, '?' | '&' | '#' | '/'))
        .unwrap_or(rest.len());
    let segment = rest[..end].trim();
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

// Hand-split rather than `Url::query_pairs`: sheet cells often hold scheme-less
// links such as `www.youtube.com/watch?v=abc`, which `Url::parse` rejects.
fn query_param(url: &str, key: &str) -> Option<String> {
    let query_start = url.find('?')?;
    let query = &url[query_start + 1..];
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

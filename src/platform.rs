#![forbid(unsafe_code)]

//! Maps user supplied URLs to the source platform they belong to.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Source platform of a video URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Youtube,
    Facebook,
    Instagram,
    Tiktok,
    Pinterest,
    Unsupported,
}

impl PlatformId {
    /// Every platform the pipeline can serve, in display order.
    pub const SUPPORTED: [PlatformId; 5] = [
        PlatformId::Youtube,
        PlatformId::Facebook,
        PlatformId::Instagram,
        PlatformId::Tiktok,
        PlatformId::Pinterest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Facebook => "facebook",
            Self::Instagram => "instagram",
            Self::Tiktok => "tiktok",
            Self::Pinterest => "pinterest",
            Self::Unsupported => "unsupported",
        }
    }

    /// Lenient parser used for platform hints coming from clients.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Some(Self::Youtube),
            "facebook" | "fb" => Some(Self::Facebook),
            "instagram" | "ig" => Some(Self::Instagram),
            "tiktok" => Some(Self::Tiktok),
            "pinterest" => Some(Self::Pinterest),
            _ => None,
        }
    }

    pub fn is_supported(self) -> bool {
        self != Self::Unsupported
    }

    /// Short-form platforms do not expose reliable per-format height/codec
    /// data, so they get the synthetic format ladder and a `best` selection.
    pub fn is_short_form(self) -> bool {
        matches!(
            self,
            Self::Facebook | Self::Instagram | Self::Tiktok | Self::Pinterest
        )
    }

    /// Referer sent to the extraction tool for this platform.
    pub fn referer(self) -> Option<&'static str> {
        match self {
            Self::Youtube => Some("https://www.youtube.com/"),
            Self::Facebook => Some("https://www.facebook.com/"),
            Self::Instagram => Some("https://www.instagram.com/"),
            Self::Tiktok => Some("https://www.tiktok.com/"),
            Self::Pinterest => Some("https://www.pinterest.com/"),
            Self::Unsupported => None,
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses user input as an http(s) URL, completing a missing scheme with
/// `https://` the way people paste links copied from an address bar.
pub fn parse_video_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("https://{trimmed}")).ok()?
        }
        Err(_) => return None,
    };
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Some(parsed),
        _ => None,
    }
}

/// Classifies a URL. Never fails: anything unrecognized is `Unsupported`.
pub fn classify(raw: &str) -> PlatformId {
    match parse_video_url(raw) {
        Some(url) => classify_url(&url),
        None => PlatformId::Unsupported,
    }
}

pub fn classify_url(url: &Url) -> PlatformId {
    let Some(host) = url.host_str() else {
        return PlatformId::Unsupported;
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let path = url.path();
    let has_path = !path.trim_matches('/').is_empty();

    if host_matches(&host, "youtube.com") || host_matches(&host, "youtube-nocookie.com") {
        let is_video = path.starts_with("/shorts/")
            || path.starts_with("/embed/")
            || path.starts_with("/live/")
            || path.starts_with("/v/")
            || (path == "/watch"
                && url
                    .query_pairs()
                    .any(|(key, value)| key == "v" && !value.is_empty()));
        return if is_video {
            PlatformId::Youtube
        } else {
            PlatformId::Unsupported
        };
    }
    if host_matches(&host, "youtu.be") {
        return supported_if(has_path, PlatformId::Youtube);
    }
    if host_matches(&host, "facebook.com")
        || host_matches(&host, "fb.watch")
        || host_matches(&host, "fb.com")
    {
        return supported_if(has_path, PlatformId::Facebook);
    }
    if host_matches(&host, "instagram.com") {
        let is_media = ["/p/", "/reel/", "/reels/", "/tv/"]
            .iter()
            .any(|prefix| path.starts_with(prefix));
        return supported_if(is_media, PlatformId::Instagram);
    }
    if host_matches(&host, "tiktok.com") {
        return supported_if(has_path, PlatformId::Tiktok);
    }
    if is_pinterest_host(&host) {
        return supported_if(has_path, PlatformId::Pinterest);
    }
    PlatformId::Unsupported
}

fn supported_if(condition: bool, platform: PlatformId) -> PlatformId {
    if condition {
        platform
    } else {
        PlatformId::Unsupported
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn is_pinterest_host(host: &str) -> bool {
    if host_matches(host, "pin.it") {
        return true;
    }
    // pinterest.com, pinterest.fr, pinterest.co.uk, de.pinterest.com ...
    let labels: Vec<&str> = host.split('.').collect();
    match labels.as_slice() {
        [.., "pinterest", tld] => tld.len() <= 3,
        [.., "pinterest", sld, tld] => matches!(*sld, "co" | "com") && tld.len() == 2,
        _ => false,
    }
}

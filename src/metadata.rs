#![forbid(unsafe_code)]

//! Video metadata as returned by the Info endpoint, plus the raw yt-dlp
//! payload it is parsed from.
//!
//! Field names in the serialized form match what browser clients of the
//! service already consume (`duration`, `thumbnail`, `ext`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    filename::FALLBACK_STEM,
    platform::PlatformId,
};

/// Heights offered for platforms that do not report usable per-format data.
pub const SYNTHETIC_HEIGHTS: [u32; 4] = [1080, 720, 540, 360];
pub const SYNTHETIC_CONTAINER: &str = "mp4";

/// One downloadable encoding of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub format_id: String,
    /// Vertical resolution, 0 when unknown.
    pub height: u32,
    pub ext: String,
    /// Size in bytes, 0 when unknown.
    pub filesize: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
}

impl FormatDescriptor {
    /// Ladder entry for short-form platforms, e.g. `720p`.
    pub fn synthetic(height: u32) -> Self {
        Self {
            format_id: format!("{height}p"),
            height,
            ext: SYNTHETIC_CONTAINER.to_string(),
            filesize: 0,
            format_note: Some(format!("{height}p")),
            vcodec: None,
            acodec: None,
        }
    }

    /// Placeholder used when the tool lists no formats at all.
    pub fn best_available() -> Self {
        Self {
            format_id: "best".to_string(),
            height: 0,
            ext: SYNTHETIC_CONTAINER.to_string(),
            filesize: 0,
            format_note: Some("best available".to_string()),
            vcodec: None,
            acodec: None,
        }
    }
}

pub fn synthetic_formats() -> Vec<FormatDescriptor> {
    SYNTHETIC_HEIGHTS
        .iter()
        .copied()
        .map(FormatDescriptor::synthetic)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    /// Seconds; `null` for live streams or when the extractor cannot tell.
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub platform: PlatformId,
    pub formats: Vec<FormatDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RawVideoInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    title: Option<String>,
    fulltitle: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<RawThumbnail>,
    #[serde(default)]
    formats: Vec<RawFormat>,
    #[serde(default)]
    entries: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    format_note: Option<String>,
    height: Option<f64>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

impl RawFormat {
    fn into_descriptor(self) -> Option<FormatDescriptor> {
        let height = self.height.filter(|h| h.is_finite() && *h > 0.0)? as u32;
        let vcodec = self.vcodec.filter(|codec| !codec.is_empty());
        if vcodec.as_deref() == Some("none") {
            return None;
        }
        let format_id = self.format_id.filter(|id| !id.is_empty())?;
        let filesize = self
            .filesize
            .or(self.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map_or(0, |size| size as u64);
        Some(FormatDescriptor {
            format_id,
            height,
            ext: self.ext.unwrap_or_else(|| SYNTHETIC_CONTAINER.to_string()),
            filesize,
            format_note: self.format_note.filter(|note| !note.is_empty()),
            vcodec,
            acodec: self.acodec.filter(|codec| !codec.is_empty()),
        })
    }
}

/// Parses `--dump-single-json` output into [`VideoMetadata`].
///
/// Playlist payloads resolve to their first entry. Short-form platforms get
/// the synthetic ladder instead of the tool's format list.
pub fn parse_video_info(stdout: &str, platform: PlatformId) -> Result<VideoMetadata, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err("extractor printed nothing".to_string());
    }
    let mut info: RawVideoInfo = serde_json::from_str(trimmed).map_err(|err| err.to_string())?;
    if info.kind.as_deref() == Some("playlist") {
        let first = info
            .entries
            .into_iter()
            .find(|entry| entry.is_object())
            .ok_or_else(|| "playlist has no entries".to_string())?;
        info = serde_json::from_value(first).map_err(|err| err.to_string())?;
    }

    let title = info
        .title
        .filter(|title| !title.trim().is_empty())
        .or(info.fulltitle.filter(|title| !title.trim().is_empty()))
        .unwrap_or_else(|| FALLBACK_STEM.to_string());
    let thumbnail = info
        .thumbnail
        .filter(|url| !url.is_empty())
        .or_else(|| info.thumbnails.into_iter().rev().find_map(|thumb| thumb.url));
    let formats = if platform.is_short_form() {
        synthetic_formats()
    } else {
        info.formats
            .into_iter()
            .filter_map(RawFormat::into_descriptor)
            .collect()
    };

    Ok(VideoMetadata {
        title,
        duration: info.duration.filter(|secs| secs.is_finite() && *secs >= 0.0),
        thumbnail,
        platform,
        formats,
    })
}

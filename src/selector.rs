#![forbid(unsafe_code)]

//! Deterministic format selection.

use serde::Serialize;

use crate::{
    metadata::{FormatDescriptor, VideoMetadata},
    platform::PlatformId,
};

pub const BEST_EXPRESSION: &str = "best";
const SHORT_FORM_HEIGHT: u32 = 1080;

/// The chosen format plus the expression handed to `yt-dlp --format`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatSelection {
    pub descriptor: FormatDescriptor,
    pub expression: String,
}

impl FormatSelection {
    fn best(descriptor: FormatDescriptor) -> Self {
        Self {
            descriptor,
            expression: BEST_EXPRESSION.to_string(),
        }
    }
}

pub fn capped_expression(height: u32) -> String {
    format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
}

/// Picks the format to fetch.
///
/// Short-form platforms always get the synthetic 1080p entry and `best`.
/// Otherwise the tallest format not exceeding `requested_height` wins, the
/// earliest one on ties; when every format is taller, the tallest overall is
/// reported and the tool is left to pick `best`.
pub fn select_format(
    metadata: &VideoMetadata,
    requested_height: u32,
    platform: PlatformId,
) -> FormatSelection {
    if platform.is_short_form() {
        return FormatSelection::best(FormatDescriptor::synthetic(SHORT_FORM_HEIGHT));
    }

    let capped = tallest(
        metadata
            .formats
            .iter()
            .filter(|format| format.height > 0 && format.height <= requested_height),
    );
    if let Some(descriptor) = capped {
        return FormatSelection {
            descriptor: descriptor.clone(),
            expression: capped_expression(requested_height),
        };
    }

    match tallest(metadata.formats.iter()) {
        Some(descriptor) => FormatSelection::best(descriptor.clone()),
        None => FormatSelection::best(FormatDescriptor::best_available()),
    }
}

/// `max_by_key` keeps the last maximum, so fold to keep the first.
fn tallest<'a>(
    formats: impl Iterator<Item = &'a FormatDescriptor>,
) -> Option<&'a FormatDescriptor> {
    formats.fold(None::<&'a FormatDescriptor>, |best, format| match best {
        Some(current) if current.height >= format.height => Some(current),
        _ => Some(format),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, height: u32) -> FormatDescriptor {
        FormatDescriptor {
            format_id: id.to_string(),
            height,
            ext: "mp4".into(),
            filesize: 0,
            format_note: None,
            vcodec: Some("avc1".into()),
            acodec: None,
        }
    }

    fn metadata(formats: Vec<FormatDescriptor>) -> VideoMetadata {
        VideoMetadata {
            title: "t".into(),
            duration: None,
            thumbnail: None,
            platform: PlatformId::Youtube,
            formats,
        }
    }

    #[test]
    fn picks_tallest_format_within_cap() {
        let meta = metadata(vec![format("18", 360), format("22", 720), format("137", 1080)]);
        let selection = select_format(&meta, 720, PlatformId::Youtube);
        assert_eq!(selection.descriptor.format_id, "22");
        assert_eq!(
            selection.expression,
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
    }

    #[test]
    fn never_exceeds_cap_when_candidate_exists() {
        let meta = metadata(vec![
            format("a", 1440),
            format("b", 480),
            format("c", 2160),
            format("d", 240),
        ]);
        for cap in [240, 360, 480, 720, 1080] {
            let selection = select_format(&meta, cap, PlatformId::Youtube);
            assert!(selection.descriptor.height <= cap, "cap {cap}");
        }
    }

    #[test]
    fn ties_resolve_to_earliest_format() {
        let meta = metadata(vec![format("first", 720), format("second", 720)]);
        assert_eq!(
            select_format(&meta, 1080, PlatformId::Youtube).descriptor.format_id,
            "first"
        );
    }

    #[test]
    fn falls_back_to_tallest_overall_with_best() {
        let meta = metadata(vec![format("x", 1080), format("y", 1440), format("z", 1440)]);
        let selection = select_format(&meta, 480, PlatformId::Youtube);
        assert_eq!(selection.descriptor.format_id, "y");
        assert_eq!(selection.expression, BEST_EXPRESSION);
    }

    #[test]
    fn empty_format_list_selects_best_placeholder() {
        let selection = select_format(&metadata(Vec::new()), 720, PlatformId::Youtube);
        assert_eq!(selection.descriptor.format_id, "best");
        assert_eq!(selection.descriptor.height, 0);
        assert_eq!(selection.expression, BEST_EXPRESSION);
    }

    #[test]
    fn short_form_always_gets_synthetic_1080p() {
        let meta = metadata(vec![format("22", 720)]);
        for platform in [
            PlatformId::Facebook,
            PlatformId::Instagram,
            PlatformId::Tiktok,
            PlatformId::Pinterest,
        ] {
            for height in [144, 720, 4320] {
                let selection = select_format(&meta, height, platform);
                assert_eq!(selection.descriptor, FormatDescriptor::synthetic(1080));
                assert_eq!(selection.expression, BEST_EXPRESSION);
            }
        }
    }

    #[test]
    fn selection_is_deterministic() {
        let meta = metadata(vec![format("18", 360), format("22", 720), format("22b", 720)]);
        let first = select_format(&meta, 720, PlatformId::Youtube);
        for _ in 0..10 {
            assert_eq!(select_format(&meta, 720, PlatformId::Youtube), first);
        }
    }
}

#![forbid(unsafe_code)]

//! Title-to-filename transform shared by the fetcher (output templates) and
//! delivery (suggested download names).

pub const MAX_STEM_LEN: usize = 80;
pub const FALLBACK_STEM: &str = "video";

/// Turns an arbitrary video title into a lowercase, filesystem-safe stem.
///
/// ASCII letters, digits and `-` are kept. Every other run of characters
/// (whitespace, underscores, punctuation, non-ASCII) collapses into a single
/// `_`. The result never starts or ends with a separator and
/// is capped at [`MAX_STEM_LEN`] bytes.
pub fn sanitize_title(title: &str) -> String {
    let mut stem = String::with_capacity(title.len().min(MAX_STEM_LEN));
    let mut pending_separator = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            if pending_separator && !stem.is_empty() {
                stem.push('_');
            }
            pending_separator = false;
            stem.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
        if stem.len() >= MAX_STEM_LEN {
            break;
        }
    }

    stem.truncate(MAX_STEM_LEN);
    let trimmed = stem.trim_matches(|c| c == '_' || c == '-');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builds `<stem>.<ext>` with the extension lowercased and stripped of dots.
pub fn with_extension(stem: &str, ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

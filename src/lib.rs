#![forbid(unsafe_code)]

//! fetchtube: resolve a video URL, pick a rendition, fetch it with yt-dlp,
//! optionally re-encode it with ffmpeg and hand the file back.

pub mod api;
pub mod artifact;
pub mod config;
pub mod delivery;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod filename;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod platform;
pub mod preflight;
pub mod process;
pub mod selector;
pub mod transcoder;

#[cfg(all(test, unix))]
mod test_support;

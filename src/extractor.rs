#![forbid(unsafe_code)]

//! Metadata extraction through `yt-dlp --dump-single-json`.

use tracing::{info, warn};
use url::Url;

use crate::{
    config::PipelineConfig,
    error::ExtractionError,
    metadata::{VideoMetadata, parse_video_info},
    platform::PlatformId,
    process::ToolCommand,
};

pub const YTDLP_LABEL: &str = "yt-dlp";

/// Flags shared by every yt-dlp invocation: network behaviour and the
/// headers platforms expect from a browser.
pub(crate) fn common_args(
    command: &mut ToolCommand,
    config: &PipelineConfig,
    platform: PlatformId,
) {
    command
        .arg("--no-playlist")
        .arg("--no-check-certificates")
        .arg("--no-warnings")
        .arg("--prefer-free-formats")
        .arg("--socket-timeout")
        .arg(config.socket_timeout.as_secs().max(1).to_string());
    if let Some(referer) = platform.referer() {
        command.arg("--add-header").arg(format!("Referer:{referer}"));
    }
    command
        .arg("--add-header")
        .arg(format!("User-Agent:{}", config.user_agent));
}

pub fn extract_command(config: &PipelineConfig, url: &Url, platform: PlatformId) -> ToolCommand {
    let mut command = ToolCommand::new(YTDLP_LABEL, &config.ytdlp_bin);
    command.arg("--dump-single-json");
    common_args(&mut command, config, platform);
    command.arg(url.as_str());
    command
}

/// Runs the extractor and parses its output. Not retried.
pub async fn extract_metadata(
    config: &PipelineConfig,
    url: &Url,
    platform: PlatformId,
) -> Result<VideoMetadata, ExtractionError> {
    let output = extract_command(config, url, platform)
        .run(config.timeouts.extract)
        .await
        .map_err(ExtractionError::from_process)?;
    if !output.success() {
        let err = ExtractionError::from_exit(&output);
        warn!(%platform, error = %err, "metadata extraction failed");
        return Err(err);
    }
    let metadata =
        parse_video_info(&output.stdout_text(), platform).map_err(ExtractionError::Parse)?;
    info!(
        %platform,
        title = %metadata.title,
        formats = metadata.formats.len(),
        elapsed_ms = output.elapsed.as_millis() as u64,
        "metadata extracted"
    );
    Ok(metadata)
}

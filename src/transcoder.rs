#![forbid(unsafe_code)]

//! Optional H.264/AAC re-encode of a fetched file.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    artifact::ArtifactSet, config::PipelineConfig, error::TranscodeError, process::ToolCommand,
};

pub const FFMPEG_LABEL: &str = "ffmpeg";
const COMPRESSED_SUFFIX: &str = "_compressed.mp4";

/// `clip.webm` becomes `clip_compressed.mp4` in the same directory.
pub fn compressed_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    input.with_file_name(format!("{stem}{COMPRESSED_SUFFIX}"))
}

pub fn transcode_command(config: &PipelineConfig, input: &Path, output: &Path) -> ToolCommand {
    let mut command = ToolCommand::new(FFMPEG_LABEL, &config.ffmpeg_bin);
    command
        .args(["-nostdin", "-y", "-i"])
        .arg(input)
        .args([
            "-c:v", "libx264", "-crf", "23", "-preset", "medium", "-c:a", "aac", "-b:a", "128k",
        ])
        .arg(output);
    command
}

/// Re-encodes `input` and returns the output path. The output is registered
/// with `artifacts` before ffmpeg starts. There is no fallback to the
/// uncompressed input.
pub async fn transcode(
    config: &PipelineConfig,
    input: &Path,
    artifacts: &mut ArtifactSet,
) -> Result<PathBuf, TranscodeError> {
    let output_path = compressed_output_path(input);
    artifacts.register(&output_path);

    let output = transcode_command(config, input, &output_path)
        .run(config.timeouts.transcode)
        .await
        .map_err(TranscodeError::from_process)?;
    if !output.success() {
        let err = TranscodeError::EncoderFailure {
            exit_code: output.exit_code(),
            message: output.stderr_summary(),
        };
        warn!(request_id = artifacts.request_id(), error = %err, "compression failed");
        return Err(err);
    }

    let size = tokio::fs::metadata(&output_path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0);
    if size == 0 {
        return Err(TranscodeError::EmptyOutput);
    }
    info!(
        request_id = artifacts.request_id(),
        bytes = size,
        elapsed_ms = output.elapsed.as_millis() as u64,
        "compression finished"
    );
    Ok(output_path)
}

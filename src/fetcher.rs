#![forbid(unsafe_code)]

//! Materializes the selected rendition inside the request's work directory.

use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::{
    artifact::ArtifactSet,
    config::PipelineConfig,
    error::FetchError,
    extractor::{YTDLP_LABEL, common_args},
    filename::sanitize_title,
    platform::PlatformId,
    process::ToolCommand,
    selector::FormatSelection,
};

/// Printed by yt-dlp once the final file is in place.
const AFTER_MOVE_PRINT: &str = "after_move:%(.{filepath,filesize,filesize_approx,ext})j";

/// Output container requested by the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Webm,
    Mkv,
}

impl Container {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "webm" => Some(Self::Webm),
            "mkv" => Some(Self::Mkv),
            _ => None,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downloaded file owned by the request's [`ArtifactSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    /// Actual size on disk.
    pub size: u64,
    /// Size yt-dlp reported, when it knew one.
    pub reported_size: Option<u64>,
    pub ext: String,
}

#[derive(Debug, Deserialize)]
struct AfterMove {
    filepath: Option<String>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    ext: Option<String>,
}

pub struct FetchPlan<'a> {
    pub url: &'a Url,
    pub platform: PlatformId,
    pub title: &'a str,
    pub selection: &'a FormatSelection,
    pub container: Container,
}

pub fn output_template(artifacts: &ArtifactSet, title: &str) -> PathBuf {
    artifacts.work_dir().join(format!(
        "{}-{}.%(ext)s",
        sanitize_title(title),
        artifacts.discriminator()
    ))
}

pub fn fetch_command(
    config: &PipelineConfig,
    plan: &FetchPlan<'_>,
    template: &Path,
) -> ToolCommand {
    let mut command = ToolCommand::new(YTDLP_LABEL, &config.ytdlp_bin);
    common_args(&mut command, config, plan.platform);
    command
        .arg("--format")
        .arg(&plan.selection.expression)
        .arg("--output")
        .arg(template)
        .arg("--no-progress")
        .arg("--no-simulate")
        .arg("--print")
        .arg(AFTER_MOVE_PRINT);
    // Short-form sources come pre-muxed; forcing a merge only breaks them.
    if !plan.platform.is_short_form() {
        command
            .arg("--merge-output-format")
            .arg(plan.container.as_str());
    }
    command.arg(plan.url.as_str());
    command
}

/// Runs the download. The work directory is already owned by `artifacts`,
/// so partial files are covered on every failure path.
pub async fn fetch(
    config: &PipelineConfig,
    plan: &FetchPlan<'_>,
    artifacts: &mut ArtifactSet,
) -> Result<FetchedFile, FetchError> {
    let template = output_template(artifacts, plan.title);
    let output = fetch_command(config, plan, &template)
        .run(config.timeouts.fetch)
        .await
        .map_err(FetchError::from_process)?;
    if !output.success() {
        let err = FetchError::from_exit(&output);
        warn!(
            request_id = artifacts.request_id(),
            platform = %plan.platform,
            error = %err,
            "download failed"
        );
        return Err(err);
    }

    let stdout = output.stdout_text();
    let fetched = parse_after_move(&stdout, artifacts.work_dir()).await?;
    artifacts.register(&fetched.path);
    info!(
        request_id = artifacts.request_id(),
        platform = %plan.platform,
        format = %plan.selection.descriptor.format_id,
        bytes = fetched.size,
        elapsed_ms = output.elapsed.as_millis() as u64,
        "download finished"
    );
    Ok(fetched)
}

async fn parse_after_move(stdout: &str, work_dir: &Path) -> Result<FetchedFile, FetchError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .ok_or_else(|| FetchError::Parse("download tool printed no result".to_string()))?;
    let printed: AfterMove =
        serde_json::from_str(line).map_err(|err| FetchError::Parse(err.to_string()))?;
    let path = printed
        .filepath
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| FetchError::Parse("download result has no filepath".to_string()))?;
    // Messages reach HTTP clients; the server-side path is only logged.
    let rejected = |reason: &'static str| {
        warn!(path = %path.display(), reason, "unusable download result");
        FetchError::Parse(reason.to_string())
    };
    if !is_inside(&path, work_dir) {
        return Err(rejected("downloaded file is outside the work directory"));
    }
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| rejected("downloaded file is missing"))?;
    if !meta.is_file() {
        return Err(rejected("downloaded path is not a file"));
    }
    let ext = printed
        .ext
        .filter(|ext| !ext.is_empty())
        .or_else(|| {
            path.extension()
                .map(|ext| ext.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    Ok(FetchedFile {
        reported_size: printed
            .filesize
            .or(printed.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map(|size| size as u64),
        size: meta.len(),
        path,
        ext,
    })
}

fn is_inside(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
        && path != dir
        && !path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
}

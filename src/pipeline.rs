#![forbid(unsafe_code)]

//! Request validation and stage sequencing.
//!
//! Info runs classify → extract. Download runs validate → classify →
//! extract → select → fetch → (compress), and hands the result to delivery
//! as a [`PreparedDownload`] that still owns every temporary artifact.

use std::{fmt, path::PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    artifact::ArtifactSet,
    config::PipelineConfig,
    error::{FetchError, PipelineError, PipelineResult, ValidationError},
    extractor::extract_metadata,
    fetcher::{Container, FetchPlan, fetch},
    filename::sanitize_title,
    metadata::VideoMetadata,
    platform::{PlatformId, classify_url, parse_video_url},
    selector::{FormatSelection, select_format},
    transcoder::transcode,
};

/// A height given either as a JSON number or as text such as `"720p"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HeightValue {
    Number(f64),
    Text(String),
}

impl HeightValue {
    /// `Ok(None)` means "no preference" (`""`, `best`, `auto`).
    fn to_height(&self) -> Result<Option<u32>, ValidationError> {
        match self {
            Self::Number(value)
                if value.is_finite() && *value >= 1.0 && *value <= f64::from(u32::MAX) =>
            {
                Ok(Some(*value as u32))
            }
            Self::Number(value) => Err(ValidationError::InvalidHeight(value.to_string())),
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty()
                    || trimmed.eq_ignore_ascii_case("best")
                    || trimmed.eq_ignore_ascii_case("auto")
                {
                    return Ok(None);
                }
                let digits = trimmed
                    .strip_suffix(['p', 'P'])
                    .unwrap_or(trimmed)
                    .trim();
                match digits.parse::<u32>() {
                    Ok(height) if height > 0 => Ok(Some(height)),
                    _ => Err(ValidationError::InvalidHeight(trimmed.to_string())),
                }
            }
        }
    }
}

/// Body of `POST /api/download`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub format: Option<HeightValue>,
    #[serde(default)]
    pub quality: Option<HeightValue>,
    #[serde(default, alias = "output_format", alias = "outputFormat")]
    pub container: Option<String>,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, rename = "fileName", alias = "file_name")]
    pub file_name: Option<String>,
}

/// A request that passed validation. Nothing has been spawned yet.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub url: Url,
    pub platform: PlatformId,
    pub height: u32,
    pub container: Container,
    pub compress: bool,
    pub file_stem: Option<String>,
}

impl DownloadRequest {
    pub fn validate(&self, default_height: u32) -> Result<ValidatedRequest, ValidationError> {
        let (url, platform) = validate_url(&self.url, self.platform.as_deref())?;
        let mut height = None;
        for value in [&self.quality, &self.format].into_iter().flatten() {
            if let Some(parsed) = value.to_height()? {
                height = Some(parsed);
                break;
            }
        }
        let container = match self.container.as_deref().map(str::trim) {
            None | Some("") => Container::default(),
            Some(raw) => Container::parse(raw)
                .ok_or_else(|| ValidationError::UnsupportedContainer(raw.to_string()))?,
        };
        let file_stem = self
            .file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(strip_known_extension)
            .map(sanitize_title);
        Ok(ValidatedRequest {
            url,
            platform,
            height: height.unwrap_or(default_height),
            container,
            compress: self.compress,
            file_stem,
        })
    }
}

fn strip_known_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && Container::parse(ext).is_some() => stem,
        _ => name,
    }
}

/// Parses and classifies a URL, checking it against an optional client hint.
pub fn validate_url(
    raw: &str,
    hint: Option<&str>,
) -> Result<(Url, PlatformId), ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingUrl);
    }
    let url =
        parse_video_url(trimmed).ok_or_else(|| ValidationError::InvalidUrl(trimmed.to_string()))?;
    let platform = classify_url(&url);
    if !platform.is_supported() {
        return Err(ValidationError::UnsupportedPlatform);
    }
    if let Some(hint) = hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        let hinted = PlatformId::parse(hint)
            .ok_or_else(|| ValidationError::UnknownPlatformHint(hint.to_string()))?;
        if hinted != platform {
            return Err(ValidationError::PlatformMismatch {
                hint: hinted.to_string(),
            });
        }
    }
    Ok((url, platform))
}

/// Lifecycle of one download request. Every path ends in `Cleaned`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadState {
    Validating,
    Fetching,
    Compressing,
    Delivering,
    Cleaned,
    FailedValidation,
    FailedFetch,
    FailedCompress,
    FailedDelivery,
}

impl DownloadState {
    pub fn can_transition_to(self, next: DownloadState) -> bool {
        use DownloadState::*;
        matches!(
            (self, next),
            (Validating, Fetching)
                | (Validating, FailedValidation)
                | (Fetching, Compressing)
                | (Fetching, Delivering)
                | (Fetching, FailedFetch)
                | (Compressing, Delivering)
                | (Compressing, FailedCompress)
                | (Delivering, Cleaned)
                | (Delivering, FailedDelivery)
                | (FailedValidation, Cleaned)
                | (FailedFetch, Cleaned)
                | (FailedCompress, Cleaned)
                | (FailedDelivery, Cleaned)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == DownloadState::Cleaned
    }

    /// Failure state reached from `self` when a stage returns `err`.
    pub fn failed(self, err: &PipelineError) -> DownloadState {
        match err {
            PipelineError::Validation(_) => DownloadState::FailedValidation,
            PipelineError::Extraction(_) | PipelineError::Fetch(_) => DownloadState::FailedFetch,
            PipelineError::Transcode(_) => DownloadState::FailedCompress,
            PipelineError::Delivery(_) => DownloadState::FailedDelivery,
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Logs state changes of one request.
#[derive(Debug)]
pub struct StateTracker {
    request_id: String,
    state: DownloadState,
}

impl StateTracker {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: DownloadState::Validating,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn advance(&mut self, next: DownloadState) {
        if !self.state.can_transition_to(next) {
            warn!(
                request_id = %self.request_id,
                from = %self.state,
                to = %next,
                "unexpected download state transition"
            );
        }
        debug!(request_id = %self.request_id, from = %self.state, to = %next, "download state");
        self.state = next;
    }

    /// Moves to the failure state for `err`, then to `Cleaned`.
    pub fn fail(&mut self, err: &PipelineError) {
        let failed = self.state.failed(err);
        self.advance(failed);
        self.advance(DownloadState::Cleaned);
    }
}

/// Info cycle: classify, then extract. Unsupported URLs never reach yt-dlp.
pub async fn fetch_info(
    config: &PipelineConfig,
    raw_url: &str,
    hint: Option<&str>,
) -> PipelineResult<VideoMetadata> {
    let (url, platform) = validate_url(raw_url, hint)?;
    Ok(extract_metadata(config, &url, platform).await?)
}

/// Output of a successful download cycle, ready for delivery.
#[derive(Debug)]
pub struct PreparedDownload {
    pub artifacts: ArtifactSet,
    pub tracker: StateTracker,
    pub path: PathBuf,
    pub title: String,
    /// Suggested filename without extension.
    pub file_stem: String,
    /// Extension of the delivered file.
    pub ext: String,
    pub container: Container,
    pub thumbnail: Option<String>,
    pub selection: FormatSelection,
    pub platform: PlatformId,
    pub compressed: bool,
}

impl PreparedDownload {
    pub fn file_name(&self) -> String {
        crate::filename::with_extension(&self.file_stem, &self.ext)
    }
}

/// Download cycle up to (not including) delivery. On error every artifact
/// created so far has already been deleted when this returns.
pub async fn prepare_download(
    config: &PipelineConfig,
    request: &DownloadRequest,
) -> PipelineResult<PreparedDownload> {
    let mut tracker = StateTracker::new("pending");
    let validated = match request.validate(config.default_height) {
        Ok(validated) => validated,
        Err(err) => {
            let err = PipelineError::from(err);
            tracker.fail(&err);
            return Err(err);
        }
    };

    let mut artifacts = match ArtifactSet::create(&config.temp_root).await {
        Ok(artifacts) => artifacts,
        Err(err) => {
            warn!(
                temp_root = %config.temp_root.display(),
                error = %err,
                "cannot create work directory"
            );
            tracker.advance(DownloadState::Fetching);
            let err = PipelineError::from(FetchError::Disk(format!(
                "cannot create work directory: {err}"
            )));
            tracker.fail(&err);
            return Err(err);
        }
    };
    tracker.request_id = artifacts.request_id().to_string();

    match run_stages(config, &validated, &mut artifacts, &mut tracker).await {
        Ok(staged) => {
            tracker.advance(DownloadState::Delivering);
            Ok(PreparedDownload {
                artifacts,
                tracker,
                path: staged.path,
                title: staged.title,
                file_stem: staged.file_stem,
                ext: staged.ext,
                container: validated.container,
                thumbnail: staged.thumbnail,
                selection: staged.selection,
                platform: validated.platform,
                compressed: validated.compress,
            })
        }
        Err(err) => {
            tracker.fail(&err);
            drop(artifacts);
            Err(err)
        }
    }
}

struct Staged {
    path: PathBuf,
    title: String,
    file_stem: String,
    ext: String,
    thumbnail: Option<String>,
    selection: FormatSelection,
}

async fn run_stages(
    config: &PipelineConfig,
    request: &ValidatedRequest,
    artifacts: &mut ArtifactSet,
    tracker: &mut StateTracker,
) -> PipelineResult<Staged> {
    tracker.advance(DownloadState::Fetching);
    info!(
        request_id = artifacts.request_id(),
        platform = %request.platform,
        height = request.height,
        container = %request.container,
        compress = request.compress,
        "download started"
    );

    let metadata = extract_metadata(config, &request.url, request.platform).await?;
    let selection = select_format(&metadata, request.height, request.platform);
    debug!(
        request_id = artifacts.request_id(),
        format = %selection.descriptor.format_id,
        expression = %selection.expression,
        "format selected"
    );
    let plan = FetchPlan {
        url: &request.url,
        platform: request.platform,
        title: &metadata.title,
        selection: &selection,
        container: request.container,
    };
    let fetched = fetch(config, &plan, artifacts).await?;

    let (path, ext) = if request.compress {
        tracker.advance(DownloadState::Compressing);
        let output = transcode(config, &fetched.path, artifacts).await?;
        (output, "mp4".to_string())
    } else {
        (fetched.path, fetched.ext)
    };

    let file_stem = request
        .file_stem
        .clone()
        .unwrap_or_else(|| sanitize_title(&metadata.title));
    Ok(Staged {
        path,
        title: metadata.title,
        file_stem,
        ext,
        thumbnail: metadata.thumbnail,
        selection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> DownloadRequest {
        serde_json::from_value(value).unwrap()
    }

    const YT: &str = "https://www.youtube.com/watch?v=abc123";

    #[test]
    fn validate_reads_height_from_quality_then_format() {
        let validated = request(json!({"url": YT, "quality": "480p", "format": "1080"}))
            .validate(720)
            .unwrap();
        assert_eq!(validated.height, 480);

        let validated = request(json!({"url": YT, "format": 360})).validate(720).unwrap();
        assert_eq!(validated.height, 360);

        let validated = request(json!({"url": YT, "format": "best"})).validate(720).unwrap();
        assert_eq!(validated.height, 720);

        let validated = request(json!({"url": YT})).validate(1080).unwrap();
        assert_eq!(validated.height, 1080);
        assert_eq!(validated.container, Container::Mp4);
        assert!(!validated.compress);
    }

    #[test]
    fn validate_rejects_non_numeric_height() {
        let err = request(json!({"url": YT, "quality": "hd"}))
            .validate(720)
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidHeight("hd".into()));
        let err = request(json!({"url": YT, "format": -5})).validate(720).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidHeight(_)));
    }

    #[test]
    fn validate_rejects_missing_and_unsupported_urls() {
        assert_eq!(
            request(json!({})).validate(720).unwrap_err(),
            ValidationError::MissingUrl
        );
        assert_eq!(
            request(json!({"url": "https://example.com/video"}))
                .validate(720)
                .unwrap_err(),
            ValidationError::UnsupportedPlatform
        );
        assert!(matches!(
            request(json!({"url": "http://"})).validate(720).unwrap_err(),
            ValidationError::InvalidUrl(_)
        ));
    }

    #[test]
    fn validate_checks_platform_hint() {
        let err = request(json!({"url": YT, "platform": "tiktok"}))
            .validate(720)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::PlatformMismatch {
                hint: "tiktok".into()
            }
        );
        assert!(request(json!({"url": YT, "platform": "YouTube"})).validate(720).is_ok());
        assert!(matches!(
            request(json!({"url": YT, "platform": "vimeo"})).validate(720),
            Err(ValidationError::UnknownPlatformHint(_))
        ));
    }

    #[test]
    fn validate_accepts_container_aliases_and_file_name() {
        let validated = request(json!({
            "url": "youtu.be/abc123",
            "output_format": "webm",
            "compress": true,
            "fileName": "My Holiday.mp4"
        }))
        .validate(720)
        .unwrap();
        assert_eq!(validated.container, Container::Webm);
        assert!(validated.compress);
        assert_eq!(validated.file_stem.as_deref(), Some("my_holiday"));
        assert_eq!(validated.url.scheme(), "https");

        let err = request(json!({"url": YT, "container": "avi"}))
            .validate(720)
            .unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedContainer("avi".into()));
    }

    #[test]
    fn state_machine_allows_only_forward_paths() {
        use DownloadState::*;
        assert!(Validating.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(Delivering));
        assert!(Compressing.can_transition_to(FailedCompress));
        assert!(FailedFetch.can_transition_to(Cleaned));
        assert!(!Cleaned.can_transition_to(Fetching));
        assert!(!Validating.can_transition_to(Delivering));
        assert!(!Delivering.can_transition_to(Compressing));
        assert!(Cleaned.is_terminal());
    }

    #[test]
    fn tracker_failure_ends_cleaned() {
        let mut tracker = StateTracker::new("r1");
        tracker.advance(DownloadState::Fetching);
        tracker.advance(DownloadState::Compressing);
        tracker.fail(&PipelineError::Transcode(
            crate::error::TranscodeError::EmptyOutput,
        ));
        assert_eq!(tracker.state(), DownloadState::Cleaned);
        assert_eq!(tracker.request_id(), "r1");
    }

    #[cfg(unix)]
    mod stubbed {
        use super::*;
        use crate::error::TranscodeError;
        use crate::test_support::{
            YOUTUBE_INFO, copying_ffmpeg, count_entries, failing_ffmpeg, fake_ytdlp,
            helper_pidfile, stalling_ffmpeg, stalling_ytdlp, wait_for_pid, wait_until_gone,
            ytdlp_calls,
        };
        use std::time::Duration;

        struct Harness {
            bin: tempfile::TempDir,
            root: tempfile::TempDir,
            config: PipelineConfig,
        }

        fn harness(ext: &str) -> Harness {
            let bin = tempfile::tempdir().unwrap();
            let root = tempfile::tempdir().unwrap();
            let mut config = PipelineConfig::with_temp_root(root.path().join("fetchtube"));
            config.ytdlp_bin = fake_ytdlp(bin.path(), YOUTUBE_INFO, ext);
            Harness { bin, root, config }
        }

        #[tokio::test]
        async fn info_for_unsupported_url_spawns_nothing() {
            let h = harness("mp4");
            let err = fetch_info(&h.config, "https://example.com/video", None)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                PipelineError::Validation(ValidationError::UnsupportedPlatform)
            ));
            assert_eq!(ytdlp_calls(h.bin.path()), 0);
        }

        #[tokio::test]
        async fn info_returns_metadata() {
            let h = harness("mp4");
            let meta = fetch_info(&h.config, YT, Some("youtube")).await.unwrap();
            assert_eq!(meta.title, "Demo Clip");
            assert_eq!(meta.platform, PlatformId::Youtube);
            assert_eq!(ytdlp_calls(h.bin.path()), 1);
        }

        #[tokio::test]
        async fn download_selects_720p_and_names_file() {
            let h = harness("mp4");
            let prepared = prepare_download(&h.config, &request(json!({"url": YT, "quality": 720})))
                .await
                .unwrap();
            assert_eq!(prepared.selection.descriptor.format_id, "22");
            assert!(prepared.path.exists());
            assert!(prepared.file_name().ends_with(".mp4"));
            assert_eq!(prepared.file_name(), "demo_clip.mp4");
            assert_eq!(prepared.tracker.state(), DownloadState::Delivering);
            assert_eq!(ytdlp_calls(h.bin.path()), 2);

            let path = prepared.path.clone();
            drop(prepared);
            assert!(!path.exists());
            assert_eq!(count_entries(&h.config.temp_root), 0);
        }

        #[tokio::test]
        async fn download_with_compression_delivers_mp4() {
            let mut h = harness("webm");
            h.config.ffmpeg_bin = copying_ffmpeg(h.bin.path());
            let prepared = prepare_download(
                &h.config,
                &request(json!({"url": YT, "container": "webm", "compress": true})),
            )
            .await
            .unwrap();
            assert!(prepared.path.to_string_lossy().ends_with("_compressed.mp4"));
            assert_eq!(prepared.ext, "mp4");
            assert_eq!(prepared.artifacts.paths().len(), 2);
            drop(prepared);
            assert_eq!(count_entries(&h.config.temp_root), 0);
        }

        #[tokio::test]
        async fn encoder_failure_removes_every_artifact() {
            let mut h = harness("mp4");
            h.config.ffmpeg_bin = failing_ffmpeg(h.bin.path());
            let err = prepare_download(&h.config, &request(json!({"url": YT, "compress": true})))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                PipelineError::Transcode(TranscodeError::EncoderFailure { .. })
            ));
            assert_eq!(count_entries(&h.config.temp_root), 0);
        }

        #[tokio::test]
        async fn validation_failure_creates_no_work_dir() {
            let h = harness("mp4");
            let unsupported = request(json!({"url": "https://example.com/video"}));
            let err = prepare_download(&h.config, &unsupported).await.unwrap_err();
            assert!(matches!(err, PipelineError::Validation(_)));
            assert!(!h.config.temp_root.exists());
            assert_eq!(ytdlp_calls(h.bin.path()), 0);
        }

        #[tokio::test]
        async fn unwritable_temp_root_is_a_disk_error() {
            let h = harness("mp4");
            let blocker = h.root.path().join("file");
            std::fs::write(&blocker, b"x").unwrap();
            let mut config = h.config.clone();
            config.temp_root = blocker.join("nested");
            let err = prepare_download(&config, &request(json!({"url": YT})))
                .await
                .unwrap_err();
            assert!(matches!(err, PipelineError::Fetch(FetchError::Disk(_))));
            assert!(!err.to_string().contains(&*h.root.path().to_string_lossy()));
        }

        #[tokio::test]
        async fn cancelled_download_kills_fetch_and_removes_artifacts() {
            let mut h = harness("mp4");
            h.config.ytdlp_bin = stalling_ytdlp(h.bin.path(), YOUTUBE_INFO);
            let pidfile = helper_pidfile(h.bin.path());
            let body = request(json!({"url": YT}));

            let helper = {
                let download = prepare_download(&h.config, &body);
                tokio::pin!(download);
                tokio::select! {
                    result = &mut download => panic!("download finished: {result:?}"),
                    pid = wait_for_pid(&pidfile) => pid,
                }
            };
            assert!(wait_until_gone(helper).await, "helper {helper} still running");
            assert_eq!(count_entries(&h.config.temp_root), 0);
        }

        #[tokio::test]
        async fn fetch_timeout_kills_helpers_and_removes_artifacts() {
            let mut h = harness("mp4");
            h.config.ytdlp_bin = stalling_ytdlp(h.bin.path(), YOUTUBE_INFO);
            h.config.timeouts.fetch = Duration::from_millis(500);
            let err = prepare_download(&h.config, &request(json!({"url": YT})))
                .await
                .unwrap_err();
            assert!(
                matches!(err, PipelineError::Fetch(FetchError::Timeout(_))),
                "{err:?}"
            );
            assert_eq!(err.to_string(), "download timed out after 500ms");
            let helper = wait_for_pid(&helper_pidfile(h.bin.path())).await;
            assert!(wait_until_gone(helper).await, "helper {helper} still running");
            assert_eq!(count_entries(&h.config.temp_root), 0);
        }

        #[tokio::test]
        async fn transcode_timeout_kills_encoder_and_removes_artifacts() {
            let mut h = harness("mp4");
            h.config.ffmpeg_bin = stalling_ffmpeg(h.bin.path());
            h.config.timeouts.transcode = Duration::from_millis(500);
            let err = prepare_download(&h.config, &request(json!({"url": YT, "compress": true})))
                .await
                .unwrap_err();
            assert!(
                matches!(err, PipelineError::Transcode(TranscodeError::Timeout(_))),
                "{err:?}"
            );
            let helper = wait_for_pid(&helper_pidfile(h.bin.path())).await;
            assert!(wait_until_gone(helper).await, "helper {helper} still running");
            assert_eq!(count_entries(&h.config.temp_root), 0);
        }

        #[tokio::test]
        async fn cancelled_compression_kills_encoder_and_removes_artifacts() {
            let mut h = harness("mp4");
            h.config.ffmpeg_bin = stalling_ffmpeg(h.bin.path());
            let pidfile = helper_pidfile(h.bin.path());
            let body = request(json!({"url": YT, "compress": true}));

            let helper = {
                let download = prepare_download(&h.config, &body);
                tokio::pin!(download);
                tokio::select! {
                    result = &mut download => panic!("download finished: {result:?}"),
                    pid = wait_for_pid(&pidfile) => pid,
                }
            };
            assert!(wait_until_gone(helper).await, "helper {helper} still running");
            assert_eq!(count_entries(&h.config.temp_root), 0);
        }
    }
}

#![forbid(unsafe_code)]

//! Error taxonomy of the acquisition pipeline. Every stage classifies its own
//! failures; nothing here carries a raw process handle or backtrace.

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::process::{ProcessError, ToolOutput};

/// Rejected before any subprocess runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is required")]
    MissingUrl,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported platform; supported: YouTube, Facebook, Instagram, TikTok, Pinterest")]
    UnsupportedPlatform,
    #[error("URL does not belong to the selected platform {hint}")]
    PlatformMismatch { hint: String },
    #[error("unknown platform hint: {0}")]
    UnknownPlatformHint(String),
    #[error("requested quality is not a height: {0}")]
    InvalidHeight(String),
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("metadata tool failure (exit code {}): {message}", display_code(.exit_code))]
    ToolFailure {
        exit_code: Option<i32>,
        message: String,
    },
    #[error("could not parse video metadata: {0}")]
    Parse(String),
    #[error("metadata extraction timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download tool failure (exit code {}): {message}", display_code(.exit_code))]
    ToolFailure {
        exit_code: Option<i32>,
        message: String,
    },
    #[error("could not read download result: {0}")]
    Parse(String),
    #[error("download timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not write download to disk: {0}")]
    Disk(String),
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("encoder failure (exit code {}): {message}", display_code(.exit_code))]
    EncoderFailure {
        exit_code: Option<i32>,
        message: String,
    },
    #[error("compression produced an empty file")]
    EmptyOutput,
    #[error("compression timed out after {0:?}")]
    Timeout(Duration),
}

/// Paths are kept for logs only; messages reach HTTP clients.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("downloaded file is missing")]
    Missing(PathBuf),
    #[error("downloaded file is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Any failure of an Info or Download request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |code| code.to_string())
}

impl ExtractionError {
    pub(crate) fn from_process(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { deadline, .. } => Self::Timeout(deadline),
            other => Self::ToolFailure {
                exit_code: None,
                message: other.to_string(),
            },
        }
    }

    pub(crate) fn from_exit(output: &ToolOutput) -> Self {
        Self::ToolFailure {
            exit_code: output.exit_code(),
            message: output.stderr_summary(),
        }
    }
}

const DISK_MARKERS: [&str; 4] = [
    "No space left on device",
    "Permission denied",
    "Read-only file system",
    "Disk quota exceeded",
];

impl FetchError {
    pub(crate) fn from_process(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { deadline, .. } => Self::Timeout(deadline),
            other => Self::ToolFailure {
                exit_code: None,
                message: other.to_string(),
            },
        }
    }

    /// Classifies a failed download, separating storage problems from
    /// upstream/tool problems.
    pub(crate) fn from_exit(output: &ToolOutput) -> Self {
        let stderr = output.stderr_text();
        if let Some(marker) = DISK_MARKERS.iter().find(|marker| stderr.contains(*marker)) {
            return Self::Disk((*marker).to_string());
        }
        Self::ToolFailure {
            exit_code: output.exit_code(),
            message: output.stderr_summary(),
        }
    }
}

impl TranscodeError {
    pub(crate) fn from_process(err: ProcessError) -> Self {
        match err {
            ProcessError::Timeout { deadline, .. } => Self::Timeout(deadline),
            other => Self::EncoderFailure {
                exit_code: None,
                message: other.to_string(),
            },
        }
    }
}

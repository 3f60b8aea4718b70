#![forbid(unsafe_code)]

//! Hands the final artifact to the caller and releases the request's
//! temporary files afterwards.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use mime_guess::MimeGuess;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::{
    artifact::ArtifactSet,
    error::DeliveryError,
    pipeline::{DownloadState, PreparedDownload, StateTracker},
};

pub const X_VIDEO_TITLE: HeaderName = HeaderName::from_static("x-video-title");
pub const X_VIDEO_THUMBNAIL: HeaderName = HeaderName::from_static("x-video-thumbnail");
pub const X_VIDEO_CONTAINER: HeaderName = HeaderName::from_static("x-video-container");
pub const X_VIDEO_FORMAT: HeaderName = HeaderName::from_static("x-video-format");
pub const X_VIDEO_HEIGHT: HeaderName = HeaderName::from_static("x-video-height");

/// Headers browsers may read from a download response.
pub const EXPOSED_HEADERS: [HeaderName; 6] = [
    header::CONTENT_DISPOSITION,
    X_VIDEO_TITLE,
    X_VIDEO_THUMBNAIL,
    X_VIDEO_CONTAINER,
    X_VIDEO_FORMAT,
    X_VIDEO_HEIGHT,
];

/// Keeps the artifacts alive for as long as the response body exists. The
/// set itself is dropped right after this guard, which deletes it.
struct ReleaseOnDrop {
    tracker: StateTracker,
    _artifacts: ArtifactSet,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.tracker.advance(DownloadState::Cleaned);
        info!(request_id = self.tracker.request_id(), "download delivered, releasing artifacts");
    }
}

/// `attachment; filename="clip.mp4"; filename*=UTF-8''clip.mp4`
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(file_name)
    )
}

async fn open_final(path: &Path) -> Result<(File, u64), DeliveryError> {
    open_checked(path).await.inspect_err(|err| {
        warn!(path = %path.display(), error = %err, "cannot deliver downloaded file");
    })
}

async fn open_checked(path: &Path) -> Result<(File, u64), DeliveryError> {
    let file = File::open(path).await.map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => DeliveryError::Missing(path.to_path_buf()),
        _ => DeliveryError::Unreadable {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let metadata = file
        .metadata()
        .await
        .map_err(|source| DeliveryError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
    if !metadata.is_file() {
        return Err(DeliveryError::Missing(path.to_path_buf()));
    }
    Ok((file, metadata.len()))
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: impl AsRef<str>) {
    if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
        headers.insert(name, value);
    }
}

/// Streams the prepared file. The artifact set moves into the body, so it is
/// released once the body is fully sent or dropped by a disconnecting client.
/// On error `prepared` is dropped here, which releases it as well.
pub async fn into_response(prepared: PreparedDownload) -> Result<Response, DeliveryError> {
    let (file, size) = match open_final(&prepared.path).await {
        Ok(opened) => opened,
        Err(err) => {
            let PreparedDownload {
                artifacts,
                mut tracker,
                ..
            } = prepared;
            tracker.advance(DownloadState::FailedDelivery);
            drop(ReleaseOnDrop {
                tracker,
                _artifacts: artifacts,
            });
            return Err(err);
        }
    };
    let file_name = prepared.file_name();
    let content_type = MimeGuess::from_path(&prepared.path).first_or_octet_stream();

    let PreparedDownload {
        artifacts,
        tracker,
        title,
        thumbnail,
        container,
        selection,
        ..
    } = prepared;
    let guard = ReleaseOnDrop {
        tracker,
        _artifacts: artifacts,
    };
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _ = &guard;
        chunk
    });

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    insert(headers, header::CONTENT_TYPE, content_type.essence_str());
    insert(headers, header::CONTENT_LENGTH, size.to_string());
    insert(headers, header::CONTENT_DISPOSITION, content_disposition(&file_name));
    insert(headers, X_VIDEO_TITLE, urlencoding::encode(&title));
    if let Some(thumbnail) = thumbnail.as_deref() {
        insert(headers, X_VIDEO_THUMBNAIL, urlencoding::encode(thumbnail));
    }
    insert(headers, X_VIDEO_CONTAINER, container.as_str());
    insert(headers, X_VIDEO_FORMAT, urlencoding::encode(&selection.descriptor.format_id));
    insert(headers, X_VIDEO_HEIGHT, selection.descriptor.height.to_string());
    Ok(response)
}

/// Copies the prepared file into `dir` under its suggested name, then
/// releases the artifacts. Used by the command line front end.
pub async fn save_to_dir(
    prepared: PreparedDownload,
    dir: &Path,
) -> Result<PathBuf, DeliveryError> {
    let PreparedDownload {
        artifacts,
        tracker,
        path,
        file_stem,
        ext,
        ..
    } = prepared;
    let guard = ReleaseOnDrop {
        tracker,
        _artifacts: artifacts,
    };
    open_final(&path).await?;

    let destination = dir.join(crate::filename::with_extension(&file_stem, &ext));
    tokio::fs::copy(&path, &destination)
        .await
        .map_err(|source| DeliveryError::Unreadable {
            path: path.clone(),
            source,
        })?;
    drop(guard);
    Ok(destination)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::shutdown::ShutdownCoordinator;

/// Context for tracking a download in concurrent scenarios
#[derive(Debug, Clone)]
pub struct DownloadContext {
    /// Slot ID (0 to max_concurrent-1) for progress bar management
    pub download_id: usize,
    /// Position of the episode in the feed
    pub episode_index: usize,
    /// Number of entries considered in this run
    pub total_episodes: usize,
    pub episode_title: String,
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub bytes_downloaded: u64,
    /// Hex SHA-256 of the downloaded payload
    pub sha256: String,
}

/// Download `url` to `output_path`, streaming the body chunk by chunk.
///
/// On any failure, including cancellation through `shutdown`, the partially
/// written file is removed before the error is returned. No retries.
pub async fn download_episode<C: HttpClient>(
    client: &C,
    url: &str,
    output_path: &Path,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
    shutdown: &ShutdownCoordinator,
) -> Result<DownloadResult, DownloadError> {
    let result = stream_to_file(client, url, output_path, context, reporter, shutdown).await;

    if result.is_err() {
        remove_partial(output_path).await;
    }

    result
}

async fn stream_to_file<C: HttpClient>(
    client: &C,
    url: &str,
    output_path: &Path,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
    shutdown: &ShutdownCoordinator,
) -> Result<DownloadResult, DownloadError> {
    let cancelled = || DownloadError::Cancelled {
        url: url.to_string(),
    };

    let response = tokio::select! {
        biased;
        _ = shutdown.wait_for_shutdown() => return Err(cancelled()),
        response = client.get_stream(url) => response.map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?,
    };

    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    reporter.report(ProgressEvent::DownloadStarting {
        download_id: context.download_id,
        episode_title: context.episode_title.clone(),
        episode_index: context.episode_index,
        total_episodes: context.total_episodes,
        content_length: response.content_length,
    });

    let mut file =
        File::create(output_path)
            .await
            .map_err(|e| DownloadError::FileCreateFailed {
                path: output_path.to_path_buf(),
                source: e,
            })?;

    let mut hasher = Sha256::new();
    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => return Err(cancelled()),
            next = stream.next() => next,
        };

        let Some(chunk_result) = next else {
            break;
        };

        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: output_path.to_path_buf(),
                source: e,
            })?;

        hasher.update(&chunk);
        bytes_downloaded += chunk.len() as u64;

        reporter.report(ProgressEvent::DownloadProgress {
            download_id: context.download_id,
            episode_title: context.episode_title.clone(),
            bytes_downloaded,
            total_bytes: response.content_length,
        });
    }

    // Ensure all data is flushed to disk
    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: output_path.to_path_buf(),
            source: e,
        })?;

    reporter.report(ProgressEvent::DownloadCompleted {
        download_id: context.download_id,
        episode_title: context.episode_title.clone(),
        bytes_downloaded,
    });

    Ok(DownloadResult {
        bytes_downloaded,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not remove partial download")
        }
    }
}

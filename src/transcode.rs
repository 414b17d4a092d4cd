// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Normalization of downloaded audio through an external encoder.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::TranscodeError;

/// Target codec and bitrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub codec: String,
    pub bitrate: String,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: "128k".to_string(),
        }
    }
}

/// Something that can turn `src` into `dst` in the target format.
///
/// Implementations must leave `dst` untouched when they fail.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn encode(
        &self,
        src: &Path,
        dst: &Path,
        options: &TranscodeOptions,
    ) -> Result<(), TranscodeError>;
}

/// Transcoder backed by the `ffmpeg` command line tool
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    /// Use a specific executable instead of `ffmpeg` from PATH
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check that the encoder can be started, returning its version banner
    pub async fn check_available(&self) -> Result<String, TranscodeError> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    fn spawn_error(&self, source: std::io::Error) -> TranscodeError {
        if source.kind() == std::io::ErrorKind::NotFound {
            TranscodeError::ToolMissing {
                program: self.program.clone(),
            }
        } else {
            TranscodeError::SpawnFailed {
                program: self.program.clone(),
                source,
            }
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Hidden sibling of `dst` the encoder writes to before it is moved into place.
/// Keeps the extension so the encoder still picks the right container.
fn staging_path(dst: &Path) -> PathBuf {
    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (file_name.clone(), String::new()),
    };
    dst.with_file_name(format!(".{stem}.transcoding{ext}"))
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn encode(
        &self,
        src: &Path,
        dst: &Path,
        options: &TranscodeOptions,
    ) -> Result<(), TranscodeError> {
        let staging = staging_path(dst);
        let _staging_guard = RemoveOnDrop::new(&staging);

        let output = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-nostdin")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(src)
            .arg("-vn")
            .args(["-c:a", options.codec.as_str()])
            .args(["-b:a", options.bitrate.as_str()])
            .arg("-y")
            .arg(&staging)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::NonZeroExit {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        tokio::fs::rename(&staging, dst)
            .await
            .map_err(|e| TranscodeError::CommitFailed {
                path: dst.to_path_buf(),
                source: e,
            })
    }
}

/// Deletes a file when dropped, whatever path the scope exits through
struct RemoveOnDrop(PathBuf);

impl RemoveOnDrop {
    fn new(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.0.display(), error = %e, "could not remove temporary file");
        }
    }
}

/// Encode `src` into `dst`, removing `src` afterwards on every outcome
pub async fn transcode(
    transcoder: &dyn Transcoder,
    src: &Path,
    dst: &Path,
    options: &TranscodeOptions,
) -> Result<(), TranscodeError> {
    let _source_guard = RemoveOnDrop::new(src);
    transcoder.encode(src, dst, options).await
}

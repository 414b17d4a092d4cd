// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use url::Url;

use crate::feed::EpisodeEntry;

/// Maximum length in bytes of a sanitized base name, leaving room for
/// a disambiguation suffix and extension within the usual 255 byte limit
const MAX_BASE_NAME_BYTES: usize = 200;

/// Extension of transcoded audio
pub const AUDIO_EXTENSION: &str = "m4a";

/// Name of the in-progress download inside an episode directory
pub const TEMP_DOWNLOAD_NAME: &str = "temp_download";

/// Characters replaced on top of what is unsafe for the filesystem itself
fn is_reserved_char(c: char) -> bool {
    matches!(
        c,
        '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' | '#' | '%' | '&' | '{' | '}' | '('
            | ')' | '@'
    )
}

/// Turn a title into a name usable as both directory and file stem.
///
/// Non-ASCII text is preserved; only reserved characters are replaced.
/// May return an empty string when nothing usable remains.
pub fn sanitize_title(title: &str) -> String {
    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");

    let replaced: String = collapsed
        .chars()
        .map(|c| if is_reserved_char(c) { '_' } else { c })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    let truncated = truncate_at_char_boundary(trimmed, MAX_BASE_NAME_BYTES).trim_end();

    // Catches control characters and device names such as CON or NUL
    let options = sanitize_filename::Options {
        windows: true,
        truncate: true,
        replacement: "_",
    };
    sanitize_filename::sanitize_with_options(truncated, options)
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Base name for an episode directory and its files.
///
/// Falls back to `episode_<n>` (1-based feed position) for titles that
/// sanitize to nothing.
pub fn episode_base_name(entry: &EpisodeEntry, index: usize) -> String {
    let sanitized = sanitize_title(&entry.title);
    if sanitized.is_empty() {
        format!("episode_{}", index + 1)
    } else {
        sanitized
    }
}

/// Locations belonging to a single episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodePaths {
    pub base_name: String,
    pub dir: PathBuf,
    pub audio: PathBuf,
    pub record: PathBuf,
    pub temp: PathBuf,
}

impl EpisodePaths {
    /// Paths for `<episodes_dir>/<base>/<base>.{m4a,json}`
    pub fn new(episodes_dir: &Path, base_name: &str) -> Self {
        Self::with_extension(episodes_dir, base_name, AUDIO_EXTENSION)
    }

    /// Same layout with a different audio extension
    pub fn with_extension(episodes_dir: &Path, base_name: &str, extension: &str) -> Self {
        let dir = episodes_dir.join(base_name);
        Self {
            base_name: base_name.to_string(),
            audio: dir.join(format!("{base_name}.{extension}")),
            record: dir.join(format!("{base_name}.json")),
            temp: dir.join(TEMP_DOWNLOAD_NAME),
            dir,
        }
    }
}

/// Get the audio file extension of an entry's enclosure
///
/// Attempts to extract from URL path or MIME type, defaults to "mp3"
pub fn get_audio_extension(entry: &EpisodeEntry) -> String {
    let Some(enclosure) = entry.enclosure.as_ref() else {
        return "mp3".to_string();
    };

    // Try to get extension from URL path
    if let Some(ext) = Url::parse(&enclosure.url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(|filename| filename.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        })
        .filter(|ext| is_valid_audio_extension(ext))
    {
        return ext.to_lowercase();
    }

    // Try to get extension from MIME type
    if let Some(ref mime) = enclosure.mime_type
        && let Some(ext) = mime_to_extension(mime)
    {
        return ext.to_string();
    }

    "mp3".to_string()
}

/// Check if a string is a valid audio file extension
fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "opus" | "wav" | "flac"
    )
}

/// Map MIME types to file extensions
fn mime_to_extension(mime: &str) -> Option<&'static str> {
    match mime.to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::feed::Podcast;

pub const PODCAST_METADATA_FILENAME: &str = "podcast_info.json";

/// Serializable show-level metadata, rewritten on every sync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastMetadata {
    pub title: String,
    pub description: String,
    pub link: String,
    pub language: String,
    pub author: String,
    pub image: String,
    pub copyright: String,
    pub last_updated: String,
    pub feed_url: String,
    pub synced_at: String,
}

impl PodcastMetadata {
    /// Create metadata from a parsed Podcast
    pub fn from_podcast(podcast: &Podcast) -> Self {
        Self {
            title: podcast.title.clone(),
            description: podcast.description.clone(),
            link: podcast.link.clone(),
            language: podcast.language.clone(),
            author: podcast.author.clone(),
            image: podcast.image_url.clone(),
            copyright: podcast.rights.clone(),
            last_updated: podcast.last_updated.clone(),
            feed_url: podcast.feed_url.clone(),
            synced_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Write podcast metadata to the output directory, replacing any previous copy
pub fn write_podcast_metadata(podcast: &Podcast, output_dir: &Path) -> Result<(), MetadataError> {
    let metadata = PodcastMetadata::from_podcast(podcast);
    let path = output_dir.join(PODCAST_METADATA_FILENAME);

    let json = serde_json::to_string_pretty(&metadata)?;
    std::fs::write(&path, json).map_err(|e| MetadataError::WriteFailed { path, source: e })
}

/// Read podcast metadata from the output directory
pub fn read_podcast_metadata(output_dir: &Path) -> Result<PodcastMetadata, MetadataError> {
    let path = output_dir.join(PODCAST_METADATA_FILENAME);

    let content = std::fs::read_to_string(&path).map_err(|e| MetadataError::ReadFailed {
        path: path.clone(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| MetadataError::JsonParseFailed { path, source: e })
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MetadataError;
use crate::feed::EpisodeEntry;
use crate::identity::{IdentityKey, url_hash};

/// Per-episode JSON sidecar; doubles as the dedup ledger.
///
/// `guid` and `audio_url_hash` are empty strings when absent so that the
/// on-disk shape stays stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeRecord {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub published: Option<DateTime<FixedOffset>>,
    pub link: String,
    pub author: String,
    pub tags: Vec<String>,
    pub duration: String,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub episode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub season: Option<u32>,
    #[serde(deserialize_with = "lenient_flag")]
    pub explicit: bool,
    pub image: String,
    pub guid: String,
    pub audio_url_hash: String,
    pub audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub audio_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl EpisodeRecord {
    /// Build a record from a parsed entry
    pub fn from_entry(
        entry: &EpisodeEntry,
        audio_filename: &str,
        source_sha256: Option<String>,
    ) -> Self {
        let audio_url = entry
            .enclosure
            .as_ref()
            .map(|enc| enc.url.clone())
            .unwrap_or_default();

        Self {
            title: entry.title.clone(),
            description: entry.description.clone(),
            published: entry.published,
            link: entry.link.clone(),
            author: entry.author.clone(),
            tags: entry.tags.clone(),
            duration: entry.duration.clone(),
            episode: entry.episode_number,
            season: entry.season_number,
            explicit: entry.explicit,
            image: entry.image_url.clone(),
            guid: entry.guid.clone().unwrap_or_default(),
            audio_url_hash: if audio_url.is_empty() {
                String::new()
            } else {
                url_hash(&audio_url)
            },
            audio_url,
            mime_type: entry.enclosure.as_ref().and_then(|enc| enc.mime_type.clone()),
            audio_filename: audio_filename.to_string(),
            source_sha256,
            saved_at: Some(Utc::now()),
        }
    }

    /// Whether this record describes the episode with the given identity.
    ///
    /// Either stored identifier may match; empty stored values never match.
    pub fn matches(&self, guid: Option<&str>, audio_url_hash: Option<&str>) -> bool {
        let guid_match = !self.guid.is_empty() && guid == Some(self.guid.as_str());
        let hash_match =
            !self.audio_url_hash.is_empty() && audio_url_hash == Some(self.audio_url_hash.as_str());
        guid_match || hash_match
    }

    /// Identity this record was stored under
    pub fn identity(&self) -> Option<IdentityKey> {
        if !self.guid.is_empty() {
            Some(IdentityKey::Guid(self.guid.clone()))
        } else if !self.audio_url_hash.is_empty() {
            Some(IdentityKey::UrlHash(self.audio_url_hash.clone()))
        } else {
            None
        }
    }
}

// Records written by older tools store unknown values as "" rather than
// omitting them; those read back as absent instead of failing the record.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => {
            matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "explicit")
        }
        _ => false,
    })
}

/// Write an episode record to a JSON file
pub fn write_episode_record(record: &EpisodeRecord, path: &Path) -> Result<(), MetadataError> {
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(path, json).map_err(|e| MetadataError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read an episode record from a JSON file
pub fn read_episode_record(path: &Path) -> Result<EpisodeRecord, MetadataError> {
    let content = std::fs::read_to_string(path).map_err(|e| MetadataError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| MetadataError::JsonParseFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

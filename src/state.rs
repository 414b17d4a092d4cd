// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::episode::{AUDIO_EXTENSION, EpisodePaths, TEMP_DOWNLOAD_NAME};
use crate::error::StateError;
use crate::feed::EpisodeEntry;
use crate::identity::{IdentityKey, url_hash};
use crate::metadata::{EpisodeRecord, read_episode_record, write_episode_record};

/// Name of the directory holding one subdirectory per episode
pub const EPISODES_DIR_NAME: &str = "episodes";

/// Create `output_dir` and its `episodes/` subdirectory, returning the latter
pub fn prepare_output_dir(output_dir: &Path) -> Result<PathBuf, StateError> {
    let episodes_dir = output_dir.join(EPISODES_DIR_NAME);
    std::fs::create_dir_all(&episodes_dir).map_err(|e| StateError::CreateDirectoryFailed {
        path: episodes_dir.clone(),
        source: e,
    })?;
    Ok(episodes_dir)
}

/// Whether the episode at `paths` is complete and belongs to `entry`.
///
/// Requires a non-empty audio file, a readable record, and a record whose
/// stored GUID or audio URL hash equals the entry's. A corrupt record
/// counts as not downloaded.
pub fn is_downloaded(paths: &EpisodePaths, entry: &EpisodeEntry) -> bool {
    let audio_present = std::fs::metadata(&paths.audio)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);

    if !audio_present || !paths.record.is_file() {
        return false;
    }

    let entry_hash = entry
        .enclosure
        .as_ref()
        .filter(|enc| !enc.url.is_empty())
        .map(|enc| url_hash(&enc.url));

    match read_episode_record(&paths.record) {
        Ok(record) => record.matches(entry.guid.as_deref(), entry_hash.as_deref()),
        Err(e) => {
            tracing::warn!(error = %e, "unreadable episode record, treating episode as missing");
            false
        }
    }
}

/// Write the record for `entry` next to its audio.
///
/// Creates the episode directory if needed. Errors are logged and reported
/// as `false`; they never abort a sync.
pub fn save_episode(entry: &EpisodeEntry, paths: &EpisodePaths, source_sha256: Option<String>) -> bool {
    if let Err(e) = std::fs::create_dir_all(&paths.dir) {
        tracing::warn!(path = %paths.dir.display(), error = %e, "could not create episode directory");
        return false;
    }

    let audio_filename = paths
        .audio
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let record = EpisodeRecord::from_entry(entry, &audio_filename, source_sha256);

    match write_episode_record(&record, &paths.record) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "could not save episode record");
            false
        }
    }
}

/// Index of every episode record under `episodes/`, keyed by identity.
///
/// Lets an episode be recognised after its title (and so its directory
/// name) changed, and keeps two different episodes from sharing a directory.
#[derive(Debug, Default)]
pub struct EpisodeLedger {
    episodes_dir: PathBuf,
    by_identity: HashMap<IdentityKey, EpisodePaths>,
    owners: HashMap<PathBuf, IdentityKey>,
    /// Leftover temporary files removed during the scan
    pub temp_files_cleaned: usize,
}

impl EpisodeLedger {
    /// Read all records below `episodes_dir`.
    ///
    /// Also deletes temporary download and staging files left behind by
    /// an interrupted earlier run.
    pub fn scan(episodes_dir: &Path) -> Result<Self, StateError> {
        let mut ledger = Self {
            episodes_dir: episodes_dir.to_path_buf(),
            ..Default::default()
        };

        if !episodes_dir.exists() {
            return Ok(ledger);
        }

        let read_dir = |path: &Path| {
            std::fs::read_dir(path).map_err(|e| StateError::ReadDirectoryFailed {
                path: path.to_path_buf(),
                source: e,
            })
        };

        for dir_entry in read_dir(episodes_dir)?.flatten() {
            let dir = dir_entry.path();
            if !dir.is_dir() {
                continue;
            }

            for file_entry in read_dir(&dir)?.flatten() {
                let path = file_entry.path();
                let file_name = file_entry.file_name().to_string_lossy().into_owned();

                if is_leftover_temp(&file_name) {
                    if std::fs::remove_file(&path).is_ok() {
                        ledger.temp_files_cleaned += 1;
                    }
                    continue;
                }

                let Some(base_name) = file_name.strip_suffix(".json") else {
                    continue;
                };

                let record = match read_episode_record(&path) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unreadable record during scan");
                        continue;
                    }
                };

                let extension = Path::new(&record.audio_filename)
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_else(|| AUDIO_EXTENSION.to_string());
                let paths = EpisodePaths::with_extension(episodes_dir, base_name, &extension);

                for key in record_keys(&record) {
                    ledger.owners.entry(paths.dir.clone()).or_insert(key.clone());
                    ledger.by_identity.entry(key).or_insert_with(|| paths.clone());
                }
            }
        }

        Ok(ledger)
    }

    /// Number of identities known to the ledger
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    /// Paths previously used for the episode `entry` refers to.
    ///
    /// A URL hash match is ignored when the directory belongs to a
    /// different guid: two episodes may share an enclosure URL.
    pub fn lookup(&self, entry: &EpisodeEntry) -> Option<&EpisodePaths> {
        let guid = entry.guid.as_deref().filter(|g| !g.trim().is_empty());
        entry_keys(entry).into_iter().find_map(|key| {
            let paths = self.by_identity.get(&key)?;
            let foreign = matches!(key, IdentityKey::UrlHash(_))
                && guid.is_some()
                && matches!(
                    self.owners.get(&paths.dir),
                    Some(IdentityKey::Guid(owner)) if Some(owner.as_str()) != guid
                );
            (!foreign).then_some(paths)
        })
    }

    /// Choose where `entry` lives and reserve that location for `identity`.
    ///
    /// Known episodes keep their directory. A new episode whose sanitized
    /// name is already owned by a different identity gets the identity's
    /// short tag appended to its name.
    pub fn assign(
        &mut self,
        entry: &EpisodeEntry,
        identity: &IdentityKey,
        base_name: &str,
        extension: &str,
    ) -> EpisodePaths {
        if let Some(paths) = self.lookup(entry) {
            return paths.clone();
        }

        let mut paths = EpisodePaths::with_extension(&self.episodes_dir, base_name, extension);
        if self
            .owners
            .get(&paths.dir)
            .is_some_and(|owner| owner != identity)
        {
            let tagged = format!("{}-{}", base_name, identity.short_tag());
            tracing::info!(
                from = base_name,
                to = tagged.as_str(),
                "directory name taken by another episode, disambiguating"
            );
            paths = EpisodePaths::with_extension(&self.episodes_dir, &tagged, extension);
        }

        self.owners.insert(paths.dir.clone(), identity.clone());
        self.by_identity.insert(identity.clone(), paths.clone());
        paths
    }
}

fn is_leftover_temp(file_name: &str) -> bool {
    file_name == TEMP_DOWNLOAD_NAME || (file_name.starts_with('.') && file_name.contains(".transcoding"))
}

fn record_keys(record: &EpisodeRecord) -> Vec<IdentityKey> {
    let mut keys = Vec::with_capacity(2);
    if !record.guid.is_empty() {
        keys.push(IdentityKey::Guid(record.guid.clone()));
    }
    if !record.audio_url_hash.is_empty() {
        keys.push(IdentityKey::UrlHash(record.audio_url_hash.clone()));
    }
    keys
}

fn entry_keys(entry: &EpisodeEntry) -> Vec<IdentityKey> {
    let mut keys = Vec::with_capacity(2);
    if let Some(guid) = entry.guid.as_deref().filter(|g| !g.trim().is_empty()) {
        keys.push(IdentityKey::Guid(guid.to_string()));
    }
    if let Some(enc) = entry.enclosure.as_ref().filter(|enc| !enc.url.is_empty()) {
        keys.push(IdentityKey::UrlHash(url_hash(&enc.url)));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Enclosure;
    use crate::identity::identity;
    use tempfile::tempdir;

    fn make_entry(title: &str, guid: Option<&str>, url: &str) -> EpisodeEntry {
        EpisodeEntry {
            title: title.to_string(),
            guid: guid.map(String::from),
            enclosure: Some(Enclosure {
                url: url.to_string(),
                mime_type: Some("audio/mpeg".to_string()),
                length: None,
            }),
            ..Default::default()
        }
    }

    fn store_complete(paths: &EpisodePaths, entry: &EpisodeEntry) {
        assert!(save_episode(entry, paths, None));
        std::fs::write(&paths.audio, b"audio").unwrap();
    }

    #[test]
    fn prepare_creates_episodes_dir() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("show");

        let episodes = prepare_output_dir(&output).unwrap();

        assert_eq!(episodes, output.join("episodes"));
        assert!(episodes.is_dir());
    }

    #[test]
    fn complete_episode_is_downloaded() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        store_complete(&paths, &entry);

        assert!(is_downloaded(&paths, &entry));
    }

    #[test]
    fn record_without_audio_is_not_downloaded() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        assert!(save_episode(&entry, &paths, None));

        assert!(!is_downloaded(&paths, &entry));
    }

    #[test]
    fn empty_audio_is_not_downloaded() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        assert!(save_episode(&entry, &paths, None));
        std::fs::write(&paths.audio, b"").unwrap();

        assert!(!is_downloaded(&paths, &entry));
    }

    #[test]
    fn corrupt_record_is_not_downloaded() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        store_complete(&paths, &entry);
        std::fs::write(&paths.record, "{ truncated").unwrap();

        assert!(!is_downloaded(&paths, &entry));
    }

    #[test]
    fn different_episode_in_same_place_is_not_downloaded() {
        let dir = tempdir().unwrap();
        let stored = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        store_complete(&paths, &stored);

        let other = make_entry("Ep", Some("guid-2"), "https://example.com/2.mp3");
        assert!(!is_downloaded(&paths, &other));
    }

    #[test]
    fn url_hash_match_counts_without_guid() {
        let dir = tempdir().unwrap();
        let stored = make_entry("Ep", None, "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        store_complete(&paths, &stored);

        let renamed = make_entry("Ep (remastered)", None, "https://example.com/1.mp3");
        assert!(is_downloaded(&paths, &renamed));
    }

    #[test]
    fn save_reports_failure_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not dir").unwrap();
        let entry = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");

        let paths = EpisodePaths::new(&blocker, "Ep");
        assert!(!save_episode(&entry, &paths, None));
    }

    #[test]
    fn scan_indexes_records_and_cleans_temp_files() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        store_complete(&paths, &entry);
        std::fs::write(&paths.temp, b"partial").unwrap();
        std::fs::write(paths.dir.join(".Ep.transcoding.m4a"), b"half").unwrap();

        let ledger = EpisodeLedger::scan(dir.path()).unwrap();

        assert_eq!(ledger.temp_files_cleaned, 2);
        assert!(!paths.temp.exists());
        assert_eq!(ledger.lookup(&entry), Some(&paths));
        // Both guid and url hash are indexed
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let ledger = EpisodeLedger::scan(&dir.path().join("nope")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn lookup_finds_renamed_episode_by_guid() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Old Title", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Old Title");
        store_complete(&paths, &entry);

        let ledger = EpisodeLedger::scan(dir.path()).unwrap();
        let renamed = make_entry("New Title", Some("guid-1"), "https://cdn.example.com/1.mp3");

        assert_eq!(ledger.lookup(&renamed), Some(&paths));
    }

    #[test]
    fn lookup_ignores_shared_url_of_another_guid() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Part One", Some("guid-1"), "https://example.com/shared.mp3");
        let paths = EpisodePaths::new(dir.path(), "Part One");
        store_complete(&paths, &entry);

        let ledger = EpisodeLedger::scan(dir.path()).unwrap();
        let other = make_entry("Part Two", Some("guid-2"), "https://example.com/shared.mp3");
        let untagged = make_entry("Part One", None, "https://example.com/shared.mp3");

        assert_eq!(ledger.lookup(&other), None);
        assert_eq!(ledger.lookup(&untagged), Some(&paths));
    }

    #[test]
    fn assign_disambiguates_colliding_names() {
        let dir = tempdir().unwrap();
        let first = make_entry("Same: Title", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Same_ Title");
        store_complete(&paths, &first);

        let mut ledger = EpisodeLedger::scan(dir.path()).unwrap();
        let second = make_entry("Same/ Title", Some("guid-2"), "https://example.com/2.mp3");
        let key = identity(&second).unwrap();

        let assigned = ledger.assign(&second, &key, "Same_ Title", AUDIO_EXTENSION);

        assert_ne!(assigned.dir, paths.dir);
        assert_eq!(
            assigned.base_name,
            format!("Same_ Title-{}", key.short_tag())
        );
    }

    #[test]
    fn assign_reuses_directory_of_known_episode() {
        let dir = tempdir().unwrap();
        let entry = make_entry("Ep", Some("guid-1"), "https://example.com/1.mp3");
        let paths = EpisodePaths::new(dir.path(), "Ep");
        store_complete(&paths, &entry);

        let mut ledger = EpisodeLedger::scan(dir.path()).unwrap();
        let key = identity(&entry).unwrap();

        assert_eq!(ledger.assign(&entry, &key, "Ep", AUDIO_EXTENSION), paths);
    }

    #[test]
    fn assign_reserves_names_within_a_run() {
        let dir = tempdir().unwrap();
        let mut ledger = EpisodeLedger::scan(dir.path()).unwrap();

        let a = make_entry("Ep", Some("guid-a"), "https://example.com/a.mp3");
        let b = make_entry("Ep", Some("guid-b"), "https://example.com/b.mp3");
        let key_a = identity(&a).unwrap();
        let key_b = identity(&b).unwrap();

        let paths_a = ledger.assign(&a, &key_a, "Ep", AUDIO_EXTENSION);
        let paths_b = ledger.assign(&b, &key_b, "Ep", AUDIO_EXTENSION);

        assert_eq!(paths_a.base_name, "Ep");
        assert_ne!(paths_a.dir, paths_b.dir);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

use crate::feed::EpisodeEntry;

/// Stable key used to recognise an episode across runs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Feed-provided GUID
    Guid(String),
    /// MD5 hex digest of the raw enclosure URL
    UrlHash(String),
}

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        match self {
            IdentityKey::Guid(s) | IdentityKey::UrlHash(s) => s,
        }
    }

    /// Short hex tag derived from the key, used to disambiguate directory names
    pub fn short_tag(&self) -> String {
        let digest = match self {
            IdentityKey::UrlHash(hash) => hash.clone(),
            IdentityKey::Guid(guid) => url_hash(guid),
        };
        digest.chars().take(8).collect()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Guid(guid) => write!(f, "guid:{guid}"),
            IdentityKey::UrlHash(hash) => write!(f, "url-md5:{hash}"),
        }
    }
}

/// MD5 hex digest of a URL string, exactly as written in the feed
pub fn url_hash(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// Derive the identity of an entry: its GUID, else the hash of its enclosure URL.
///
/// Returns `None` when the entry has neither; such entries cannot be deduplicated.
pub fn identity(entry: &EpisodeEntry) -> Option<IdentityKey> {
    if let Some(guid) = entry.guid.as_deref().filter(|g| !g.trim().is_empty()) {
        return Some(IdentityKey::Guid(guid.to_string()));
    }

    entry
        .enclosure
        .as_ref()
        .filter(|enc| !enc.url.is_empty())
        .map(|enc| IdentityKey::UrlHash(url_hash(&enc.url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Enclosure;

    fn entry(title: &str, guid: Option<&str>, url: Option<&str>) -> EpisodeEntry {
        EpisodeEntry {
            title: title.to_string(),
            guid: guid.map(String::from),
            enclosure: url.map(|u| Enclosure {
                url: u.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn guid_wins_over_url() {
        let key = identity(&entry("A", Some("guid-1"), Some("https://example.com/a.mp3")));
        assert_eq!(key, Some(IdentityKey::Guid("guid-1".to_string())));
    }

    #[test]
    fn same_guid_same_key_regardless_of_other_fields() {
        let a = identity(&entry("A", Some("guid-1"), Some("https://example.com/a.mp3")));
        let b = identity(&entry("B", Some("guid-1"), Some("https://cdn.example.com/b.mp3")));
        assert_eq!(a, b);
    }

    #[test]
    fn falls_back_to_url_hash() {
        let url = "https://example.com/a.mp3";
        let key = identity(&entry("A", None, Some(url)));

        assert_eq!(key, Some(IdentityKey::UrlHash(url_hash(url))));
        assert_eq!(key.unwrap().as_str().len(), 32);
    }

    #[test]
    fn url_hash_is_md5_hex() {
        assert_eq!(url_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(url_hash("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn blank_guid_is_ignored() {
        let url = "https://example.com/a.mp3";
        let key = identity(&entry("A", Some("  "), Some(url)));
        assert_eq!(key, Some(IdentityKey::UrlHash(url_hash(url))));
    }

    #[test]
    fn no_guid_no_enclosure_has_no_identity() {
        assert_eq!(identity(&entry("A", None, None)), None);
        assert_eq!(identity(&entry("A", None, Some(""))), None);
    }

    #[test]
    fn short_tag_is_eight_hex_chars() {
        let key = IdentityKey::Guid("guid-1".to_string());
        let tag = key.short_tag();
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(tag, key.short_tag());
    }
}

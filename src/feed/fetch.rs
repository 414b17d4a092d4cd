// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use bytes::Bytes;
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};

use super::parse::{FeedWarning, ParsedFeed, parse_feed};

/// Fetch raw feed bytes from a URL (without parsing)
pub async fn fetch_feed_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes, FeedError> {
    Url::parse(url)?;
    client
        .get_bytes(url)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })
}

/// Read raw feed bytes from a local file (without parsing)
pub fn read_feed_file(path: &Path) -> Result<Vec<u8>, FeedError> {
    std::fs::read(path).map_err(|e| FeedError::FileReadFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Fetch (or read) and parse a feed, never failing.
///
/// Fetch errors turn into an empty feed with a [`FeedWarning::FetchFailed`].
pub async fn load_feed<C: HttpClient>(
    client: &C,
    source: &str,
    reporter: &SharedProgressReporter,
) -> ParsedFeed {
    let bytes = if is_url(source) {
        reporter.report(ProgressEvent::FetchingFeed {
            url: source.to_string(),
        });
        fetch_feed_bytes(client, source).await.map(|b| b.to_vec())
    } else {
        read_feed_file(Path::new(source))
    };

    match bytes {
        Ok(bytes) => parse_feed(&bytes, source),
        Err(e) => ParsedFeed::empty(
            source,
            FeedWarning::FetchFailed {
                reason: e.to_string(),
            },
        ),
    }
}

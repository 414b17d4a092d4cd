// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Syncing a list of feeds described by a JSON configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::episode::sanitize_title;
use crate::error::{ConfigError, SyncError};
use crate::http::HttpClient;
use crate::progress::SharedProgressReporter;
use crate::shutdown::SharedShutdown;
use crate::sync::{SyncOptions, SyncReport, sync_feed};
use crate::transcode::Transcoder;

fn default_output_root() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// One feed of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Display name, also used as the feed's directory name
    pub name: String,
    /// Feed URL or local file path
    pub url: String,
    /// Only consider the first N episodes
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Batch configuration file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
    pub feeds: Vec<FeedConfig>,
}

impl BatchConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!(path = %path.display(), "loading batch configuration");

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: BatchConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        if let Some(feed) = config.feeds.iter().find(|f| f.url.trim().is_empty()) {
            return Err(ConfigError::EmptyFeedUrl {
                name: feed.name.clone(),
            });
        }

        tracing::info!(feeds = config.feeds.len(), "batch configuration loaded");
        Ok(config)
    }

    /// Directory a feed is synced into
    pub fn feed_dir(&self, index: usize, feed: &FeedConfig) -> PathBuf {
        let name = sanitize_title(&feed.name);
        if name.is_empty() {
            self.output_root.join(format!("podcast_{}", index + 1))
        } else {
            self.output_root.join(name)
        }
    }
}

/// Result of one feed in a batch
#[derive(Debug)]
pub struct FeedOutcome {
    pub name: String,
    pub output_dir: PathBuf,
    pub result: Result<SyncReport, SyncError>,
}

/// Results of a batch run, in configuration order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FeedOutcome>,
    /// The run was interrupted; feeds after the last outcome never started
    pub cancelled: bool,
}

impl BatchReport {
    /// Number of feeds that ended in a fatal error
    pub fn failed_feeds(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Err(e) if !e.is_cancelled()))
            .count()
    }
}

/// Sync every feed of `config`, one after another.
///
/// `base` supplies concurrency and transcoding settings and the limit
/// comes from each feed entry. Existing episodes are skipped only when
/// both `base` and the configuration ask for it. A fatal error in one feed
/// is logged and the batch moves on. Cancellation ends the batch.
pub async fn run_batch<C: HttpClient + Clone + 'static>(
    client: &C,
    transcoder: Arc<dyn Transcoder>,
    config: &BatchConfig,
    base: &SyncOptions,
    reporter: SharedProgressReporter,
    shutdown: SharedShutdown,
) -> BatchReport {
    let mut report = BatchReport::default();

    for (index, feed) in config.feeds.iter().enumerate() {
        if shutdown.is_shutdown_requested() {
            report.cancelled = true;
            break;
        }

        let output_dir = config.feed_dir(index, feed);
        tracing::info!(
            feed = feed.name.as_str(),
            url = feed.url.as_str(),
            output = %output_dir.display(),
            limit = ?feed.limit,
            "syncing podcast"
        );

        let options = SyncOptions {
            limit: feed.limit,
            skip_existing: config.skip_existing && base.skip_existing,
            ..base.clone()
        };

        let result = sync_feed(
            client,
            transcoder.clone(),
            &feed.url,
            &output_dir,
            &options,
            reporter.clone(),
            shutdown.clone(),
        )
        .await;

        match &result {
            Ok(sync) => tracing::info!(
                feed = feed.name.as_str(),
                downloaded = sync.downloaded,
                skipped = sync.skipped,
                failed = sync.failed,
                "podcast done"
            ),
            Err(e) if e.is_cancelled() => report.cancelled = true,
            Err(e) => tracing::error!(feed = feed.name.as_str(), error = %e, "podcast failed"),
        }

        report.outcomes.push(FeedOutcome {
            name: feed.name.clone(),
            output_dir,
            result,
        });

        if report.cancelled {
            break;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranscodeError;
    use crate::http::{ByteStream, HttpResponse};
    use crate::progress::NoopReporter;
    use crate::shutdown::ShutdownCoordinator;
    use crate::transcode::TranscodeOptions;
    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[derive(Clone)]
    struct AudioClient;

    #[async_trait]
    impl HttpClient for AudioClient {
        async fn get_bytes(&self, _url: &str) -> Result<Bytes, reqwest::Error> {
            unreachable!("feeds are read from disk")
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let body: ByteStream = Box::pin(futures::stream::once(async {
                Ok::<_, std::io::Error>(Bytes::from_static(b"audio"))
            }));
            Ok(HttpResponse {
                status: 200,
                content_length: Some(5),
                body,
            })
        }
    }

    struct CopyTranscoder;

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn encode(
            &self,
            src: &Path,
            dst: &Path,
            _options: &TranscodeOptions,
        ) -> Result<(), TranscodeError> {
            tokio::fs::copy(src, dst).await.unwrap();
            Ok(())
        }
    }

    const LOCAL_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Local Show</title>
    <item>
      <title>Pilot</title>
      <guid>pilot</guid>
      <enclosure url="https://example.com/pilot.mp3" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    fn batch_in(dir: &Path, names: &[&str]) -> BatchConfig {
        let feed_path = dir.join("show.xml");
        std::fs::write(&feed_path, LOCAL_FEED).unwrap();
        BatchConfig {
            output_root: dir.join("library"),
            timeout_secs: 30,
            skip_existing: true,
            feeds: names
                .iter()
                .map(|name| FeedConfig {
                    name: name.to_string(),
                    url: feed_path.to_string_lossy().into_owned(),
                    limit: None,
                })
                .collect(),
        }
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("podcasts.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_applies_defaults() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"feeds": [{"name": "Lex Fridman", "url": "https://lexfridman.com/feed/podcast/", "limit": 3}]}"#,
        );

        let config = BatchConfig::load(&path).unwrap();

        assert_eq!(config.output_root, PathBuf::from("downloads"));
        assert_eq!(config.timeout_secs, 30);
        assert!(config.skip_existing);
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].limit, Some(3));
    }

    #[test]
    fn load_reads_all_fields() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{
                "output_root": "/srv/podcasts",
                "timeout_secs": 90,
                "skip_existing": false,
                "feeds": [
                    {"name": "知行小酒馆", "url": "http://www.ximalaya.com/album/46199233.xml"},
                    {"name": "Local", "url": "feeds/local.xml", "limit": 1}
                ]
            }"#,
        );

        let config = BatchConfig::load(&path).unwrap();

        assert_eq!(config.output_root, PathBuf::from("/srv/podcasts"));
        assert_eq!(config.timeout_secs, 90);
        assert!(!config.skip_existing);
        assert_eq!(config.feeds[0].limit, None);
        assert_eq!(
            config.feed_dir(0, &config.feeds[0]),
            PathBuf::from("/srv/podcasts/知行小酒馆")
        );
    }

    #[test]
    fn load_rejects_empty_url() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"feeds": [{"name": "Broken", "url": "  "}]}"#,
        );

        match BatchConfig::load(&path) {
            Err(ConfigError::EmptyFeedUrl { name }) => assert_eq!(name, "Broken"),
            other => panic!("expected EmptyFeedUrl, got {other:?}"),
        }
    }

    #[test]
    fn load_reports_parse_and_read_errors() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "{not json");

        assert!(matches!(
            BatchConfig::load(&path),
            Err(ConfigError::ParseFailed { .. })
        ));
        assert!(matches!(
            BatchConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::ReadFailed { .. })
        ));
    }

    #[test]
    fn feed_dir_sanitizes_name() {
        let config = BatchConfig {
            output_root: PathBuf::from("out"),
            timeout_secs: 30,
            skip_existing: true,
            feeds: vec![],
        };
        let feed = FeedConfig {
            name: "News: Daily/Weekly".to_string(),
            url: "https://example.com/feed".to_string(),
            limit: None,
        };
        let unnamed = FeedConfig {
            name: "   ".to_string(),
            ..feed.clone()
        };

        assert_eq!(config.feed_dir(0, &feed), PathBuf::from("out/News_ Daily_Weekly"));
        assert_eq!(config.feed_dir(1, &unnamed), PathBuf::from("out/podcast_2"));
    }

    #[tokio::test]
    async fn batch_continues_after_a_failed_feed() {
        let dir = tempdir().unwrap();
        let config = batch_in(dir.path(), &["Blocked", "Open"]);
        std::fs::create_dir_all(&config.output_root).unwrap();
        // A plain file where the first feed's directory should go
        std::fs::write(config.output_root.join("Blocked"), b"").unwrap();

        let report = run_batch(
            &AudioClient,
            Arc::new(CopyTranscoder),
            &config,
            &SyncOptions::default(),
            NoopReporter::shared(),
            ShutdownCoordinator::shared(),
        )
        .await;

        assert!(!report.cancelled);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failed_feeds(), 1);
        assert!(report.outcomes[0].result.is_err());
        assert_eq!(report.outcomes[1].result.as_ref().unwrap().downloaded, 1);
        assert!(
            config
                .output_root
                .join("Open/episodes/Pilot/Pilot.m4a")
                .exists()
        );
    }

    #[tokio::test]
    async fn no_skip_overrides_the_configuration() {
        let dir = tempdir().unwrap();
        let config = batch_in(dir.path(), &["Show"]);
        let run = |skip_existing: bool| {
            let options = SyncOptions {
                skip_existing,
                ..SyncOptions::default()
            };
            let config = &config;
            async move {
                run_batch(
                    &AudioClient,
                    Arc::new(CopyTranscoder),
                    config,
                    &options,
                    NoopReporter::shared(),
                    ShutdownCoordinator::shared(),
                )
                .await
            }
        };

        let first = run(true).await;
        assert_eq!(first.outcomes[0].result.as_ref().unwrap().downloaded, 1);

        let kept = run(true).await;
        assert_eq!(kept.outcomes[0].result.as_ref().unwrap().skipped, 1);

        let forced = run(false).await;
        let forced = forced.outcomes[0].result.as_ref().unwrap();
        assert_eq!(forced.downloaded, 1);
        assert_eq!(forced.skipped, 0);
    }

    #[tokio::test]
    async fn cancelled_batch_starts_no_feed() {
        let dir = tempdir().unwrap();
        let config = batch_in(dir.path(), &["One", "Two"]);
        let shutdown = ShutdownCoordinator::shared();
        shutdown.request_shutdown();

        let report = run_batch(
            &AudioClient,
            Arc::new(CopyTranscoder),
            &config,
            &SyncOptions::default(),
            NoopReporter::shared(),
            shutdown,
        )
        .await;

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(!config.output_root.exists());
    }
}

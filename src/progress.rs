// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

/// Events emitted during podcast synchronization for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// Feed has been parsed
    FeedParsed {
        podcast_title: String,
        total_episodes: usize,
        /// Entries left after applying the limit
        to_consider: usize,
    },

    /// An episode was already present and is skipped
    EpisodeSkipped {
        episode_index: usize,
        episode_title: String,
    },

    /// A download is starting
    DownloadStarting {
        /// Identifies the download slot (0 to max_concurrent-1)
        download_id: usize,
        episode_title: String,
        /// Index of this episode in the feed
        episode_index: usize,
        /// Number of entries considered in this run
        total_episodes: usize,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        download_id: usize,
        episode_title: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download completed successfully
    DownloadCompleted {
        download_id: usize,
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// A download or the following transcode failed
    DownloadFailed {
        download_id: usize,
        episode_title: String,
        error: String,
    },

    /// The downloaded payload is being transcoded
    Transcoding {
        download_id: usize,
        episode_title: String,
    },

    /// Episode audio is in its final place
    EpisodeFinished {
        download_id: usize,
        episode_title: String,
    },

    /// Sync operation completed
    SyncCompleted {
        downloaded_count: usize,
        skipped_count: usize,
        failed_count: usize,
        transcoded_count: usize,
    },
}

/// Trait for reporting progress events during synchronization.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingReporter {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressReporter for CollectingReporter {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn noop_reporter_handles_events() {
        let reporter = NoopReporter;

        reporter.report(ProgressEvent::FetchingFeed {
            url: "https://example.com/feed.xml".to_string(),
        });
        reporter.report(ProgressEvent::DownloadProgress {
            download_id: 0,
            episode_title: "Episode 1".to_string(),
            bytes_downloaded: 512,
            total_bytes: Some(1024),
        });
        reporter.report(ProgressEvent::SyncCompleted {
            downloaded_count: 4,
            skipped_count: 5,
            failed_count: 1,
            transcoded_count: 4,
        });
    }

    #[test]
    fn shared_reporter_is_usable_through_trait_object() {
        let collector = Arc::new(CollectingReporter::default());
        let shared: SharedProgressReporter = collector.clone();

        shared.report(ProgressEvent::EpisodeSkipped {
            episode_index: 2,
            episode_title: "Old Episode".to_string(),
        });

        let events = collector.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ProgressEvent::EpisodeSkipped { episode_index: 2, .. }
        ));
    }
}

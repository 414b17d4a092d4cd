// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod batch;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod identity;
pub mod metadata;
pub mod progress;
pub mod shutdown;
pub mod state;
pub mod sync;
pub mod transcode;

// Re-export main types for convenience
pub use batch::{BatchConfig, BatchReport, FeedConfig, FeedOutcome, run_batch};
pub use episode::{EpisodePaths, download_episode, episode_base_name, sanitize_title};
pub use error::{
    ConfigError, DownloadError, FeedError, MetadataError, StateError, SyncError, TranscodeError,
};
pub use feed::{EpisodeEntry, FeedWarning, ParsedFeed, Podcast, load_feed, parse_feed};
pub use http::{HttpClient, HttpConfig, HttpResponse, ReqwestClient};
pub use identity::{IdentityKey, identity, url_hash};
pub use metadata::{EpisodeRecord, PodcastMetadata};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use shutdown::{SharedShutdown, ShutdownCoordinator};
pub use state::{EpisodeLedger, is_downloaded, save_episode};
pub use sync::{EpisodeFailure, SyncOptions, SyncReport, sync_feed};
pub use transcode::{FfmpegTranscoder, TranscodeOptions, Transcoder, transcode};

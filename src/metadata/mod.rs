// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod episode;
mod podcast;

pub use episode::{EpisodeRecord, read_episode_record, write_episode_record};
pub use podcast::{
    PODCAST_METADATA_FILENAME, PodcastMetadata, read_podcast_metadata, write_podcast_metadata,
};

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod download;
mod filename;

pub use download::{DownloadContext, DownloadResult, download_episode};
pub use filename::{
    AUDIO_EXTENSION, EpisodePaths, TEMP_DOWNLOAD_NAME, episode_base_name, get_audio_extension,
    sanitize_title,
};

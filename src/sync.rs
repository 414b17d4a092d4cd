// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use crate::episode::{
    AUDIO_EXTENSION, DownloadContext, EpisodePaths, download_episode, episode_base_name,
    get_audio_extension,
};
use crate::error::SyncError;
use crate::feed::{EpisodeEntry, FeedWarning, load_feed};
use crate::http::HttpClient;
use crate::identity::{IdentityKey, identity};
use crate::metadata::write_podcast_metadata;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::shutdown::SharedShutdown;
use crate::state::{EpisodeLedger, is_downloaded, prepare_output_dir, save_episode};
use crate::transcode::{TranscodeOptions, Transcoder, transcode};

/// Options for podcast synchronization
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Only consider the first N episodes of the feed (None = all)
    pub limit: Option<usize>,
    /// Skip episodes whose audio and record are already present
    pub skip_existing: bool,
    /// Maximum number of episodes processed at once
    pub max_concurrent: usize,
    /// Encoder settings; `None` keeps the downloaded file as is
    pub transcode: Option<TranscodeOptions>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            limit: None,
            skip_existing: true,
            max_concurrent: 1,
            transcode: Some(TranscodeOptions::default()),
        }
    }
}

/// A single episode that could not be completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeFailure {
    /// Zero-based position among the entries considered
    pub index: usize,
    pub title: String,
    pub reason: String,
}

/// Counters of a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub transcoded: usize,
    pub failures: Vec<EpisodeFailure>,
}

/// What happened to one episode after planning
enum EpisodeOutcome {
    Completed { transcoded: bool },
    Failed(String),
    Cancelled,
}

/// An episode that needs work, with its location already reserved
struct EpisodeJob {
    index: usize,
    entry: EpisodeEntry,
    paths: EpisodePaths,
}

/// State shared by every episode task of one run
struct Pipeline<C> {
    client: C,
    transcoder: Arc<dyn Transcoder>,
    transcode: Option<TranscodeOptions>,
    reporter: SharedProgressReporter,
    shutdown: SharedShutdown,
    total_episodes: usize,
}

/// Synchronize one feed into `output_dir`.
///
/// 1. Creates `output_dir/episodes`
/// 2. Loads the feed and rewrites `podcast_info.json`
/// 3. Decides, in feed order, which entries need work
/// 4. Downloads, records and transcodes them
///
/// Per-episode problems are counted in the report. Only setup errors and
/// user cancellation end up as `Err`.
pub async fn sync_feed<C: HttpClient + Clone + 'static>(
    client: &C,
    transcoder: Arc<dyn Transcoder>,
    feed_source: &str,
    output_dir: &Path,
    options: &SyncOptions,
    reporter: SharedProgressReporter,
    shutdown: SharedShutdown,
) -> Result<SyncReport, SyncError> {
    let episodes_dir = prepare_output_dir(output_dir)?;

    let parsed = load_feed(client, feed_source, &reporter).await;
    for warning in &parsed.warnings {
        match warning {
            FeedWarning::MissingEnclosure { .. } => tracing::info!("Skipping {warning}"),
            _ => tracing::warn!(feed = feed_source, "{warning}"),
        }
    }

    if let Err(e) = write_podcast_metadata(&parsed.podcast, output_dir) {
        tracing::warn!(error = %e, "could not save podcast information");
    }

    let total_episodes = parsed.entries.len();
    let entries: Vec<EpisodeEntry> = match options.limit {
        Some(limit) => parsed.entries.into_iter().take(limit).collect(),
        None => parsed.entries,
    };

    tracing::info!(
        podcast = parsed.podcast.title.as_str(),
        total_episodes,
        considered = entries.len(),
        "feed loaded"
    );
    reporter.report(ProgressEvent::FeedParsed {
        podcast_title: parsed.podcast.title.clone(),
        total_episodes,
        to_consider: entries.len(),
    });

    let mut ledger = EpisodeLedger::scan(&episodes_dir)?;
    if ledger.temp_files_cleaned > 0 {
        tracing::info!(
            count = ledger.temp_files_cleaned,
            "removed leftovers of an interrupted run"
        );
    }

    let mut report = SyncReport::default();
    let considered = entries.len();
    let mut cancelled = false;

    // Planning runs on this task only, so the dedup check for an identity
    // and the reservation of its directory cannot race.
    let mut seen: HashSet<IdentityKey> = HashSet::new();
    let mut jobs = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        if shutdown.is_shutdown_requested() {
            cancelled = true;
            break;
        }

        if entry.enclosure.is_none() {
            tracing::info!(entry = index + 1, "Skipping entry: no audio attachment found");
            continue;
        }

        let Some(key) = identity(&entry) else {
            tracing::warn!(entry = index + 1, title = entry.title.as_str(), "Skipping entry: no identity");
            continue;
        };

        if seen.contains(&key) {
            tracing::info!(
                entry = index + 1,
                title = entry.title.as_str(),
                "Skipping entry: same episode appeared earlier in the feed"
            );
            report.skipped += 1;
            reporter.report(ProgressEvent::EpisodeSkipped {
                episode_index: index,
                episode_title: entry.title.clone(),
            });
            continue;
        }
        seen.insert(key.clone());

        let base_name = episode_base_name(&entry, index);
        let extension = match options.transcode {
            Some(_) => AUDIO_EXTENSION.to_string(),
            None => get_audio_extension(&entry),
        };
        let paths = ledger.assign(&entry, &key, &base_name, &extension);

        if options.skip_existing && is_downloaded(&paths, &entry) {
            tracing::info!(
                entry = index + 1,
                name = paths.base_name.as_str(),
                "Skipping entry: episode already downloaded"
            );
            report.skipped += 1;
            reporter.report(ProgressEvent::EpisodeSkipped {
                episode_index: index,
                episode_title: entry.title.clone(),
            });
            continue;
        }

        jobs.push(EpisodeJob {
            index,
            entry,
            paths,
        });
    }

    if !cancelled && !jobs.is_empty() {
        let pipeline = Arc::new(Pipeline {
            client: client.clone(),
            transcoder,
            transcode: options.transcode.clone(),
            reporter: reporter.clone(),
            shutdown: shutdown.clone(),
            total_episodes: considered,
        });
        cancelled = run_jobs(pipeline, jobs, options.max_concurrent.max(1), &mut report).await;
    }

    reporter.report(ProgressEvent::SyncCompleted {
        downloaded_count: report.downloaded,
        skipped_count: report.skipped,
        failed_count: report.failed,
        transcoded_count: report.transcoded,
    });
    tracing::info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        failed = report.failed,
        transcoded = report.transcoded,
        "sync finished"
    );

    if cancelled || shutdown.is_shutdown_requested() {
        return Err(SyncError::Cancelled { report });
    }

    Ok(report)
}

/// Process planned episodes through a pool of `max_concurrent` slots.
///
/// Returns whether the run was cancelled.
async fn run_jobs<C: HttpClient + Clone + 'static>(
    pipeline: Arc<Pipeline<C>>,
    jobs: Vec<EpisodeJob>,
    max_concurrent: usize,
    report: &mut SyncReport,
) -> bool {
    // The slot pool limits concurrency and hands out stable IDs for progress bars
    let (slot_tx, mut slot_rx) = tokio::sync::mpsc::channel(max_concurrent);
    for slot in 0..max_concurrent {
        let _ = slot_tx.send(slot).await;
    }

    let downloaded = Arc::new(AtomicUsize::new(0));
    let transcoded = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let mut handles = Vec::new();

    for job in jobs {
        // Acquire a slot before spawning so episodes start in feed order
        let download_id = tokio::select! {
            biased;
            _ = pipeline.shutdown.wait_for_shutdown() => None,
            slot = slot_rx.recv() => slot,
        };
        let Some(download_id) = download_id else {
            cancelled.store(true, Ordering::SeqCst);
            break;
        };
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let pipeline = pipeline.clone();
        let slot_tx = slot_tx.clone();
        let downloaded = downloaded.clone();
        let transcoded = transcoded.clone();
        let failures = failures.clone();
        let cancelled = cancelled.clone();

        handles.push(tokio::spawn(async move {
            let index = job.index;
            let title = job.entry.title.clone();

            match process_episode(&pipeline, &job, download_id).await {
                EpisodeOutcome::Completed { transcoded: did_transcode } => {
                    downloaded.fetch_add(1, Ordering::SeqCst);
                    if did_transcode {
                        transcoded.fetch_add(1, Ordering::SeqCst);
                    }
                }
                EpisodeOutcome::Failed(reason) => {
                    tracing::warn!(entry = index + 1, title = title.as_str(), reason = reason.as_str(), "episode failed");
                    failures.lock().await.push(EpisodeFailure {
                        index,
                        title,
                        reason,
                    });
                }
                EpisodeOutcome::Cancelled => {
                    tracing::warn!(entry = index + 1, "download interrupted by user");
                    cancelled.store(true, Ordering::SeqCst);
                }
            }

            // Return slot to the pool when done
            let _ = slot_tx.send(download_id).await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "episode task panicked");
            failures.lock().await.push(EpisodeFailure {
                index: usize::MAX,
                title: String::new(),
                reason: e.to_string(),
            });
        }
    }

    let mut failures = std::mem::take(&mut *failures.lock().await);
    failures.sort_by_key(|f| f.index);

    report.downloaded += downloaded.load(Ordering::SeqCst);
    report.transcoded += transcoded.load(Ordering::SeqCst);
    report.failed += failures.len();
    report.failures.extend(failures);

    cancelled.load(Ordering::SeqCst)
}

/// Download, record and transcode one episode
async fn process_episode<C: HttpClient>(
    pipeline: &Pipeline<C>,
    job: &EpisodeJob,
    download_id: usize,
) -> EpisodeOutcome {
    let EpisodeJob { index, entry, paths } = job;
    let Some(url) = entry.enclosure.as_ref().map(|enc| enc.url.as_str()) else {
        return EpisodeOutcome::Failed("no enclosure".to_string());
    };

    if let Err(e) = tokio::fs::create_dir_all(&paths.dir).await {
        return EpisodeOutcome::Failed(format!(
            "could not create {}: {e}",
            paths.dir.display()
        ));
    }

    tracing::info!(entry = index + 1, title = entry.title.as_str(), "Downloading");

    let context = DownloadContext {
        download_id,
        episode_index: *index,
        total_episodes: pipeline.total_episodes,
        episode_title: entry.title.clone(),
    };

    let download = download_episode(
        &pipeline.client,
        url,
        &paths.temp,
        &context,
        &pipeline.reporter,
        &pipeline.shutdown,
    )
    .await;

    if matches!(&download, Err(e) if e.is_cancelled()) {
        return EpisodeOutcome::Cancelled;
    }

    // The record is kept even when the audio failed, so metadata survives
    let source_sha256 = download.as_ref().ok().map(|d| d.sha256.clone());
    if !save_episode(entry, paths, source_sha256) {
        tracing::warn!(entry = index + 1, "episode record was not saved; it may be downloaded again next run");
    }

    if let Err(e) = download {
        pipeline.reporter.report(ProgressEvent::DownloadFailed {
            download_id,
            episode_title: entry.title.clone(),
            error: e.to_string(),
        });
        return EpisodeOutcome::Failed(e.to_string());
    }

    let Some(options) = pipeline.transcode.as_ref() else {
        return match tokio::fs::rename(&paths.temp, &paths.audio).await {
            Ok(()) => {
                pipeline.reporter.report(ProgressEvent::EpisodeFinished {
                    download_id,
                    episode_title: entry.title.clone(),
                });
                EpisodeOutcome::Completed { transcoded: false }
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&paths.temp).await;
                EpisodeOutcome::Failed(format!("could not move audio into place: {e}"))
            }
        };
    };

    pipeline.reporter.report(ProgressEvent::Transcoding {
        download_id,
        episode_title: entry.title.clone(),
    });

    let result = tokio::select! {
        biased;
        _ = pipeline.shutdown.wait_for_shutdown() => None,
        result = transcode(pipeline.transcoder.as_ref(), &paths.temp, &paths.audio, options) => Some(result),
    };

    match result {
        None => EpisodeOutcome::Cancelled,
        Some(Ok(())) => {
            tracing::info!(entry = index + 1, path = %paths.audio.display(), "Converted and saved");
            pipeline.reporter.report(ProgressEvent::EpisodeFinished {
                download_id,
                episode_title: entry.title.clone(),
            });
            EpisodeOutcome::Completed { transcoded: true }
        }
        Some(Err(e)) => {
            pipeline.reporter.report(ProgressEvent::DownloadFailed {
                download_id,
                episode_title: entry.title.clone(),
                error: e.to_string(),
            });
            EpisodeOutcome::Failed(format!("transcode failed: {e}"))
        }
    }
}

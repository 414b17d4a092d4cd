// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use podsync::{
    BatchConfig, BatchReport, FfmpegTranscoder, HttpConfig, NoopReporter, ProgressEvent,
    ProgressReporter, ReqwestClient, SharedProgressReporter, SharedShutdown, ShutdownCoordinator,
    SyncError, SyncOptions, SyncReport, TranscodeOptions, Transcoder, run_batch, sync_feed,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static CONVERT: Emoji<'_, '_> = Emoji("🔄 ", "[~] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Conventional exit status after SIGINT
const EXIT_CANCELLED: u8 = 130;

/// Synchronize podcast episodes from RSS feeds into a local library
#[derive(Parser, Debug)]
#[command(name = "podsync")]
#[command(about = "Synchronize podcast episodes from RSS feeds into a local library")]
#[command(version)]
struct Args {
    /// RSS feed URL or path to local RSS file
    #[arg(required_unless_present = "batch", conflicts_with = "batch")]
    feed: Option<String>,

    /// Output directory for the podcast
    #[arg(short, long, default_value = "downloads")]
    output_dir: PathBuf,

    /// Maximum number of episodes to consider, newest first
    #[arg(short, long)]
    limit: Option<usize>,

    /// Download episodes again even if they already exist (also in batch mode)
    #[arg(long)]
    no_skip: bool,

    /// Network timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Maximum number of episodes processed at once
    #[arg(short = 'c', long, default_value = "1")]
    concurrent: usize,

    /// Keep downloaded audio as is instead of converting it
    #[arg(long)]
    no_transcode: bool,

    /// Audio codec passed to ffmpeg
    #[arg(long, default_value = "aac")]
    codec: String,

    /// Audio bitrate passed to ffmpeg
    #[arg(long, default_value = "128k")]
    bitrate: String,

    /// ffmpeg executable to use
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,

    /// Sync every feed listed in a JSON configuration file.
    /// Episodes are skipped only if both the file's skip_existing and the
    /// absence of --no-skip allow it
    #[arg(long, value_name = "FILE")]
    batch: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            limit: self.limit,
            skip_existing: !self.no_skip,
            max_concurrent: self.concurrent.max(1),
            transcode: (!self.no_transcode).then(|| TranscodeOptions {
                codec: self.codec.clone(),
                bitrate: self.bitrate.clone(),
            }),
        }
    }
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<usize, ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    fn bars(&self) -> MutexGuard<'_, HashMap<usize, ProgressBar>> {
        self.bars.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get_or_create_bar(&self, download_id: usize) -> ProgressBar {
        let mut bars = self.bars();
        if let Some(bar) = bars.get(&download_id) {
            return bar.clone();
        }

        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        bars.insert(download_id, bar.clone());
        bar
    }

    fn finish_bar(&self, download_id: usize) {
        if let Some(bar) = self.bars().remove(&download_id) {
            bar.finish_and_clear();
        }
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { url } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Fetching feed: {}", url.cyan()));
            }

            ProgressEvent::FeedParsed {
                podcast_title,
                total_episodes,
                to_consider,
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {} episodes total, checking {}",
                    podcast_title.bold().green(),
                    total_episodes.to_string().cyan(),
                    to_consider.to_string().yellow()
                ));
            }

            ProgressEvent::EpisodeSkipped {
                episode_index,
                episode_title,
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}[{}] {} already in library",
                    (episode_index + 1).to_string().cyan(),
                    truncate_title(&episode_title, 40).dimmed()
                ));
            }

            ProgressEvent::DownloadStarting {
                download_id,
                episode_title,
                episode_index,
                total_episodes,
                content_length,
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (episode_index + 1).to_string().cyan(),
                    total_episodes.to_string().cyan(),
                    truncate_title(&episode_title, 40)
                ));
            }

            ProgressEvent::DownloadProgress {
                download_id,
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                let bar = self.get_or_create_bar(download_id);
                if let Some(total) = total_bytes {
                    bar.set_length(total);
                }
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::DownloadCompleted {
                download_id,
                bytes_downloaded,
                ..
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_position(bytes_downloaded);
            }

            ProgressEvent::Transcoding {
                download_id,
                episode_title,
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_message(format!(
                    "{CONVERT}{}",
                    truncate_title(&episode_title, 40).yellow()
                ));
            }

            ProgressEvent::EpisodeFinished {
                download_id,
                episode_title,
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.set_message(format!(
                    "{SUCCESS}{}",
                    truncate_title(&episode_title, 40).green()
                ));
                self.finish_bar(download_id);
            }

            ProgressEvent::DownloadFailed {
                download_id,
                episode_title,
                error,
            } => {
                let bar = self.get_or_create_bar(download_id);
                bar.abandon_with_message(format!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
                self.bars().remove(&download_id);
            }

            ProgressEvent::SyncCompleted {
                downloaded_count,
                skipped_count,
                failed_count,
                transcoded_count,
            } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} downloaded, {} converted, {} skipped, {} failed",
                    "Sync complete:".bold().green(),
                    downloaded_count.to_string().green().bold(),
                    transcoded_count.to_string().green(),
                    skipped_count.to_string().yellow(),
                    if failed_count > 0 {
                        failed_count.to_string().red().bold()
                    } else {
                        failed_count.to_string().green()
                    }
                );
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "podsync=warn" } else { "podsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_failures(report: &SyncReport) {
    if report.failures.is_empty() {
        return;
    }
    println!("\n{}", "Failed episodes:".red().bold());
    for failure in &report.failures {
        println!(
            "  {}{} - {}",
            CROSS,
            failure.title.yellow(),
            failure.reason.dimmed()
        );
    }
}

fn print_batch_summary(report: &BatchReport) {
    println!("\n{}", "Batch summary:".bold());
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(sync) => println!(
                "  {SUCCESS}{} - {} downloaded, {} skipped, {} failed",
                outcome.name.green(),
                sync.downloaded,
                sync.skipped,
                sync.failed
            ),
            Err(e) => println!("  {CROSS}{} - {}", outcome.name.red(), e.to_string().dimmed()),
        }
    }
}

/// Warn early when the encoder cannot be started; every conversion would fail
async fn preflight(transcoder: &FfmpegTranscoder) {
    match transcoder.check_available().await {
        Ok(version) => tracing::debug!(
            program = transcoder.program(),
            version = version.as_str(),
            "encoder available"
        ),
        Err(e) => tracing::warn!(
            program = transcoder.program(),
            error = %e,
            "audio conversion will fail for every episode; install ffmpeg or pass --no-transcode"
        ),
    }
}

fn install_ctrl_c_handler(shutdown: &SharedShutdown) {
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - stopping after cleanup...");
                shutdown.request_shutdown();
            }
        }
    });
}

async fn run(args: Args) -> Result<ExitCode> {
    let quiet = args.quiet;

    if !quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podsync".bold().magenta(),
            "- Podcast Synchronizer".dimmed()
        );
    }

    let batch = match &args.batch {
        Some(path) => Some(
            BatchConfig::load(path)
                .with_context(|| format!("Failed to load batch file {}", path.display()))?,
        ),
        None => None,
    };

    let timeout_secs = batch.as_ref().map_or(args.timeout, |b| b.timeout_secs);
    let client = ReqwestClient::new(&HttpConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..Default::default()
    })
    .context("Failed to build HTTP client")?;

    let options = args.sync_options();
    let ffmpeg = FfmpegTranscoder::with_program(args.ffmpeg.as_str());
    if options.transcode.is_some() {
        preflight(&ffmpeg).await;
    }
    let transcoder: Arc<dyn Transcoder> = Arc::new(ffmpeg);

    let reporter: SharedProgressReporter = if quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let shutdown = ShutdownCoordinator::shared();
    install_ctrl_c_handler(&shutdown);

    if let Some(config) = batch {
        let report = run_batch(&client, transcoder, &config, &options, reporter, shutdown).await;

        if !quiet {
            print_batch_summary(&report);
            println!(
                "\n{FOLDER}Output: {}\n",
                config.output_root.display().to_string().cyan()
            );
        }

        if report.cancelled {
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }
        return Ok(if report.failed_feeds() > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let feed = args
        .feed
        .as_deref()
        .context("A feed URL or --batch file is required")?;

    let result = sync_feed(
        &client,
        transcoder,
        feed,
        &args.output_dir,
        &options,
        reporter,
        shutdown,
    )
    .await;

    let report = match result {
        Ok(report) => report,
        Err(SyncError::Cancelled { report }) => {
            if !quiet {
                print_failures(&report);
                println!("\n{}", "Interrupted.".yellow().bold());
            }
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }
        Err(e) => return Err(e).context("Failed to sync podcast"),
    };

    if !quiet {
        print_failures(&report);
        println!(
            "\n{FOLDER}Output: {}\n",
            args.output_dir.display().to_string().cyan()
        );
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.quiet);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}{} {e:#}", CROSS, "Error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

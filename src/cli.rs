use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};

use crate::bucket::Bucket;
use crate::changelog::{self, RELEASES_URL};
use crate::config::Config;
use crate::file_event_produce::{EventFilter, FileWatcher, DEFAULT_ASSET_DIRS};
use crate::foreman::Foreman;
use crate::release::{HttpFeedSource, Resolver, TIMBER_ARCHIVE_ROOT, TIMBER_FEED_URL};
use crate::upload::{load_upload_event, run_workers, ThemeClient, UploadSummary};

const DEFAULT_CONFIG: &str = "config.yml";

/// Upload and watch storefront theme assets.
#[derive(Debug, Parser)]
#[clap(name = "themewatch", version)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Upload the given files to the theme
    Upload {
        #[clap(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Path to the YAML config file
        #[clap(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Watch the theme directory and upload every change
    Watch {
        /// Path to the YAML config file
        #[clap(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Print the change log of all releases as Markdown
    Changelog {
        #[clap(long, default_value = RELEASES_URL)]
        url: String,
    },

    /// Print the download url of a theme release
    ReleaseUrl {
        /// `master`, `latest` or a release title such as `v2.0.2`
        version: String,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Upload { files, config } => upload(&config, files).await,
        Commands::Watch { config } => watch(&config).await,
        Commands::Changelog { url } => print_changelog(&url).await,
        Commands::ReleaseUrl { version } => print_release_url(&version).await,
    }
}

fn start_bucket(config: &Config) -> Result<Bucket> {
    let bucket = Bucket::new(config.bucket_config()).context("create bucket failed")?;
    bucket.top_up();
    bucket.start().context("start bucket refill failed")?;

    Ok(bucket)
}

fn print_summary(summary: &UploadSummary) -> Result<()> {
    println!(
        "{} succeeded, {} failed",
        summary.succeeded, summary.failed
    );

    if summary.failed > 0 {
        bail!("{} asset operations failed", summary.failed);
    }

    Ok(())
}

async fn upload(config_path: &Path, files: Vec<PathBuf>) -> Result<()> {
    let config = Config::load(config_path)?;
    let client = ThemeClient::new(&config).context("create theme client failed")?;
    let bucket = start_bucket(&config)?;

    let (job_sender, job_receiver) = flume::bounded(1);
    let mut foreman = Foreman::new(&bucket);
    foreman.bind_job_queue(job_receiver);
    let worker_queue = foreman.worker_queue();

    let root = config.root.clone();
    let produce = async move {
        for file in files {
            match load_upload_event(&root, DEFAULT_ASSET_DIRS, &file)
                .await
                .with_context(|| format!("load {file:?} failed"))?
            {
                None => info!(?file, "skip directory"),
                Some(event) => {
                    if job_sender.send_async(event).await.is_err() {
                        warn!("job queue is closed, stop loading files");

                        break;
                    }
                }
            }
        }

        Ok::<_, anyhow::Error>(())
    };

    let (produced, report, summary) =
        tokio::join!(produce, foreman.run(), run_workers(worker_queue, &client));
    bucket.stop();

    produced?;

    info!(forwarded = report.forwarded, "upload done");

    print_summary(&summary)
}

async fn watch(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let client = ThemeClient::new(&config).context("create theme client failed")?;
    let filter = EventFilter::new(&config.ignore_files).context("parse ignore_files failed")?;
    let bucket = start_bucket(&config)?;

    let (events, mut watch_handle) = FileWatcher::builder(&config.root)
        .recursive(true)
        .ignore(filter)
        .skip_unchanged(config.skip_unchanged)
        .try_watch()
        .with_context(|| format!("watch {:?} failed", config.root))?;

    let mut foreman = Foreman::new(&bucket);
    foreman.bind_job_queue(events);
    let worker_queue = foreman.worker_queue();

    println!("Watching for file changes in {}", config.root.display());

    let pipeline = async { tokio::join!(foreman.run(), run_workers(worker_queue, &client)) };
    tokio::pin!(pipeline);

    let (report, summary) = tokio::select! {
        result = &mut pipeline => {
            warn!("watch subscription ended");

            result
        }

        result = signal::ctrl_c() => {
            if let Err(err) = result {
                error!(%err, "listen for ctrl-c failed");
            }

            info!("interrupted, stop watching");

            watch_handle.close();
            pipeline.await
        }
    };
    bucket.stop();

    info!(forwarded = report.forwarded, "watch done");

    print_summary(&summary)
}

async fn print_changelog(url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("themewatch/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let releases = changelog::fetch_releases(&client, url).await?;

    print!("{}", changelog::render(&releases));

    Ok(())
}

async fn print_release_url(version: &str) -> Result<()> {
    let source = HttpFeedSource::new(reqwest::Client::new(), TIMBER_FEED_URL);
    let url = Resolver::new(source, TIMBER_ARCHIVE_ROOT)
        .resolve(version)
        .await?;

    println!("{url}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_upload_requires_file() {
        let err = Cli::try_parse_from(["themewatch", "upload"]).unwrap_err();

        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_parse_upload() {
        let cli = Cli::try_parse_from([
            "themewatch",
            "upload",
            "assets/app.css",
            "layout/theme.liquid",
        ])
        .unwrap();

        match cli.command {
            Commands::Upload { files, config } => {
                assert_eq!(
                    files,
                    [
                        PathBuf::from("assets/app.css"),
                        PathBuf::from("layout/theme.liquid")
                    ]
                );
                assert_eq!(config, PathBuf::from(DEFAULT_CONFIG));
            }

            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn test_parse_release_url() {
        let cli = Cli::try_parse_from(["themewatch", "release-url", "latest"]).unwrap();

        assert!(matches!(
            cli.command,
            Commands::ReleaseUrl { ref version } if version == "latest"
        ));
    }
}

//! Darkroom Ingest - bulk photo ingestion tool

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use darkroom_common::logging::{init_logging, LogConfig, LogLevel};
use darkroom_ingest::{
    config::Config,
    db::{postgres, PgCatalog, SiteRepository},
    features::{
        galleries::{self, CreateGalleryCommand},
        orphaned_photos,
        site_actions::{self, Selection, SiteAction, SiteCommand},
    },
    ingest::{
        framework::{
            resume_unfinished, BatchProgress, BatchRequest, PgTaskStateStore, ProgressQuery,
            ProgressTracker, TaskState, TaskStateStore, UploadEntry,
        },
        Pipeline, PipelineDeps,
    },
    storage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "darkroom-ingest")]
#[command(author, version, about = "Darkroom bulk photo ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a zip archive or a set of image files into a gallery
    Upload(UploadArgs),

    /// Show the progress of a submitted batch
    Progress {
        #[arg(long)]
        group: Uuid,
        /// Number of items reported at submission
        #[arg(long)]
        total: usize,
        #[arg(long)]
        gallery: i64,
    },

    /// Re-run every task left unfinished by a previous process
    Resume,

    /// Add or remove galleries or photos on a site
    SiteAction {
        /// One of add-galleries-to-site, remove-galleries-from-site,
        /// add-gallery-photos-to-site, remove-gallery-photos-from-site,
        /// add-photos-to-site, remove-photos-from-site
        action: SiteAction,
        #[arg(long)]
        site: i64,
        #[arg(long, value_delimiter = ',', conflicts_with = "photos")]
        galleries: Vec<i64>,
        #[arg(long, value_delimiter = ',')]
        photos: Vec<Uuid>,
    },

    /// Create a site
    CreateSite {
        #[arg(long)]
        name: String,
        #[arg(long)]
        domain: String,
    },

    /// Create a gallery
    CreateGallery {
        #[arg(long)]
        title: String,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        private: bool,
        #[arg(long = "site", value_delimiter = ',')]
        sites: Vec<i64>,
    },

    /// List photos of a gallery that share no site with it
    Orphans {
        #[arg(long)]
        gallery: i64,
    },

    /// Delete finished batches older than the given age
    Purge {
        #[arg(long, default_value_t = 24)]
        older_than_hours: i64,
    },
}

#[derive(Args, Debug)]
struct UploadArgs {
    #[arg(long)]
    gallery: i64,
    #[arg(long)]
    site: i64,
    /// Photos are titled "<title> <n>"
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    caption: String,
    #[arg(long)]
    private: bool,
    /// Zip archive with images in its top folder
    #[arg(long, conflicts_with = "files", required_unless_present = "files")]
    archive: Option<PathBuf>,
    /// Individual image files
    #[arg(long, num_args = 1..)]
    files: Vec<PathBuf>,
    /// Show a progress bar until the batch completes
    #[arg(long)]
    wait: bool,
}

struct Backend {
    config: Config,
    catalog: Arc<PgCatalog>,
    store: Arc<PgTaskStateStore>,
}

impl Backend {
    async fn connect() -> Result<Self> {
        let config = Config::load()?;
        let pool = postgres::create_pool(&config.database)
            .await
            .context("Failed to connect to database")?;
        postgres::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            config,
            catalog: Arc::new(PgCatalog::new(pool.clone())),
            store: Arc::new(PgTaskStateStore::new(pool)),
        })
    }

    async fn pipeline(&self) -> Result<Pipeline> {
        let storage = storage::from_config(&self.config.storage).await?;
        let deps = PipelineDeps {
            galleries: self.catalog.clone(),
            assets: self.catalog.clone(),
            storage,
            store: self.store.clone(),
            validator: None,
        };
        Ok(Pipeline::start(deps, &self.config.ingest))
    }
}

/// Creation time before which finished batches are purged
fn purge_cutoff(now: DateTime<Utc>, older_than_hours: i64) -> Result<DateTime<Utc>> {
    let age = TimeDelta::try_hours(older_than_hours)
        .with_context(|| format!("--older-than-hours {} is out of range", older_than_hours))?;
    now.checked_sub_signed(age)
        .with_context(|| format!("--older-than-hours {} reaches past the earliest date", older_than_hours))
}

async fn read_uploads(args: &UploadArgs) -> Result<Vec<UploadEntry>> {
    let mut entries = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Unusable file name: {}", path.display()))?;
        entries.push(UploadEntry::new(file_name, data));
    }
    Ok(entries)
}

fn progress_bar(total: usize) -> Result<ProgressBar> {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

fn print_progress(progress: &BatchProgress) {
    println!(
        "completed={} failed={} total={} next={:?}",
        progress.completed,
        progress.failed,
        progress.total,
        progress.next_step()
    );
}

/// List every item that did not produce a photo
async fn print_item_states(store: &dyn TaskStateStore, group_id: Uuid) -> Result<()> {
    for (ordinal, state) in store.group_states(group_id).await? {
        match state {
            TaskState::Skipped { reason } => println!("item {}: skipped ({})", ordinal, reason),
            TaskState::Failed { reason } => println!("item {}: failed ({})", ordinal, reason),
            _ => {},
        }
    }
    Ok(())
}

async fn upload(backend: &Backend, args: UploadArgs) -> Result<()> {
    let pipeline = backend.pipeline().await?;
    let request = BatchRequest {
        gallery_id: args.gallery,
        site_id: args.site,
        title_template: args.title.clone(),
        caption: args.caption.clone(),
        is_public: !args.private,
    };

    let handle = match &args.archive {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            pipeline.coordinator.submit_archive(request, &bytes).await?
        },
        None => {
            let entries = read_uploads(&args).await?;
            pipeline.coordinator.submit(request, entries).await?
        },
    };

    println!(
        "group={} total={} gallery={}",
        handle.group_id, handle.total, handle.gallery_id
    );

    if args.wait {
        let bar = progress_bar(handle.total)?;
        let finished = pipeline
            .tracker
            .wait_for_completion(
                ProgressQuery::from(&handle),
                backend.config.ingest.poll_interval(),
                |p| {
                    bar.set_position((p.completed + p.failed) as u64);
                    bar.set_message(format!("{} failed", p.failed));
                },
            )
            .await?;
        bar.finish();
        print_progress(&finished);
        print_item_states(backend.store.as_ref(), handle.group_id).await?;
    }

    pipeline.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("darkroom-ingest")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let backend = Backend::connect().await?;

    match cli.command {
        Command::Upload(args) => upload(&backend, args).await?,
        Command::Progress { group, total, gallery } => {
            let tracker = ProgressTracker::new(backend.store.clone());
            let progress = tracker
                .progress(ProgressQuery {
                    group_id: group,
                    expected_total: total,
                    gallery_id: gallery,
                })
                .await?;
            print_progress(&progress);
            print_item_states(backend.store.as_ref(), group).await?;
        },
        Command::Resume => {
            let pipeline = backend.pipeline().await?;
            let count = resume_unfinished(&pipeline.queue, backend.store.as_ref()).await?;
            println!("resumed={}", count);
            pipeline.shutdown().await?;
        },
        Command::SiteAction {
            action,
            site,
            galleries: gallery_ids,
            photos,
        } => {
            let selection = if photos.is_empty() {
                Selection::Galleries(gallery_ids)
            } else {
                Selection::Photos(photos)
            };
            let report = site_actions::handle(
                backend.catalog.as_ref(),
                SiteCommand {
                    action,
                    site_id: site,
                    selection,
                },
            )
            .await?;
            println!("{}", report.message);
        },
        Command::CreateSite { name, domain } => {
            let site = backend.catalog.create_site(&name, &domain).await?;
            println!("site={} name={} domain={}", site.id, site.name, site.domain);
        },
        Command::CreateGallery {
            title,
            slug,
            private,
            sites,
        } => {
            let gallery = galleries::handle(
                backend.catalog.as_ref(),
                CreateGalleryCommand {
                    title,
                    slug,
                    is_public: !private,
                    site_ids: sites,
                },
            )
            .await?;
            println!("gallery={} slug={}", gallery.id, gallery.slug);
        },
        Command::Orphans { gallery } => {
            let report = orphaned_photos(backend.catalog.as_ref(), gallery).await?;
            match report.warning {
                Some(warning) => println!("{}", warning),
                None => println!("No orphaned photos"),
            }
        },
        Command::Purge { older_than_hours } => {
            let cutoff = purge_cutoff(Utc::now(), older_than_hours)?;
            let purged = backend.store.purge_finished_before(cutoff).await?;
            println!("purged={}", purged);
        },
    }

    info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_cutoff() {
        let now = Utc::now();
        assert_eq!(purge_cutoff(now, 24).unwrap(), now - TimeDelta::days(1));
        assert_eq!(purge_cutoff(now, 0).unwrap(), now);
    }

    #[test]
    fn test_purge_cutoff_out_of_range() {
        let now = Utc::now();
        assert!(purge_cutoff(now, i64::MAX).is_err());
        assert!(purge_cutoff(now, i64::MIN).is_err());
        // representable as a delta, but before the earliest date
        assert!(purge_cutoff(now, 3_000_000_000).is_err());
    }
}

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use mlsync_core::episode::{EpisodeDescriptor, EpisodeId};
use mlsync_core::key::{MlLayout, DEFAULT_IMAGE_EXT, DEFAULT_ML_ROOT};
use mlsync_core::split::SplitConfig;
use mlsync_engine::config::{ConfigError, SheetsConfig, SyncConfig};
use mlsync_engine::data_files::{write_stage_data_files, DataFilesRun};
use mlsync_engine::manifest::manifest_changes;
use mlsync_engine::runner::{build_all_desired, process_all, RunContext, RunOptions};
use mlsync_engine::seasons::{discover_episodes, filter_episodes};
use mlsync_engine::sheet::{DirSheetSource, HttpSheetSource, SheetSource};
use mlsync_store::ObjectStore;

#[derive(Debug, Parser)]
#[command(
    name = "mlsync",
    about = "Reconcile spreadsheet labels with the ML folder of an object store"
)]
struct Cli {
    /// Debug-level logging (MLSYNC_LOG / RUST_LOG take precedence).
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile every discovered episode.
    Sync {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        sample: SampleArgs,

        /// Only these episodes (repeatable), e.g. --episode S01E02.
        #[arg(long = "episode", env = "MLSYNC_EPISODES", value_delimiter = ',')]
        episodes: Vec<String>,

        /// Plan and report without touching storage.
        #[arg(long)]
        dry_run: bool,

        /// Persist each episode's desired state as a `.jl` manifest.
        #[arg(long)]
        write_manifest: bool,
    },
    /// Write per-split `file_name,label` CSVs for every episode.
    DataFiles {
        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        sample: SampleArgs,

        /// Remove intermediate episode and stamped files (default).
        #[arg(long, overrides_with = "no_cleanup")]
        cleanup: bool,

        /// Keep intermediate episode and stamped files.
        #[arg(long, overrides_with = "cleanup")]
        no_cleanup: bool,
    },
    /// Diff the two latest manifests of an episode.
    ManifestChanges {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(long)]
        episode: String,
    },
}

#[derive(Debug, Args)]
struct StoreArgs {
    /// `s3://<bucket>` or a local directory standing in for the store root.
    #[arg(long, env = "MLSYNC_STORE_ROOT")]
    store_root: String,

    #[arg(long, env = "MLSYNC_BUCKET", default_value = "")]
    bucket: String,

    /// Key prefix of season files and manifests.
    #[arg(long, env = "MLSYNC_MANIFESTS_DIR", default_value = "tuttle_twins/manifests")]
    manifests_dir: String,

    #[arg(long, env = "MLSYNC_ML_ROOT", default_value = DEFAULT_ML_ROOT)]
    ml_root: String,

    #[arg(long, env = "MLSYNC_DATA_FILES_DIR", default_value = "data_files")]
    data_files_dir: PathBuf,

    /// Read `<dir>/<spreadsheet_id>.tsv` exports instead of live spreadsheets.
    #[arg(long, env = "MLSYNC_SHEETS_DIR")]
    sheets_dir: Option<PathBuf>,

    /// File holding a Sheets API key.
    #[arg(long, env = "MLSYNC_SHEETS_API_KEY_FILE")]
    sheets_api_key_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SampleArgs {
    /// Keep round(rows / N) rows of each sheet.
    #[arg(long, env = "MLSYNC_SUBSAMPLE", default_value_t = 1)]
    subsample: u32,

    /// Seed for subsampling and split assignment.
    #[arg(long, env = "MLSYNC_SEED")]
    seed: Option<u64>,

    /// Split buckets and weights, e.g. train=0.7,validate=0.2,test=0.1.
    #[arg(long, env = "MLSYNC_SPLITS", default_value = "train=0.7,validate=0.2,test=0.1")]
    splits: String,
}

fn build_config(
    store: &StoreArgs,
    sample: Option<&SampleArgs>,
    episodes: &[String],
) -> Result<SyncConfig, ConfigError> {
    let sheets = match &store.sheets_dir {
        Some(dir) => SheetsConfig::Dir(dir.clone()),
        None => SheetsConfig::Http {
            api_key_file: store.sheets_api_key_file.clone(),
        },
    };
    let (splits, seed, subsample) = match sample {
        Some(s) => (SplitConfig::parse(&s.splits)?, s.seed, s.subsample),
        None => (SplitConfig::default(), None, 1),
    };
    let episodes = episodes
        .iter()
        .map(|e| EpisodeId::parse(e))
        .collect::<Result<Vec<_>, _>>()?;
    let cfg = SyncConfig {
        store_root: store.store_root.clone(),
        bucket: store.bucket.clone(),
        manifests_dir: store.manifests_dir.clone(),
        layout: MlLayout::new(&store.ml_root, DEFAULT_IMAGE_EXT)?,
        data_files_dir: store.data_files_dir.clone(),
        sheets,
        splits,
        seed,
        subsample,
        episodes,
    };
    cfg.validate()?;
    Ok(cfg)
}

fn open_store(cfg: &mut SyncConfig) -> Result<Box<dyn ObjectStore>> {
    let store = mlsync_store::open_from_root(&cfg.store_root, &cfg.bucket)
        .with_context(|| format!("open store {}", cfg.store_root))?;
    cfg.bucket = store.bucket().to_string();
    Ok(store)
}

fn open_sheets(cfg: &SyncConfig) -> Result<Box<dyn SheetSource>> {
    let source: Box<dyn SheetSource> = match &cfg.sheets {
        SheetsConfig::Dir(dir) => Box::new(DirSheetSource::new(dir.clone())),
        SheetsConfig::Http { api_key_file } => {
            Box::new(HttpSheetSource::from_key_file(api_key_file.as_deref())?)
        }
    };
    Ok(source)
}

fn episodes_for(store: &dyn ObjectStore, cfg: &SyncConfig) -> Result<Vec<EpisodeDescriptor>> {
    let all = discover_episodes(store, &cfg.manifests_prefix())?;
    Ok(filter_episodes(all, &cfg.episodes)?)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    mlsync_observe::logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Sync {
            store,
            sample,
            episodes,
            dry_run,
            write_manifest,
        } => {
            let mut cfg = build_config(&store, Some(&sample), &episodes)?;
            let store = open_store(&mut cfg)?;
            let sheets = open_sheets(&cfg)?;
            let episodes = episodes_for(store.as_ref(), &cfg)?;
            let ctx = RunContext {
                store: store.as_ref(),
                sheets: sheets.as_ref(),
                config: &cfg,
            };
            let mut rng = cfg.rng();
            let report = process_all(
                ctx,
                &episodes,
                RunOptions {
                    dry_run,
                    write_manifest,
                },
                &mut rng,
            );

            for outcome in &report.episodes {
                match &outcome.result {
                    Ok(s) => println!(
                        "{} needed={} deleted={} moved={} copied={} unchanged={} failed={} verdict={}",
                        s.episode_id,
                        s.files_needed,
                        s.deleted,
                        s.moved,
                        s.copied,
                        s.unchanged,
                        s.failed,
                        match (&s.verification, s.converged()) {
                            (None, _) => "dry-run",
                            (Some(_), true) => "matched",
                            (Some(_), false) => "mismatched",
                        }
                    ),
                    Err(err) => println!("{} error: {err}", outcome.episode_id),
                }
            }
            Ok(if report.all_converged() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::DataFiles {
            store,
            sample,
            cleanup,
            no_cleanup,
        } => {
            let mut cfg = build_config(&store, Some(&sample), &[])?;
            let store = open_store(&mut cfg)?;
            let sheets = open_sheets(&cfg)?;
            let episodes = episodes_for(store.as_ref(), &cfg)?;
            let ctx = RunContext {
                store: store.as_ref(),
                sheets: sheets.as_ref(),
                config: &cfg,
            };
            let mut rng = cfg.rng();
            let (desired, failed) = build_all_desired(ctx, &episodes, &mut rng);
            let run = DataFilesRun {
                dir: &cfg.data_files_dir,
                splits: &cfg.splits,
                layout: &cfg.layout,
                created: Utc::now(),
                subsample: cfg.subsample,
            };
            let report = write_stage_data_files(&run, &desired, cleanup || !no_cleanup)?;
            for (split, path) in &report.files {
                let rows = report.rows.get(split).copied().unwrap_or(0);
                println!("{split}: {} rows={rows}", path.display());
            }
            for (episode_id, err) in &failed {
                println!("{episode_id} error: {err}");
            }
            Ok(if failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::ManifestChanges { store, episode } => {
            let episode_id = EpisodeId::parse(&episode)?;
            let mut cfg = build_config(&store, None, &[])?;
            let store = open_store(&mut cfg)?;
            let changes = manifest_changes(store.as_ref(), &cfg.manifests_prefix(), &episode_id)?;
            println!("latest: {}", changes.latest_key);
            println!(
                "previous: {}",
                changes.previous_key.as_deref().unwrap_or("<none>")
            );
            for r in &changes.diff.added {
                println!("+ {} -> {}", r.src_url, r.dst_key);
            }
            for r in &changes.diff.removed {
                println!("- {} -> {}", r.src_url, r.dst_key);
            }
            for r in &changes.diff.relocated {
                println!("~ {} {} -> {}", r.src_url, r.from_key, r.to_key);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

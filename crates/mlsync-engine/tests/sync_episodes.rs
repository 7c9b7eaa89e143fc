mod common;

use std::path::Path;

use anyhow::Result;

use common::temp_dir;
use mlsync_core::key::MlLayout;
use mlsync_core::split::SplitConfig;
use mlsync_engine::config::{SheetsConfig, SyncConfig};
use mlsync_engine::manifest::manifest_changes;
use mlsync_engine::runner::{process_all, RunContext, RunOptions};
use mlsync_engine::seasons::{discover_episodes, filter_episodes};
use mlsync_engine::sheet::DirSheetSource;
use mlsync_engine::EpisodeError;
use mlsync_store::{FsObjectStore, ObjectStore};

const SOURCE_BUCKET: &str = "media-source";
const HEADER: &str =
    "\tFRAME NUMBER\tJONNY's RECLASSIFICATION\tSUPERVISED CLASSIFICATION\tUNSUPERVISED CLASSIFICATION";

fn base_url(episode_lower: &str) -> String {
    format!(
        "https://s3.us-west-2.amazonaws.com/{SOURCE_BUCKET}/tuttle_twins/{episode_lower}/default_eng/v1/frames/thumbnails/"
    )
}

fn write_sheet(dir: &Path, id: &str, episode_lower: &str, rows: &[(&str, &str, &str, &str)]) -> Result<()> {
    let mut body = format!("{}{HEADER}\n", base_url(episode_lower));
    for (frame, re, sup, unsup) in rows {
        body.push_str(&format!("x\t{frame}\t{re}\t{sup}\t{unsup}\n"));
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(format!("{id}.tsv")), body)?;
    Ok(())
}

fn seed_stamps(root: &Path, episode_lower: &str, frames: &[&str]) -> Result<()> {
    let src = FsObjectStore::new(root, SOURCE_BUCKET)?;
    for f in frames {
        src.put(
            &format!("tuttle_twins/{episode_lower}/default_eng/v1/frames/stamps/{f}.jpg"),
            f.as_bytes(),
        )?;
    }
    Ok(())
}

fn config(root: &Path) -> Result<SyncConfig> {
    Ok(SyncConfig {
        store_root: root.display().to_string(),
        bucket: "media".to_string(),
        manifests_dir: "tuttle_twins/manifests".to_string(),
        layout: MlLayout::default(),
        data_files_dir: root.join("data_files"),
        sheets: SheetsConfig::Dir(root.join("sheets")),
        splits: SplitConfig::parse("train=1")?,
        seed: Some(11),
        subsample: 1,
        episodes: Vec::new(),
    })
}

fn share_link(id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{id}/edit?usp=sharing")
}

fn ml(label: &str, frame: &str) -> String {
    format!("tuttle_twins/ML/train/{label}/{frame}.jpg")
}

const F1: &str = "TT_S01_E01_FRM-00-00-08-11";
const F2: &str = "TT_S01_E01_FRM-00-00-08-12";
const F3: &str = "TT_S01_E01_FRM-00-00-08-13";

#[test]
fn sync_converges_then_follows_sheet_edits() -> Result<()> {
    let root = temp_dir("sync-edits")?;
    let cfg = config(&root)?;
    let store = FsObjectStore::new(&root, "media")?;
    store.put(
        "tuttle_twins/manifests/S01-episodes.json",
        format!(
            r#"[{{"season_code":"S01","episode_code":"E01","google_spreadsheet_share_link":"{}"}}]"#,
            share_link("sheet-s01e01")
        )
        .as_bytes(),
    )?;
    seed_stamps(&root, "s01e01", &[F1, F2, F3])?;
    write_sheet(
        &root.join("sheets"),
        "sheet-s01e01",
        "s01e01",
        &[
            (F1, "", "Common", "Rare"),
            (F2, "Legendary", "Common", ""),
            (F3, "", "", "Uncommon"),
        ],
    )?;
    cfg.validate()?;

    let sheets = DirSheetSource::new(root.join("sheets"));
    let ctx = RunContext {
        store: &store,
        sheets: &sheets,
        config: &cfg,
    };
    let episodes = filter_episodes(discover_episodes(&store, &cfg.manifests_prefix())?, &[])?;
    assert_eq!(episodes.len(), 1);
    let opts = RunOptions {
        dry_run: false,
        write_manifest: true,
    };

    // First sync copies everything from the stamps.
    let report = process_all(ctx, &episodes, opts, &mut cfg.rng());
    assert!(report.all_converged());
    let summary = report.episodes[0].result.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(summary.copied, 3);
    assert_eq!(summary.files_needed, 3);
    assert!(summary.manifest_key.is_some());
    assert_eq!(store.get(&ml("Common", F1))?, F1.as_bytes());
    assert!(store.get(&ml("Legendary", F2)).is_ok());
    assert!(store.get(&ml("Uncommon", F3)).is_ok());

    // Re-running changes nothing.
    let report = process_all(ctx, &episodes, opts, &mut cfg.rng());
    let summary = report.episodes[0].result.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(
        (summary.unchanged, summary.moved, summary.copied, summary.deleted),
        (3, 0, 0, 0)
    );
    let changes = manifest_changes(&store, &cfg.manifests_prefix(), &episodes[0].episode_id)?;
    assert!(changes.previous_key.is_some());
    assert!(changes.diff.is_empty());

    // Relabel F1, drop F3.
    write_sheet(
        &root.join("sheets"),
        "sheet-s01e01",
        "s01e01",
        &[(F1, "Rare", "Common", ""), (F2, "Legendary", "", "")],
    )?;
    let report = process_all(ctx, &episodes, opts, &mut cfg.rng());
    assert!(report.all_converged());
    let summary = report.episodes[0].result.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(
        (summary.unchanged, summary.moved, summary.copied, summary.deleted),
        (1, 1, 0, 1)
    );
    assert!(store.get(&ml("Rare", F1)).is_ok());
    assert!(store.get(&ml("Common", F1)).is_err());
    assert!(store.get(&ml("Uncommon", F3)).is_err());

    let changes = manifest_changes(&store, &cfg.manifests_prefix(), &episodes[0].episode_id)?;
    assert_eq!(changes.diff.relocated.len(), 1);
    assert_eq!(changes.diff.removed.len(), 1);
    assert!(changes.diff.added.is_empty());
    Ok(())
}

#[test]
fn mislinked_sheet_fails_only_its_episode() -> Result<()> {
    let root = temp_dir("sync-mislinked")?;
    let cfg = config(&root)?;
    let store = FsObjectStore::new(&root, "media")?;
    store.put(
        "tuttle_twins/manifests/S01-episodes.json",
        format!(
            r#"[{{"episode_id":"S01E02","spreadsheet_share_link":"{}"}},
                {{"episode_id":"S01E01","spreadsheet_share_link":"{}"}}]"#,
            share_link("wrong"),
            share_link("right")
        )
        .as_bytes(),
    )?;
    seed_stamps(&root, "s01e01", &[F1])?;
    // S01E02 points at the S01E01 sheet.
    write_sheet(&root.join("sheets"), "wrong", "s01e01", &[(F1, "", "Common", "")])?;
    write_sheet(&root.join("sheets"), "right", "s01e01", &[(F1, "", "Common", "")])?;

    let sheets = DirSheetSource::new(root.join("sheets"));
    let ctx = RunContext {
        store: &store,
        sheets: &sheets,
        config: &cfg,
    };
    let episodes = discover_episodes(&store, &cfg.manifests_prefix())?;
    let report = process_all(ctx, &episodes, RunOptions::default(), &mut cfg.rng());

    assert!(!report.all_converged());
    assert_eq!(report.failed().count(), 1);
    assert!(matches!(
        report.episodes[0].result,
        Err(EpisodeError::Desired(_))
    ));
    let second = report.episodes[1].result.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(second.converged());
    assert_eq!(second.copied, 1);
    Ok(())
}

#[test]
fn dry_run_reports_plan_without_writing() -> Result<()> {
    let root = temp_dir("sync-dry-run")?;
    let mut cfg = config(&root)?;
    cfg.episodes = vec!["S01E01".parse()?];
    let store = FsObjectStore::new(&root, "media")?;
    store.put(
        "tuttle_twins/manifests/S01-episodes.json",
        format!(
            r#"[{{"episode_id":"S01E01","spreadsheet_share_link":"{}"}}]"#,
            share_link("dry")
        )
        .as_bytes(),
    )?;
    seed_stamps(&root, "s01e01", &[F1, F2])?;
    write_sheet(
        &root.join("sheets"),
        "dry",
        "s01e01",
        &[(F1, "", "Common", ""), (F2, "", "Rare", "")],
    )?;

    let sheets = DirSheetSource::new(root.join("sheets"));
    let ctx = RunContext {
        store: &store,
        sheets: &sheets,
        config: &cfg,
    };
    let episodes = filter_episodes(
        discover_episodes(&store, &cfg.manifests_prefix())?,
        &cfg.episodes,
    )?;
    let opts = RunOptions {
        dry_run: true,
        write_manifest: true,
    };
    let report = process_all(ctx, &episodes, opts, &mut cfg.rng());
    assert!(report.all_converged());
    let summary = report.episodes[0].result.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(summary.copied, 2);
    assert!(summary.verification.is_none());
    assert!(summary.manifest_key.is_none());
    assert!(store.list("tuttle_twins/ML/")?.is_empty());
    Ok(())
}

//! Per-split `file_name,label` CSVs for the training pipeline.
//!
//! Each episode first gets `<episode>_<split>_<utc>_<subsample>_data.csv`; those are
//! concatenated per split into `<split>_<utc>_<subsample>_data.csv`, which is then copied
//! to the stable `<split>_data.csv`. Cleanup removes everything but the stable files.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use mlsync_core::episode::EpisodeId;
use mlsync_core::key::MlLayout;
use mlsync_core::split::SplitConfig;
use thiserror::Error;
use tracing::{debug, info};

use crate::desired::DesiredState;

const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Error)]
pub enum DataFilesError {
    #[error("data file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DataFilesError + '_ {
    move |source| DataFilesError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Quotes a CSV field only when it needs it.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Headerless CSV body per split; every configured split is present, possibly empty.
pub fn stage_lines(
    desired: &DesiredState,
    splits: &SplitConfig,
    layout: &MlLayout,
) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> =
        splits.names().map(|n| (n.to_string(), String::new())).collect();
    for row in &desired.rows {
        let Some(body) = out.get_mut(row.split()) else {
            continue;
        };
        body.push_str(&csv_field(&layout.file_name(&row.frame_id)));
        body.push(',');
        body.push_str(&csv_field(row.label()));
        body.push('\n');
    }
    out
}

/// Settings shared by every file written in one run.
#[derive(Debug, Clone)]
pub struct DataFilesRun<'a> {
    pub dir: &'a Path,
    pub splits: &'a SplitConfig,
    pub layout: &'a MlLayout,
    pub created: DateTime<Utc>,
    pub subsample: u32,
}

impl DataFilesRun<'_> {
    fn stamp(&self) -> String {
        self.created.format(STAMP_FORMAT).to_string()
    }

    pub fn episode_path(&self, episode_id: &EpisodeId, split: &str) -> PathBuf {
        self.dir.join(format!(
            "{episode_id}_{split}_{}_{}_data.csv",
            self.stamp(),
            self.subsample
        ))
    }

    pub fn stamped_path(&self, split: &str) -> PathBuf {
        self.dir
            .join(format!("{split}_{}_{}_data.csv", self.stamp(), self.subsample))
    }

    pub fn unstamped_path(&self, split: &str) -> PathBuf {
        self.dir.join(format!("{split}_data.csv"))
    }
}

/// Writes one episode's per-split files; returns split -> path.
pub fn write_episode_stage_files(
    run: &DataFilesRun<'_>,
    desired: &DesiredState,
) -> Result<BTreeMap<String, PathBuf>, DataFilesError> {
    std::fs::create_dir_all(run.dir).map_err(io_err(run.dir))?;
    let mut out = BTreeMap::new();
    for (split, body) in stage_lines(desired, run.splits, run.layout) {
        let path = run.episode_path(&desired.episode_id, &split);
        std::fs::write(&path, body.as_bytes()).map_err(io_err(&path))?;
        out.insert(split, path);
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFilesReport {
    /// split -> `<split>_data.csv`
    pub files: BTreeMap<String, PathBuf>,
    /// split -> lines written
    pub rows: BTreeMap<String, usize>,
    pub episodes: usize,
    /// Intermediate files removed by cleanup.
    pub removed: usize,
}

/// Writes every episode's files, concatenates them per split and publishes the stable copies.
pub fn write_stage_data_files(
    run: &DataFilesRun<'_>,
    episodes: &[DesiredState],
    cleanup: bool,
) -> Result<DataFilesReport, DataFilesError> {
    std::fs::create_dir_all(run.dir).map_err(io_err(run.dir))?;
    let mut report = DataFilesReport::default();
    let mut intermediate: Vec<PathBuf> = Vec::new();

    let mut stamped: BTreeMap<String, std::fs::File> = BTreeMap::new();
    for split in run.splits.names() {
        let path = run.stamped_path(split);
        let file = std::fs::File::create(&path).map_err(io_err(&path))?;
        stamped.insert(split.to_string(), file);
        report.rows.insert(split.to_string(), 0);
        intermediate.push(path);
    }

    for desired in episodes {
        let files = write_episode_stage_files(run, desired)?;
        for (split, path) in files {
            let bytes = std::fs::read(&path).map_err(io_err(&path))?;
            let lines = bytes.iter().filter(|b| **b == b'\n').count();
            if let Some(dst) = stamped.get_mut(&split) {
                let dst_path = run.stamped_path(&split);
                dst.write_all(&bytes).map_err(io_err(&dst_path))?;
            }
            *report.rows.entry(split).or_insert(0) += lines;
            intermediate.push(path);
        }
        report.episodes += 1;
        debug!(episode_id = %desired.episode_id, "episode data files written");
    }

    for (split, mut file) in stamped {
        let stamped_path = run.stamped_path(&split);
        file.flush().map_err(io_err(&stamped_path))?;
        drop(file);
        let unstamped = run.unstamped_path(&split);
        std::fs::copy(&stamped_path, &unstamped).map_err(io_err(&unstamped))?;
        report.files.insert(split, unstamped);
    }

    if cleanup {
        for path in &intermediate {
            match std::fs::remove_file(path) {
                Ok(()) => report.removed += 1,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(DataFilesError::Io {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }
    }

    info!(
        target: "mlsync_proof",
        event = "data_files_written",
        episodes = report.episodes,
        files = report.files.len(),
        rows = report.rows.values().sum::<usize>(),
        removed = report.removed,
        "stage data files written"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mlsync_core::types::{CanonicalRow, FrameId, MlKey};

    fn desired(ep: &str, rows: &[(&str, &str, &str)]) -> DesiredState {
        let episode_id = EpisodeId::parse(ep).unwrap();
        let rows = rows
            .iter()
            .map(|(frame, split, label)| CanonicalRow {
                episode_id: episode_id.clone(),
                frame_id: FrameId::parse(frame).unwrap(),
                source_url: String::new(),
                desired_key: MlKey::new(*split, *label).unwrap(),
            })
            .collect::<Vec<_>>();
        DesiredState {
            episode_id,
            sheet_rows: rows.len(),
            sampled_rows: rows.len(),
            rows,
            missing_label_rows: 0,
            invalid_label_rows: 0,
            duplicate_rows: 0,
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "mlsync-data-files-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
        ))
    }

    #[test]
    fn csv_quotes_only_when_needed() {
        assert_eq!(csv_field("Common"), "Common");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn stage_lines_cover_every_split() {
        let d = desired("S01E01", &[("TT_S01_E01_FRM-00-00-00-01", "train", "Common")]);
        let lines = stage_lines(&d, &SplitConfig::default(), &MlLayout::default());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines["train"], "TT_S01_E01_FRM-00-00-00-01.jpg,Common\n");
        assert_eq!(lines["test"], "");
    }

    #[test]
    fn concatenates_episodes_and_cleans_up() -> anyhow::Result<()> {
        let dir = temp_dir("all");
        let splits = SplitConfig::default();
        let layout = MlLayout::default();
        let run = DataFilesRun {
            dir: &dir,
            splits: &splits,
            layout: &layout,
            created: Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).single().unwrap(),
            subsample: 100,
        };
        let eps = vec![
            desired("S01E01", &[("TT_S01_E01_FRM-00-00-00-01", "train", "Common")]),
            desired(
                "S01E02",
                &[
                    ("TT_S01_E02_FRM-00-00-00-01", "train", "Rare"),
                    ("TT_S01_E02_FRM-00-00-00-02", "validate", "Common"),
                ],
            ),
        ];

        let report = write_stage_data_files(&run, &eps, true)?;
        assert_eq!(report.episodes, 2);
        assert_eq!(report.rows["train"], 2);
        assert_eq!(report.rows["validate"], 1);
        assert_eq!(report.rows["test"], 0);
        // 3 stamped + 3 splits x 2 episodes
        assert_eq!(report.removed, 9);

        let train = std::fs::read_to_string(&report.files["train"])?;
        assert_eq!(
            train,
            "TT_S01_E01_FRM-00-00-00-01.jpg,Common\nTT_S01_E02_FRM-00-00-00-01.jpg,Rare\n"
        );
        let mut names: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["test_data.csv", "train_data.csv", "validate_data.csv"]);
        Ok(())
    }

    #[test]
    fn keeps_intermediate_files_without_cleanup() -> anyhow::Result<()> {
        let dir = temp_dir("keep");
        let splits = SplitConfig::default();
        let layout = MlLayout::default();
        let run = DataFilesRun {
            dir: &dir,
            splits: &splits,
            layout: &layout,
            created: Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).single().unwrap(),
            subsample: 1,
        };
        let eps = vec![desired("S01E01", &[("TT_S01_E01_FRM-00-00-00-01", "test", "Rare")])];
        let report = write_stage_data_files(&run, &eps, false)?;
        assert_eq!(report.removed, 0);
        assert!(run.stamped_path("test").is_file());
        assert!(dir
            .join("S01E01_test_2022-05-01T12:00:00.000000_1_data.csv")
            .is_file());
        Ok(())
    }

    #[test]
    fn same_episode_number_in_two_seasons_gets_two_files() {
        let dir = PathBuf::from("out");
        let splits = SplitConfig::default();
        let layout = MlLayout::default();
        let run = DataFilesRun {
            dir: &dir,
            splits: &splits,
            layout: &layout,
            created: Utc.with_ymd_and_hms(2022, 5, 1, 12, 0, 0).single().unwrap(),
            subsample: 1,
        };
        let s1 = run.episode_path(&EpisodeId::parse("S01E01").unwrap(), "train");
        let s2 = run.episode_path(&EpisodeId::parse("S02E01").unwrap(), "train");
        assert_ne!(s1, s2);
        assert_eq!(s2, dir.join("S02E01_train_2022-05-01T12:00:00.000000_1_data.csv"));
    }
}

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod data_files;
pub mod desired;
pub mod manifest;
pub mod normalize;
pub mod observed;
pub mod reconcile;
pub mod runner;
pub mod seasons;
pub mod sheet;
pub mod verify;

pub use config::{ConfigError, SheetsConfig, SyncConfig};
pub use desired::{build_desired_state, DesiredState, DesiredStateError};
pub use observed::{build_observed_state, ObservedState};
pub use reconcile::{apply, plan, ApplyReport, Plan, ReconciliationAction};
pub use runner::{process_all, process_episode, EpisodeError, EpisodeSummary, RunContext, RunOptions, RunReport};
pub use verify::{verify, Verification};

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod episode;
pub mod key;
pub mod manifest;
pub mod split;
pub mod types;

pub use episode::{EpisodeDescriptor, EpisodeId};
pub use key::{MalformedKeyError, MlLayout, MlObjectKey};
pub use split::SplitConfig;
pub use types::{CanonicalRow, FrameId, FrameKey, LabeledRow, MlKey, ObservedRow};

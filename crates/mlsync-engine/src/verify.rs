use std::collections::BTreeMap;

use mlsync_core::types::{CanonicalRow, FrameId, MlKey};

use crate::observed::ObservedState;

/// Post-apply comparison of the re-listed folder against the desired table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub expected: usize,
    /// Placements found, counting every location of a duplicated frame.
    pub observed: usize,
    /// Desired frames with no placement.
    pub missing: Vec<FrameId>,
    /// Stored frames that are not desired.
    pub unexpected: Vec<FrameId>,
    /// Desired frames stored somewhere other than exactly their desired key.
    pub misplaced: Vec<FrameId>,
}

impl Verification {
    pub fn converged(&self) -> bool {
        self.expected == self.observed
            && self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.misplaced.is_empty()
    }

    pub fn discrepancies(&self) -> usize {
        self.missing.len() + self.unexpected.len() + self.misplaced.len()
    }
}

pub fn verify(desired: &[CanonicalRow], observed: &ObservedState) -> Verification {
    let wanted: BTreeMap<&FrameId, &MlKey> = desired
        .iter()
        .map(|r| (&r.frame_id, &r.desired_key))
        .collect();

    let mut out = Verification {
        expected: wanted.len(),
        observed: observed.len(),
        ..Verification::default()
    };

    for (frame_id, key) in &wanted {
        let locations = observed.locations(frame_id);
        match locations {
            [] => out.missing.push((*frame_id).clone()),
            [only] if &only.observed_key == *key => {}
            _ => out.misplaced.push((*frame_id).clone()),
        }
    }
    for (frame_id, _) in observed.frames() {
        if !wanted.contains_key(frame_id) {
            out.unexpected.push(frame_id.clone());
        }
    }
    out
}

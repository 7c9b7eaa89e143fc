use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use thiserror::Error;

use crate::types::{valid_segment, CanonicalRow, LabeledRow, MlKey};

#[derive(Debug, Clone, PartialEq)]
pub struct SplitBucket {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SplitConfigError {
    #[error("split configuration must name at least one bucket")]
    Empty,
    #[error("invalid bucket entry {0:?}; expected <name>=<weight>")]
    Entry(String),
    #[error("invalid bucket name {0:?}")]
    Name(String),
    #[error("duplicate bucket name {0:?}")]
    Duplicate(String),
    #[error("bucket {name:?} has invalid weight {weight}; weights must be finite and > 0")]
    Weight { name: String, weight: f64 },
}

/// Named destination buckets and their sampling weights.
///
/// Weights need not sum to 1; they are relative.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    buckets: Vec<SplitBucket>,
    index: WeightedIndex<f64>,
}

impl SplitConfig {
    pub fn new(buckets: Vec<SplitBucket>) -> Result<Self, SplitConfigError> {
        if buckets.is_empty() {
            return Err(SplitConfigError::Empty);
        }
        let mut seen = std::collections::BTreeSet::new();
        for b in &buckets {
            if !valid_segment(&b.name) {
                return Err(SplitConfigError::Name(b.name.clone()));
            }
            if !seen.insert(b.name.as_str()) {
                return Err(SplitConfigError::Duplicate(b.name.clone()));
            }
            if !b.weight.is_finite() || b.weight <= 0.0 {
                return Err(SplitConfigError::Weight {
                    name: b.name.clone(),
                    weight: b.weight,
                });
            }
        }
        let index = WeightedIndex::new(buckets.iter().map(|b| b.weight)).map_err(|_| {
            SplitConfigError::Weight {
                name: buckets[0].name.clone(),
                weight: buckets[0].weight,
            }
        })?;
        Ok(Self { buckets, index })
    }

    /// Parses `train=0.7,validate=0.2,test=0.1`.
    pub fn parse(input: &str) -> Result<Self, SplitConfigError> {
        let mut buckets = Vec::new();
        for raw in input.split(',') {
            let entry = raw.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((name, weight)) = entry.split_once('=') else {
                return Err(SplitConfigError::Entry(entry.to_string()));
            };
            let weight: f64 = weight
                .trim()
                .parse()
                .map_err(|_| SplitConfigError::Entry(entry.to_string()))?;
            buckets.push(SplitBucket {
                name: name.trim().to_string(),
                weight,
            });
        }
        Self::new(buckets)
    }

    pub fn buckets(&self) -> &[SplitBucket] {
        &self.buckets
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(|b| b.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buckets.iter().any(|b| b.name == name)
    }

    /// Normalized weight of `name`, or `None` if it is not a configured bucket.
    pub fn share(&self, name: &str) -> Option<f64> {
        let total: f64 = self.buckets.iter().map(|b| b.weight).sum();
        self.buckets
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.weight / total)
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let i = self.index.sample(rng);
        &self.buckets[i].name
    }
}

impl Default for SplitConfig {
    fn default() -> Self {
        let buckets = vec![
            SplitBucket {
                name: "train".to_string(),
                weight: 0.7,
            },
            SplitBucket {
                name: "validate".to_string(),
                weight: 0.2,
            },
            SplitBucket {
                name: "test".to_string(),
                weight: 0.1,
            },
        ];
        let index = match WeightedIndex::new([0.7, 0.2, 0.1]) {
            Ok(index) => index,
            Err(_) => unreachable!("constant weights are positive"),
        };
        Self { buckets, index }
    }
}

impl PartialEq for SplitConfig {
    fn eq(&self, other: &Self) -> bool {
        self.buckets == other.buckets
    }
}

impl fmt::Display for SplitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.buckets.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", b.name, b.weight)?;
        }
        Ok(())
    }
}

impl FromStr for SplitConfig {
    type Err = SplitConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Draws one split bucket per row, independently, and yields the desired rows.
///
/// This is the only nondeterministic step of a run; pass a seeded `rng` for
/// reproducible assignments.
pub fn assign_splits<R: Rng + ?Sized>(
    rows: Vec<LabeledRow>,
    splits: &SplitConfig,
    rng: &mut R,
) -> Vec<CanonicalRow> {
    rows.into_iter()
        .map(|row| {
            let split = splits.draw(rng).to_string();
            CanonicalRow {
                episode_id: row.episode_id,
                frame_id: row.frame_id,
                source_url: row.source_url,
                desired_key: MlKey {
                    split,
                    label: row.label,
                },
            }
        })
        .collect()
}

/// Bucket name -> number of rows assigned to it.
pub fn split_histogram(rows: &[CanonicalRow]) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for r in rows {
        *out.entry(r.split().to_string()).or_insert(0) += 1;
    }
    out
}

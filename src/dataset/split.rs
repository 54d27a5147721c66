use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult};

const RATIO_SUM_TOLERANCE: f64 = 1e-6;
// n * ratio can land a hair below an integer (0.29 * 100 = 28.999...)
const FLOOR_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Split {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Split::ALL
            .iter()
            .copied()
            .find(|split| split.name() == s)
            .ok_or_else(|| {
                DatasetError::InvalidConfig(format!(
                    "unknown split {:?}, expected train, val or test",
                    s
                ))
            })
    }
}

/// Share of the samples going to train, val and test. Always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatio {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSizes {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl SplitRatio {
    pub fn new(train: f64, val: f64, test: f64) -> DatasetResult<SplitRatio> {
        let ratio = SplitRatio { train, val, test };
        let invalid = |msg: &str| DatasetError::InvalidRatio {
            ratio: ratio.to_string(),
            msg: msg.to_string(),
        };
        if [train, val, test].iter().any(|r| !r.is_finite() || *r < 0.) {
            return Err(invalid("every part must be a finite, non negative number"));
        }
        if (train + val + test - 1.).abs() > RATIO_SUM_TOLERANCE {
            return Err(invalid("parts must sum to 1.0"));
        }
        Ok(ratio)
    }

    /// train and val are floored, test absorbs the remainder.
    pub fn sizes(&self, total: usize) -> SplitSizes {
        let floor = |r: f64| ((total as f64) * r + FLOOR_EPSILON).floor() as usize;
        let train = floor(self.train).min(total);
        let val = floor(self.val).min(total - train);
        SplitSizes {
            train,
            val,
            test: total - train - val,
        }
    }
}

impl Default for SplitRatio {
    fn default() -> Self {
        SplitRatio {
            train: 0.7,
            val: 0.1,
            test: 0.2,
        }
    }
}

impl fmt::Display for SplitRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.train, self.val, self.test)
    }
}

/// Parses `"train,val,test"`, e.g. `"0.7,0.1,0.2"`.
impl FromStr for SplitRatio {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |msg: String| DatasetError::InvalidRatio {
            ratio: s.to_string(),
            msg,
        };
        let parts = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .map_err(|_| invalid(format!("{:?} is not a number", p.trim())))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        match parts.as_slice() {
            [train, val, test] => SplitRatio::new(*train, *val, *test),
            _ => Err(invalid(format!("expected 3 parts, found {}", parts.len()))),
        }
    }
}

impl SplitSizes {
    pub fn get(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train,
            Split::Val => self.val,
            Split::Test => self.test,
        }
    }
}

/// Disjoint, exhaustive assignment of items to the three splits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<T> {
    pub train: Vec<T>,
    pub val: Vec<T>,
    pub test: Vec<T>,
}

impl<T> Partition<T> {
    pub fn get(&self, split: Split) -> &[T] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Split, &[T])> {
        Split::ALL.iter().map(move |split| (*split, self.get(*split)))
    }
}

/// Shuffle `items` with a rng seeded from `seed`, then cut them by `ratio`.
/// The same items, seed and ratio always give the same partition.
pub fn partition<T>(mut items: Vec<T>, ratio: &SplitRatio, seed: u64) -> Partition<T> {
    let sizes = ratio.sizes(items.len());
    items.shuffle(&mut StdRng::seed_from_u64(seed));
    let test = items.split_off(sizes.train + sizes.val);
    let val = items.split_off(sizes.train);
    Partition {
        train: items,
        val,
        test,
    }
}

/// Seed for the split shuffle. A random one when none is given; log it to
/// reproduce the run.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| rand::thread_rng().gen())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_samples_default_ratio() {
        let sizes = SplitRatio::new(0.7, 0.1, 0.2).unwrap().sizes(10);
        assert_eq!(
            sizes,
            SplitSizes {
                train: 7,
                val: 1,
                test: 2
            }
        );
    }

    #[test]
    fn sizes_always_sum_to_total() {
        let ratios = [
            (0.7, 0.1, 0.2),
            (1.0, 0.0, 0.0),
            (0.0, 0.0, 1.0),
            (0.0, 1.0, 0.0),
            (0.29, 0.71, 0.0),
            (1. / 3., 1. / 3., 1. / 3.),
            (0.8, 0.15, 0.05),
        ];
        for (t, v, s) in ratios {
            let ratio = SplitRatio::new(t, v, s).unwrap();
            for n in 0..300 {
                let sizes = ratio.sizes(n);
                assert_eq!(sizes.train + sizes.val + sizes.test, n, "{} {}", ratio, n);
            }
        }
    }

    #[test]
    fn floor_is_not_fooled_by_float_error() {
        let sizes = SplitRatio::new(0.29, 0.71, 0.0).unwrap().sizes(100);
        assert_eq!(sizes.train, 29);
        assert_eq!(sizes.val, 71);
        assert_eq!(sizes.test, 0);
    }

    #[test]
    fn bad_ratios_are_rejected() {
        assert!(SplitRatio::new(0.5, 0.5, 0.5).is_err());
        assert!(SplitRatio::new(1.2, -0.1, -0.1).is_err());
        assert!(SplitRatio::new(f64::NAN, 0.5, 0.5).is_err());
        assert!("0.7,0.3".parse::<SplitRatio>().is_err());
        assert!("0.7,x,0.2".parse::<SplitRatio>().is_err());
        let parsed: SplitRatio = " 0.6, 0.2 ,0.2".parse().unwrap();
        assert_eq!(parsed.train, 0.6);
    }

    #[test]
    fn partition_is_disjoint_exhaustive_and_seeded() {
        let items: Vec<u32> = (0..57).collect();
        let ratio = SplitRatio::default();
        let a = partition(items.clone(), &ratio, 42);
        let b = partition(items.clone(), &ratio, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 57);
        let mut all: Vec<u32> = a.iter().flat_map(|(_, s)| s.iter().copied()).collect();
        all.sort();
        assert_eq!(all, items);
        assert_eq!(a.train.len(), 39);
        assert_eq!(a.val.len(), 5);
        assert_eq!(a.test.len(), 13);
    }

    #[test]
    fn split_names_parse() {
        assert_eq!("val".parse::<Split>().unwrap(), Split::Val);
        assert!("valid".parse::<Split>().is_err());
    }
}

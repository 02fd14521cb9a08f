//! Break ratio policy: how long a rest the last flow session earned.

use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

/// Suggested breaks never exceed one hour.
pub const MAX_BREAK_SECS: u64 = 3600;

pub const DEFAULT_BREAK_RATIO: f64 = 0.2;

/// Ratio presets offered to the user, as (label, numerator, denominator).
pub const RATIO_PRESETS: [(&str, u32, u32); 5] = [
    ("1/3", 1, 3),
    ("1/4", 1, 4),
    ("1/5", 1, 5),
    ("1/6", 1, 6),
    ("1/7", 1, 7),
];

/// Fraction of a flow session converted into break time, always in `(0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct BreakRatio(f64);

impl BreakRatio {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 || value > 1.0 {
            bail!("break ratio must be within (0, 1], got {value}");
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for BreakRatio {
    fn default() -> Self {
        Self(DEFAULT_BREAK_RATIO)
    }
}

impl TryFrom<f64> for BreakRatio {
    type Error = anyhow::Error;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<BreakRatio> for f64 {
    fn from(ratio: BreakRatio) -> Self {
        ratio.0
    }
}

/// Accepts `0.25` as well as `1/4`.
impl FromStr for BreakRatio {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let value = match raw.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("invalid ratio numerator '{num}'"))?;
                let den: f64 = den
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("invalid ratio denominator '{den}'"))?;
                if den == 0.0 {
                    bail!("ratio denominator must not be zero");
                }
                num / den
            }
            None => raw
                .parse()
                .map_err(|_| anyhow!("invalid break ratio '{raw}'"))?,
        };
        Self::new(value)
    }
}

impl fmt::Display for BreakRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, num, den) in RATIO_PRESETS {
            if (self.0 - f64::from(num) / f64::from(den)).abs() < 1e-9 {
                return write!(f, "{label}");
            }
        }
        write!(f, "{:.3}", self.0)
    }
}

/// `min(floor(duration * ratio), MAX_BREAK_SECS)`.
pub fn suggested_break(duration_secs: u64, ratio: BreakRatio) -> u64 {
    let raw = (duration_secs as f64 * ratio.value()).floor();
    if raw >= MAX_BREAK_SECS as f64 {
        MAX_BREAK_SECS
    } else {
        raw as u64
    }
}

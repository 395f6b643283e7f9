// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! CQI to achievable-rate mappings.
//!
//! Both the ranking metric and the throughput history are expressed in the
//! unit returned by a [`RateMap`]. The scheduler never interprets the value
//! beyond comparing and summing it, so any monotonic mapping works.

use crate::RBS_PER_RBG;

/// Largest CQI value reported by a terminal.
pub const MAX_CQI: i32 = 15;

const SUBCARRIERS_PER_RB: f64 = 12.0;
const SYMBOLS_PER_TTI: f64 = 14.0;

// 4-bit CQI table, bit/s/Hz. Index 0 is "out of range".
const SPECTRAL_EFFICIENCY: [f64; 16] = [
    0.0, 0.1523, 0.2344, 0.3770, 0.6016, 0.8770, 1.1758, 1.4766, 1.9141, 2.4063, 2.7305, 3.3223,
    3.9023, 4.5234, 5.1152, 5.5547,
];

const_assert_eq!(SPECTRAL_EFFICIENCY.len(), MAX_CQI as usize + 1);

/// Maps a channel quality value to the achievable rate of one RBG during one
/// scheduling interval.
pub trait RateMap: Send + Sync {
    fn rate(&self, cqi: i32) -> f64;
}

/// Rate from the spectral efficiency of the reported CQI, scaled by the
/// number of resource elements in one RBG. Result is in bits per TTI.
#[derive(Clone, Debug)]
pub struct SpectralEfficiency {
    res_per_rbg: f64,
}

impl SpectralEfficiency {
    pub fn new(rbs_per_rbg: usize) -> Self {
        Self {
            res_per_rbg: rbs_per_rbg as f64 * SUBCARRIERS_PER_RB * SYMBOLS_PER_TTI,
        }
    }
}

impl Default for SpectralEfficiency {
    fn default() -> Self {
        Self::new(RBS_PER_RBG)
    }
}

impl RateMap for SpectralEfficiency {
    fn rate(&self, cqi: i32) -> f64 {
        if cqi <= 0 {
            return 0.0;
        }
        SPECTRAL_EFFICIENCY[cqi.min(MAX_CQI) as usize] * self.res_per_rbg
    }
}

/// Rate proportional to the CQI itself. Useful for plain max-CQI setups
/// where the numbers should stay easy to reason about.
#[derive(Clone, Debug)]
pub struct LinearRate {
    pub scale: f64,
}

impl Default for LinearRate {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl RateMap for LinearRate {
    fn rate(&self, cqi: i32) -> f64 {
        cqi.max(0) as f64 * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spectral_efficiency_monotonic() {
        let rm = SpectralEfficiency::default();
        let mut prev = 0.0;
        for cqi in 1..=MAX_CQI {
            let rate = rm.rate(cqi);
            assert!(rate > prev, "rate for cqi {} not increasing", cqi);
            prev = rate;
        }
    }

    #[test]
    fn test_spectral_efficiency_bounds() {
        let rm = SpectralEfficiency::new(1);
        assert_eq!(rm.rate(0), 0.0);
        assert_eq!(rm.rate(-3), 0.0);
        assert_eq!(rm.rate(MAX_CQI + 5), rm.rate(MAX_CQI));
        assert!((rm.rate(1) - 0.1523 * 12.0 * 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_rate() {
        let rm = LinearRate { scale: 2.0 };
        assert_eq!(rm.rate(7), 14.0);
        assert_eq!(rm.rate(-1), 0.0);
    }
}

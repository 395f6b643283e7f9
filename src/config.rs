// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use log::warn;

use crate::MAX_SLICES;
use crate::NB_RBGS;

/// Per-terminal tunables shared by every terminal of a scheduler instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UeParams {
    /// EWMA factor applied to the previous throughput average.
    pub beta: f64,
    /// Exponent on the throughput history in the ranking metric.
    pub fairness_exp: f64,
    /// Terminals re-read their CQI row every this many intervals.
    pub cqi_report_period: u64,
}

impl Default for UeParams {
    fn default() -> Self {
        Self {
            beta: 0.9,
            fairness_exp: 1.0,
            cqi_report_period: 1,
        }
    }
}

/// How the initial candidate table of an interval is built. Both produce the
/// same table and therefore the same allocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CandidateStrategy {
    /// RBG-major: for every RBG, ask every slice for its best terminal.
    #[default]
    Interleaved,
    /// Slice-major: every slice computes its whole row up front, on the
    /// worker pool when more than one worker is configured.
    Precompute,
}

#[derive(Clone, Debug)]
pub struct SchedConfig {
    pub nr_slices: usize,
    pub ues_per_slice: usize,
    pub nb_rbgs: usize,
    /// Per-slice capacity weights. `None` splits capacity equally.
    pub weights: Option<Vec<f64>>,
    pub ue: UeParams,
    /// Scheduling interval duration, the per-interval work budget.
    pub tti: Duration,
    /// Assumed candidate evaluations per microsecond.
    pub evals_per_us: f64,
    pub strategy: CandidateStrategy,
    pub nr_workers: usize,
    /// Seed for the quota rotation generator.
    pub seed: u64,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            nr_slices: 2,
            ues_per_slice: 10,
            nb_rbgs: NB_RBGS,
            weights: None,
            ue: UeParams::default(),
            tti: Duration::from_millis(1),
            evals_per_us: 1000.0,
            strategy: CandidateStrategy::Interleaved,
            nr_workers: 1,
            seed: 0,
        }
    }
}

impl SchedConfig {
    pub fn nr_ues(&self) -> usize {
        self.nr_slices * self.ues_per_slice
    }

    /// Worst-case candidate evaluations in one interval: the greedy scans,
    /// one full slice recompute per grant, and the initial table.
    pub fn worst_case_evals(&self) -> u64 {
        let r = self.nb_rbgs as u64;
        let s = self.nr_slices as u64;
        let t = self.ues_per_slice as u64;
        r * r * s + r * r * t + r * s * t
    }

    pub fn validate(&self) -> Result<()> {
        if self.nr_slices == 0 || self.ues_per_slice == 0 || self.nb_rbgs == 0 {
            bail!(
                "nr_slices ({}), ues_per_slice ({}) and nb_rbgs ({}) must all be positive",
                self.nr_slices,
                self.ues_per_slice,
                self.nb_rbgs
            );
        }

        if self.nr_slices > MAX_SLICES {
            bail!(
                "nr_slices ({}) is greater than MAX_SLICES ({})",
                self.nr_slices,
                MAX_SLICES
            );
        }

        if let Some(weights) = &self.weights {
            if weights.len() != self.nr_slices {
                bail!(
                    "{} weights given for {} slices",
                    weights.len(),
                    self.nr_slices
                );
            }
            for (i, w) in weights.iter().enumerate() {
                if !w.is_finite() || *w <= 0.0 {
                    bail!("Slice {} has invalid weight {}", i, w);
                }
            }
        }

        let ue = &self.ue;
        if !(0.0..1.0).contains(&ue.beta) {
            bail!("beta ({}) must be in [0, 1)", ue.beta);
        }
        if !ue.fairness_exp.is_finite() || ue.fairness_exp < 0.0 {
            bail!("fairness exponent ({}) must be non-negative", ue.fairness_exp);
        }
        if ue.cqi_report_period == 0 {
            bail!("CQI report period must be at least one interval");
        }

        if self.nr_workers == 0 {
            bail!("At least one worker is required");
        }

        if !self.evals_per_us.is_finite() || self.evals_per_us <= 0.0 {
            bail!("evals_per_us ({}) must be positive", self.evals_per_us);
        }
        let budget = self.tti.as_secs_f64() * 1_000_000.0 * self.evals_per_us;
        let worst = self.worst_case_evals();
        if worst as f64 > budget {
            bail!(
                "Worst case of {} evaluations per interval exceeds the {}us interval budget ({:.0} evaluations)",
                worst,
                self.tti.as_micros(),
                budget
            );
        }

        Ok(())
    }

    /// Slice weights normalized to sum to one.
    pub fn normalized_weights(&self) -> Vec<f64> {
        let weights = match &self.weights {
            Some(weights) => weights.clone(),
            None => vec![1.0 / self.nr_slices as f64; self.nr_slices],
        };

        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            warn!("Slice weights sum to {:.6}, normalizing", sum);
        }
        weights.iter().map(|w| w / sum).collect()
    }
}

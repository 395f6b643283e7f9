// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Inter-slice scheduler
//!
//! The scheduler context owns every slice (and through them every terminal)
//! and runs one allocation per scheduling interval (TTI):
//!
//! 1. Every slice starts the interval: terminals fold the previous grants
//!    into their throughput history, pick up their CQI row and rank every
//!    RBG.
//!
//! 2. RBG quotas are computed per slice (see [`crate::quota`]).
//!
//! 3. A candidate table is built: for every (RBG, slice) pair, the slice's
//!    best terminal for that RBG and its CQI.
//!
//! 4. Max-CQI greedy: repeatedly pick the unallocated RBG / non-full slice
//!    pair with the strictly greatest CQI, scanning RBG-major so ties go to
//!    the lowest RBG and then the lowest slice. The RBG is granted to the
//!    candidate terminal. Unless that filled the slice's quota, the slice's
//!    column of the table is recomputed since the grant moved the
//!    terminal's fairness score.
//!
//! Worst-case work per interval is R scans of R x S cells plus R column
//! recomputes of R x T metrics, validated against the interval duration
//! when the configuration is checked.
//!
//! The initial table can be built RBG-major
//! ([`CandidateStrategy::Interleaved`]) or slice-major
//! ([`CandidateStrategy::Precompute`]). Slices share no mutable state while
//! the table is built, so the slice-major rows can be computed on a pool of
//! scoped worker threads; joining the scope is the barrier before the
//! sequential greedy loop. Both strategies produce the same table.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use itertools::Itertools;
use log::debug;
use log::trace;

use crate::config::CandidateStrategy;
use crate::config::SchedConfig;
use crate::quota::QuotaCalculator;
use crate::rate::RateMap;
use crate::slice::Candidate;
use crate::slice::SliceContext;
use crate::stats::SchedStats;
use crate::stats::SliceStats;
use crate::trace::CqiTrace;
use crate::trace::TraceSource;
use crate::ue::UeContext;

/// One RBG handed out by the greedy loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grant {
    pub rbg: usize,
    pub slice: usize,
    pub ue_id: u32,
    pub cqi: i32,
}

/// Outcome of one interval.
#[derive(Clone, Debug)]
pub struct IntervalReport {
    pub tti: u64,
    pub quotas: Vec<usize>,
    /// Grants in the order they were made.
    pub grants: Vec<Grant>,
    pub elapsed: Duration,
}

/// Per-interval (RBG, slice) candidate matrix.
#[derive(Debug)]
struct CandidateTable {
    nr_slices: usize,
    cells: Vec<Candidate>,
}

impl CandidateTable {
    fn new(nb_rbgs: usize, nr_slices: usize) -> Self {
        Self {
            nr_slices,
            cells: vec![Candidate { ue: 0, cqi: 0 }; nb_rbgs * nr_slices],
        }
    }

    fn get(&self, rbg: usize, slice: usize) -> Candidate {
        self.cells[rbg * self.nr_slices + slice]
    }

    fn set(&mut self, rbg: usize, slice: usize, cand: Candidate) {
        assert!(
            cand.cqi >= 1,
            "non-positive CQI {} for RBG {} in slice {}",
            cand.cqi,
            rbg,
            slice
        );
        self.cells[rbg * self.nr_slices + slice] = cand;
    }

    fn set_column(&mut self, slice: usize, row: &[Candidate]) {
        for (rbg, cand) in row.iter().enumerate() {
            self.set(rbg, slice, *cand);
        }
    }
}

pub struct SchedulerContext {
    config: SchedConfig,
    rate: Arc<dyn RateMap>,
    slices: Vec<SliceContext>,
    quota: QuotaCalculator,

    last_tti: Option<u64>,
    nr_intervals: u64,
    last_quotas: Vec<usize>,
    last_elapsed: Duration,
    rbgs_granted_total: Vec<u64>,
}

impl SchedulerContext {
    /// Build every slice and terminal. Terminal ids are assigned in slice
    /// order and the k-th terminal replays the trace of the k-th mapping
    /// entry.
    pub fn new(
        config: SchedConfig,
        source: &dyn TraceSource,
        rate: Arc<dyn RateMap>,
    ) -> Result<Self> {
        config.validate()?;

        let mapping = source
            .mapping()
            .context("Failed to read terminal to trace mapping")?;
        if mapping.len() < config.nr_ues() {
            bail!(
                "Trace mapping has {} entries, {} terminals ({} slices x {}) required",
                mapping.len(),
                config.nr_ues(),
                config.nr_slices,
                config.ues_per_slice
            );
        }

        let weights = config.normalized_weights();
        let mut traces: BTreeMap<u32, Arc<CqiTrace>> = BTreeMap::new();
        let mut slices = Vec::with_capacity(config.nr_slices);
        let mut ue_id = 0u32;

        for (i, weight) in weights.iter().enumerate() {
            let mut slice = SliceContext::new(i, *weight);
            for _ in 0..config.ues_per_slice {
                let trace_id = mapping[ue_id as usize].trace_id;
                let trace = match traces.get(&trace_id) {
                    Some(trace) => trace.clone(),
                    None => {
                        let trace = Arc::new(
                            source
                                .load(trace_id)
                                .with_context(|| format!("Failed to load trace {}", trace_id))?,
                        );
                        if trace.width() < config.nb_rbgs {
                            bail!(
                                "Trace {} has {} RBG columns, {} required",
                                trace_id,
                                trace.width(),
                                config.nb_rbgs
                            );
                        }
                        traces.insert(trace_id, trace.clone());
                        trace
                    }
                };

                slice.append_user(UeContext::new(
                    ue_id,
                    trace_id,
                    trace,
                    config.nb_rbgs,
                    config.ue,
                ));
                ue_id += 1;
            }
            slices.push(slice);
        }

        debug!(
            "{} slices x {} terminals over {} traces, weights [{}]",
            config.nr_slices,
            config.ues_per_slice,
            traces.len(),
            weights.iter().map(|w| format!("{:.4}", w)).join(", ")
        );

        Ok(Self {
            quota: QuotaCalculator::new(config.nb_rbgs, config.seed),
            last_tti: None,
            nr_intervals: 0,
            last_quotas: vec![0; config.nr_slices],
            last_elapsed: Duration::ZERO,
            rbgs_granted_total: vec![0; config.nr_slices],
            config,
            rate,
            slices,
        })
    }

    /// Run interval @tti with the configured candidate strategy. @tti must
    /// be strictly greater than the previous interval.
    pub fn advance(&mut self, tti: u64) -> IntervalReport {
        self.advance_with(tti, self.config.strategy)
    }

    /// Run interval @tti building the initial candidate table with
    /// @strategy.
    pub fn advance_with(&mut self, tti: u64, strategy: CandidateStrategy) -> IntervalReport {
        if let Some(last) = self.last_tti {
            assert!(tti > last, "interval {} after interval {}", tti, last);
        }
        self.last_tti = Some(tti);

        let started_at = Instant::now();
        debug!("newTTI({}) inter-slice scheduler", tti);

        for slice in self.slices.iter_mut() {
            slice.new_tti(tti, &*self.rate);
        }
        let quotas = self.calculate_rbgs_quota();
        let table = self.initial_candidates(strategy);
        let grants = self.maxcell_inter_schedule(&quotas, table);
        let elapsed = started_at.elapsed();

        for (total, slice) in self.rbgs_granted_total.iter_mut().zip(self.slices.iter()) {
            *total += slice.rbgs_allocated() as u64;
        }
        self.nr_intervals += 1;
        self.last_quotas = quotas.clone();
        self.last_elapsed = elapsed;

        IntervalReport {
            tti,
            quotas,
            grants,
            elapsed,
        }
    }

    fn calculate_rbgs_quota(&mut self) -> Vec<usize> {
        let inputs: Vec<(f64, f64)> = self
            .slices
            .iter()
            .map(|slice| (slice.weight(), slice.rbgs_offset()))
            .collect();
        let (quotas, offsets) = self.quota.calculate(&inputs);

        for (slice, offset) in self.slices.iter_mut().zip(offsets) {
            slice.set_rbgs_offset(offset);
        }

        debug!(
            "quotas: {}",
            quotas
                .iter()
                .enumerate()
                .map(|(i, q)| format!("{}({})", i, q))
                .join("; ")
        );
        quotas
    }

    fn initial_candidates(&self, strategy: CandidateStrategy) -> CandidateTable {
        let nb_rbgs = self.config.nb_rbgs;
        let mut table = CandidateTable::new(nb_rbgs, self.slices.len());

        match strategy {
            CandidateStrategy::Interleaved => {
                for rbg in 0..nb_rbgs {
                    for (sid, slice) in self.slices.iter().enumerate() {
                        table.set(rbg, sid, slice.enterprise_schedule(rbg));
                    }
                }
            }
            CandidateStrategy::Precompute => {
                for (sid, row) in self.precompute_rows().iter().enumerate() {
                    table.set_column(sid, row);
                }
            }
        }

        table
    }

    /// Every slice's candidate row, in slice order.
    fn precompute_rows(&self) -> Vec<Vec<Candidate>> {
        let nb_rbgs = self.config.nb_rbgs;
        let nr_workers = self.config.nr_workers.min(self.slices.len());

        if nr_workers <= 1 {
            return self
                .slices
                .iter()
                .map(|slice| slice.candidate_row(nb_rbgs))
                .collect();
        }

        let chunk = self.slices.len().div_ceil(nr_workers);
        let res = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = self
                .slices
                .chunks(chunk)
                .map(|slices| {
                    s.spawn(move |_| {
                        slices
                            .iter()
                            .map(|slice| slice.candidate_row(nb_rbgs))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| match handle.join() {
                    Ok(rows) => rows,
                    Err(e) => std::panic::resume_unwind(e),
                })
                .collect::<Vec<_>>()
        });

        match res {
            Ok(rows) => rows,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    fn maxcell_inter_schedule(
        &mut self,
        quotas: &[usize],
        mut table: CandidateTable,
    ) -> Vec<Grant> {
        let nb_rbgs = self.config.nb_rbgs;
        let nr_slices = self.slices.len();
        let mut is_rbg_allocated = vec![false; nb_rbgs];
        let mut grants = Vec::with_capacity(nb_rbgs);

        for k in 0..nb_rbgs {
            let mut max: Option<(usize, usize, i32)> = None;
            for rbg in 0..nb_rbgs {
                if is_rbg_allocated[rbg] {
                    continue;
                }
                for sid in 0..nr_slices {
                    if self.slices[sid].rbgs_allocated() >= quotas[sid] {
                        continue;
                    }
                    let cqi = table.get(rbg, sid).cqi;
                    if max.map_or(true, |(_, _, max_cqi)| cqi > max_cqi) {
                        max = Some((rbg, sid, cqi));
                    }
                }
            }

            let (rbg, sid, cqi) = match max {
                Some(max) => max,
                None => panic!(
                    "no eligible (RBG, slice) pair with {} RBGs left, quotas {:?}",
                    nb_rbgs - k,
                    quotas
                ),
            };

            let cand = table.get(rbg, sid);
            let slice = &mut self.slices[sid];
            let ue_id = slice.ues()[cand.ue].id();

            is_rbg_allocated[rbg] = true;
            slice.allocate_rbg(cand.ue, rbg, &*self.rate);
            grants.push(Grant {
                rbg,
                slice: sid,
                ue_id,
                cqi,
            });
            debug!(
                "rbg: {} allocated to slice: {} ue: {} left: {}",
                rbg,
                sid,
                ue_id,
                nb_rbgs - k - 1
            );

            if slice.rbgs_allocated() >= quotas[sid] {
                continue;
            }

            for rbg in 0..nb_rbgs {
                table.set(rbg, sid, slice.enterprise_schedule(rbg));
            }
            trace!("slice {} candidates recomputed", sid);
        }

        grants
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn slices(&self) -> &[SliceContext] {
        &self.slices
    }

    pub fn nr_intervals(&self) -> u64 {
        self.nr_intervals
    }

    pub fn stats(&self) -> SchedStats {
        let nr_rbgs_total = (self.nr_intervals * self.config.nb_rbgs as u64).max(1);
        SchedStats {
            nr_intervals: self.nr_intervals,
            last_tti: self.last_tti,
            sched_us: self.last_elapsed.as_secs_f64() * 1_000_000.0,
            slices: self
                .slices
                .iter()
                .map(|slice| {
                    let total = self.rbgs_granted_total[slice.id()];
                    SliceStats {
                        id: slice.id(),
                        weight: slice.weight(),
                        quota: self.last_quotas[slice.id()],
                        granted: slice.rbgs_allocated(),
                        offset: slice.rbgs_offset(),
                        granted_total: total,
                        share: total as f64 / nr_rbgs_total as f64,
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UeParams;
    use crate::rate::LinearRate;
    use crate::trace::StaticTraceSource;

    fn ctx_with(weights: Vec<f64>, ue_rows: &[Vec<i32>], ues_per_slice: usize) -> SchedulerContext {
        let mut src = StaticTraceSource::new();
        for (id, row) in ue_rows.iter().enumerate() {
            src = src
                .map_ue(id as u32, id as u32)
                .trace(id as u32, CqiTrace::new(vec![row.clone()]).unwrap());
        }
        let config = SchedConfig {
            nr_slices: weights.len(),
            ues_per_slice,
            nb_rbgs: ue_rows[0].len(),
            weights: Some(weights),
            ue: UeParams {
                beta: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        SchedulerContext::new(config, &src, Arc::new(LinearRate::default())).unwrap()
    }

    #[test]
    fn test_table_matches_across_strategies() {
        let rows = [
            vec![9, 8, 6, 1],
            vec![3, 7, 7, 2],
            vec![5, 5, 10, 3],
            vec![6, 2, 1, 4],
        ];
        let mut ctx = ctx_with(vec![0.5, 0.5], &rows, 2);
        for slice in ctx.slices.iter_mut() {
            slice.new_tti(0, &LinearRate::default());
        }
        let a = ctx.initial_candidates(CandidateStrategy::Interleaved);
        let b = ctx.initial_candidates(CandidateStrategy::Precompute);
        assert_eq!(a.cells, b.cells);
        assert_eq!(a.get(0, 0), Candidate { ue: 0, cqi: 9 });
        assert_eq!(a.get(2, 1), Candidate { ue: 0, cqi: 10 });
    }

    #[test]
    #[should_panic(expected = "no eligible (RBG, slice) pair")]
    fn test_short_quotas_fault() {
        let rows = [vec![1, 2, 3], vec![3, 2, 1]];
        let mut ctx = ctx_with(vec![0.5, 0.5], &rows, 1);
        for slice in ctx.slices.iter_mut() {
            slice.new_tti(0, &LinearRate::default());
        }
        let table = ctx.initial_candidates(CandidateStrategy::Interleaved);
        ctx.maxcell_inter_schedule(&[1, 1], table);
    }

    #[test]
    #[should_panic(expected = "interval 3 after interval 3")]
    fn test_interval_must_increase() {
        let rows = [vec![1, 2], vec![3, 2]];
        let mut ctx = ctx_with(vec![0.5, 0.5], &rows, 1);
        ctx.advance(3);
        ctx.advance(3);
    }

    #[test]
    fn test_stats_track_grants() {
        let rows = [vec![1, 2, 3, 4], vec![4, 3, 2, 1]];
        let mut ctx = ctx_with(vec![0.5, 0.5], &rows, 1);
        ctx.advance(0);
        ctx.advance(1);

        let stats = ctx.stats();
        assert_eq!(stats.nr_intervals, 2);
        assert_eq!(stats.last_tti, Some(1));
        for slice in stats.slices.iter() {
            assert_eq!(slice.quota, 2);
            assert_eq!(slice.granted, 2);
            assert_eq!(slice.granted_total, 4);
            assert_eq!(slice.share, 0.5);
        }
    }
}

// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::sync::Arc;

use crate::config::UeParams;
use crate::rate::RateMap;
use crate::trace::CqiTrace;

/// Throughput floor used by the ranking metric. Terminals without history
/// divide by this and therefore outrank every terminal that has one.
pub const MIN_THROUGHPUT: f64 = 1e-6;

/// A user terminal: its replayed channel state, throughput history and
/// per-RBG ranking metric.
#[derive(Debug)]
pub struct UeContext {
    id: u32,
    trace_id: u32,
    params: UeParams,
    trace: Arc<CqiTrace>,
    cqi_loaded: bool,
    ewma_throughput: f64,
    subband_cqis: Vec<i32>,
    sched_metrics: Vec<f64>,
    rbgs_allocated: Vec<usize>,
    // Rate of the RBGs in rbgs_allocated, at the CQI they were granted with.
    granted_rate: f64,
}

impl UeContext {
    /// @trace must have at least @nb_rbgs columns.
    pub fn new(
        id: u32,
        trace_id: u32,
        trace: Arc<CqiTrace>,
        nb_rbgs: usize,
        params: UeParams,
    ) -> Self {
        assert!(
            trace.width() >= nb_rbgs,
            "trace {} has {} columns, {} RBGs required",
            trace_id,
            trace.width(),
            nb_rbgs
        );
        Self {
            id,
            trace_id,
            params,
            trace,
            cqi_loaded: false,
            ewma_throughput: 0.0,
            subband_cqis: vec![0; nb_rbgs],
            sched_metrics: vec![0.0; nb_rbgs],
            rbgs_allocated: vec![],
            granted_rate: 0.0,
        }
    }

    /// Start interval @tti: fold the previous interval's grants into the
    /// throughput history, forget them, pick up the CQI row for @tti and
    /// rank every RBG.
    pub fn new_tti(&mut self, tti: u64, rate: &dyn RateMap) {
        self.update_throughput();
        self.rbgs_allocated.clear();
        self.granted_rate = 0.0;
        self.refresh_cqi(tti);
        self.calculate_ranking_metric(rate);
    }

    /// EWMA over the rate granted in the interval that just completed. A
    /// terminal that got nothing contributes a zero sample.
    pub fn update_throughput(&mut self) {
        let beta = self.params.beta;
        self.ewma_throughput = beta * self.ewma_throughput + (1.0 - beta) * self.granted_rate;
    }

    fn refresh_cqi(&mut self, tti: u64) {
        if self.cqi_loaded && tti % self.params.cqi_report_period != 0 {
            return;
        }
        let nb_rbgs = self.subband_cqis.len();
        let row = &self.trace.row(tti)[..nb_rbgs];
        // Checked for every terminal, not only the slice's candidate.
        if let Some((rbg, cqi)) = row.iter().enumerate().find(|(_, cqi)| **cqi < 1) {
            panic!(
                "non-positive CQI {} for RBG {} of terminal {} at interval {}",
                cqi, rbg, self.id, tti
            );
        }
        self.subband_cqis.copy_from_slice(row);
        self.cqi_loaded = true;
    }

    /// Throughput estimate including what has been granted so far in this
    /// interval.
    pub fn projected_throughput(&self) -> f64 {
        self.ewma_throughput + (1.0 - self.params.beta) * self.granted_rate
    }

    /// Proportional-fair metric of every RBG: achievable rate over the
    /// projected throughput raised to the fairness exponent.
    pub fn calculate_ranking_metric(&mut self, rate: &dyn RateMap) {
        let denom = self
            .projected_throughput()
            .max(MIN_THROUGHPUT)
            .powf(self.params.fairness_exp);
        for (metric, cqi) in self.sched_metrics.iter_mut().zip(self.subband_cqis.iter()) {
            *metric = rate.rate(*cqi) / denom;
        }
    }

    /// Record that @rbg_id was granted to this terminal in the current
    /// interval. The ranking metric is refreshed as the throughput estimate
    /// moved.
    pub fn allocate_rbg(&mut self, rbg_id: usize, rate: &dyn RateMap) {
        self.rbgs_allocated.push(rbg_id);
        self.granted_rate += rate.rate(self.subband_cqis[rbg_id]);
        self.calculate_ranking_metric(rate);
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn trace_id(&self) -> u32 {
        self.trace_id
    }

    pub fn cqi(&self, rbg_id: usize) -> i32 {
        self.subband_cqis[rbg_id]
    }

    pub fn cqis(&self) -> &[i32] {
        &self.subband_cqis
    }

    pub fn ranking_metric(&self, rbg_id: usize) -> f64 {
        self.sched_metrics[rbg_id]
    }

    pub fn ewma_throughput(&self) -> f64 {
        self.ewma_throughput
    }

    pub fn rbgs_allocated(&self) -> &[usize] {
        &self.rbgs_allocated
    }

    pub fn granted_rate(&self) -> f64 {
        self.granted_rate
    }
}

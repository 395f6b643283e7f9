// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use radiosaber::*;

/// Install a test logger once per process. Later calls are ignored.
pub fn setup_test() {
    let _ = simplelog::TestLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
    );
}

/// A scheduler whose k-th terminal replays @rows[k]. Terminals are handed
/// to slices in order, @ues_per_slice each.
pub fn static_ctx(
    weights: Vec<f64>,
    ues_per_slice: usize,
    rows: &[Vec<Vec<i32>>],
    ue: UeParams,
) -> SchedulerContext {
    let mut src = StaticTraceSource::new();
    for (id, trace) in rows.iter().enumerate() {
        src = src
            .map_ue(id as u32, id as u32)
            .trace(id as u32, CqiTrace::new(trace.clone()).unwrap());
    }
    let config = SchedConfig {
        nr_slices: weights.len(),
        ues_per_slice,
        nb_rbgs: rows[0][0].len(),
        weights: Some(weights),
        ue,
        ..Default::default()
    };
    SchedulerContext::new(config, &src, Arc::new(LinearRate::default())).unwrap()
}

/// A scheduler over seeded synthetic traces.
pub fn synthetic_ctx(config: SchedConfig) -> SchedulerContext {
    let src = SyntheticTraceSource::new(config.nr_ues(), config.nb_rbgs, 200, config.seed);
    SchedulerContext::new(config, &src, Arc::new(SpectralEfficiency::default())).unwrap()
}

/// Every RBG went to exactly one slice and one terminal of that slice, and
/// no slice got more than its quota.
pub fn check_partition(ctx: &SchedulerContext, report: &IntervalReport) {
    let nb_rbgs = ctx.config().nb_rbgs;

    let rbgs: Vec<usize> = report.grants.iter().map(|g| g.rbg).collect();
    let unique: BTreeSet<usize> = rbgs.iter().copied().collect();
    assert_eq!(rbgs.len(), nb_rbgs, "tti {}: wrong grant count", report.tti);
    assert_eq!(unique, (0..nb_rbgs).collect::<BTreeSet<_>>(), "tti {}: overlap", report.tti);
    assert_eq!(report.quotas.iter().sum::<usize>(), nb_rbgs);

    let mut ue_rbgs = BTreeSet::new();
    for (sid, slice) in ctx.slices().iter().enumerate() {
        let granted = report.grants.iter().filter(|g| g.slice == sid).count();
        assert!(granted <= report.quotas[sid], "tti {}: slice {} over quota", report.tti, sid);
        assert_eq!(granted, slice.rbgs_allocated());

        for ue in slice.ues() {
            for rbg in ue.rbgs_allocated() {
                assert!(ue_rbgs.insert(*rbg), "tti {}: RBG {} granted twice", report.tti, rbg);
                let grant = report.grants.iter().find(|g| g.rbg == *rbg).unwrap();
                assert_eq!(grant.slice, sid);
                assert_eq!(grant.ue_id, ue.id());
            }
        }
    }
    assert_eq!(ue_rbgs.len(), nb_rbgs);
}

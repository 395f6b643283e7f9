// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Slices and intra-slice selection
//!
//! A slice owns an ordered set of terminals and a capacity weight. Within a
//! slice the scheduler is proportional-fair: for every RBG, the terminal with
//! the highest ranking metric is the slice's candidate. Ties go to the
//! terminal with the lowest id so that a candidate table is a pure function
//! of the terminals' state.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::rate::RateMap;
use crate::ue::UeContext;

/// The terminal a slice would pick for one RBG and that terminal's CQI on
/// it. @ue indexes into the slice's terminals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub ue: usize,
    pub cqi: i32,
}

#[derive(Debug)]
pub struct SliceContext {
    id: usize,
    weight: f64,
    // Fractional quota residue carried into the next interval.
    rbgs_offset: f64,
    rbgs_allocated: usize,
    ues: Vec<UeContext>,
}

impl SliceContext {
    pub fn new(id: usize, weight: f64) -> Self {
        Self {
            id,
            weight,
            rbgs_offset: 0.0,
            rbgs_allocated: 0,
            ues: vec![],
        }
    }

    pub(crate) fn append_user(&mut self, ue: UeContext) {
        self.ues.push(ue);
    }

    /// Start interval @tti on every member terminal.
    pub fn new_tti(&mut self, tti: u64, rate: &dyn RateMap) {
        for ue in self.ues.iter_mut() {
            ue.new_tti(tti, rate);
        }
        self.rbgs_allocated = 0;
    }

    /// Best terminal of this slice for @rbg_id.
    pub fn enterprise_schedule(&self, rbg_id: usize) -> Candidate {
        let (idx, ue) = self
            .ues
            .iter()
            .enumerate()
            .max_by_key(|(_, ue)| (OrderedFloat(ue.ranking_metric(rbg_id)), Reverse(ue.id())))
            .expect("slice without terminals");
        Candidate {
            ue: idx,
            cqi: ue.cqi(rbg_id),
        }
    }

    /// Best terminal for every RBG, in RBG order.
    pub fn candidate_row(&self, nb_rbgs: usize) -> Vec<Candidate> {
        (0..nb_rbgs).map(|rbg| self.enterprise_schedule(rbg)).collect()
    }

    /// Grant @rbg_id to the terminal at index @ue.
    pub fn allocate_rbg(&mut self, ue: usize, rbg_id: usize, rate: &dyn RateMap) {
        self.ues[ue].allocate_rbg(rbg_id, rate);
        self.rbgs_allocated += 1;
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn rbgs_offset(&self) -> f64 {
        self.rbgs_offset
    }

    pub(crate) fn set_rbgs_offset(&mut self, offset: f64) {
        self.rbgs_offset = offset;
    }

    pub fn rbgs_allocated(&self) -> usize {
        self.rbgs_allocated
    }

    pub fn ues(&self) -> &[UeContext] {
        &self.ues
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::UeParams;
    use crate::rate::LinearRate;
    use crate::trace::CqiTrace;

    fn slice_with(rows: &[Vec<i32>]) -> SliceContext {
        let mut slice = SliceContext::new(0, 1.0);
        for (id, row) in rows.iter().enumerate() {
            let trace = Arc::new(CqiTrace::new(vec![row.clone()]).unwrap());
            slice.append_user(UeContext::new(
                id as u32,
                id as u32,
                trace,
                row.len(),
                UeParams::default(),
            ));
        }
        slice
    }

    #[test]
    fn test_best_metric_wins() {
        let rate = LinearRate::default();
        let mut slice = slice_with(&[vec![3, 9], vec![7, 2]]);
        slice.new_tti(0, &rate);

        assert_eq!(slice.enterprise_schedule(0), Candidate { ue: 1, cqi: 7 });
        assert_eq!(slice.enterprise_schedule(1), Candidate { ue: 0, cqi: 9 });
    }

    #[test]
    fn test_tie_goes_to_lowest_id() {
        let rate = LinearRate::default();
        let mut slice = slice_with(&[vec![5], vec![5], vec![5]]);
        slice.new_tti(0, &rate);
        assert_eq!(slice.enterprise_schedule(0).ue, 0);
    }

    #[test]
    fn test_grant_shifts_candidate() {
        let rate = LinearRate::default();
        let mut slice = slice_with(&[vec![6, 6], vec![5, 5]]);
        slice.new_tti(0, &rate);
        assert_eq!(slice.candidate_row(2), vec![Candidate { ue: 0, cqi: 6 }; 2]);

        // Terminal 0 now has history, terminal 1 still has none.
        slice.allocate_rbg(0, 0, &rate);
        assert_eq!(slice.rbgs_allocated(), 1);
        assert_eq!(slice.enterprise_schedule(1), Candidate { ue: 1, cqi: 5 });
    }

    #[test]
    fn test_new_tti_resets_allocation() {
        let rate = LinearRate::default();
        let mut slice = slice_with(&[vec![1, 1]]);
        slice.new_tti(0, &rate);
        slice.allocate_rbg(0, 1, &rate);
        slice.new_tti(1, &rate);
        assert_eq!(slice.rbgs_allocated(), 0);
        assert!(slice.ues()[0].rbgs_allocated().is_empty());
    }
}

// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # RBG quotas
//!
//! Every interval each slice is entitled to `weight * R` RBGs, which is
//! rarely an integer. Quotas are computed with a largest-remainder scheme
//! that carries the fractional residue of every slice into the next
//! interval:
//!
//! 1. share_i = weight_i * R + offset_i
//! 2. quota_i = floor(share_i)
//! 3. leftover = R - sum(quota_i)
//! 4. Starting at a random slice and rotating, every slice gets
//!    leftover / n extra RBGs and the first slice visited also gets
//!    leftover % n.
//! 5. offset_i = share_i - quota_i
//!
//! Because the offsets track exactly how far each slice is ahead of or
//! behind its entitlement, the long run average of quota_i converges to
//! weight_i * R.

use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

/// Integer quotas summing to @total from fractional @shares, handing out
/// the leftover in rotation from @start.
///
/// The shares of a normalized weight set always floor to at most @total.
/// Floating point drift that breaks that, or a share so far below zero that
/// its quota would go negative, is repaired by moving single units from the
/// largest quota, so the result is never negative and always sums to
/// @total.
pub fn apportion(total: usize, shares: &[f64], start: usize) -> Vec<usize> {
    let nr = shares.len();
    assert!(nr > 0, "no slices to apportion RBGs to");

    let mut quotas: Vec<i64> = shares.iter().map(|s| s.floor() as i64).collect();
    let leftover = total as i64 - quotas.iter().sum::<i64>();

    if leftover > 0 {
        let per_slice = leftover / nr as i64;
        for i in 0..nr {
            let k = (i + start) % nr;
            quotas[k] += per_slice;
            if i == 0 {
                quotas[k] += leftover % nr as i64;
            }
        }
    } else {
        for _ in leftover..0 {
            let k = largest(&quotas);
            quotas[k] -= 1;
        }
    }

    while let Some(k) = quotas.iter().position(|q| *q < 0) {
        let from = largest(&quotas);
        quotas[k] += 1;
        quotas[from] -= 1;
    }

    quotas.into_iter().map(|q| q as usize).collect()
}

fn largest(quotas: &[i64]) -> usize {
    let mut best = 0;
    for (i, q) in quotas.iter().enumerate() {
        if *q > quotas[best] {
            best = i;
        }
    }
    best
}

/// Owns the rotation generator so that quota sequences are reproducible
/// for a given seed.
#[derive(Debug)]
pub struct QuotaCalculator {
    total: usize,
    rng: SmallRng,
}

impl QuotaCalculator {
    pub fn new(total: usize, seed: u64) -> Self {
        Self {
            total,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Compute this interval's quotas from each slice's `(weight, offset)`
    /// and return them together with the offsets to carry forward.
    pub fn calculate(&mut self, slices: &[(f64, f64)]) -> (Vec<usize>, Vec<f64>) {
        let shares: Vec<f64> = slices
            .iter()
            .map(|(weight, offset)| weight * self.total as f64 + offset)
            .collect();
        let start = self.rng.gen_range(0..shares.len());
        let quotas = apportion(self.total, &shares, start);
        let offsets = shares
            .iter()
            .zip(quotas.iter())
            .map(|(share, quota)| share - *quota as f64)
            .collect();
        (quotas, offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apportion_exact_shares() {
        assert_eq!(apportion(62, &[31.0, 31.0], 1), vec![31, 31]);
    }

    #[test]
    fn test_apportion_leftover_rotation() {
        // floor -> [20, 20, 20], leftover 2 lands on the start slice.
        let shares = [20.6, 20.7, 20.7];
        assert_eq!(apportion(62, &shares, 0), vec![22, 20, 20]);
        assert_eq!(apportion(62, &shares, 2), vec![20, 20, 22]);

        // leftover 4 over 3 slices: one each, plus one for the start.
        let shares = [10.9, 10.9, 38.2];
        assert_eq!(apportion(62, &shares, 1), vec![11, 12, 39]);
    }

    #[test]
    fn test_apportion_repairs_overshoot() {
        // Sum of floors is one over the total.
        assert_eq!(apportion(10, &[6.0, 5.0], 0), vec![5, 5]);
    }

    #[test]
    fn test_apportion_repairs_negative() {
        let quotas = apportion(10, &[-1.5, 11.5], 0);
        assert_eq!(quotas.iter().sum::<usize>(), 10);
        assert_eq!(quotas, vec![0, 10]);
    }

    #[test]
    fn test_quota_sum_and_convergence() {
        let weights = [0.5, 0.3, 0.2];
        let mut calc = QuotaCalculator::new(62, 7);
        let mut offsets = vec![0.0; 3];
        let mut totals = [0usize; 3];
        let rounds = 10_000;

        for _ in 0..rounds {
            let slices: Vec<(f64, f64)> =
                weights.iter().copied().zip(offsets.iter().copied()).collect();
            let (quotas, next) = calc.calculate(&slices);
            assert_eq!(quotas.iter().sum::<usize>(), 62);
            for (t, q) in totals.iter_mut().zip(quotas.iter()) {
                *t += q;
            }
            offsets = next;
        }

        for (w, t) in weights.iter().zip(totals.iter()) {
            let frac = *t as f64 / (62 * rounds) as f64;
            assert!((frac - w).abs() < 1e-3, "fraction {} for weight {}", frac, w);
        }
    }

    #[test]
    fn test_apportion_random_shares() {
        let mut rng = SmallRng::seed_from_u64(1234);
        for _ in 0..5_000 {
            let nr = rng.gen_range(1..=crate::MAX_SLICES);
            let total = rng.gen_range(1..=200);
            let weights: Vec<f64> = (0..nr).map(|_| rng.gen_range(0.01..10.0)).collect();
            let sum: f64 = weights.iter().sum();
            // Offsets well outside the carry range, so some shares go negative.
            let shares: Vec<f64> = weights
                .iter()
                .map(|w| w / sum * total as f64 + rng.gen_range(-3.0..3.0))
                .collect();
            let start = rng.gen_range(0..nr);

            let quotas = apportion(total, &shares, start);
            assert_eq!(quotas.len(), nr);
            assert!(quotas.iter().all(|q| *q <= total), "negative quota in {:?}", quotas);
            assert_eq!(
                quotas.iter().sum::<usize>(),
                total,
                "shares {:?} start {}",
                shares,
                start
            );
        }
    }

    #[test]
    fn test_quota_sum_with_random_weights() {
        let mut rng = SmallRng::seed_from_u64(77);
        for round in 0..200 {
            let nr = rng.gen_range(1..=crate::MAX_SLICES);
            let total = rng.gen_range(1..=100);
            let weights: Vec<f64> = (0..nr).map(|_| rng.gen_range(0.01..1.0)).collect();
            let sum: f64 = weights.iter().sum();
            let mut offsets: Vec<f64> = (0..nr).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let mut calc = QuotaCalculator::new(total, round);

            for _ in 0..50 {
                let slices: Vec<(f64, f64)> = weights
                    .iter()
                    .map(|w| w / sum)
                    .zip(offsets.iter().copied())
                    .collect();
                let (quotas, next) = calc.calculate(&slices);
                assert_eq!(quotas.iter().sum::<usize>(), total);
                offsets = next;
            }
        }
    }

    #[test]
    fn test_same_seed_same_quotas() {
        let slices = [(0.34, 0.0), (0.33, 0.0), (0.33, 0.0)];
        let mut a = QuotaCalculator::new(62, 99);
        let mut b = QuotaCalculator::new(62, 99);
        for _ in 0..100 {
            assert_eq!(a.calculate(&slices), b.calculate(&slices));
        }
    }
}

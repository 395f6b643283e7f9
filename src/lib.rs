// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # radiosaber
//!
//! A two-level radio resource scheduler for sliced cellular networks. Once
//! per scheduling interval, a fixed pool of resource block groups (RBGs) is
//! split among network slices and, within each slice, among terminals:
//!
//! - The inter-slice level gives every slice an integer RBG quota that
//!   tracks its configured weight over time, then hands RBGs out greedily
//!   by channel quality.
//!
//! - The intra-slice level picks, for every RBG, the terminal with the best
//!   proportional-fair ranking metric.
//!
//! ```ignore
//! let source = SyntheticTraceSource::new(config.nr_ues(), config.nb_rbgs, 500, seed);
//! let mut sched = SchedulerContext::new(config, &source, Arc::new(SpectralEfficiency::default()))?;
//!
//! for tti in 0.. {
//!     let report = sched.advance(tti);
//!     ...
//! }
//! ```

#[macro_use]
extern crate static_assertions;

pub mod config;
pub mod quota;
pub mod rate;
pub mod scheduler;
pub mod slice;
pub mod stats;
pub mod trace;
pub mod ue;

pub use config::CandidateStrategy;
pub use config::SchedConfig;
pub use config::UeParams;
pub use rate::LinearRate;
pub use rate::RateMap;
pub use rate::SpectralEfficiency;
pub use scheduler::Grant;
pub use scheduler::IntervalReport;
pub use scheduler::SchedulerContext;
pub use stats::SchedStats;
pub use trace::CqiTrace;
pub use trace::FileTraceSource;
pub use trace::StaticTraceSource;
pub use trace::SyntheticTraceSource;
pub use trace::TraceSource;

/// Default number of RBGs per interval.
pub const NB_RBGS: usize = 62;
/// Resource blocks per RBG.
pub const RBS_PER_RBG: usize = 8;
pub const MAX_SLICES: usize = 100;
/// Rows kept from a CQI trace.
pub const MAX_TRACE_TTIS: usize = 500;

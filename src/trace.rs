// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Channel quality traces
//!
//! Every terminal replays a pre-recorded CQI table, one row per scheduling
//! interval and one column per RBG. Which table a terminal replays is given
//! by a terminal-to-trace mapping. Both come from a [`TraceSource`]:
//!
//! - [`FileTraceSource`] reads a mapping file of `ue_id trace_id` pairs and
//!   one `<trace_id>.cqi` file per trace from a directory.
//! - [`SyntheticTraceSource`] generates seeded random-walk tables so the
//!   scheduler can run without recorded traces.
//! - [`StaticTraceSource`] serves tables that are already in memory.
//!
//! Replay is cyclic: the row used at interval `t` is `t % len`. Values are
//! kept exactly as recorded; non-positive CQIs are caught when a terminal
//! loads its row, not here.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

use crate::rate::MAX_CQI;
use crate::MAX_TRACE_TTIS;

/// One entry of the terminal-to-trace mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceMapping {
    pub ue_id: u32,
    pub trace_id: u32,
}

/// A rectangular CQI table.
#[derive(Clone, Debug, PartialEq)]
pub struct CqiTrace {
    width: usize,
    cqis: Vec<i32>,
}

impl CqiTrace {
    /// Build a table from its rows. At most `MAX_TRACE_TTIS` rows are kept.
    pub fn new(rows: Vec<Vec<i32>>) -> Result<Self> {
        let width = match rows.first() {
            Some(row) => row.len(),
            None => bail!("CQI trace has no rows"),
        };
        if width == 0 {
            bail!("CQI trace rows are empty");
        }

        let mut cqis = Vec::with_capacity(width * rows.len().min(MAX_TRACE_TTIS));
        for (idx, row) in rows.iter().take(MAX_TRACE_TTIS).enumerate() {
            if row.len() != width {
                bail!(
                    "CQI trace row {} has {} columns, expected {}",
                    idx,
                    row.len(),
                    width
                );
            }
            cqis.extend_from_slice(row);
        }

        Ok(Self { width, cqis })
    }

    /// Number of recorded intervals.
    pub fn len(&self) -> usize {
        self.cqis.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.cqis.is_empty()
    }

    /// Number of RBG columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The row replayed at @interval.
    pub fn row(&self, interval: u64) -> &[i32] {
        let idx = (interval % self.len() as u64) as usize;
        &self.cqis[idx * self.width..(idx + 1) * self.width]
    }
}

/// Where the terminal-to-trace mapping and the CQI tables come from.
pub trait TraceSource {
    /// The ordered terminal-to-trace mapping.
    fn mapping(&self) -> Result<Vec<TraceMapping>>;

    /// Load the table of @trace_id.
    fn load(&self, trace_id: u32) -> Result<CqiTrace>;
}

fn parse_mapping(text: &str, origin: &str) -> Result<Vec<TraceMapping>> {
    let mut tokens = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| line.split_whitespace());
    let mut mapping = vec![];

    while let Some(ue) = tokens.next() {
        let trace = tokens
            .next()
            .ok_or_else(|| anyhow!("{}: ue {} has no trace id", origin, ue))?;
        mapping.push(TraceMapping {
            ue_id: ue
                .parse()
                .with_context(|| format!("{}: invalid ue id {:?}", origin, ue))?,
            trace_id: trace
                .parse()
                .with_context(|| format!("{}: invalid trace id {:?}", origin, trace))?,
        });
    }

    Ok(mapping)
}

fn parse_trace(text: &str, origin: &str) -> Result<CqiTrace> {
    let mut rows = vec![];
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if rows.len() == MAX_TRACE_TTIS {
            break;
        }

        let row = line
            .split_whitespace()
            .map(|tok| tok.parse::<i32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("{}:{}: invalid CQI value", origin, lineno + 1))?;
        rows.push(row);
    }

    CqiTrace::new(rows).with_context(|| format!("Failed to load trace {}", origin))
}

/// Reads the mapping and traces from the filesystem.
#[derive(Clone, Debug)]
pub struct FileTraceSource {
    mapping_path: PathBuf,
    trace_dir: PathBuf,
}

impl FileTraceSource {
    pub fn new(mapping_path: impl AsRef<Path>, trace_dir: impl AsRef<Path>) -> Self {
        Self {
            mapping_path: mapping_path.as_ref().to_path_buf(),
            trace_dir: trace_dir.as_ref().to_path_buf(),
        }
    }

    pub fn trace_path(&self, trace_id: u32) -> PathBuf {
        self.trace_dir.join(format!("{}.cqi", trace_id))
    }
}

impl TraceSource for FileTraceSource {
    fn mapping(&self) -> Result<Vec<TraceMapping>> {
        let text = fs::read_to_string(&self.mapping_path).with_context(|| {
            format!(
                "Failed to read trace mapping {}",
                self.mapping_path.display()
            )
        })?;
        parse_mapping(&text, &self.mapping_path.display().to_string())
    }

    fn load(&self, trace_id: u32) -> Result<CqiTrace> {
        let path = self.trace_path(trace_id);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read CQI trace {}", path.display()))?;
        parse_trace(&text, &path.display().to_string())
    }
}

/// Generates one bounded random-walk table per terminal.
#[derive(Clone, Debug)]
pub struct SyntheticTraceSource {
    nr_ues: usize,
    width: usize,
    len: usize,
    seed: u64,
}

impl SyntheticTraceSource {
    pub fn new(nr_ues: usize, width: usize, len: usize, seed: u64) -> Self {
        Self {
            nr_ues,
            width,
            len: len.min(MAX_TRACE_TTIS),
            seed,
        }
    }
}

impl TraceSource for SyntheticTraceSource {
    fn mapping(&self) -> Result<Vec<TraceMapping>> {
        Ok((0..self.nr_ues as u32)
            .map(|id| TraceMapping {
                ue_id: id,
                trace_id: id,
            })
            .collect())
    }

    fn load(&self, trace_id: u32) -> Result<CqiTrace> {
        if self.len == 0 || self.width == 0 {
            bail!("Synthetic traces need at least one row and one column");
        }

        let mut rng = SmallRng::seed_from_u64(self.seed ^ ((trace_id as u64 + 1) << 32));
        let mut cur: Vec<i32> = (0..self.width)
            .map(|_| rng.gen_range(1..=MAX_CQI))
            .collect();

        let mut rows = Vec::with_capacity(self.len);
        for _ in 0..self.len {
            for cqi in cur.iter_mut() {
                *cqi = (*cqi + rng.gen_range(-2..=2)).clamp(1, MAX_CQI);
            }
            rows.push(cur.clone());
        }
        CqiTrace::new(rows)
    }
}

/// Mapping and tables held in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticTraceSource {
    mapping: Vec<TraceMapping>,
    traces: BTreeMap<u32, CqiTrace>,
}

impl StaticTraceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a terminal replaying @trace_id. Mapping order is insertion order.
    pub fn map_ue(mut self, ue_id: u32, trace_id: u32) -> Self {
        self.mapping.push(TraceMapping { ue_id, trace_id });
        self
    }

    pub fn trace(mut self, trace_id: u32, trace: CqiTrace) -> Self {
        self.traces.insert(trace_id, trace);
        self
    }
}

impl TraceSource for StaticTraceSource {
    fn mapping(&self) -> Result<Vec<TraceMapping>> {
        Ok(self.mapping.clone())
    }

    fn load(&self, trace_id: u32) -> Result<CqiTrace> {
        self.traces
            .get(&trace_id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown trace id {}", trace_id))
    }
}

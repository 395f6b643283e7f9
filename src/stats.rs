// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::io::Write;

use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

fn signed(x: f64) -> String {
    if x >= 0.0f64 {
        format!("{:+6.3}", x)
    } else {
        format!("{:6.3}", x)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SliceStats {
    pub id: usize,
    pub weight: f64,
    pub quota: usize,
    pub granted: usize,
    pub offset: f64,
    pub granted_total: u64,
    /// Fraction of all RBGs handed out so far that went to this slice.
    pub share: f64,
}

impl SliceStats {
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(
            w,
            "  SLICE[{:02}] weight={:5.3} quota={:3} granted={:3} offset={} share={:6.4} total={}",
            self.id,
            self.weight,
            self.quota,
            self.granted,
            signed(self.offset),
            self.share,
            self.granted_total,
        )?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchedStats {
    pub nr_intervals: u64,
    pub last_tti: Option<u64>,
    /// Scheduling time of the last interval.
    pub sched_us: f64,
    pub slices: Vec<SliceStats>,
}

impl SchedStats {
    pub fn format<W: Write>(&self, w: &mut W) -> Result<()> {
        let tti = match self.last_tti {
            Some(tti) => tti.to_string(),
            None => "-".to_string(),
        };
        writeln!(
            w,
            "tti={} intervals={} sched={:.1}us",
            tti, self.nr_intervals, self.sched_us
        )?;
        for slice in self.slices.iter() {
            slice.format(w)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let stats = SchedStats {
            nr_intervals: 3,
            last_tti: Some(2),
            sched_us: 12.5,
            slices: vec![SliceStats {
                id: 1,
                weight: 0.5,
                quota: 31,
                granted: 31,
                offset: -0.25,
                granted_total: 93,
                share: 0.5,
            }],
        };
        let mut buf = vec![];
        stats.format(&mut buf).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.starts_with("tti=2 intervals=3 sched=12.5us\n"));
        assert!(out.contains("SLICE[01] weight=0.500 quota= 31"));
        assert!(out.contains("offset=-0.250"));
    }

    #[test]
    fn test_json() {
        let stats = SchedStats {
            nr_intervals: 1,
            ..Default::default()
        };
        let back: SchedStats = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(back.nr_intervals, 1);
        assert_eq!(back.last_tti, None);
    }
}

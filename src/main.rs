// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::ValueEnum;
use log::info;
use log::warn;
use metrics::counter;
use metrics::gauge;
use metrics::histogram;
use metrics::Counter;
use metrics::Histogram;
use metrics_exporter_prometheus::PrometheusBuilder;

use radiosaber::CandidateStrategy;
use radiosaber::FileTraceSource;
use radiosaber::IntervalReport;
use radiosaber::LinearRate;
use radiosaber::RateMap;
use radiosaber::SchedConfig;
use radiosaber::SchedulerContext;
use radiosaber::SpectralEfficiency;
use radiosaber::SyntheticTraceSource;
use radiosaber::TraceSource;
use radiosaber::UeParams;
use radiosaber::MAX_TRACE_TTIS;
use radiosaber::NB_RBGS;
use radiosaber::RBS_PER_RBG;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    Interleaved,
    Precompute,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Rate {
    /// CQI spectral efficiency times the resource elements of one RBG.
    Spectral,
    /// Rate equal to the CQI.
    Linear,
}

/// radiosaber: a two-level inter-slice / intra-slice RBG scheduler
///
/// Every scheduling interval (TTI) the RBGs of a cell are split among
/// network slices. Each slice gets an integer quota that follows its
/// weight over time; the fractional part it could not get this interval is
/// carried into the next one. RBGs are then handed out greedily to the
/// slice whose best terminal sees the highest CQI on them, until every
/// quota is filled.
///
/// Within a slice, the best terminal for an RBG is chosen by proportional
/// fairness: achievable rate over the terminal's average throughput.
///
/// Channel quality is replayed from recorded CQI traces (--mapping and
/// --trace-dir) or generated from a seeded random walk.
#[derive(Debug, Parser)]
struct Opts {
    /// Number of network slices.
    #[clap(short = 's', long, default_value = "2")]
    nr_slices: usize,

    /// Number of terminals in every slice.
    #[clap(short = 'u', long, default_value = "10")]
    ues_per_slice: usize,

    /// Capacity weight of every slice, one per slice. Defaults to an equal
    /// split. Weights are normalized to sum to one.
    #[clap(short = 'w', long, num_args = 1..)]
    weights: Vec<f64>,

    /// Number of RBGs per interval.
    #[clap(short = 'r', long, default_value_t = NB_RBGS)]
    nb_rbgs: usize,

    /// EWMA factor of the throughput history.
    #[clap(short = 'b', long, default_value = "0.9")]
    beta: f64,

    /// Proportional fairness exponent on the throughput history. 0 turns
    /// the intra-slice scheduler into max-rate.
    #[clap(short = 'a', long, default_value = "1.0")]
    fairness_exp: f64,

    /// Terminals refresh their CQI every this many intervals.
    #[clap(short = 'p', long, default_value = "1")]
    cqi_report_period: u64,

    /// Scheduling interval in microseconds.
    #[clap(short = 't', long, default_value = "1000")]
    tti_us: u64,

    /// Number of intervals to run. 0 runs until interrupted.
    #[clap(short = 'n', long, default_value = "0")]
    nr_ttis: u64,

    /// Terminal to trace mapping file of "ue_id trace_id" pairs. Without
    /// it, synthetic traces are generated.
    #[clap(short = 'm', long)]
    mapping: Option<PathBuf>,

    /// Directory holding <trace_id>.cqi files. Defaults to the directory
    /// of the mapping file.
    #[clap(short = 'd', long, requires = "mapping")]
    trace_dir: Option<PathBuf>,

    /// Rows per synthetic trace.
    #[clap(long, default_value_t = MAX_TRACE_TTIS)]
    trace_len: usize,

    /// Seed for quota rotation and synthetic traces. Random if not given.
    #[clap(long)]
    seed: Option<u64>,

    /// How the initial candidate table of every interval is built.
    #[clap(long, value_enum, default_value = "interleaved")]
    strategy: Strategy,

    /// Worker threads computing candidate rows with the precompute
    /// strategy.
    #[clap(short = 'j', long, default_value = "1")]
    nr_workers: usize,

    /// Assumed candidate evaluations per microsecond, used to check that
    /// the worst case fits in an interval.
    #[clap(long, default_value = "1000.0")]
    evals_per_us: f64,

    /// CQI to rate mapping.
    #[clap(long, value_enum, default_value = "spectral")]
    rate: Rate,

    /// Run intervals back to back instead of one per --tti-us.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    no_pacing: bool,

    /// Print scheduler stats every this many intervals. 0 disables.
    #[clap(short = 'i', long, default_value = "1000")]
    report_interval: u64,

    /// Print stats as JSON.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    stats_json: bool,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Enable the Prometheus endpoint for metrics on port 9000.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    enable_prometheus: bool,
}

impl Opts {
    fn sched_config(&self, seed: u64) -> SchedConfig {
        SchedConfig {
            nr_slices: self.nr_slices,
            ues_per_slice: self.ues_per_slice,
            nb_rbgs: self.nb_rbgs,
            weights: if self.weights.is_empty() {
                None
            } else {
                Some(self.weights.clone())
            },
            ue: UeParams {
                beta: self.beta,
                fairness_exp: self.fairness_exp,
                cqi_report_period: self.cqi_report_period,
            },
            tti: Duration::from_micros(self.tti_us),
            evals_per_us: self.evals_per_us,
            strategy: match self.strategy {
                Strategy::Interleaved => CandidateStrategy::Interleaved,
                Strategy::Precompute => CandidateStrategy::Precompute,
            },
            nr_workers: self.nr_workers,
            seed,
        }
    }

    fn trace_source(&self, seed: u64) -> Box<dyn TraceSource> {
        match &self.mapping {
            Some(mapping) => {
                let dir = match &self.trace_dir {
                    Some(dir) => dir.clone(),
                    None => mapping
                        .parent()
                        .map(|p| p.to_path_buf())
                        .unwrap_or_else(|| PathBuf::from(".")),
                };
                Box::new(FileTraceSource::new(mapping, dir))
            }
            None => Box::new(SyntheticTraceSource::new(
                self.nr_slices * self.ues_per_slice,
                self.nb_rbgs,
                self.trace_len,
                seed,
            )),
        }
    }
}

struct Metrics {
    intervals: Counter,
    overruns: Counter,
    processing_duration: Histogram,
}

impl Metrics {
    fn new() -> Self {
        Self {
            intervals: counter!("intervals_total"),
            overruns: counter!("interval_overruns_total"),
            processing_duration: histogram!("processing_duration_us"),
        }
    }
}

struct Scheduler {
    ctx: SchedulerContext,
    tti_interval: Duration,
    pacing: bool,
    nr_ttis: u64,
    report_interval: u64,
    stats_json: bool,
    nr_overruns: u64,
    metrics: Metrics,
}

impl Scheduler {
    fn init(opts: &Opts) -> Result<Self> {
        let seed = opts.seed.unwrap_or_else(rand::random);
        info!("Seed {}", seed);

        let config = opts.sched_config(seed);
        let rate: Arc<dyn RateMap> = match opts.rate {
            Rate::Spectral => Arc::new(SpectralEfficiency::new(RBS_PER_RBG)),
            Rate::Linear => Arc::new(LinearRate::default()),
        };
        let source = opts.trace_source(seed);

        let ctx = SchedulerContext::new(config, source.as_ref(), rate)
            .context("Failed to configure the scheduler")?;
        info!(
            "{} slices x {} terminals, {} RBGs per {}us interval",
            opts.nr_slices, opts.ues_per_slice, opts.nb_rbgs, opts.tti_us
        );

        Ok(Self {
            ctx,
            tti_interval: Duration::from_micros(opts.tti_us),
            pacing: !opts.no_pacing,
            nr_ttis: opts.nr_ttis,
            report_interval: opts.report_interval,
            stats_json: opts.stats_json,
            nr_overruns: 0,
            metrics: Metrics::new(),
        })
    }

    fn record(&mut self, report: &IntervalReport) {
        self.metrics.intervals.increment(1);
        self.metrics
            .processing_duration
            .record(report.elapsed.as_secs_f64() * 1_000_000.0);

        if report.elapsed > self.tti_interval {
            self.nr_overruns += 1;
            self.metrics.overruns.increment(1);
            warn!(
                "TTI {} took {}us, over the {}us interval",
                report.tti,
                report.elapsed.as_micros(),
                self.tti_interval.as_micros()
            );
        }

        // Per-slice metrics are keyed by a runtime label, they get cached
        // by the recorder after the first interval.
        for (sid, quota) in report.quotas.iter().enumerate() {
            gauge!("quota_rbgs", "slice" => sid.to_string()).set(*quota as f64);
        }
        for slice in self.ctx.slices() {
            counter!("granted_rbgs_total", "slice" => slice.id().to_string())
                .increment(slice.rbgs_allocated() as u64);
        }
    }

    fn report(&self) -> Result<()> {
        let stats = self.ctx.stats();
        if self.stats_json {
            println!("{}", stats.to_json()?);
        } else {
            stats.format(&mut std::io::stdout())?;
            if self.nr_overruns > 0 {
                println!("overruns={}", self.nr_overruns);
            }
        }
        Ok(())
    }

    fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let mut tti = 0u64;
        let mut next_tti_at = Instant::now();

        while !shutdown.load(Ordering::Relaxed) && (self.nr_ttis == 0 || tti < self.nr_ttis) {
            if self.pacing {
                std::thread::sleep(next_tti_at.duration_since(Instant::now()));
            }

            let report = self.ctx.advance(tti);
            self.record(&report);
            tti += 1;

            if self.report_interval > 0 && tti % self.report_interval == 0 {
                self.report()?;
            }

            let now = Instant::now();
            next_tti_at += self.tti_interval;
            if next_tti_at < now {
                next_tti_at = now + self.tti_interval;
            }
        }

        self.report()?;
        info!("Ran {} intervals", tti);
        Ok(())
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    if opts.enable_prometheus {
        info!("Enabling Prometheus endpoint: http://localhost:9000");
        PrometheusBuilder::new()
            .install()
            .context("Failed to install Prometheus recorder")?;
    }

    let mut sched = Scheduler::init(&opts)?;
    sched.run(shutdown)
}

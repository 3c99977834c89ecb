// Data models for fetch simulation

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A single request from a trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Time since the start of the trace
    pub offset: Duration,
    /// Cache key
    pub key: String,
}

impl Request {
    pub fn new(offset: Duration, key: String) -> Self {
        Self { offset, key }
    }
}

/// Retry policy under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum Scenario {
    /// Refetch on every request after a failure
    Always,
    /// Wait a fixed interval after each failure
    Constant,
    /// Double the wait after each consecutive failure
    Backoff,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Always => "always",
            Scenario::Constant => "constant",
            Scenario::Backoff => "backoff",
        }
    }

    /// Get all scenarios
    pub fn all() -> Vec<Scenario> {
        vec![Scenario::Always, Scenario::Constant, Scenario::Backoff]
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A period during which every origin call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outage {
    pub start: Duration,
    pub end: Duration,
}

impl Outage {
    pub fn contains(&self, at: Duration) -> bool {
        at >= self.start && at < self.end
    }
}

impl std::str::FromStr for Outage {
    type Err = String;

    /// Parses `START-END` in seconds, e.g. `600-900`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected START-END in seconds, got '{s}'"))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid outage bound '{v}': {e}"))
        };
        let outage = Outage {
            start: parse(start)?,
            end: parse(end)?,
        };
        if outage.end <= outage.start {
            return Err(format!("outage '{s}' ends before it starts"));
        }
        Ok(outage)
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub input_dir: PathBuf,
    pub scenarios: Vec<Scenario>,
    /// Lifetime of a fetched value
    pub max_age: Duration,
    /// Serve the previous value when a refetch fails
    pub allow_stale: bool,
    /// Probability that any single origin call fails
    pub failure_rate: f64,
    pub outages: Vec<Outage>,
    /// Interval for the constant scenario
    pub retry_interval: Duration,
    /// Bounds for the backoff scenario
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Seed for the origin's failure draws
    pub seed: u64,
    pub segments: Option<usize>,
}

/// Counters for one scenario
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioStats {
    pub requests: u64,
    pub hits: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub stale_served: u64,
    pub retries_suppressed: u64,
    /// Fetch errors surfaced to callers
    pub errors: u64,
    /// Calls that reached the origin
    pub origin_calls: u64,
    pub simulation_time_ms: u64,
}

impl ScenarioStats {
    /// Share of requests answered with a value, fresh or stale
    pub fn availability(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        let failed = self.errors + self.retries_suppressed;
        (self.requests - failed) as f64 / self.requests as f64 * 100.0
    }

    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64 * 100.0
        }
    }

    /// Origin calls per thousand requests
    pub fn origin_load(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.origin_calls as f64 * 1000.0 / self.requests as f64
        }
    }
}

/// Results from a simulation run
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub stats: BTreeMap<Scenario, ScenarioStats>,
    pub total_requests: usize,
    pub unique_keys: usize,
    pub duration: Duration,
}

/// One CSV export row
#[derive(Debug, Serialize)]
pub struct CsvResultRow {
    pub scenario: String,
    pub requests: u64,
    pub hits: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub stale_served: u64,
    pub retries_suppressed: u64,
    pub errors: u64,
    pub origin_calls: u64,
    pub hit_rate: f64,
    pub availability: f64,
    pub origin_load: f64,
    pub simulation_time_ms: u64,
}

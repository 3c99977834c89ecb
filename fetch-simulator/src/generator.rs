//! Synthetic trace generation
//!
//! Writes a `timestamp_ms,key` trace where a small set of popular keys
//! receives most of the traffic. Inter-arrival times are exponentially
//! distributed around the requested rate.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

/// Parameters for generating a trace
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Mean requests per second
    pub rps: u32,
    /// Trace length in seconds
    pub duration_secs: u64,
    /// Number of unique keys
    pub unique_keys: u32,
    /// Percentage of traffic going to popular keys
    pub popular_traffic_percent: u8,
    /// Percentage of keys that are popular
    pub popular_keys_percent: u8,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            rps: 50,
            duration_secs: 3600,
            unique_keys: 1_000,
            popular_traffic_percent: 80,
            popular_keys_percent: 20,
            seed: 42,
            output_dir: PathBuf::from("traces"),
        }
    }
}

/// Generator for request traces
pub struct TraceGenerator {
    config: TraceConfig,
}

impl TraceGenerator {
    pub fn new(config: TraceConfig) -> Self {
        Self { config }
    }

    /// Write the trace to `<output_dir>/trace.csv` and return the number of requests.
    pub fn generate(&self) -> io::Result<u64> {
        fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join("trace.csv");
        let mut out = BufWriter::new(File::create(&path)?);
        let written = self.write_trace(&mut out)?;
        out.flush()?;
        info!(path = %path.display(), requests = written, "wrote trace");
        Ok(written)
    }

    /// Write the trace to any writer.
    pub fn write_trace<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let unique = cfg.unique_keys.max(1);
        let popular = ((u64::from(unique) * u64::from(cfg.popular_keys_percent.min(100))) / 100)
            .clamp(1, u64::from(unique)) as u32;
        let popular_share = f64::from(cfg.popular_traffic_percent.min(100)) / 100.0;
        let mean_gap_ms = 1000.0 / f64::from(cfg.rps.max(1));
        let end_ms = cfg.duration_secs.saturating_mul(1000);

        writeln!(out, "timestamp_ms,key")?;
        let mut now_ms = 0.0f64;
        let mut written = 0u64;
        loop {
            // Exponential inter-arrival: -ln(U) * mean
            let u: f64 = rng.gen_range(f64::EPSILON..1.0);
            now_ms += -u.ln() * mean_gap_ms;
            let ts = now_ms as u64;
            if ts >= end_ms {
                break;
            }

            let key = if popular == unique || rng.gen_bool(popular_share) {
                rng.gen_range(0..popular)
            } else {
                rng.gen_range(popular..unique)
            };
            writeln!(out, "{ts},key-{key}")?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::TraceReader;

    #[test]
    fn test_trace_is_parseable_and_ordered() {
        let generator = TraceGenerator::new(TraceConfig {
            rps: 20,
            duration_secs: 10,
            unique_keys: 50,
            ..Default::default()
        });
        let mut buf = Vec::new();
        let written = generator.write_trace(&mut buf).unwrap();
        assert!(written > 0);

        let text = String::from_utf8(buf).unwrap();
        let mut last = None;
        let mut parsed = 0;
        for (n, line) in text.lines().enumerate() {
            if let Some(request) = TraceReader::parse_line(line, n).unwrap() {
                if let Some(prev) = last {
                    assert!(request.offset >= prev);
                }
                assert!(request.offset.as_millis() < 10_000);
                last = Some(request.offset);
                parsed += 1;
            }
        }
        assert_eq!(parsed, written);
    }

    #[test]
    fn test_same_seed_same_trace() {
        let config = TraceConfig {
            duration_secs: 5,
            ..Default::default()
        };
        let mut a = Vec::new();
        let mut b = Vec::new();
        TraceGenerator::new(config.clone()).write_trace(&mut a).unwrap();
        TraceGenerator::new(config).write_trace(&mut b).unwrap();
        assert_eq!(a, b);
    }
}

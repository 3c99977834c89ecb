//! Simulation runner
//!
//! Replays the same trace once per retry scenario. Each scenario gets its own
//! cache, origin and manual clock; the clock is moved to each request's
//! timestamp before the request is issued, so expiry and retry windows are
//! measured in trace time rather than wall time.
//!
//! The origin's failure draws are seeded identically for every scenario, so
//! differences between scenarios come from the retry policy alone.

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use keyed_cache::clock::ManualClock;
use keyed_cache::policy::{
    AlwaysRetry, ConstantInterval, DurationSinceFetch, ExponentialBackoff,
};
use keyed_cache::{CacheError, ConfigError, KeyedCache, KeyedCacheConfig};
use thiserror::Error;
use tracing::{debug, info};

use crate::input::{TraceParseError, TraceReader};
use crate::models::{Scenario, ScenarioStats, SimulationConfig, SimulationResult};
use crate::origin::{FlakyOrigin, SimKey};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Trace(#[from] TraceParseError),
    #[error("invalid retry configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no requests found in {0}")]
    EmptyTrace(String),
}

pub struct SimulationRunner {
    config: SimulationConfig,
}

impl SimulationRunner {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Run every configured scenario over the trace
    pub fn run(&self) -> Result<SimulationResult, SimulationError> {
        let start = Instant::now();
        let reader = TraceReader::new(&self.config.input_dir);

        let mut unique_keys = HashSet::new();
        let mut total_requests = 0usize;
        for request in reader.stream_requests()? {
            unique_keys.insert(request?.key);
            total_requests += 1;
        }
        if total_requests == 0 {
            return Err(SimulationError::EmptyTrace(
                self.config.input_dir.display().to_string(),
            ));
        }
        info!(
            requests = total_requests,
            keys = unique_keys.len(),
            "loaded trace"
        );

        let mut stats = BTreeMap::new();
        for &scenario in &self.config.scenarios {
            let scenario_stats = self.run_scenario(scenario, &reader)?;
            info!(
                %scenario,
                origin_calls = scenario_stats.origin_calls,
                errors = scenario_stats.errors,
                "scenario finished"
            );
            stats.insert(scenario, scenario_stats);
        }

        Ok(SimulationResult {
            stats,
            total_requests,
            unique_keys: unique_keys.len(),
            duration: start.elapsed(),
        })
    }

    fn build_cache(
        &self,
        scenario: Scenario,
        origin: Arc<FlakyOrigin>,
        clock: Arc<ManualClock>,
    ) -> Result<KeyedCache<FlakyOrigin, SimKey>, SimulationError> {
        let mut config = KeyedCacheConfig::new(scenario.as_str()).with_clock(clock);
        if let Some(segments) = self.config.segments.and_then(NonZeroUsize::new) {
            config = config.with_segments(segments);
        }
        let cache = KeyedCache::new(origin, config);

        cache.set_expiration_policy(DurationSinceFetch::with_allow_expired_result(
            self.config.max_age,
            self.config.allow_stale,
        ));
        match scenario {
            Scenario::Always => cache.set_fetch_retry_policy(AlwaysRetry),
            Scenario::Constant => {
                cache.set_fetch_retry_policy(ConstantInterval::new(self.config.retry_interval))
            }
            Scenario::Backoff => cache.set_fetch_retry_policy(ExponentialBackoff::new(
                self.config.backoff_initial,
                self.config.backoff_max,
            )?),
        }
        debug!(%scenario, cache = ?cache, "built cache");
        Ok(cache)
    }

    fn run_scenario(
        &self,
        scenario: Scenario,
        reader: &TraceReader,
    ) -> Result<ScenarioStats, SimulationError> {
        let start = Instant::now();
        let clock = Arc::new(ManualClock::new());
        let origin = Arc::new(FlakyOrigin::new(
            Arc::clone(&clock),
            self.config.failure_rate,
            self.config.outages.clone(),
            self.config.seed,
        ));
        let cache = self.build_cache(scenario, Arc::clone(&origin), Arc::clone(&clock))?;

        let mut errors = 0;
        for request in reader.stream_requests()? {
            let request = request?;
            clock.set_elapsed(request.offset);
            match cache.get(&SimKey(request.key)) {
                Ok(_) => {}
                Err(CacheError::RetrySuppressed(_)) => {}
                Err(_) => errors += 1,
            }
        }

        let metrics = cache.fetch_metrics();
        Ok(ScenarioStats {
            requests: metrics.requests,
            hits: metrics.cache_hits,
            fetches: metrics.fetches,
            fetch_failures: metrics.fetch_failures,
            stale_served: metrics.stale_served,
            retries_suppressed: metrics.retries_suppressed,
            errors,
            origin_calls: origin.calls(),
            simulation_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

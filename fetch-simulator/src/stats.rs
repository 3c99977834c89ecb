// Statistics reporting for fetch simulation

use crate::models::{CsvResultRow, SimulationResult};
use std::path::Path;

/// Formats and exports the results of a simulation run
pub struct SimulationStats<'a> {
    result: &'a SimulationResult,
}

impl<'a> SimulationStats<'a> {
    pub fn new(result: &'a SimulationResult) -> Self {
        Self { result }
    }

    /// Print a summary table, one row per scenario
    pub fn print_summary(&self) {
        println!("\nFetch Simulation Summary");
        println!("========================");
        println!("Total requests: {}", self.result.total_requests);
        println!("Unique keys: {}", self.result.unique_keys);
        println!("Completed in {:.2?}", self.result.duration);

        println!(
            "\n{:<9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>10} {:>9} {:>10} {:>9}",
            "Scenario",
            "Requests",
            "HitRate",
            "Fetches",
            "Failures",
            "Stale",
            "Suppressed",
            "Errors",
            "Available",
            "Load/1k"
        );
        println!("{}", "-".repeat(102));

        for (scenario, stats) in &self.result.stats {
            println!(
                "{:<9} {:>9} {:>8.2}% {:>9} {:>9} {:>9} {:>10} {:>9} {:>9.2}% {:>9.1}",
                scenario.as_str(),
                stats.requests,
                stats.hit_rate(),
                stats.fetches,
                stats.fetch_failures,
                stats.stale_served,
                stats.retries_suppressed,
                stats.errors,
                stats.availability(),
                stats.origin_load()
            );
        }
    }

    /// Rows in scenario order
    pub fn rows(&self) -> Vec<CsvResultRow> {
        self.result
            .stats
            .iter()
            .map(|(scenario, stats)| CsvResultRow {
                scenario: scenario.as_str().to_string(),
                requests: stats.requests,
                hits: stats.hits,
                fetches: stats.fetches,
                fetch_failures: stats.fetch_failures,
                stale_served: stats.stale_served,
                retries_suppressed: stats.retries_suppressed,
                errors: stats.errors,
                origin_calls: stats.origin_calls,
                hit_rate: stats.hit_rate(),
                availability: stats.availability(),
                origin_load: stats.origin_load(),
                simulation_time_ms: stats.simulation_time_ms,
            })
            .collect()
    }

    /// Export results to a CSV file
    pub fn export_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

//! The module responsible for writing output data to disk.
use crate::dispatch::{BidOutcome, DispatchPoint, DispatchResult};
use crate::horizon::Horizon;
use crate::market::BidSide;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which scenario-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "bess_dispatch_results";

/// The output file name for the dispatch schedule
pub const DISPATCH_FILE_NAME: &str = "dispatch.csv";

/// The output file name for placed bids
pub const BIDS_FILE_NAME: &str = "bids.csv";

/// The output file name for every bid lane, including unplaced ones
pub const DEBUG_BIDS_FILE_NAME: &str = "debug_bids.csv";

/// The output file name for the run summary
pub const SUMMARY_FILE_NAME: &str = "summary.toml";

/// Get the default output directory for the scenario at the specified path
pub fn get_output_dir(scenario_dir: &Path) -> Result<PathBuf> {
    // Get the scenario name from the dir path. This ends up being convoluted because we need to
    // check for all possible errors.
    let scenario_dir = scenario_dir
        .canonicalize() // canonicalise in case the user has specified "."
        .context("Could not resolve path to scenario")?;

    let scenario_name = scenario_dir
        .file_name()
        .context("Scenario cannot be in root folder")?
        .to_str()
        .context("Invalid chars in scenario dir name")?;

    // Construct path
    Ok([OUTPUT_DIRECTORY_ROOT, scenario_name].iter().collect())
}

/// Create a new output directory, deleting an existing non-empty one if `allow_overwrite` is set.
///
/// # Returns
///
/// Whether an existing directory was overwritten
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    let overwrite = if let Ok(mut it) = fs::read_dir(output_dir) {
        if it.next().is_none() {
            // Folder exists and is empty: nothing to do
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. Please delete the folder or pass the \
            --overwrite command-line option."
        );

        fs::remove_dir_all(output_dir)?;
        true
    } else {
        false
    };

    // Try to create the directory, with parents
    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// Represents a row in the dispatch CSV file
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct DispatchRow {
    /// The time point index
    pub step: usize,
    /// When the time point starts
    pub timestamp: DateTime<FixedOffset>,
    /// The clearing price
    pub price: f64,
    /// Energy stored at the time point
    pub state_of_charge: f64,
    /// Charge power during the following interval
    pub charge: f64,
    /// Discharge power during the following interval
    pub discharge: f64,
    /// Whether the battery is charging
    pub charging: bool,
}

impl From<&DispatchPoint> for DispatchRow {
    fn from(point: &DispatchPoint) -> Self {
        Self {
            step: point.step,
            timestamp: point.timestamp,
            price: point.price.value(),
            state_of_charge: point.state_of_charge.value(),
            charge: point.charge.value(),
            discharge: point.discharge.value(),
            charging: point.charging,
        }
    }
}

/// Represents a row in the bids CSV files
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct BidRow {
    step: usize,
    timestamp: DateTime<FixedOffset>,
    slot: usize,
    side: BidSide,
    price: f64,
    volume: f64,
    placed: bool,
    activated: bool,
    executed: f64,
}

impl From<&BidOutcome> for BidRow {
    fn from(bid: &BidOutcome) -> Self {
        Self {
            step: bid.step,
            timestamp: bid.timestamp,
            slot: bid.slot,
            side: bid.side,
            price: bid.price.value(),
            volume: bid.volume.value(),
            placed: bid.placed,
            activated: bid.activated,
            executed: bid.executed.value(),
        }
    }
}

/// The contents of `summary.toml`
#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct Summary {
    status: String,
    objective: f64,
    steps: usize,
    granularity: u32,
    placed_bids: usize,
    activated_bids: usize,
    energy_bought: f64,
    energy_sold: f64,
}

impl Summary {
    fn new(result: &DispatchResult, horizon: &Horizon) -> Self {
        let dt = horizon.step_duration().value();
        Self {
            status: result.status.to_string(),
            objective: result.objective.value(),
            steps: result.num_steps(),
            granularity: horizon.granularity(),
            placed_bids: result.iter_placed_bids().count(),
            activated_bids: result.iter_executed_volumes().count(),
            energy_bought: result.points.iter().map(|p| p.charge.value() * dt).sum(),
            energy_sold: result.points.iter().map(|p| p.discharge.value() * dt).sum(),
        }
    }
}

/// An object for writing dispatch results to file
pub struct DataWriter {
    output_path: PathBuf,
    dispatch_writer: csv::Writer<File>,
    bids_writer: csv::Writer<File>,
    debug_bids_writer: Option<csv::Writer<File>>,
}

impl DataWriter {
    /// Open CSV files to write output data to
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    /// * `save_debug_info` - Whether to include extra CSV files for debugging model
    pub fn create(output_path: &Path, save_debug_info: bool) -> Result<Self> {
        let new_writer = |file_name| {
            let file_path = output_path.join(file_name);
            csv::Writer::from_path(file_path)
        };

        let debug_bids_writer = if save_debug_info {
            Some(new_writer(DEBUG_BIDS_FILE_NAME)?)
        } else {
            None
        };

        Ok(Self {
            output_path: output_path.to_path_buf(),
            dispatch_writer: new_writer(DISPATCH_FILE_NAME)?,
            bids_writer: new_writer(BIDS_FILE_NAME)?,
            debug_bids_writer,
        })
    }

    /// Write the dispatch schedule, the bids and the summary
    pub fn write_result(&mut self, result: &DispatchResult, horizon: &Horizon) -> Result<()> {
        for point in &result.points {
            self.dispatch_writer.serialize(DispatchRow::from(point))?;
        }

        for bid in result.iter_placed_bids() {
            self.bids_writer.serialize(BidRow::from(bid))?;
        }

        if let Some(wtr) = &mut self.debug_bids_writer {
            for bid in &result.bids {
                wtr.serialize(BidRow::from(bid))?;
            }
        }

        let summary = Summary::new(result, horizon);
        fs::write(
            self.output_path.join(SUMMARY_FILE_NAME),
            toml::to_string(&summary)?,
        )?;

        Ok(())
    }

    /// Flush the underlying streams
    pub fn flush(&mut self) -> Result<()> {
        self.dispatch_writer.flush()?;
        self.bids_writer.flush()?;
        if let Some(wtr) = &mut self.debug_bids_writer {
            wtr.flush()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::horizon;
    use crate::optimisation::SolveStatus;
    use crate::units::{Energy, Money, MoneyPerEnergy, Power};
    use itertools::Itertools;
    use rstest::{fixture, rstest};
    use tempfile::tempdir;

    #[fixture]
    fn result(horizon: Horizon) -> DispatchResult {
        let point = |step, charge, discharge| DispatchPoint {
            step,
            timestamp: horizon.timestamp(step),
            price: MoneyPerEnergy::new(10.0 * (step + 1) as f64),
            state_of_charge: Energy::new(20.0),
            charge: Power::new(charge),
            discharge: Power::new(discharge),
            charging: charge > 0.0,
        };
        let bid = |placed, activated| BidOutcome {
            step: 0,
            timestamp: horizon.timestamp(0),
            slot: 0,
            side: BidSide::Buy,
            price: MoneyPerEnergy::new(10.0),
            volume: Power::new(5.0),
            placed,
            activated,
            executed: Power::new(if activated { 5.0 } else { 0.0 }),
        };

        DispatchResult {
            status: SolveStatus::Optimal,
            objective: Money::new(50.0),
            points: vec![point(0, 5.0, 0.0), point(1, 0.0, 5.0), point(2, 0.0, 0.0)],
            bids: vec![bid(true, true), bid(false, false)],
        }
    }

    #[rstest]
    fn test_write_result(result: DispatchResult, horizon: Horizon) {
        let dir = tempdir().unwrap();
        {
            let mut writer = DataWriter::create(dir.path(), false).unwrap();
            writer.write_result(&result, &horizon).unwrap();
            writer.flush().unwrap();
        }

        let rows: Vec<DispatchRow> = csv::Reader::from_path(dir.path().join(DISPATCH_FILE_NAME))
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], DispatchRow::from(&result.points[0]));

        // Only placed bids are written without debug info
        let bids: Vec<BidRow> = csv::Reader::from_path(dir.path().join(BIDS_FILE_NAME))
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap();
        assert_eq!(bids, [BidRow::from(&result.bids[0])]);
        assert!(!dir.path().join(DEBUG_BIDS_FILE_NAME).exists());

        let summary: Summary =
            toml::from_str(&fs::read_to_string(dir.path().join(SUMMARY_FILE_NAME)).unwrap())
                .unwrap();
        assert_eq!(
            summary,
            Summary {
                status: "optimal".into(),
                objective: 50.0,
                steps: 2,
                granularity: 1,
                placed_bids: 1,
                activated_bids: 1,
                energy_bought: 5.0,
                energy_sold: 5.0,
            }
        );
    }

    #[rstest]
    fn test_write_result_debug(result: DispatchResult, horizon: Horizon) {
        let dir = tempdir().unwrap();
        {
            let mut writer = DataWriter::create(dir.path(), true).unwrap();
            writer.write_result(&result, &horizon).unwrap();
            writer.flush().unwrap();
        }

        let bids: Vec<BidRow> = csv::Reader::from_path(dir.path().join(DEBUG_BIDS_FILE_NAME))
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap();
        assert_eq!(bids.len(), 2);
    }

    #[test]
    fn test_create_output_directory() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("results");

        // New directory
        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());

        // Empty existing directory
        assert!(!create_output_directory(&output_dir, false).unwrap());

        // Non-empty directory
        fs::write(output_dir.join("file.txt"), "").unwrap();
        assert!(create_output_directory(&output_dir, false).is_err());
        assert!(create_output_directory(&output_dir, true).unwrap());
        assert!(!output_dir.join("file.txt").exists());
    }

    #[test]
    fn test_get_output_dir() {
        let dir = tempdir().unwrap();
        let scenario_dir = dir.path().join("my_scenario");
        fs::create_dir(&scenario_dir).unwrap();
        assert_eq!(
            get_output_dir(&scenario_dir).unwrap(),
            Path::new(OUTPUT_DIRECTORY_ROOT).join("my_scenario")
        );
    }
}

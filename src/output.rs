//! The module responsible for writing output data to disk.
use crate::aggregate::{AnnualKey, AnnualTable, ModelYearKey};
use crate::costs::CostValues;
use crate::emission_rates::{RefineryRates, rate_names};
use crate::finance::DiscountedRow;
use crate::model::{BatchParameters, SessionPolicy};
use crate::physical::PhysicalEffects;
use crate::safety::SafetyTotals;
use crate::simulation::{BatchResults, DiscountedTable, SessionEffects};
use crate::values::{PollutantValues, ValueFields};
use anyhow::{Context, Result, ensure};
use chrono::Local;
use log::info;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub mod metadata;

/// The root folder in which run-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "fleet_effects_results";

/// A CSV writer for an output file
type TableWriter = csv::Writer<File>;

/// The timestamp identifying a run, used in folder and file names
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Get the default output folder for a run of the batch called `batch_name`
pub fn get_output_dir(batch_name: &str, timestamp: &str) -> PathBuf {
    [OUTPUT_DIRECTORY_ROOT, &format!("{timestamp}_{batch_name}")]
        .iter()
        .collect()
}

/// Create a new output directory.
///
/// Returns whether an existing, non-empty directory will be written over. This is only allowed
/// when `allow_overwrite` is set.
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    if output_dir.is_dir() {
        let is_empty = output_dir.read_dir()?.next().is_none();
        ensure!(
            is_empty || allow_overwrite,
            "Output folder already exists and is not empty. Use --overwrite to write over it."
        );
        return Ok(!is_empty);
    }

    fs::create_dir_all(output_dir)?;

    Ok(false)
}

/// Key columns followed by value columns, as CSV fields
fn record<I>(mut fields: Vec<String>, values: I) -> Vec<String>
where
    I: IntoIterator<Item = f64>,
{
    fields.extend(values.into_iter().map(|value| value.to_string()));
    fields
}

/// Column names as owned strings
fn names<'a, I>(columns: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    columns.into_iter().map(ToString::to_string).collect()
}

/// Writes the output files of one run
pub struct DataWriter<'a> {
    output_path: &'a Path,
    timestamp: &'a str,
    comment: String,
}

impl<'a> DataWriter<'a> {
    /// Create a writer for files in `output_path`.
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    /// * `batch_name` - Name of the batch, recorded at the top of every file
    /// * `timestamp` - The run's timestamp, used as a file name prefix
    pub fn new(output_path: &'a Path, batch_name: &str, timestamp: &'a str) -> Self {
        Self {
            output_path,
            timestamp,
            comment: format!("# {batch_name} run {timestamp}"),
        }
    }

    /// The path of the output file called `name`
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.output_path.join(format!("{}_{name}.csv", self.timestamp))
    }

    /// Open an output file, writing the run comment and column headers
    fn create(&self, name: &str, header: &[String]) -> Result<TableWriter> {
        let file_path = self.file_path(name);
        let mut file = File::create(&file_path)
            .with_context(|| format!("Could not create {}", file_path.display()))?;
        writeln!(file, "{}", self.comment)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(header)?;
        Ok(writer)
    }

    /// Write every output file for the batch
    pub fn write_results(
        &self,
        results: &BatchResults,
        parameters: &BatchParameters,
        refinery_rates: &RefineryRates,
        save_rate_details: bool,
    ) -> Result<()> {
        self.write_vmt_adjustments(&results.sessions)?;
        self.write_safety_summary(&results.sessions)?;
        self.write_physical_annual(
            "physical_effects_annual",
            results
                .physical_annual
                .iter()
                .map(|(policy, table)| (*policy, table)),
        )?;
        self.write_physical_annual(
            "physical_effects_annual_action_minus_no_action",
            results
                .physical_deltas
                .iter()
                .map(|(policy, table)| (*policy, table)),
        )?;
        self.write_discounted("cost_effects_annual", &results.costs)?;
        self.write_discounted("benefits_annual", &results.benefits)?;
        for (scope, table) in &results.social_costs {
            self.write_discounted(&format!("social_effects_{scope}_ghg_annual"), table)?;
        }
        self.write_model_year_physical(results)?;
        self.write_consumer_views(results)?;

        for session in &results.sessions {
            if parameters.save_vehicle_safety_effects_files {
                self.write_vehicle_safety(session)?;
            }
            if parameters.save_vehicle_physical_effects_files {
                self.write_vehicle_physical(session)?;
            }
            if parameters.save_vehicle_cost_effects_files {
                self.write_vehicle_costs(session)?;
            }
        }

        if save_rate_details {
            self.write_vehicle_rate_details(&results.sessions)?;
            self.write_egu_rate_details(&results.sessions)?;
            self.write_refinery_rate_details(refinery_rates)?;
        }

        info!("Output files written to {}", self.output_path.display());
        Ok(())
    }

    /// Write the ratios normalising each session to the context
    fn write_vmt_adjustments(&self, sessions: &[SessionEffects]) -> Result<()> {
        let header = names([
            "session_policy",
            "session_name",
            "calendar_year",
            "session_vmt",
            "session_stock",
            "context_vmt",
            "context_stock",
            "context_vmt_adjustment",
            "context_stock_adjustment",
        ]);
        let mut writer = self.create("vmt_adjustments", &header)?;
        for session in sessions {
            for adjustment in session.vmt_adjustments.iter() {
                writer.write_record(record(
                    vec![
                        session.policy.to_string(),
                        session.name.clone(),
                        adjustment.calendar_year.to_string(),
                    ],
                    [
                        adjustment.session_vmt,
                        adjustment.session_stock,
                        adjustment.context_vmt,
                        adjustment.context_stock,
                        adjustment.context_vmt_adjustment,
                        adjustment.context_stock_adjustment,
                    ],
                ))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write annual safety totals of every session
    fn write_safety_summary(&self, sessions: &[SessionEffects]) -> Result<()> {
        let mut header = names(["session_policy"]);
        header.extend(names(AnnualKey::COLUMNS));
        header.extend(names(SafetyTotals::FIELD_NAMES.iter().copied()));
        let mut writer = self.create("safety_effects_summary", &header)?;
        for session in sessions {
            for (key, totals) in &session.safety_annual {
                let mut fields = vec![session.policy.to_string()];
                fields.extend(key.fields());
                writer.write_record(record(fields, totals.values()))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write annual physical effects tagged by session
    fn write_physical_annual<'t, I>(&self, name: &str, tables: I) -> Result<()>
    where
        I: IntoIterator<Item = (SessionPolicy, &'t AnnualTable<PhysicalEffects>)>,
    {
        let mut header = names(["session_policy"]);
        header.extend(names(AnnualKey::COLUMNS));
        header.extend(PhysicalEffects::column_names());
        let mut writer = self.create(name, &header)?;
        for (policy, table) in tables {
            for (key, effects) in table {
                let mut fields = vec![policy.to_string()];
                fields.extend(key.fields());
                writer.write_record(record(fields, effects.values()))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write a discounted table with its series and rate columns
    fn write_discounted(&self, name: &str, table: &DiscountedTable) -> Result<()> {
        let mut header = names(["session_policy"]);
        header.extend(names(AnnualKey::COLUMNS));
        header.extend(names(["series", "discount_rate"]));
        header.extend(table.columns.iter().cloned());
        let mut writer = self.create(name, &header)?;
        for (policy, row) in &table.rows {
            writer.write_record(discounted_record(*policy, row))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write physical effects of model years over each consumer view period
    fn write_model_year_physical(&self, results: &BatchResults) -> Result<()> {
        let mut header = names(["session_policy", "period_years"]);
        header.extend(names(ModelYearKey::COLUMNS));
        header.extend(PhysicalEffects::column_names());
        let mut writer = self.create("MY_period_physical_effects", &header)?;
        for period in &results.model_year_physical {
            for (key, effects) in &period.table {
                let mut fields = vec![period.policy.to_string(), period.years.to_string()];
                fields.extend(key.fields());
                writer.write_record(record(fields, effects.values()))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write model year lifetime costs, one file per consumer view period
    fn write_consumer_views(&self, results: &BatchResults) -> Result<()> {
        let mut header = names(["session_policy", "discount_rate"]);
        header.extend(names(ModelYearKey::COLUMNS));
        header.push("sales".to_string());
        header.extend(names(CostValues::FIELD_NAMES.iter().copied()));
        header.extend(
            CostValues::FIELD_NAMES
                .iter()
                .map(|name| format!("{name}_per_vehicle")),
        );
        for view in &results.consumer_views {
            let mut writer = self.create(&format!("MY_{}_period_costs", view.years), &header)?;
            for (policy, row) in &view.rows {
                let mut fields = vec![policy.to_string(), row.discount_rate.to_string()];
                fields.extend(row.key.fields());
                let mut values = vec![row.sales];
                values.extend(row.costs.values());
                values.extend(row.per_vehicle().values());
                writer.write_record(record(fields, values))?;
            }
            writer.flush()?;
        }
        Ok(())
    }

    /// Write the per-vehicle safety effects of a session
    fn write_vehicle_safety(&self, session: &SessionEffects) -> Result<()> {
        let header = names([
            "vehicle_id",
            "calendar_year",
            "age",
            "base_year_curbweight_lbs",
            "curbweight_lbs",
            "lbs_changed",
            "lbs_changed_below_threshold",
            "lbs_changed_above_threshold",
            "check_for_0",
            "rate_change_below_threshold",
            "rate_change_above_threshold",
            "registered_count",
            "vmt",
            "base_fatality_rate",
            "session_fatality_rate",
            "base_fatalities",
            "session_fatalities",
        ]);
        let name = format!("{}_vehicle_safety_effects", session.policy);
        let mut writer = self.create(&name, &header)?;
        for row in &session.safety {
            let split = &row.weight_split;
            writer.write_record(record(
                vec![
                    row.vehicle_id.to_string(),
                    row.calendar_year.to_string(),
                    row.age.to_string(),
                ],
                [
                    row.base_year_curbweight_lbs,
                    row.curbweight_lbs,
                    split.lbs_changed,
                    split.below_threshold,
                    split.above_threshold,
                    split.check_for_0,
                    row.rate_change_below,
                    row.rate_change_above,
                    row.registered_count,
                    row.vmt,
                    row.base_fatality_rate,
                    row.session_fatality_rate,
                    row.base_fatalities,
                    row.session_fatalities,
                ],
            ))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the per-vehicle physical effects of a session
    fn write_vehicle_physical(&self, session: &SessionEffects) -> Result<()> {
        let mut header = names([
            "vehicle_id",
            "calendar_year",
            "age",
            "model_year",
            "reg_class_id",
            "in_use_fuel_id",
            "fueling_class",
            "annual_vmt",
            "odometer",
        ]);
        header.extend(PhysicalEffects::column_names());
        let name = format!("{}_vehicle_physical_effects", session.policy);
        let mut writer = self.create(&name, &header)?;
        for row in &session.physical {
            let vehicle = &row.vehicle;
            let mut values = vec![row.annual_vmt, row.odometer];
            values.extend(row.effects.values());
            writer.write_record(record(
                vec![
                    vehicle.id.to_string(),
                    row.calendar_year.to_string(),
                    row.age.to_string(),
                    vehicle.model_year.to_string(),
                    vehicle.reg_class_id.to_string(),
                    vehicle.in_use_fuel_id.to_string(),
                    vehicle.fueling_class.to_string(),
                ],
                values,
            ))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the per-vehicle cost effects of a session
    fn write_vehicle_costs(&self, session: &SessionEffects) -> Result<()> {
        let mut header = names([
            "vehicle_id",
            "calendar_year",
            "age",
            "registered_count",
            "annual_vmt",
            "odometer",
        ]);
        header.extend(names(CostValues::FIELD_NAMES.iter().copied()));
        let name = format!("{}_vehicle_cost_effects", session.policy);
        let mut writer = self.create(&name, &header)?;
        for row in &session.costs {
            let mut values = vec![row.registered_count, row.annual_vmt, row.odometer];
            values.extend(row.costs.values());
            writer.write_record(record(
                vec![
                    row.vehicle.id.to_string(),
                    row.calendar_year.to_string(),
                    row.age.to_string(),
                ],
                values,
            ))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write every vehicle emission rate looked up by each session, one rate per row
    fn write_vehicle_rate_details(&self, sessions: &[SessionEffects]) -> Result<()> {
        let header = names([
            "session_policy",
            "start_year",
            "model_year",
            "sourcetype_name",
            "reg_class_id",
            "fuel",
            "age",
            "rate_name",
            "value",
        ]);
        let mut writer = self.create("vehicle_emission_rates_details", &header)?;
        for session in sessions {
            for detail in &session.vehicle_rates {
                for (rate_name, value) in rate_names(detail.fuel).iter().zip(detail.values.iter())
                {
                    writer.write_record(record(
                        vec![
                            session.policy.to_string(),
                            detail.start_year.to_string(),
                            detail.model_year.to_string(),
                            detail.sourcetype.to_string(),
                            detail.reg_class.to_string(),
                            detail.fuel.to_string(),
                            detail.age.to_string(),
                            (*rate_name).to_string(),
                        ],
                        [*value],
                    ))?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the EGU rates resolved for each session and calendar year
    fn write_egu_rate_details(&self, sessions: &[SessionEffects]) -> Result<()> {
        let mut header = names([
            "session_policy",
            "calendar_year",
            "session_kwh_generation",
            "low_demand_kwh_generation_us",
            "high_demand_kwh_generation_us",
        ]);
        header.extend(
            PollutantValues::FIELD_NAMES
                .iter()
                .map(|species| format!("{species}_grams_per_kwh")),
        );
        let mut writer = self.create("egu_rates_details", &header)?;
        for session in sessions {
            for detail in &session.egu_rates {
                let mut values = vec![
                    detail.session_kwh_generation,
                    detail.low_demand_kwh_generation,
                    detail.high_demand_kwh_generation,
                ];
                values.extend(detail.grams_per_kwh.values());
                writer.write_record(record(
                    vec![
                        session.policy.to_string(),
                        detail.calendar_year.to_string(),
                    ],
                    values,
                ))?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the refinery rates for every calendar year of the table
    fn write_refinery_rate_details(&self, refinery_rates: &RefineryRates) -> Result<()> {
        let mut header = names(["calendar_year", "fuel_type"]);
        header.extend(
            PollutantValues::FIELD_NAMES
                .iter()
                .map(|species| format!("{species}_grams_per_gallon")),
        );
        let mut writer = self.create("refinery_rates_details", &header)?;
        for (year, fuel, rates) in refinery_rates.iter() {
            writer.write_record(record(
                vec![year.to_string(), fuel.label().to_string()],
                rates.values(),
            ))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Fields of one discounted row tagged with its session
fn discounted_record(policy: SessionPolicy, row: &DiscountedRow) -> Vec<String> {
    let mut fields = vec![policy.to_string()];
    fields.extend(row.key.fields());
    fields.push(row.series.to_string());
    fields.push(row.discount_rate.to_string());
    record(fields, row.values.iter().copied())
}

//! Integration tests for the `run` command.
use fleet_effects::cli::{RunOpts, handle_run_command};
use fleet_effects::settings::Settings;
use std::fs::{read_dir, read_to_string};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Get the path to the demo batch settings file.
fn get_batch_settings_path() -> PathBuf {
    PathBuf::from("demos/simple/batch_settings.csv")
}

/// Find the output file whose name ends with `_{name}.csv`
fn find_output(dir: &Path, name: &str) -> Option<PathBuf> {
    let suffix = format!("_{name}.csv");
    read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&suffix))
        })
}

/// The data rows of an output file, after the run comment and header
fn data_rows(path: &Path) -> Vec<String> {
    read_to_string(path)
        .unwrap()
        .lines()
        .skip(2)
        .map(str::to_string)
        .collect()
}

/// The values of `column` in an output file
fn column_values(path: &Path, column: &str) -> Vec<f64> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_path(path)
        .unwrap();
    let index = reader
        .headers()
        .unwrap()
        .iter()
        .position(|name| name == column)
        .unwrap_or_else(|| panic!("No column {column} in {}", path.display()));
    reader
        .records()
        .map(|record| record.unwrap()[index].parse().unwrap())
        .collect()
}

/// An integration test for the `run` command.
#[test]
fn test_handle_run_command() {
    unsafe { std::env::set_var("FLEET_EFFECTS_LOG_LEVEL", "off") };

    // Save results to non-existent directory to check that directory creation works
    let tempdir = tempdir().unwrap();
    let output_dir = tempdir.path().join("results");
    let opts = RunOpts {
        output_dir: Some(output_dir.clone()),
        overwrite: false,
        save_rate_details: true,
    };
    handle_run_command(&get_batch_settings_path(), &opts, Some(Settings::default())).unwrap();

    assert!(output_dir.join("metadata.toml").is_file());
    for name in [
        "vmt_adjustments",
        "safety_effects_summary",
        "physical_effects_annual",
        "physical_effects_annual_action_minus_no_action",
        "cost_effects_annual",
        "benefits_annual",
        "social_effects_global_ghg_annual",
        "MY_5_period_costs",
        "MY_3_period_costs",
        "MY_period_physical_effects",
        "vehicle_emission_rates_details",
        "egu_rates_details",
        "refinery_rates_details",
        "no_action_vehicle_safety_effects",
        "action_1_vehicle_physical_effects",
        "action_1_vehicle_cost_effects",
    ] {
        let path = find_output(&output_dir, name)
            .unwrap_or_else(|| panic!("Missing output file for {name}"));
        assert!(!data_rows(&path).is_empty(), "No data in {name}");
    }

    // Benefits are only calculated for action sessions
    let benefits = find_output(&output_dir, "benefits_annual").unwrap();
    assert!(
        data_rows(&benefits)
            .iter()
            .all(|row| row.starts_with("action_1,"))
    );

    // Refinery emissions are shared out to model years and vehicles
    for name in ["MY_period_physical_effects", "no_action_vehicle_physical_effects"] {
        let path = find_output(&output_dir, name).unwrap();
        assert!(
            column_values(&path, "refinery_co2_metrictons")
                .iter()
                .any(|value| *value > 0.0),
            "No refinery emissions in {name}"
        );
    }

    // Won't write into a non-empty folder unless asked to
    assert!(
        handle_run_command(&get_batch_settings_path(), &opts, Some(Settings::default())).is_err()
    );

    // With overwriting allowed, it fails later because the logging is already initialised
    let opts = RunOpts {
        overwrite: true,
        ..opts
    };
    assert_eq!(
        handle_run_command(&get_batch_settings_path(), &opts, Some(Settings::default()))
            .unwrap_err()
            .chain()
            .next()
            .unwrap()
            .to_string(),
        "Failed to initialise logging."
    );
}

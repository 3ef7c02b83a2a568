//! Physical, cost and benefit effects of vehicle fleet policy scenarios.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod aggregate;
pub mod benefits;
pub mod cli;
pub mod cost_factors;
pub mod costs;
pub mod deflators;
pub mod emission_rates;
pub mod expression;
pub mod finance;
pub mod fleet;
pub mod fuels;
pub mod id;
pub mod input;
pub mod legacy;
pub mod log;
pub mod model;
pub mod output;
pub mod physical;
pub mod rates;
pub mod safety;
pub mod settings;
pub mod simulation;
pub mod values;
pub mod vehicle_costs;
pub mod vmt;

#[cfg(test)]
mod fixture;

/// The folder holding the program's configuration files
pub fn get_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        return PathBuf::new();
    };
    config_dir.push("fleet_effects");
    config_dir
}

//! The inputs of a batch: the tables shared by every session and each session's own inputs.
use crate::cost_factors::CostFactors;
use crate::deflators::Deflators;
use crate::emission_rates::{EguRates, RefineryRates, VehicleEmissionRates};
use crate::fleet::{VehicleAnnualRow, VehicleMap};
use crate::fuels::{ContextFuelPrices, FuelPrice, OnroadFuels};
use crate::input::batch_settings::{BatchSettings, SessionSettings, read_batch_settings};
use crate::input::cost_factors::{CostFactorPaths, read_cost_factors};
use crate::input::deflators::{CPI_DEFLATORS_TEMPLATE, IP_DEFLATORS_TEMPLATE, read_deflators};
use crate::input::emission_rates::{
    read_egu_rates, read_refinery_rates, read_vehicle_emission_rates,
};
use crate::input::fleet::{read_vehicle_annual_data, read_vehicles};
use crate::input::fuels::{
    ElectricityPrices, read_context_fuel_prices, read_electricity_prices, read_onroad_fuels,
};
use crate::input::general::{GeneralInputs, read_general_inputs};
use crate::input::legacy_fleet::{
    read_annual_vmt, read_context_stock_and_vmt, read_legacy_fleet, read_reregistration,
};
use crate::input::safety::{read_fatality_rates, read_safety_values};
use crate::input::vehicle_costs::{VehicleCostPaths, read_battery_offsets, read_vehicle_cost_tables};
use crate::legacy::{FixedByAge, LegacyFleetRow};
use crate::rates::YearSeries;
use crate::safety::{FatalityRates, SafetyValues};
use crate::vehicle_costs::{BatteryOffsets, VehicleCostTables};
use crate::vmt::ContextStockAndVmt;
use anyhow::{Context, Result};
use log::info;
use std::path::Path;

pub mod parameters;
pub use parameters::*;

/// Every input table shared by the sessions of a batch
pub struct BatchInputs {
    /// The batch settings file
    pub settings: BatchSettings,
    /// Implicit price deflators
    pub ip_deflators: Deflators,
    /// Consumer price index deflators
    pub cpi_deflators: Deflators,
    /// The legacy fleet in the base year
    pub legacy_fleet: Vec<LegacyFleetRow>,
    /// Re-registration proportions for the legacy fleet
    pub reregistration: FixedByAge,
    /// Annual VMT per vehicle for the legacy fleet
    pub annual_vmt: FixedByAge,
    /// Stock and VMT every session is normalised to
    pub context_stock_and_vmt: YearSeries<ContextStockAndVmt>,
    /// Fatality rate changes per 100 lbs
    pub safety_values: SafetyValues,
    /// Base fatality rates
    pub fatality_rates: FatalityRates,
    /// On-road fuel properties
    pub onroad_fuels: OnroadFuels,
    /// Liquid fuel prices
    pub context_fuel_prices: ContextFuelPrices,
    /// Electricity prices for every source and session
    pub electricity_prices: ElectricityPrices,
    /// Electricity generating unit emission rates
    pub egu_rates: EguRates,
    /// Refinery emission rates
    pub refinery_rates: RefineryRates,
    /// Externality cost factors
    pub cost_factors: CostFactors,
    /// Operating and ownership costs
    pub vehicle_costs: VehicleCostTables,
    /// Constants and options
    pub general: GeneralInputs,
}

/// The inputs belonging to one session
pub struct SessionInputs {
    /// Name and paths of the session
    pub settings: SessionSettings,
    /// The session's vehicles
    pub vehicles: VehicleMap,
    /// Registrations and VMT of the session's vehicles by calendar year
    pub annual_data: Vec<VehicleAnnualRow>,
    /// The session's electricity prices
    pub electricity_prices: YearSeries<FuelPrice>,
    /// Vehicle emission rates. Absent for the context session.
    pub emission_rates: Option<VehicleEmissionRates>,
    /// Battery offsets. Absent for the context session.
    pub battery_offsets: Option<BatteryOffsets>,
}

impl BatchInputs {
    /// Read the batch settings file and every batch-level table it names.
    ///
    /// # Arguments
    ///
    /// * `settings_path` - Path to the batch settings CSV file
    pub fn from_path(settings_path: &Path) -> Result<Self> {
        let settings = read_batch_settings(settings_path)?;
        Self::load(settings)
    }

    /// Read every batch-level table named in `settings`
    pub fn load(settings: BatchSettings) -> Result<Self> {
        let paths = &settings.paths;
        let ip_deflators = read_deflators(&paths.ip_deflators, &IP_DEFLATORS_TEMPLATE)?;
        let cpi_deflators = read_deflators(&paths.cpi_deflators, &CPI_DEFLATORS_TEMPLATE)?;
        info!(
            "Analysis dollar basis is {} (IP) and {} (CPI)",
            ip_deflators.analysis_basis(),
            cpi_deflators.analysis_basis()
        );

        let cost_factors = read_cost_factors(
            CostFactorPaths {
                criteria: &paths.cost_factors_criteria,
                scghg: &paths.cost_factors_scghg,
                energy_security: &paths.cost_factors_energysecurity,
                congestion_noise: &paths.cost_factors_congestion_noise,
            },
            &ip_deflators,
        )?;
        if !cost_factors.criteria.enabled() {
            info!("Criteria pollutant cost factors are all zero; health benefits are disabled");
        }

        let vehicle_costs = read_vehicle_cost_tables(
            VehicleCostPaths {
                maintenance: &paths.maintenance_cost,
                repair: &paths.repair_cost,
                refueling: &paths.refueling_cost,
                insurance_and_taxes: &paths.insurance_and_taxes_cost_factors,
            },
            &cpi_deflators,
        )?;

        Ok(Self {
            legacy_fleet: read_legacy_fleet(&paths.legacy_fleet, &ip_deflators)?,
            reregistration: read_reregistration(&paths.reregistration_fixed_by_age)?,
            annual_vmt: read_annual_vmt(&paths.annual_vmt_fixed_by_age)?,
            context_stock_and_vmt: read_context_stock_and_vmt(&paths.context_stock_and_vmt)?,
            safety_values: read_safety_values(&paths.safety_values)?,
            fatality_rates: read_fatality_rates(&paths.fatality_rates)?,
            onroad_fuels: read_onroad_fuels(&paths.onroad_fuels)?,
            context_fuel_prices: read_context_fuel_prices(
                &paths.context_fuel_prices,
                &ip_deflators,
            )?,
            electricity_prices: read_electricity_prices(&paths.electricity_prices, &ip_deflators)?,
            egu_rates: read_egu_rates(&paths.emission_rates_egu)?,
            refinery_rates: read_refinery_rates(&paths.emission_rates_refinery)?,
            general: read_general_inputs(&paths.general_inputs_for_effects)?,
            cost_factors,
            vehicle_costs,
            ip_deflators,
            cpi_deflators,
            settings,
        })
    }

    /// The scalar options of the batch
    pub fn parameters(&self) -> &BatchParameters {
        &self.settings.parameters
    }

    /// Read the inputs of one session
    pub fn load_session(&self, session: &SessionSettings) -> Result<SessionInputs> {
        let parameters = self.parameters();
        let vehicles = read_vehicles(&session.vehicles)?;
        let annual_data = read_vehicle_annual_data(&session.vehicle_annual_data, &vehicles)?;
        let electricity_prices = self
            .electricity_prices
            .for_session(
                parameters.electricity_prices_source,
                &session.policy.to_string(),
            )
            .with_context(|| format!("Could not select electricity prices for {}", session.name))?;
        let emission_rates = session
            .emission_rates_vehicles
            .as_deref()
            .map(read_vehicle_emission_rates)
            .transpose()?;
        let battery_offsets = session
            .powertrain_cost
            .as_deref()
            .map(|path| {
                read_battery_offsets(path, parameters.powertrain_costs_fev, &self.ip_deflators)
            })
            .transpose()?;

        Ok(SessionInputs {
            settings: session.clone(),
            vehicles,
            annual_data,
            electricity_prices,
            emission_rates,
            battery_offsets,
        })
    }
}

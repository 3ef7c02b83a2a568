//! Physical effects: fuel consumption and emission inventories.
//!
//! Vehicle and EGU inventories are calculated per vehicle. EGU rates depend on how much
//! electricity the whole session fleet needs in a year, so each year is processed in two passes:
//! fuel use is totalled first, then the EGU rates for that total are applied to every vehicle.
//! Refinery inventories and oil imports depend on the no-action session. They are calculated later
//! on the annual totals and then shared back out to the vehicles.
use crate::emission_rates::{
    EguRateDetail, EguRates, RateBasis, RefineryFuel, RefineryRates, VehicleEmissionRates,
    rate_names, rate_species,
};
use crate::cost_factors::EnergySecurityFactors;
use crate::fleet::Vehicle;
use crate::fuels::{FuelUse, OnroadFuels};
use crate::input::general::GeneralInputs;
use crate::rates::YearSeries;
use crate::values::{PollutantValues, ValueFields, value_struct};
use crate::vmt::AdjustedRow;
use anyhow::Result;
use log::debug;
use std::rc::Rc;

value_struct! {
    /// Travel and fuel totals
    PhysicalTotals {
        /// Registered vehicles
        registered_count,
        /// Miles travelled, including rebound
        vmt,
        /// Rebound miles
        vmt_rebound,
        /// Electricity consumed at the wall
        fuel_consumption_kwh,
        /// Electricity generated, including transmission losses
        fuel_generation_kwh,
        /// Liquid fuel consumed
        fuel_consumption_gallons,
        /// Gasoline consumed
        gasoline_gallons,
        /// Diesel consumed
        diesel_gallons,
        /// Gasoline refined domestically
        refined_gasoline_gallons,
        /// Diesel refined domestically
        refined_diesel_gallons,
        /// Crude oil equivalent of liquid fuel consumed
        barrels_of_oil,
        /// Change in imported oil relative to the no-action session
        imported_oil_bbl_change,
    }
}

/// Physical effects of one group of vehicles, either a single vehicle or an aggregate
#[derive(
    Debug, Clone, Copy, PartialEq, Default, derive_more::Add, derive_more::AddAssign, derive_more::Sub,
)]
pub struct PhysicalEffects {
    /// Travel and fuel totals
    pub totals: PhysicalTotals,
    /// On-road vehicle emissions
    pub vehicle: PollutantValues,
    /// Emissions from electricity generation
    pub egu: PollutantValues,
    /// Emissions from refining
    pub refinery: PollutantValues,
}

impl PhysicalEffects {
    /// Emissions from electricity generation and refining
    pub fn upstream(&self) -> PollutantValues {
        self.egu + self.refinery
    }

    /// Vehicle and upstream emissions
    pub fn total(&self) -> PollutantValues {
        self.vehicle + self.upstream()
    }

    /// Every value in output column order
    pub fn values(&self) -> Vec<f64> {
        let mut values = self.totals.values();
        values.extend(self.vehicle.values());
        values.extend(self.egu.values());
        values.extend(self.refinery.values());
        values.extend(self.upstream().values());
        values.extend(self.total().values());
        values
    }

    /// Names of the values returned by [`PhysicalEffects::values`]
    pub fn column_names() -> Vec<String> {
        let mut names: Vec<String> = PhysicalTotals::FIELD_NAMES
            .iter()
            .map(ToString::to_string)
            .collect();
        for prefix in ["vehicle", "egu", "refinery", "upstream", "total"] {
            names.extend(PollutantValues::column_names(prefix));
        }
        names
    }
}

/// Physical effects of one vehicle in one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePhysicalEffects {
    /// The vehicle
    pub vehicle: Rc<Vehicle>,
    /// Calendar year
    pub calendar_year: u32,
    /// Age in years
    pub age: u32,
    /// Miles per vehicle
    pub annual_vmt: f64,
    /// Odometer per vehicle
    pub odometer: f64,
    /// The effects
    pub effects: PhysicalEffects,
}

/// Convert grams to the reporting unit of each species
fn grams_to_tons(grams: &PollutantValues, general: &GeneralInputs) -> PollutantValues {
    let values: Vec<f64> = grams
        .values()
        .into_iter()
        .zip(PollutantValues::FIELD_NAMES)
        .map(|(value, species)| match PollutantValues::unit(species) {
            "metrictons" => value / general.grams_per_metric_ton,
            _ => value / general.grams_per_us_ton,
        })
        .collect();

    PollutantValues::from_values(&values)
}

/// Vehicle emissions in grams for the given travel and fuel use
fn vehicle_emission_grams(
    vehicle: &Vehicle,
    rates: &[f64],
    vmt: f64,
    gallons: f64,
) -> PollutantValues {
    let mut grams = PollutantValues::default();
    for (name, rate) in rate_names(vehicle.emission_fuel).iter().zip(rates) {
        let Some((species, basis)) = rate_species(name) else {
            continue;
        };
        let quantity = match basis {
            RateBasis::PerMile => vmt,
            RateBasis::PerGallon => gallons,
        };
        grams.add_to(species, rate * quantity);
    }
    grams.co2 += vmt * vehicle.onroad_direct_co2e_grams_per_mile;

    grams
}

/// Tables and constants used to calculate physical effects
#[derive(Debug, Clone, Copy)]
pub struct PhysicalInputs<'a> {
    /// On-road fuels
    pub fuels: &'a OnroadFuels,
    /// EGU emission rates
    pub egu_rates: &'a EguRates,
    /// General inputs
    pub general: &'a GeneralInputs,
}

/// Calculate the physical effects of one calendar year's adjusted rows.
///
/// Returns the per-vehicle effects along with the EGU rates resolved for the year.
pub fn calc_physical_effects_for_year(
    calendar_year: u32,
    rows: &[AdjustedRow],
    vehicle_rates: &mut VehicleEmissionRates,
    inputs: PhysicalInputs,
) -> Result<(Vec<VehiclePhysicalEffects>, EguRateDetail)> {
    // First pass: the fleet's electricity demand
    let fuel_uses: Vec<FuelUse> = rows
        .iter()
        .map(|row| FuelUse::new(&row.vehicle, row.vmt, calendar_year, inputs.fuels))
        .collect::<Result<_>>()?;
    let kwh_generation: f64 = fuel_uses.iter().map(|fuel_use| fuel_use.generation_kwh).sum();
    let egu_detail = inputs.egu_rates.rates_for(calendar_year, kwh_generation);

    // Second pass: per-vehicle inventories
    let mut effects = Vec::with_capacity(rows.len());
    for (row, fuel_use) in rows.iter().zip(fuel_uses) {
        let rates = vehicle_rates.get(&row.vehicle, row.age)?;
        let gallons = fuel_use.gallons();
        let vehicle_grams = vehicle_emission_grams(&row.vehicle, &rates, row.vmt, gallons);
        let egu_grams = egu_detail.grams_per_kwh.scaled(fuel_use.generation_kwh);

        let totals = PhysicalTotals {
            registered_count: row.registered_count,
            vmt: row.vmt,
            vmt_rebound: row.vmt_rebound,
            fuel_consumption_kwh: fuel_use.kwh,
            fuel_generation_kwh: fuel_use.generation_kwh,
            fuel_consumption_gallons: gallons,
            gasoline_gallons: fuel_use.gallons_of("gasoline"),
            diesel_gallons: fuel_use.gallons_of("diesel"),
            ..Default::default()
        };
        effects.push(VehiclePhysicalEffects {
            vehicle: row.vehicle.clone(),
            calendar_year,
            age: row.age,
            annual_vmt: row.annual_vmt,
            odometer: row.odometer,
            effects: PhysicalEffects {
                totals,
                vehicle: grams_to_tons(&vehicle_grams, inputs.general),
                egu: grams_to_tons(&egu_grams, inputs.general),
                refinery: PollutantValues::default(),
            },
        });
    }
    debug!(
        "{calendar_year}: {} vehicle rows, {kwh_generation:.0} kWh generated, {} cached rate keys",
        effects.len(),
        vehicle_rates.cache_len()
    );

    Ok((effects, egu_detail))
}

/// Crude oil equivalent of the liquid fuel consumed
fn barrels_of_oil(totals: &PhysicalTotals, general: &GeneralInputs) -> f64 {
    let gasoline = totals.gasoline_gallons
        * general.e0_in_retail_gasoline
        * general.e0_energy_density_ratio;
    let diesel = totals.diesel_gallons * general.diesel_energy_density_ratio;

    (gasoline + diesel) / general.gal_per_bbl
}

fn refinery_inventory(
    gasoline_gallons: f64,
    diesel_gallons: f64,
    calendar_year: u32,
    rates: &RefineryRates,
    general: &GeneralInputs,
) -> PollutantValues {
    let grams = rates
        .get(RefineryFuel::Gasoline, calendar_year)
        .scaled(gasoline_gallons)
        + rates
            .get(RefineryFuel::Diesel, calendar_year)
            .scaled(diesel_gallons);

    grams_to_tons(&grams, general)
}

/// Tables and constants used for refinery inventories and oil imports
#[derive(Debug, Clone, Copy)]
pub struct UpstreamInputs<'a> {
    /// Refinery emission rates
    pub refinery_rates: &'a RefineryRates,
    /// Energy security factors, for the oil import share
    pub energy_security: &'a YearSeries<EnergySecurityFactors>,
    /// General inputs
    pub general: &'a GeneralInputs,
}

/// Refinery inventory and oil use of a no-action annual total. All fuel is refined domestically.
pub fn apply_no_action_upstream(
    calendar_year: u32,
    no_action: &mut PhysicalEffects,
    inputs: UpstreamInputs,
) {
    let totals = &mut no_action.totals;
    totals.refined_gasoline_gallons = totals.gasoline_gallons;
    totals.refined_diesel_gallons = totals.diesel_gallons;
    totals.barrels_of_oil = barrels_of_oil(totals, inputs.general);
    totals.imported_oil_bbl_change = 0.0;
    no_action.refinery = refinery_inventory(
        totals.refined_gasoline_gallons,
        totals.refined_diesel_gallons,
        calendar_year,
        inputs.refinery_rates,
        inputs.general,
    );
}

/// Refinery inventory and oil imports of an action annual total, relative to the matching
/// no-action total (zero if there is none).
///
/// Only a share of the change in fuel demand is met by a change in domestic refining. The change
/// in imported oil is `(action − no_action) · import share`, so a fuel saving is negative.
pub fn apply_action_upstream(
    calendar_year: u32,
    action: &mut PhysicalEffects,
    no_action: &PhysicalTotals,
    inputs: UpstreamInputs,
) {
    let share = inputs
        .general
        .fuel_reduction_leading_to_reduced_domestic_refining;
    let totals = &mut action.totals;
    totals.refined_gasoline_gallons = no_action.gasoline_gallons
        - (no_action.gasoline_gallons - totals.gasoline_gallons) * share;
    totals.refined_diesel_gallons =
        no_action.diesel_gallons - (no_action.diesel_gallons - totals.diesel_gallons) * share;
    totals.barrels_of_oil = barrels_of_oil(totals, inputs.general);

    let import_share = inputs
        .energy_security
        .get(calendar_year)
        .oil_import_reduction_share;
    let no_action_bbl = barrels_of_oil(no_action, inputs.general);
    totals.imported_oil_bbl_change = (totals.barrels_of_oil - no_action_bbl) * import_share;

    action.refinery = refinery_inventory(
        totals.refined_gasoline_gallons,
        totals.refined_diesel_gallons,
        calendar_year,
        inputs.refinery_rates,
        inputs.general,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{
        bev, egu_rates, energy_security, general_inputs, onroad_fuels, refinery_rates, vehicle,
        vehicle_emission_rates,
    };
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn adjusted(vehicle: Vehicle, vmt: f64) -> AdjustedRow {
        AdjustedRow {
            calendar_year: vehicle.model_year,
            vehicle: Rc::new(vehicle),
            age: 0,
            registered_count: 1.0,
            context_vmt_adjustment: 1.0,
            vmt,
            vmt_rebound: 0.0,
            annual_vmt: vmt,
            annual_vmt_rebound: 0.0,
            odometer: vmt,
            fuel_cost_per_mile: 0.1,
            context_fuel_cost_per_mile: 0.1,
        }
    }

    #[rstest]
    fn test_ice_vehicle_effects(
        vehicle: Vehicle,
        mut vehicle_emission_rates: VehicleEmissionRates,
        onroad_fuels: OnroadFuels,
        egu_rates: EguRates,
        general_inputs: GeneralInputs,
    ) {
        let inputs = PhysicalInputs {
            fuels: &onroad_fuels,
            egu_rates: &egu_rates,
            general: &general_inputs,
        };
        let rows = [adjusted(vehicle, 15000.0)];
        let (effects, _) =
            calc_physical_effects_for_year(2025, &rows, &mut vehicle_emission_rates, inputs)
                .unwrap();
        let effects = &effects[0].effects;
        assert_approx_eq!(
            f64,
            effects.totals.fuel_consumption_gallons,
            15000.0 * 300.0 / 8887.0
        );
        assert_eq!(effects.totals.fuel_consumption_kwh, 0.0);
        assert_eq!(effects.egu, PollutantValues::default());
        assert_approx_eq!(f64, effects.vehicle.co2, 15000.0 * 300.0 / 1e6);
        // NOx is 0.01 g/mi at age 0
        assert_approx_eq!(f64, effects.vehicle.nox, 150.0 / 907185.0);
    }

    #[rstest]
    fn test_bev_effects_use_fleet_generation(
        bev: Vehicle,
        mut vehicle_emission_rates: VehicleEmissionRates,
        onroad_fuels: OnroadFuels,
        egu_rates: EguRates,
        general_inputs: GeneralInputs,
    ) {
        let inputs = PhysicalInputs {
            fuels: &onroad_fuels,
            egu_rates: &egu_rates,
            general: &general_inputs,
        };
        // Two BEVs each needing 748 kWh of generation: 1496 kWh in total
        let vmt = 748.0 * 0.935 / 0.3;
        let rows = [adjusted(bev.clone(), vmt), adjusted(bev, vmt)];
        let (effects, detail) =
            calc_physical_effects_for_year(2025, &rows, &mut vehicle_emission_rates, inputs)
                .unwrap();
        assert_approx_eq!(f64, detail.session_kwh_generation, 1496.0, epsilon = 1e-9);
        // NOx rates are 0.5 g/kWh at 1000 kWh and 0.3 g/kWh at 2000 kWh
        let nox_rate = 0.5 - 0.2 * 0.496;
        assert_approx_eq!(f64, detail.grams_per_kwh.nox, nox_rate, epsilon = 1e-12);
        let bev_effects = &effects[0].effects;
        assert_eq!(bev_effects.totals.fuel_consumption_gallons, 0.0);
        assert_approx_eq!(
            f64,
            bev_effects.egu.nox,
            748.0 * nox_rate / 907185.0,
            epsilon = 1e-12
        );
    }

    #[rstest]
    fn test_action_refining_and_imports(
        refinery_rates: RefineryRates,
        energy_security: YearSeries<EnergySecurityFactors>,
        general_inputs: GeneralInputs,
    ) {
        let inputs = UpstreamInputs {
            refinery_rates: &refinery_rates,
            energy_security: &energy_security,
            general: &general_inputs,
        };
        let mut no_action = PhysicalEffects {
            totals: PhysicalTotals {
                gasoline_gallons: 500.0,
                fuel_consumption_gallons: 500.0,
                ..Default::default()
            },
            ..Default::default()
        };
        apply_no_action_upstream(2025, &mut no_action, inputs);
        assert_eq!(no_action.totals.refined_gasoline_gallons, 500.0);

        let mut action = PhysicalEffects::default();
        apply_action_upstream(2025, &mut action, &no_action.totals, inputs);
        // Half of the reduction in demand reduces domestic refining
        assert_eq!(action.totals.refined_gasoline_gallons, 250.0);
        assert_approx_eq!(f64, action.refinery.co2, no_action.refinery.co2 / 2.0);
        assert!(action.totals.imported_oil_bbl_change < 0.0);
        assert_approx_eq!(
            f64,
            action.totals.imported_oil_bbl_change,
            -no_action.totals.barrels_of_oil * 0.9
        );
    }

    #[test]
    fn test_column_names_match_values() {
        assert_eq!(
            PhysicalEffects::column_names().len(),
            PhysicalEffects::default().values().len()
        );
    }
}

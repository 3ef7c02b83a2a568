//! Ageing of the legacy fleet: vehicles sold before the analysis which are carried through it
//! as aggregated buckets.
use crate::fleet::{
    BodyStyle, EmissionFuel, FuelingClass, InUseFuel, RegClass, Vehicle, VehicleID,
};
use crate::fuels::OnroadFuels;
use crate::rates::StartYearMap;
use crate::vmt::{AdjustedRow, VmtAdjustments};
use anyhow::{Context, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Ratio of on-road to cycle fuel economy
pub const ONROAD_MPG_FACTOR: f64 = 0.8;

/// Ratio of on-road to cycle electricity consumption is `1 / ONROAD_KWH_DIVISOR`
pub const ONROAD_KWH_DIVISOR: f64 = 0.7;

/// One bucket of the legacy fleet as registered in the base year
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyFleetRow {
    /// Model year
    pub model_year: u32,
    /// Age in the base year
    pub age: u32,
    /// The base year
    pub calendar_year: u32,
    /// Regulatory class
    pub reg_class_id: RegClass,
    /// Body style
    pub body_style: BodyStyle,
    /// Market class, e.g. `sedan_wagon.ICE`
    pub market_class_id: String,
    /// Fuels used on the road
    pub in_use_fuel_id: InUseFuel,
    /// Vehicles registered in the base year
    pub registered_count: f64,
    /// Cycle fuel economy
    pub miles_per_gallon: f64,
    /// Cycle electricity consumption
    pub kwh_per_mile: f64,
    /// Curb weight
    pub curbweight_lbs: f64,
    /// Average transaction price, in analysis-basis dollars
    pub transaction_price_dollars: f64,
}

/// Values by model year and age for each market class, e.g. re-registration shares
#[derive(Debug, Clone, PartialEq)]
pub struct FixedByAge {
    tables: HashMap<String, StartYearMap<BTreeMap<u32, f64>>>,
}

impl FixedByAge {
    /// Create a new [`FixedByAge`] table, keyed by market class
    pub fn new(tables: HashMap<String, StartYearMap<BTreeMap<u32, f64>>>) -> Self {
        Self { tables }
    }

    fn by_age(&self, model_year: u32, market_class_id: &str) -> Result<&BTreeMap<u32, f64>> {
        let table = self
            .tables
            .get(market_class_id)
            .with_context(|| format!("No values for market class {market_class_id}"))?;

        Ok(table.get(model_year))
    }

    /// The value at `age`, or `None` if the age is not tabulated
    pub fn get(&self, model_year: u32, market_class_id: &str, age: u32) -> Result<Option<f64>> {
        Ok(self.by_age(model_year, market_class_id)?.get(&age).copied())
    }

    /// The sum of values for every tabulated age up to and including `age`
    pub fn cumulative(&self, model_year: u32, market_class_id: &str, age: u32) -> Result<f64> {
        Ok(self
            .by_age(model_year, market_class_id)?
            .range(..=age)
            .map(|(_, value)| value)
            .sum())
    }
}

/// A legacy fleet vehicle before the VMT adjustment
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPreRow {
    /// The synthesised vehicle
    pub vehicle: Rc<Vehicle>,
    /// Calendar year
    pub calendar_year: u32,
    /// Age in years
    pub age: u32,
    /// Surviving vehicles
    pub registered_count: f64,
    /// Miles per vehicle from the annual VMT table
    pub annual_vmt: f64,
    /// Total miles of all surviving vehicles
    pub vmt: f64,
    /// Odometer per vehicle from the cumulative annual VMT table
    pub base_odometer: f64,
}

/// Synthesises and ages legacy fleet vehicles for one session
#[derive(Debug)]
pub struct LegacyFleetAger<'a> {
    rows: &'a [LegacyFleetRow],
    reregistration: &'a FixedByAge,
    annual_vmt: &'a FixedByAge,
    vehicles: Vec<Option<Rc<Vehicle>>>,
    next_id: usize,
    odometers: HashMap<VehicleID, f64>,
}

impl<'a> LegacyFleetAger<'a> {
    /// Create an ager over the legacy fleet rows
    pub fn new(
        rows: &'a [LegacyFleetRow],
        reregistration: &'a FixedByAge,
        annual_vmt: &'a FixedByAge,
    ) -> Self {
        Self {
            rows,
            reregistration,
            annual_vmt,
            vehicles: vec![None; rows.len()],
            next_id: 0,
            odometers: HashMap::new(),
        }
    }

    /// The surviving legacy fleet in `calendar_year`, before VMT adjustment.
    ///
    /// Buckets whose surviving count falls below one are retired. Vehicle IDs are assigned in
    /// order of first survival and reused in later years.
    pub fn pre_adjustment_rows(
        &mut self,
        calendar_year: u32,
        fuels: &OnroadFuels,
    ) -> Result<Vec<LegacyPreRow>> {
        let mut pre_rows = Vec::new();
        for (idx, row) in self.rows.iter().enumerate() {
            if calendar_year <= row.model_year {
                continue;
            }
            let age = calendar_year - row.model_year;
            let share = self
                .reregistration
                .get(row.model_year, &row.market_class_id, age)?
                .unwrap_or_default();
            let registered_count = row.registered_count * share;
            if registered_count < 1.0 {
                continue;
            }

            let vehicle = match &self.vehicles[idx] {
                Some(vehicle) => vehicle.clone(),
                None => {
                    self.next_id += 1;
                    let vehicle = Rc::new(synthesise_vehicle(row, self.next_id, fuels)?);
                    self.vehicles[idx] = Some(vehicle.clone());
                    vehicle
                }
            };
            let annual_vmt = self
                .annual_vmt
                .get(row.model_year, &row.market_class_id, age)?
                .unwrap_or_default();
            let base_odometer =
                self.annual_vmt
                    .cumulative(row.model_year, &row.market_class_id, age)?;

            pre_rows.push(LegacyPreRow {
                vehicle,
                calendar_year,
                age,
                registered_count,
                annual_vmt,
                vmt: registered_count * annual_vmt,
                base_odometer,
            });
        }

        Ok(pre_rows)
    }

    /// Apply the session's VMT adjustment to legacy rows. Legacy vehicles have no rebound.
    pub fn adjust(
        &mut self,
        pre_rows: &[LegacyPreRow],
        adjustments: &VmtAdjustments,
    ) -> Vec<AdjustedRow> {
        pre_rows
            .iter()
            .map(|pre| {
                let adjustment = adjustments.vmt_adjustment(pre.calendar_year);
                let vmt = pre.vmt * adjustment;
                let annual_vmt = vmt / pre.registered_count;
                let odometer = match self.odometers.get(&pre.vehicle.id) {
                    Some(previous) => previous + annual_vmt,
                    None => pre.base_odometer - pre.annual_vmt + annual_vmt,
                };
                self.odometers.insert(pre.vehicle.id.clone(), odometer);

                AdjustedRow {
                    vehicle: pre.vehicle.clone(),
                    calendar_year: pre.calendar_year,
                    age: pre.age,
                    registered_count: pre.registered_count,
                    context_vmt_adjustment: adjustment,
                    vmt,
                    vmt_rebound: 0.0,
                    annual_vmt,
                    annual_vmt_rebound: 0.0,
                    odometer,
                    fuel_cost_per_mile: 0.0,
                    context_fuel_cost_per_mile: 0.0,
                }
            })
            .collect()
    }
}

/// The powertrain implied by a legacy vehicle's fuels
fn legacy_fueling_class(in_use_fuel_id: &InUseFuel) -> FuelingClass {
    match (
        in_use_fuel_id.uses_electricity(),
        in_use_fuel_id.liquid_fuels().next().is_some(),
    ) {
        (true, false) => FuelingClass::Bev,
        (true, true) => FuelingClass::Phev,
        _ => FuelingClass::Ice,
    }
}

fn synthesise_vehicle(row: &LegacyFleetRow, n: usize, fuels: &OnroadFuels) -> Result<Vehicle> {
    let id: VehicleID = format!("Legacy Fleet_{n}_{}", row.reg_class_id).into();
    debug!("Synthesised legacy vehicle {id} for model year {}", row.model_year);

    let co2e_grams_per_mile = match row.in_use_fuel_id.liquid_fuels().next() {
        Some((fuel_id, _)) if row.miles_per_gallon > 0.0 => {
            let co2_per_gallon = fuels
                .get(fuel_id, row.model_year)?
                .direct_co2e_grams_per_unit;
            co2_per_gallon / (row.miles_per_gallon * ONROAD_MPG_FACTOR)
        }
        _ => 0.0,
    };
    let fueling_class = legacy_fueling_class(&row.in_use_fuel_id);
    let emission_fuel = row
        .in_use_fuel_id
        .emission_fuel()
        .unwrap_or(EmissionFuel::Gasoline);

    Ok(Vehicle {
        id,
        model_year: row.model_year,
        manufacturer_id: "legacy_fleet".into(),
        name: row.market_class_id.clone(),
        reg_class_id: row.reg_class_id,
        base_year_reg_class_id: row.reg_class_id.to_string(),
        context_size_class: String::new(),
        body_style: row.body_style,
        in_use_fuel_id: row.in_use_fuel_id.clone(),
        market_class_id: row.market_class_id.clone(),
        fueling_class,
        base_year_powertrain_type: fueling_class.to_string(),
        footprint_ft2: 0.0,
        base_year_curbweight_lbs: row.curbweight_lbs,
        curbweight_lbs: row.curbweight_lbs,
        onroad_direct_co2e_grams_per_mile: co2e_grams_per_mile,
        onroad_direct_kwh_per_mile: row.kwh_per_mile / ONROAD_KWH_DIVISOR,
        new_vehicle_mfr_cost_dollars: 0.0,
        price_dollars: row.transaction_price_dollars,
        price_modification_dollars: 0.0,
        battery_cost: 0.0,
        battery_kwh: 0.0,
        onroad_charge_depleting_range_mi: 0.0,
        emission_fuel,
        is_legacy: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{annual_vmt_by_age, legacy_fleet_rows, onroad_fuels, reregistration};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_pre_adjustment_rows_survival(
        legacy_fleet_rows: Vec<LegacyFleetRow>,
        reregistration: FixedByAge,
        annual_vmt_by_age: FixedByAge,
        onroad_fuels: OnroadFuels,
    ) {
        // 1000 cars of model year 2018; 0.8 survive to age 7 and 0.7 to age 8
        let mut ager = LegacyFleetAger::new(&legacy_fleet_rows, &reregistration, &annual_vmt_by_age);
        let rows_2025 = ager.pre_adjustment_rows(2025, &onroad_fuels).unwrap();
        assert_eq!(rows_2025.len(), 1);
        let row = &rows_2025[0];
        assert_approx_eq!(f64, row.registered_count, 800.0);
        assert_eq!(row.age, 7);
        assert_eq!(row.vehicle.id.to_string(), "Legacy Fleet_1_car");
        assert_eq!(row.annual_vmt, 9000.0);
        assert_approx_eq!(f64, row.base_odometer, 8.0 * 10000.0 - 1000.0);

        let rows_2026 = ager.pre_adjustment_rows(2026, &onroad_fuels).unwrap();
        assert_approx_eq!(f64, rows_2026[0].registered_count, 700.0);
        assert_eq!(rows_2026[0].vehicle.id, row.vehicle.id);
    }

    #[rstest]
    fn test_retired_when_below_one(
        mut legacy_fleet_rows: Vec<LegacyFleetRow>,
        reregistration: FixedByAge,
        annual_vmt_by_age: FixedByAge,
        onroad_fuels: OnroadFuels,
    ) {
        legacy_fleet_rows[0].registered_count = 1.0;
        let mut ager = LegacyFleetAger::new(&legacy_fleet_rows, &reregistration, &annual_vmt_by_age);
        assert!(ager.pre_adjustment_rows(2025, &onroad_fuels).unwrap().is_empty());
    }

    #[rstest]
    fn test_synthesised_vehicle(legacy_fleet_rows: Vec<LegacyFleetRow>, onroad_fuels: OnroadFuels) {
        let vehicle = synthesise_vehicle(&legacy_fleet_rows[0], 3, &onroad_fuels).unwrap();
        assert!(vehicle.is_legacy);
        assert_eq!(vehicle.fueling_class, FuelingClass::Ice);
        assert_eq!(vehicle.base_year_curbweight_lbs, vehicle.curbweight_lbs);
        // 30 mpg on the cycle
        assert_approx_eq!(
            f64,
            vehicle.onroad_direct_co2e_grams_per_mile,
            8887.0 / (30.0 * 0.8)
        );
    }

    #[rstest]
    fn test_adjust_odometer(
        legacy_fleet_rows: Vec<LegacyFleetRow>,
        reregistration: FixedByAge,
        annual_vmt_by_age: FixedByAge,
        onroad_fuels: OnroadFuels,
    ) {
        let mut ager = LegacyFleetAger::new(&legacy_fleet_rows, &reregistration, &annual_vmt_by_age);
        let adjustments = VmtAdjustments::uniform(2025..=2026, 0.5);

        let pre = ager.pre_adjustment_rows(2025, &onroad_fuels).unwrap();
        let adjusted = ager.adjust(&pre, &adjustments);
        assert_approx_eq!(f64, adjusted[0].annual_vmt, 4500.0);
        assert_approx_eq!(f64, adjusted[0].odometer, 79000.0 - 9000.0 + 4500.0);
        assert_eq!(adjusted[0].vmt_rebound, 0.0);

        let pre = ager.pre_adjustment_rows(2026, &onroad_fuels).unwrap();
        let next = ager.adjust(&pre, &adjustments);
        assert_approx_eq!(
            f64,
            next[0].odometer - adjusted[0].odometer,
            next[0].annual_vmt
        );
    }

    #[test]
    fn test_legacy_fueling_class() {
        assert_eq!(
            legacy_fueling_class(&InUseFuel::single("US electricity")),
            FuelingClass::Bev
        );
        assert_eq!(
            legacy_fueling_class(&InUseFuel::single("pump gasoline")),
            FuelingClass::Ice
        );
    }
}

//! Adjustment of session VMT to the context stock and VMT, plus rebound VMT.
use crate::fleet::{CostPerMileGroup, VehicleAnnualRow, VehicleID, VehicleMap, Vehicle};
use crate::fuels::{FuelPrices, OnroadFuels, fuel_cost_per_mile};
use crate::legacy::LegacyPreRow;
use crate::rates::{Interpolate, YearSeries};
use anyhow::{Context, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;
use std::rc::Rc;

/// Registrations below this count are ignored
pub const MIN_REGISTERED_COUNT: f64 = 1.0;

/// Aggregate stock and VMT from the context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextStockAndVmt {
    /// Registered vehicles
    pub stock: f64,
    /// Total miles travelled
    pub vmt: f64,
}

impl Interpolate for ContextStockAndVmt {
    fn lerp(lower: &Self, upper: &Self, t: f64) -> Self {
        Self {
            stock: f64::lerp(&lower.stock, &upper.stock, t),
            vmt: f64::lerp(&lower.vmt, &upper.vmt, t),
        }
    }
}

/// The session's stock and VMT in one calendar year, compared with the context
#[derive(Debug, Clone, PartialEq)]
pub struct VmtAdjustment {
    /// Calendar year
    pub calendar_year: u32,
    /// Session VMT before adjustment, including the legacy fleet
    pub session_vmt: f64,
    /// Session stock, including the legacy fleet
    pub session_stock: f64,
    /// Context VMT
    pub context_vmt: f64,
    /// Context stock
    pub context_stock: f64,
    /// Ratio applied to every row's VMT
    pub context_vmt_adjustment: f64,
    /// Ratio of context stock to session stock. Reported only.
    pub context_stock_adjustment: f64,
}

/// VMT adjustments for every analysis year of a session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VmtAdjustments {
    by_year: BTreeMap<u32, VmtAdjustment>,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        1.0
    }
}

impl VmtAdjustments {
    /// Compare the session's eligible rows (including the legacy fleet) with the context in each
    /// analysis year
    pub fn calculate<'a, I>(
        session_rows: I,
        legacy_rows: &[LegacyPreRow],
        context: &YearSeries<ContextStockAndVmt>,
        years: RangeInclusive<u32>,
    ) -> Self
    where
        I: IntoIterator<Item = &'a VehicleAnnualRow>,
    {
        let mut totals: BTreeMap<u32, (f64, f64)> = years.map(|year| (year, (0.0, 0.0))).collect();
        let session = session_rows
            .into_iter()
            .map(|row| (row.calendar_year, row.vmt, row.registered_count));
        let legacy = legacy_rows
            .iter()
            .map(|row| (row.calendar_year, row.vmt, row.registered_count));
        for (year, vmt, count) in session.chain(legacy) {
            if count < MIN_REGISTERED_COUNT {
                continue;
            }
            if let Some((total_vmt, total_stock)) = totals.get_mut(&year) {
                *total_vmt += vmt;
                *total_stock += count;
            }
        }

        let by_year = totals
            .into_iter()
            .map(|(calendar_year, (session_vmt, session_stock))| {
                let context = context.get(calendar_year);
                let adjustment = VmtAdjustment {
                    calendar_year,
                    session_vmt,
                    session_stock,
                    context_vmt: context.vmt,
                    context_stock: context.stock,
                    context_vmt_adjustment: ratio(context.vmt, session_vmt),
                    context_stock_adjustment: ratio(context.stock, session_stock),
                };
                (calendar_year, adjustment)
            })
            .collect();

        Self { by_year }
    }

    /// The ratio applied to VMT in `calendar_year`, or one if the year was not adjusted
    pub fn vmt_adjustment(&self, calendar_year: u32) -> f64 {
        self.by_year
            .get(&calendar_year)
            .map_or(1.0, |adjustment| adjustment.context_vmt_adjustment)
    }

    /// Iterate over the adjustments in year order
    pub fn iter(&self) -> impl Iterator<Item = &VmtAdjustment> {
        self.by_year.values()
    }

    /// The same VMT ratio in every year
    #[cfg(test)]
    pub fn uniform(years: RangeInclusive<u32>, context_vmt_adjustment: f64) -> Self {
        let by_year = years
            .map(|calendar_year| {
                let adjustment = VmtAdjustment {
                    calendar_year,
                    session_vmt: 1.0,
                    session_stock: 1.0,
                    context_vmt: context_vmt_adjustment,
                    context_stock: 1.0,
                    context_vmt_adjustment,
                    context_stock_adjustment: 1.0,
                };
                (calendar_year, adjustment)
            })
            .collect();

        Self { by_year }
    }
}

/// Key for matching a vehicle's fuel cost per mile against the context
pub type ContextCostPerMileKey = (CostPerMileGroup, String, u32, u32);

/// VMT-weighted fuel cost per mile of the context session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextCostPerMile {
    values: HashMap<ContextCostPerMileKey, f64>,
}

fn cost_per_mile_key(vehicle: &Vehicle, age: u32) -> ContextCostPerMileKey {
    (
        vehicle.cost_per_mile_group(),
        vehicle.context_size_class.clone(),
        vehicle.model_year,
        age,
    )
}

impl ContextCostPerMile {
    /// Average the context session's fuel cost per mile over its rows, weighted by VMT
    pub fn calculate<'a, I>(
        vehicles: &VehicleMap,
        rows: I,
        fuels: &OnroadFuels,
        prices: &FuelPrices,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a VehicleAnnualRow>,
    {
        let mut sums: HashMap<ContextCostPerMileKey, (f64, f64)> = HashMap::new();
        for row in rows {
            if row.registered_count < MIN_REGISTERED_COUNT || row.vmt <= 0.0 {
                continue;
            }
            let vehicle = vehicles
                .get(&row.vehicle_id)
                .with_context(|| format!("Unknown context vehicle {}", row.vehicle_id))?;
            let cpm = fuel_cost_per_mile(vehicle, row.calendar_year, fuels, prices)?;
            let (weighted, total_vmt) = sums.entry(cost_per_mile_key(vehicle, row.age)).or_default();
            *weighted += cpm * row.vmt;
            *total_vmt += row.vmt;
        }

        let values = sums
            .into_iter()
            .map(|(key, (weighted, total_vmt))| (key, weighted / total_vmt))
            .collect();

        Ok(Self { values })
    }

    /// The context fuel cost per mile matching `vehicle` at `age`
    pub fn get(&self, vehicle: &Vehicle, age: u32) -> Option<f64> {
        self.values.get(&cost_per_mile_key(vehicle, age)).copied()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no keys
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// VMT rebound elasticities
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReboundRates {
    /// Rate for vehicles using any liquid fuel
    pub ice: f64,
    /// Rate for vehicles using only electricity
    pub bev: f64,
}

impl ReboundRates {
    /// The rate applying to `vehicle`. Plug-in hybrids use the ICE rate.
    pub fn for_vehicle(&self, vehicle: &Vehicle) -> f64 {
        if vehicle.in_use_fuel_id.liquid_fuels().next().is_none() {
            self.bev
        } else {
            self.ice
        }
    }
}

/// Rebound effect of a change in fuel cost per mile relative to the context
pub fn rebound_effect(rate: f64, fuel_cpm: f64, context_fuel_cpm: f64) -> f64 {
    if context_fuel_cpm <= 0.0 {
        return 0.0;
    }

    rate * (fuel_cpm - context_fuel_cpm) / context_fuel_cpm
}

/// A vehicle-annual row after VMT adjustment
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedRow {
    /// The vehicle
    pub vehicle: Rc<Vehicle>,
    /// Calendar year
    pub calendar_year: u32,
    /// Age in years
    pub age: u32,
    /// Registered vehicles
    pub registered_count: f64,
    /// Ratio applied to the session VMT
    pub context_vmt_adjustment: f64,
    /// Total miles, including rebound
    pub vmt: f64,
    /// Total rebound miles
    pub vmt_rebound: f64,
    /// Miles per vehicle
    pub annual_vmt: f64,
    /// Rebound miles per vehicle
    pub annual_vmt_rebound: f64,
    /// Miles per vehicle over its life so far
    pub odometer: f64,
    /// Retail fuel cost per mile
    pub fuel_cost_per_mile: f64,
    /// Retail fuel cost per mile of matching context vehicles
    pub context_fuel_cost_per_mile: f64,
}

/// Applies the VMT adjustment and rebound to a session's rows year by year
#[derive(Debug)]
pub struct VmtAdjuster<'a> {
    fuels: &'a OnroadFuels,
    prices: &'a FuelPrices<'a>,
    context_cpm: &'a ContextCostPerMile,
    rebound_rates: ReboundRates,
    odometers: HashMap<VehicleID, f64>,
}

impl<'a> VmtAdjuster<'a> {
    /// Create an adjuster for one session
    pub fn new(
        fuels: &'a OnroadFuels,
        prices: &'a FuelPrices<'a>,
        context_cpm: &'a ContextCostPerMile,
        rebound_rates: ReboundRates,
    ) -> Self {
        Self {
            fuels,
            prices,
            context_cpm,
            rebound_rates,
            odometers: HashMap::new(),
        }
    }

    /// Adjust the rows of one calendar year. Years must be adjusted in ascending order.
    pub fn adjust<'r, I>(
        &mut self,
        rows: I,
        vehicles: &VehicleMap,
        adjustments: &VmtAdjustments,
    ) -> Result<Vec<AdjustedRow>>
    where
        I: IntoIterator<Item = &'r VehicleAnnualRow>,
    {
        rows.into_iter()
            .filter(|row| row.registered_count >= MIN_REGISTERED_COUNT)
            .map(|row| self.adjust_row(row, vehicles, adjustments))
            .collect()
    }

    fn adjust_row(
        &mut self,
        row: &VehicleAnnualRow,
        vehicles: &VehicleMap,
        adjustments: &VmtAdjustments,
    ) -> Result<AdjustedRow> {
        let vehicle = vehicles
            .get(&row.vehicle_id)
            .with_context(|| format!("Unknown vehicle {}", row.vehicle_id))?;
        let context_vmt_adjustment = adjustments.vmt_adjustment(row.calendar_year);
        let vmt_pre = row.vmt * context_vmt_adjustment;

        let fuel_cpm = fuel_cost_per_mile(vehicle, row.calendar_year, self.fuels, self.prices)?;
        let context_fuel_cpm = match self.context_cpm.get(vehicle, row.age) {
            Some(cpm) => cpm,
            None => {
                debug!(
                    "No context fuel cost per mile for {} at age {}",
                    vehicle.id, row.age
                );
                fuel_cpm
            }
        };
        let effect = rebound_effect(
            self.rebound_rates.for_vehicle(vehicle),
            fuel_cpm,
            context_fuel_cpm,
        );

        let vmt_rebound = vmt_pre * effect;
        let vmt = vmt_pre + vmt_rebound;
        let annual_vmt = vmt / row.registered_count;
        let odometer = if row.age == 0 {
            annual_vmt
        } else {
            match self.odometers.get(&vehicle.id) {
                Some(previous) => previous + annual_vmt,
                None => f64::from(row.age + 1) * annual_vmt,
            }
        };
        self.odometers.insert(vehicle.id.clone(), odometer);

        Ok(AdjustedRow {
            vehicle: vehicle.clone(),
            calendar_year: row.calendar_year,
            age: row.age,
            registered_count: row.registered_count,
            context_vmt_adjustment,
            vmt,
            vmt_rebound,
            annual_vmt,
            annual_vmt_rebound: vmt_rebound / row.registered_count,
            odometer,
            fuel_cost_per_mile: fuel_cpm,
            context_fuel_cost_per_mile: context_fuel_cpm,
        })
    }
}

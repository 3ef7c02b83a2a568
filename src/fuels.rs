//! On-road fuel properties, fuel prices and per-vehicle fuel use.
use crate::fleet::Vehicle;
use crate::rates::{Interpolate, StartYearMap, YearSeries};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// Properties of an on-road fuel applying from a start year
#[derive(Debug, Clone, PartialEq)]
pub struct OnroadFuel {
    /// Unit in which the fuel is measured (`gallon` or `kWh`)
    pub unit: String,
    /// Direct CO2e emitted per unit of fuel consumed
    pub direct_co2e_grams_per_unit: f64,
    /// Share of generated energy delivered to the vehicle
    pub transmission_efficiency: f64,
}

/// On-road fuels, keyed by fuel ID
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnroadFuels {
    fuels: HashMap<String, StartYearMap<OnroadFuel>>,
}

impl OnroadFuels {
    /// Create a new [`OnroadFuels`] table
    pub fn new(fuels: HashMap<String, StartYearMap<OnroadFuel>>) -> Self {
        Self { fuels }
    }

    /// Properties of the fuel applying in `year`
    pub fn get(&self, fuel_id: &str, year: u32) -> Result<&OnroadFuel> {
        let fuel = self
            .fuels
            .get(fuel_id)
            .with_context(|| format!("Unknown on-road fuel '{fuel_id}'"))?;

        Ok(fuel.get(year))
    }
}

/// Retail and pre-tax price of a unit of fuel, in analysis-basis dollars
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FuelPrice {
    /// Price including taxes
    pub retail: f64,
    /// Price excluding taxes
    pub pretax: f64,
}

impl Interpolate for FuelPrice {
    fn lerp(lower: &Self, upper: &Self, t: f64) -> Self {
        Self {
            retail: f64::lerp(&lower.retail, &upper.retail, t),
            pretax: f64::lerp(&lower.pretax, &upper.pretax, t),
        }
    }
}

/// Liquid fuel prices by fuel ID
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextFuelPrices {
    prices: HashMap<String, YearSeries<FuelPrice>>,
}

impl ContextFuelPrices {
    /// Create a new [`ContextFuelPrices`] table
    pub fn new(prices: HashMap<String, YearSeries<FuelPrice>>) -> Self {
        Self { prices }
    }

    /// The price of a fuel in `year`
    pub fn get(&self, fuel_id: &str, year: u32) -> Result<FuelPrice> {
        let series = self
            .prices
            .get(fuel_id)
            .with_context(|| format!("No prices for fuel '{fuel_id}'"))?;

        Ok(*series.get(year))
    }
}

/// The fuel prices seen by one session
#[derive(Debug, Clone)]
pub struct FuelPrices<'a> {
    liquid: &'a ContextFuelPrices,
    electricity: YearSeries<FuelPrice>,
}

impl<'a> FuelPrices<'a> {
    /// Combine liquid fuel prices with a session's electricity prices
    pub fn new(liquid: &'a ContextFuelPrices, electricity: YearSeries<FuelPrice>) -> Self {
        Self {
            liquid,
            electricity,
        }
    }

    /// The price of a fuel in `year`
    pub fn get(&self, fuel_id: &str, year: u32) -> Result<FuelPrice> {
        if fuel_id.contains("electricity") {
            Ok(*self.electricity.get(year))
        } else {
            self.liquid.get(fuel_id, year)
        }
    }
}

/// Fuel used by a vehicle over some distance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FuelUse {
    /// Electricity consumed at the wall
    pub kwh: f64,
    /// Electricity generated to supply `kwh`, including transmission losses
    pub generation_kwh: f64,
    /// Gallons of each liquid fuel
    pub gallons_by_fuel: Vec<(String, f64)>,
}

impl FuelUse {
    /// Fuel used by `vehicle` travelling `vmt` miles in `year`
    pub fn new(vehicle: &Vehicle, vmt: f64, year: u32, fuels: &OnroadFuels) -> Result<Self> {
        let kwh = vmt * vehicle.onroad_direct_kwh_per_mile;
        let generation_kwh = if kwh > 0.0 {
            let fuel_id = vehicle.in_use_fuel_id.electric_fuel().with_context(|| {
                format!("Vehicle {} uses electricity but has no electric fuel", vehicle.id)
            })?;
            kwh / fuels.get(fuel_id, year)?.transmission_efficiency
        } else {
            0.0
        };

        // The on-road CO2e rate already blends in electric travel, so liquid fuels split it by
        // their share of liquid travel only
        let liquid_share: f64 = vehicle
            .in_use_fuel_id
            .liquid_fuels()
            .map(|(_, share)| share)
            .sum();
        let mut gallons_by_fuel = Vec::new();
        for (fuel_id, share) in vehicle.in_use_fuel_id.liquid_fuels() {
            let co2_per_gallon = fuels.get(fuel_id, year)?.direct_co2e_grams_per_unit;
            let gallons = vmt * vehicle.onroad_direct_co2e_grams_per_mile * share
                / liquid_share
                / co2_per_gallon;
            gallons_by_fuel.push((fuel_id.to_string(), gallons));
        }

        Ok(Self {
            kwh,
            generation_kwh,
            gallons_by_fuel,
        })
    }

    /// Total gallons of liquid fuel
    pub fn gallons(&self) -> f64 {
        self.gallons_by_fuel.iter().map(|(_, gallons)| gallons).sum()
    }

    /// Gallons of fuels whose name contains `family`, e.g. `gasoline`
    pub fn gallons_of(&self, family: &str) -> f64 {
        self.gallons_by_fuel
            .iter()
            .filter(|(fuel_id, _)| fuel_id.contains(family))
            .map(|(_, gallons)| gallons)
            .sum()
    }

    /// Retail and pre-tax cost of the fuel
    pub fn cost(&self, vehicle: &Vehicle, year: u32, prices: &FuelPrices) -> Result<FuelPrice> {
        let mut cost = FuelPrice::default();
        if self.kwh > 0.0
            && let Some(fuel_id) = vehicle.in_use_fuel_id.electric_fuel()
        {
            let price = prices.get(fuel_id, year)?;
            cost.retail += price.retail * self.kwh;
            cost.pretax += price.pretax * self.kwh;
        }
        for (fuel_id, gallons) in &self.gallons_by_fuel {
            let price = prices.get(fuel_id, year)?;
            cost.retail += price.retail * gallons;
            cost.pretax += price.pretax * gallons;
        }

        Ok(cost)
    }
}

/// Retail fuel cost per mile of `vehicle` in `year`
pub fn fuel_cost_per_mile(
    vehicle: &Vehicle,
    year: u32,
    fuels: &OnroadFuels,
    prices: &FuelPrices,
) -> Result<f64> {
    let fuel_use = FuelUse::new(vehicle, 1.0, year, fuels)?;
    Ok(fuel_use.cost(vehicle, year, prices)?.retail)
}

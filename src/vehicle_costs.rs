//! Per-vehicle operating and ownership cost tables.
//!
//! Several tables give their values as expressions, compiled once at load time against a fixed
//! set of variable names.
use crate::expression::Expression;
use crate::fleet::{BodyStyle, FuelingClass, OperatingVehicleType, RepairVehicleType, Vehicle};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use strum::Display;

/// Variables available to repair cost expressions
pub const REPAIR_VARIABLES: &[&str] = &["age"];

/// Variables available to BEV refueling cost expressions
pub const REFUELING_VARIABLES: &[&str] = &["range"];

/// Variables available to insurance and taxes expressions
pub const INSURANCE_VARIABLES: &[&str] = &["vehicle_value", "age"];

/// An expression whose result is multiplied by a fixed factor, e.g. a dollar basis conversion
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledExpression {
    expression: Expression,
    scale: f64,
}

impl ScaledExpression {
    /// Create a new [`ScaledExpression`]
    pub fn new(expression: Expression, scale: f64) -> Self {
        Self { expression, scale }
    }

    /// Evaluate with the given variable values
    pub fn eval(&self, vars: &[f64]) -> f64 {
        self.expression.eval(vars) * self.scale
    }
}

/// Maintenance cost per mile, linear in odometer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenanceCurve {
    /// Change in cost per mile per mile of odometer
    pub slope: f64,
    /// Cost per mile of a new vehicle
    pub intercept: f64,
}

impl MaintenanceCurve {
    /// Cumulative maintenance cost per vehicle up to `odometer`
    pub fn cumulative(&self, odometer: f64) -> f64 {
        0.5 * odometer * (self.slope * odometer + self.intercept)
    }
}

/// Maintenance curves keyed by powertrain type
pub type MaintenanceCosts = HashMap<FuelingClass, MaintenanceCurve>;

/// Repair cost per mile as a function of age, keyed by powertrain and repair vehicle type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepairCosts {
    expressions: HashMap<(FuelingClass, RepairVehicleType), ScaledExpression>,
}

impl RepairCosts {
    /// Create a new [`RepairCosts`] table
    pub fn new(expressions: HashMap<(FuelingClass, RepairVehicleType), ScaledExpression>) -> Self {
        Self { expressions }
    }

    /// Repair cost per mile of `vehicle` at `age`
    pub fn cost_per_mile(&self, vehicle: &Vehicle, age: u32) -> Result<f64> {
        let repair_type = vehicle.repair_vehicle_type();
        let expression = self
            .expressions
            .get(&(vehicle.fueling_class, repair_type))
            .with_context(|| {
                format!(
                    "No repair costs for powertrain {} and vehicle type {repair_type}",
                    vehicle.fueling_class
                )
            })?;

        Ok(expression.eval(&[f64::from(age)]))
    }
}

/// Refueling time costs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RefuelingCosts {
    /// BEV cost per mile as a function of charge depleting range
    pub bev: HashMap<OperatingVehicleType, ScaledExpression>,
    /// Liquid fuel cost per gallon
    pub liquid: HashMap<OperatingVehicleType, f64>,
}

impl RefuelingCosts {
    /// BEV refueling cost per mile for a vehicle type with the given range
    pub fn bev_cost_per_mile(&self, vehicle_type: OperatingVehicleType, range: f64) -> Result<f64> {
        let expression = self
            .bev
            .get(&vehicle_type)
            .with_context(|| format!("No BEV refueling costs for {vehicle_type}"))?;

        Ok(expression.eval(&[range]))
    }

    /// Liquid refueling cost per gallon for a vehicle type
    pub fn liquid_cost_per_gallon(&self, vehicle_type: OperatingVehicleType) -> Result<f64> {
        self.liquid
            .get(&vehicle_type)
            .copied()
            .with_context(|| format!("No liquid refueling costs for {vehicle_type}"))
    }
}

/// An item in the insurance and taxes table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InsuranceItem {
    /// Annual depreciation rate of vehicle value
    DepreciationRate,
    /// Annual insurance cost as a share of vehicle value
    InsuranceRate,
    /// Sales tax as a share of purchase price
    SalesTaxRate,
}

/// Insurance and taxes rates as expressions over vehicle value and age
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsuranceAndTaxes {
    expressions: HashMap<(InsuranceItem, Option<BodyStyle>), Expression>,
}

impl InsuranceAndTaxes {
    /// Create a new table. A `None` body style applies to every body style without its own row.
    pub fn new(expressions: HashMap<(InsuranceItem, Option<BodyStyle>), Expression>) -> Self {
        Self { expressions }
    }

    /// Evaluate an item for a body style
    pub fn rate(
        &self,
        item: InsuranceItem,
        body_style: BodyStyle,
        vehicle_value: f64,
        age: u32,
    ) -> Result<f64> {
        let expression = self
            .expressions
            .get(&(item, Some(body_style)))
            .or_else(|| self.expressions.get(&(item, None)))
            .with_context(|| format!("No {item} for body style {body_style}"))?;

        Ok(expression.eval(&[vehicle_value, f64::from(age)]))
    }

    /// Value of a vehicle bought for `price` after `age` years of depreciation
    pub fn vehicle_value(&self, body_style: BodyStyle, price: f64, age: u32) -> Result<f64> {
        let depreciation =
            self.rate(InsuranceItem::DepreciationRate, body_style, price, age)?;
        let exponent = i32::try_from(age).unwrap_or(i32::MAX);

        Ok(price / (1.0 + depreciation).powi(exponent))
    }
}

/// Battery cost offsets per kWh by model year, keyed by powertrain type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatteryOffsets {
    offsets: HashMap<FuelingClass, BTreeMap<u32, f64>>,
}

/// Batteries smaller than this earn no offset
pub const MIN_BATTERY_KWH_FOR_OFFSET: f64 = 7.0;

impl BatteryOffsets {
    /// Create a new [`BatteryOffsets`] table
    pub fn new(offsets: HashMap<FuelingClass, BTreeMap<u32, f64>>) -> Self {
        Self { offsets }
    }

    /// The battery credit per vehicle. Only plug-in vehicles with a large enough battery earn
    /// one, and only in model years listed in the table.
    pub fn credit_per_vehicle(&self, vehicle: &Vehicle) -> f64 {
        if !matches!(vehicle.fueling_class, FuelingClass::Phev | FuelingClass::Bev)
            || vehicle.battery_kwh < MIN_BATTERY_KWH_FOR_OFFSET
        {
            return 0.0;
        }

        self.offsets
            .get(&vehicle.fueling_class)
            .and_then(|by_year| by_year.get(&vehicle.model_year))
            .map_or(0.0, |dollars_per_kwh| dollars_per_kwh * vehicle.battery_kwh)
    }
}

/// The operating and ownership cost tables shared by every session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleCostTables {
    /// Maintenance curves
    pub maintenance: MaintenanceCosts,
    /// Repair costs
    pub repair: RepairCosts,
    /// Refueling costs
    pub refueling: RefuelingCosts,
    /// Insurance and taxes rates
    pub insurance_and_taxes: InsuranceAndTaxes,
}

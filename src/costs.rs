//! Cost effects: technology, fuel, ownership and external costs of each vehicle.
//!
//! Technology costs accrue only in the year of purchase. Maintenance is the increase in the
//! cumulative maintenance curve over the year, so the calculator remembers each vehicle's
//! cumulative cost from one calendar year to the next.
use crate::cost_factors::CongestionNoiseFactors;
use crate::fleet::{FuelingClass, OperatingVehicleType, Vehicle, VehicleID};
use crate::fuels::{FuelPrices, FuelUse, OnroadFuels};
use crate::values::value_struct;
use crate::vehicle_costs::{BatteryOffsets, InsuranceItem, VehicleCostTables};
use crate::vmt::AdjustedRow;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::rc::Rc;

value_struct! {
    /// Monetised costs of a group of vehicles
    CostValues {
        /// Manufacturer cost of new vehicles
        vehicle_cost_dollars,
        /// Price paid for new vehicles
        purchase_price_dollars,
        /// Purchase incentives
        purchase_credit_dollars,
        /// Battery cost of new vehicles
        battery_cost_dollars,
        /// Battery cost offsets
        battery_credit_dollars,
        /// Sales tax on new vehicles
        sales_tax_dollars,
        /// Fuel cost including taxes
        fuel_retail_dollars,
        /// Fuel cost excluding taxes
        fuel_pretax_dollars,
        /// Fuel taxes
        fuel_taxes_dollars,
        /// Maintenance
        maintenance_dollars,
        /// Repair
        repair_dollars,
        /// Insurance
        insurance_dollars,
        /// Time spent refueling
        refueling_dollars,
        /// Congestion
        congestion_dollars,
        /// Noise
        noise_dollars,
        /// Value of rebound driving
        drive_value_dollars,
    }
}

/// The fields which are paid when a vehicle is bought
pub const TECH_COST_FIELDS: [&str; 6] = [
    "vehicle_cost_dollars",
    "purchase_price_dollars",
    "purchase_credit_dollars",
    "battery_cost_dollars",
    "battery_credit_dollars",
    "sales_tax_dollars",
];

/// Costs of one vehicle in one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleCostEffects {
    /// The vehicle
    pub vehicle: Rc<Vehicle>,
    /// Calendar year
    pub calendar_year: u32,
    /// Age in years
    pub age: u32,
    /// Number of registered vehicles
    pub registered_count: f64,
    /// Miles per vehicle
    pub annual_vmt: f64,
    /// Odometer per vehicle
    pub odometer: f64,
    /// The costs
    pub costs: CostValues,
}

/// Tables used to calculate costs
#[derive(Debug, Clone, Copy)]
pub struct CostInputs<'a> {
    /// On-road fuels
    pub fuels: &'a OnroadFuels,
    /// The session's fuel prices
    pub prices: &'a FuelPrices<'a>,
    /// Operating and ownership costs
    pub tables: &'a VehicleCostTables,
    /// Congestion and noise costs per mile
    pub congestion_noise: &'a CongestionNoiseFactors,
    /// The session's battery offsets
    pub battery_offsets: &'a BatteryOffsets,
}

/// Calculates costs for one session, one calendar year at a time in ascending order
pub struct CostCalculator<'a> {
    inputs: CostInputs<'a>,
    cumulative_maintenance: HashMap<VehicleID, f64>,
    bev_refueling: HashMap<(OperatingVehicleType, u64), f64>,
}

impl<'a> CostCalculator<'a> {
    /// Create a calculator with no maintenance history
    pub fn new(inputs: CostInputs<'a>) -> Self {
        Self {
            inputs,
            cumulative_maintenance: HashMap::new(),
            bev_refueling: HashMap::new(),
        }
    }

    /// Costs of every adjusted row of one calendar year
    pub fn calc_for_year(&mut self, rows: &[AdjustedRow]) -> Result<Vec<VehicleCostEffects>> {
        rows.iter()
            .map(|row| {
                let costs = self
                    .calc_costs(row)
                    .with_context(|| format!("Could not cost vehicle {}", row.vehicle.id))?;
                Ok(VehicleCostEffects {
                    vehicle: row.vehicle.clone(),
                    calendar_year: row.calendar_year,
                    age: row.age,
                    registered_count: row.registered_count,
                    annual_vmt: row.annual_vmt,
                    odometer: row.odometer,
                    costs,
                })
            })
            .collect()
    }

    fn calc_costs(&mut self, row: &AdjustedRow) -> Result<CostValues> {
        let vehicle = &row.vehicle;
        let count = row.registered_count;
        let tables = self.inputs.tables;

        let fuel_use = FuelUse::new(vehicle, row.vmt, row.calendar_year, self.inputs.fuels)?;
        let fuel = fuel_use.cost(vehicle, row.calendar_year, self.inputs.prices)?;

        let mut costs = CostValues {
            fuel_retail_dollars: fuel.retail,
            fuel_pretax_dollars: fuel.pretax,
            fuel_taxes_dollars: fuel.retail - fuel.pretax,
            maintenance_dollars: self.maintenance_per_vehicle(row)? * count,
            repair_dollars: tables.repair.cost_per_mile(vehicle, row.age)? * row.vmt,
            refueling_dollars: self.refueling(vehicle, row.vmt, fuel_use.gallons())?,
            drive_value_dollars: 0.5
                * row.vmt_rebound
                * (row.fuel_cost_per_mile + row.context_fuel_cost_per_mile),
            ..Default::default()
        };

        let insurance = &tables.insurance_and_taxes;
        let vehicle_value =
            insurance.vehicle_value(vehicle.body_style, vehicle.price_dollars, row.age)?;
        let insurance_rate = insurance.rate(
            InsuranceItem::InsuranceRate,
            vehicle.body_style,
            vehicle_value,
            row.age,
        )?;
        costs.insurance_dollars = vehicle_value * insurance_rate * count;

        let congestion_noise = self
            .inputs
            .congestion_noise
            .get(&vehicle.reg_class_id)
            .with_context(|| {
                format!("No congestion and noise costs for {}", vehicle.reg_class_id)
            })?;
        costs.congestion_dollars = congestion_noise.congestion_dollars_per_mile * row.vmt;
        costs.noise_dollars = congestion_noise.noise_dollars_per_mile * row.vmt;

        if row.age == 0 {
            let sales_tax_rate = insurance.rate(
                InsuranceItem::SalesTaxRate,
                vehicle.body_style,
                vehicle.price_dollars,
                0,
            )?;
            costs.vehicle_cost_dollars = vehicle.new_vehicle_mfr_cost_dollars * count;
            costs.purchase_price_dollars = vehicle.price_dollars * count;
            costs.purchase_credit_dollars = vehicle.price_modification_dollars * count;
            costs.battery_cost_dollars = vehicle.battery_cost * count;
            costs.battery_credit_dollars =
                self.inputs.battery_offsets.credit_per_vehicle(vehicle) * count;
            costs.sales_tax_dollars = sales_tax_rate * vehicle.price_dollars * count;
        }

        Ok(costs)
    }

    /// This year's maintenance cost per vehicle.
    ///
    /// Without a record from the previous year, the vehicle is assumed to have reached the start
    /// of this year with `odometer − annual_vmt` miles.
    fn maintenance_per_vehicle(&mut self, row: &AdjustedRow) -> Result<f64> {
        let vehicle = &row.vehicle;
        let curve = self
            .inputs
            .tables
            .maintenance
            .get(&vehicle.fueling_class)
            .with_context(|| format!("No maintenance costs for {}", vehicle.fueling_class))?;
        let cumulative = curve.cumulative(row.odometer);
        let previous = self
            .cumulative_maintenance
            .insert(vehicle.id.clone(), cumulative)
            .unwrap_or_else(|| curve.cumulative((row.odometer - row.annual_vmt).max(0.0)));

        Ok(cumulative - previous)
    }

    fn refueling(&mut self, vehicle: &Vehicle, vmt: f64, gallons: f64) -> Result<f64> {
        let vehicle_type = vehicle.operating_vehicle_type();
        let refueling = &self.inputs.tables.refueling;
        if vehicle.fueling_class == FuelingClass::Bev {
            let range = vehicle.onroad_charge_depleting_range_mi;
            if range <= 0.0 {
                // Legacy BEVs carry no range
                return Ok(0.0);
            }
            let key = (vehicle_type, range.to_bits());
            let cost_per_mile = match self.bev_refueling.get(&key) {
                Some(cost_per_mile) => *cost_per_mile,
                None => {
                    let cost_per_mile = refueling.bev_cost_per_mile(vehicle_type, range)?;
                    self.bev_refueling.insert(key, cost_per_mile);
                    cost_per_mile
                }
            };
            Ok(cost_per_mile * vmt)
        } else {
            Ok(refueling.liquid_cost_per_gallon(vehicle_type)? * gallons)
        }
    }
}

//! Code for reading the vehicles and vehicle annual data files produced by the fleet simulation.
use super::*;
use crate::fleet::{
    BodyStyle, FuelingClass, InUseFuel, RegClass, Vehicle, VehicleAnnualRow, VehicleID, VehicleMap,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::rc::Rc;

/// Template for the vehicles file
pub const VEHICLES_TEMPLATE: Template = Template {
    name: "effects_vehicles",
    version: "0.1",
    columns: &[
        "vehicle_id",
        "model_year",
        "manufacturer_id",
        "name",
        "reg_class_id",
        "base_year_reg_class_id",
        "context_size_class",
        "body_style",
        "in_use_fuel_id",
        "market_class_id",
        "fueling_class",
        "base_year_powertrain_type",
        "footprint_ft2",
        "base_year_curbweight_lbs",
        "curbweight_lbs",
        "onroad_direct_co2e_grams_per_mile",
        "onroad_direct_kwh_per_mile",
        "new_vehicle_mfr_cost_dollars",
        "price_dollars",
        "price_modification_dollars",
        "battery_cost",
        "battery_kwh",
        "onroad_charge_depleting_range_mi",
    ],
};

/// Template for the vehicle annual data file
pub const VEHICLE_ANNUAL_DATA_TEMPLATE: Template = Template {
    name: "effects_vehicle_annual_data",
    version: "0.1",
    columns: &["vehicle_id", "calendar_year", "age", "registered_count", "vmt"],
};

#[derive(Debug, Deserialize, PartialEq)]
struct VehicleRaw {
    vehicle_id: String,
    model_year: u32,
    manufacturer_id: String,
    name: String,
    reg_class_id: RegClass,
    base_year_reg_class_id: String,
    context_size_class: String,
    body_style: BodyStyle,
    in_use_fuel_id: String,
    market_class_id: String,
    fueling_class: FuelingClass,
    base_year_powertrain_type: String,
    footprint_ft2: f64,
    base_year_curbweight_lbs: f64,
    curbweight_lbs: f64,
    onroad_direct_co2e_grams_per_mile: f64,
    onroad_direct_kwh_per_mile: f64,
    new_vehicle_mfr_cost_dollars: f64,
    price_dollars: f64,
    price_modification_dollars: f64,
    battery_cost: f64,
    battery_kwh: f64,
    onroad_charge_depleting_range_mi: f64,
}

impl VehicleRaw {
    fn into_vehicle(self) -> Result<Vehicle> {
        let in_use_fuel_id = InUseFuel::parse(&self.in_use_fuel_id)?;
        let vehicle = Vehicle {
            id: self.vehicle_id.into(),
            model_year: self.model_year,
            manufacturer_id: self.manufacturer_id,
            name: self.name,
            reg_class_id: self.reg_class_id,
            base_year_reg_class_id: self.base_year_reg_class_id,
            context_size_class: self.context_size_class,
            body_style: self.body_style,
            emission_fuel: in_use_fuel_id.emission_fuel()?,
            in_use_fuel_id,
            market_class_id: self.market_class_id,
            fueling_class: self.fueling_class,
            base_year_powertrain_type: self.base_year_powertrain_type,
            footprint_ft2: self.footprint_ft2,
            base_year_curbweight_lbs: self.base_year_curbweight_lbs,
            curbweight_lbs: self.curbweight_lbs,
            onroad_direct_co2e_grams_per_mile: self.onroad_direct_co2e_grams_per_mile,
            onroad_direct_kwh_per_mile: self.onroad_direct_kwh_per_mile,
            new_vehicle_mfr_cost_dollars: self.new_vehicle_mfr_cost_dollars,
            price_dollars: self.price_dollars,
            price_modification_dollars: self.price_modification_dollars,
            battery_cost: self.battery_cost,
            battery_kwh: self.battery_kwh,
            onroad_charge_depleting_range_mi: self.onroad_charge_depleting_range_mi,
            is_legacy: false,
        };
        vehicle.validate()?;

        Ok(vehicle)
    }
}

/// Read the vehicles file.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
///
/// # Returns
///
/// A map of vehicles, keyed by vehicle ID, in file order.
pub fn read_vehicles(file_path: &Path) -> Result<VehicleMap> {
    let vehicles_csv = read_csv::<VehicleRaw>(file_path, &VEHICLES_TEMPLATE)?;
    read_vehicles_from_iter(vehicles_csv.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_vehicles_from_iter<I>(iter: I) -> Result<VehicleMap>
where
    I: Iterator<Item = VehicleRaw>,
{
    let mut vehicles = VehicleMap::new();
    for raw in iter {
        let id = raw.vehicle_id.clone();
        let vehicle = raw
            .into_vehicle()
            .with_context(|| format!("Invalid vehicle {id}"))?;
        let id = vehicle.id.clone();
        ensure!(
            vehicles.insert(id.clone(), Rc::new(vehicle)).is_none(),
            "Duplicate vehicle ID: {id}"
        );
    }
    ensure!(!vehicles.is_empty(), "No vehicles found");

    Ok(vehicles)
}

/// Read the vehicle annual data file, checking it against the vehicles it refers to.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
/// * `vehicles` - The session's vehicles
pub fn read_vehicle_annual_data(
    file_path: &Path,
    vehicles: &VehicleMap,
) -> Result<Vec<VehicleAnnualRow>> {
    let rows = read_csv::<VehicleAnnualRow>(file_path, &VEHICLE_ANNUAL_DATA_TEMPLATE)?;
    check_vehicle_annual_data(&rows, vehicles).with_context(|| input_err_msg(file_path))?;

    Ok(rows)
}

fn check_vehicle_annual_data(rows: &[VehicleAnnualRow], vehicles: &VehicleMap) -> Result<()> {
    let mut seen: HashSet<(&VehicleID, u32)> = HashSet::new();
    for row in rows {
        let vehicle = vehicles
            .get(&row.vehicle_id)
            .with_context(|| format!("Unknown vehicle ID {}", row.vehicle_id))?;
        ensure!(
            row.calendar_year >= vehicle.model_year
                && row.age == row.calendar_year - vehicle.model_year,
            "Age {} of vehicle {} in {} does not match its model year {}",
            row.age,
            row.vehicle_id,
            row.calendar_year,
            vehicle.model_year
        );
        ensure!(
            row.registered_count >= 0.0 && row.vmt >= 0.0,
            "Negative registered_count or vmt for vehicle {} in {}",
            row.vehicle_id,
            row.calendar_year
        );
        ensure!(
            seen.insert((&row.vehicle_id, row.calendar_year)),
            "Duplicate entry for vehicle {} in {}",
            row.vehicle_id,
            row.calendar_year
        );
    }

    Ok(())
}

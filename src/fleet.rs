//! Vehicles and their per-year registration and travel.
use crate::id::define_id_type;
use anyhow::{Context, Result, bail, ensure};
use float_cmp::approx_eq;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::rc::Rc;
use strum::Display;

define_id_type! {VehicleID}

/// A map of vehicles, keyed by vehicle ID
pub type VehicleMap = IndexMap<VehicleID, Rc<Vehicle>>;

/// Regulatory class of a vehicle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegClass {
    /// Light-duty car
    Car,
    /// Light-duty truck
    Truck,
    /// Medium-duty vehicle
    Mediumduty,
}

/// Body style of a vehicle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BodyStyle {
    /// Sedans and wagons
    Sedan,
    /// Crossovers and sport utility vehicles
    CuvSuv,
    /// Pickup trucks
    Pickup,
}

/// Powertrain category of a vehicle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum FuelingClass {
    /// Internal combustion engine
    Ice,
    /// Hybrid electric
    Hev,
    /// Plug-in hybrid electric
    Phev,
    /// Battery electric
    Bev,
}

/// The fuel family determining which vehicle emission rates apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EmissionFuel {
    /// Gasoline, including gasoline/electric plug-in hybrids
    Gasoline,
    /// Diesel
    Diesel,
    /// Electricity only
    Electricity,
}

impl EmissionFuel {
    /// Identify the fuel family from a fuel name, e.g. `pump gasoline`
    pub fn from_fuel_name(name: &str) -> Option<Self> {
        if name.contains("diesel") {
            Some(Self::Diesel)
        } else if name.contains("gasoline") {
            Some(Self::Gasoline)
        } else if name.contains("electricity") {
            Some(Self::Electricity)
        } else {
            None
        }
    }
}

/// Vehicle category used for repair costs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RepairVehicleType {
    /// Cars
    Car,
    /// Light-duty pickups
    Truck,
    /// Other light-duty trucks
    Suv,
    /// Medium-duty pickups
    MdPickup,
    /// Other medium-duty vehicles
    MdVan,
}

/// Vehicle category used for refueling costs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperatingVehicleType {
    /// Sedans
    Car,
    /// Crossovers and SUVs
    Suv,
    /// Pickups
    Truck,
}

/// Partition of vehicles used to match rebound fuel cost per mile against the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum CostPerMileGroup {
    /// Battery electric vehicles
    #[strum(serialize = "BEV")]
    Bev,
    /// Everything else
    #[strum(serialize = "nonBEV")]
    NonBev,
}

/// The fuels used by a vehicle and the share of travel on each
#[derive(Debug, Clone, PartialEq)]
pub struct InUseFuel(Vec<(String, f64)>);

impl InUseFuel {
    /// Parse a literal such as `{'pump gasoline': 0.4, 'US electricity': 0.6}`.
    ///
    /// Shares must be positive and sum to one.
    pub fn parse(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .with_context(|| format!("Invalid fuel share literal: {s}"))?;

        let mut shares = Vec::new();
        for item in inner.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (name, share) = item
                .rsplit_once(':')
                .with_context(|| format!("Invalid fuel share entry: {item}"))?;
            let name = name.trim().trim_matches(|c: char| c == '\'' || c == '"').trim();
            ensure!(!name.is_empty(), "Empty fuel name in {s}");
            let share: f64 = share
                .trim()
                .parse()
                .with_context(|| format!("Invalid fuel share in {s}"))?;
            ensure!(share > 0.0, "Fuel shares must be positive: {s}");
            shares.push((name.to_string(), share));
        }

        ensure!(!shares.is_empty(), "No fuels given: {s}");
        let total: f64 = shares.iter().map(|(_, share)| share).sum();
        ensure!(
            approx_eq!(f64, total, 1.0, epsilon = 1e-6),
            "Fuel shares must sum to one: {s}"
        );

        Ok(Self(shares))
    }

    /// A single fuel used for all travel
    pub fn single(name: &str) -> Self {
        Self(vec![(name.to_string(), 1.0)])
    }

    /// Iterate over fuel names and shares
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, share)| (name.as_str(), *share))
    }

    /// Iterate over the liquid (non-electric) fuels and their shares
    pub fn liquid_fuels(&self) -> impl Iterator<Item = (&str, f64)> {
        self.iter()
            .filter(|(name, _)| !name.contains("electricity"))
    }

    /// The electric fuel, if any
    pub fn electric_fuel(&self) -> Option<&str> {
        self.iter()
            .map(|(name, _)| name)
            .find(|name| name.contains("electricity"))
    }

    /// Whether any fuel is electricity
    pub fn uses_electricity(&self) -> bool {
        self.electric_fuel().is_some()
    }

    /// The fuel with the greatest share (the first listed in case of a tie)
    pub fn primary_fuel(&self) -> &str {
        self.0
            .iter()
            .fold(None::<&(String, f64)>, |best, item| match best {
                Some(best) if best.1 >= item.1 => Some(best),
                _ => Some(item),
            })
            .map(|(name, _)| name.as_str())
            .unwrap_or_default()
    }

    /// Which vehicle emission rates apply. Diesel takes precedence over gasoline, which takes
    /// precedence over electricity.
    pub fn emission_fuel(&self) -> Result<EmissionFuel> {
        let families: Vec<EmissionFuel> = self
            .iter()
            .filter_map(|(name, _)| EmissionFuel::from_fuel_name(name))
            .collect();
        for family in [
            EmissionFuel::Diesel,
            EmissionFuel::Gasoline,
            EmissionFuel::Electricity,
        ] {
            if families.contains(&family) {
                return Ok(family);
            }
        }

        bail!("Cannot determine emission fuel for {self}")
    }
}

impl fmt::Display for InUseFuel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (name, share)) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{name}': {share:?}")?;
        }
        write!(f, "}}")
    }
}

/// A vehicle from the compliance fleet, or a synthesised legacy fleet vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    /// Unique identifier
    pub id: VehicleID,
    /// Model year
    pub model_year: u32,
    /// Manufacturer
    pub manufacturer_id: String,
    /// Descriptive name
    pub name: String,
    /// Regulatory class
    pub reg_class_id: RegClass,
    /// Regulatory class in the base year fleet
    pub base_year_reg_class_id: String,
    /// Size class used to match against the context session
    pub context_size_class: String,
    /// Body style
    pub body_style: BodyStyle,
    /// Fuels used on the road
    pub in_use_fuel_id: InUseFuel,
    /// Market class
    pub market_class_id: String,
    /// Powertrain category
    pub fueling_class: FuelingClass,
    /// Powertrain type in the base year fleet
    pub base_year_powertrain_type: String,
    /// Footprint in square feet
    pub footprint_ft2: f64,
    /// Curb weight of the base year vehicle this vehicle derives from
    pub base_year_curbweight_lbs: f64,
    /// Curb weight
    pub curbweight_lbs: f64,
    /// On-road direct CO2e emissions
    pub onroad_direct_co2e_grams_per_mile: f64,
    /// On-road direct electricity consumption
    pub onroad_direct_kwh_per_mile: f64,
    /// Manufacturer cost of producing the vehicle
    pub new_vehicle_mfr_cost_dollars: f64,
    /// Purchase price
    pub price_dollars: f64,
    /// Purchase incentives or other price modifications
    pub price_modification_dollars: f64,
    /// Battery cost
    pub battery_cost: f64,
    /// Battery capacity
    pub battery_kwh: f64,
    /// On-road range in charge depleting mode
    pub onroad_charge_depleting_range_mi: f64,
    /// Emission rate family, derived from the in-use fuel
    pub emission_fuel: EmissionFuel,
    /// Whether the vehicle is part of the legacy fleet
    pub is_legacy: bool,
}

impl Vehicle {
    /// Check invariants which hold for every vehicle
    pub fn validate(&self) -> Result<()> {
        if self.fueling_class == FuelingClass::Bev {
            ensure!(
                self.onroad_direct_kwh_per_mile > 0.0,
                "BEV {} must have positive onroad_direct_kwh_per_mile",
                self.id
            );
            ensure!(
                self.in_use_fuel_id.uses_electricity(),
                "BEV {} must use an electricity fuel",
                self.id
            );
        }

        Ok(())
    }

    /// The MOVES source type used to look up vehicle emission rates
    pub fn sourcetype(&self) -> &'static str {
        match (self.reg_class_id, self.body_style) {
            (RegClass::Car, _) => "passenger car",
            (RegClass::Mediumduty, BodyStyle::Pickup) => "light commercial truck",
            (RegClass::Truck | RegClass::Mediumduty, _) => "passenger truck",
        }
    }

    /// Vehicle category for repair costs
    pub fn repair_vehicle_type(&self) -> RepairVehicleType {
        let is_pickup = self.name.to_lowercase().contains("pickup");
        match self.reg_class_id {
            RegClass::Car => RepairVehicleType::Car,
            RegClass::Mediumduty if is_pickup => RepairVehicleType::MdPickup,
            RegClass::Mediumduty => RepairVehicleType::MdVan,
            RegClass::Truck if is_pickup => RepairVehicleType::Truck,
            RegClass::Truck => RepairVehicleType::Suv,
        }
    }

    /// Vehicle category for refueling costs
    pub fn operating_vehicle_type(&self) -> OperatingVehicleType {
        match self.body_style {
            BodyStyle::Sedan => OperatingVehicleType::Car,
            BodyStyle::CuvSuv => OperatingVehicleType::Suv,
            BodyStyle::Pickup => OperatingVehicleType::Truck,
        }
    }

    /// The rebound matching group
    pub fn cost_per_mile_group(&self) -> CostPerMileGroup {
        if self.fueling_class == FuelingClass::Bev {
            CostPerMileGroup::Bev
        } else {
            CostPerMileGroup::NonBev
        }
    }
}

/// Registration and travel of one vehicle in one calendar year, as produced by the fleet
/// simulation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VehicleAnnualRow {
    /// The vehicle
    pub vehicle_id: VehicleID,
    /// Calendar year
    pub calendar_year: u32,
    /// Age in years
    pub age: u32,
    /// Number of registered vehicles
    pub registered_count: f64,
    /// Total miles travelled by all registered vehicles
    pub vmt: f64,
}

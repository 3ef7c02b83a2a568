//! Emission rates for vehicles, electricity generating units (EGUs) and refineries.
use crate::fleet::{EmissionFuel, RegClass, Vehicle};
use crate::rates::{Interpolate, StartYearMap, YearSeries, interpolate_between};
use crate::values::{PollutantValues, ValueFields};
use anyhow::{Context, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Vehicle emission rates are not extrapolated beyond this age
pub const MAX_RATE_AGE: u32 = 30;

/// Rate names for gasoline vehicles, in output order
pub const GASOLINE_RATE_NAMES: [&str; 32] = [
    "pm25_exhaust_grams_per_mile",
    "nmog_exhaust_grams_per_mile",
    "acetaldehyde_exhaust_grams_per_mile",
    "acrolein_exhaust_grams_per_mile",
    "benzene_exhaust_grams_per_mile",
    "13_butadiene_exhaust_grams_per_mile",
    "ethylbenzene_exhaust_grams_per_mile",
    "formaldehyde_exhaust_grams_per_mile",
    "naphthalene_exhaust_grams_per_mile",
    "15pah_exhaust_grams_per_mile",
    "co_exhaust_grams_per_mile",
    "nox_exhaust_grams_per_mile",
    "ch4_exhaust_grams_per_mile",
    "n2o_exhaust_grams_per_mile",
    "pm25_brakewear_grams_per_mile",
    "pm25_tirewear_grams_per_mile",
    "nmog_evap_permeation_grams_per_gallon",
    "nmog_evap_fuel_vapor_venting_grams_per_gallon",
    "nmog_evap_fuel_leaks_grams_per_gallon",
    "nmog_refueling_displacement_grams_per_gallon",
    "nmog_refueling_spillage_grams_per_gallon",
    "benzene_evap_permeation_grams_per_gallon",
    "benzene_evap_fuel_vapor_venting_grams_per_gallon",
    "benzene_evap_fuel_leaks_grams_per_gallon",
    "benzene_refueling_displacement_grams_per_gallon",
    "benzene_refueling_spillage_grams_per_gallon",
    "ethylbenzene_evap_permeation_grams_per_gallon",
    "ethylbenzene_evap_fuel_vapor_venting_grams_per_gallon",
    "ethylbenzene_evap_fuel_leaks_grams_per_gallon",
    "ethylbenzene_refueling_displacement_grams_per_gallon",
    "ethylbenzene_refueling_spillage_grams_per_gallon",
    "sox_exhaust_grams_per_gallon",
];

/// Rate names for diesel vehicles, in output order
pub const DIESEL_RATE_NAMES: [&str; 21] = [
    "pm25_exhaust_grams_per_mile",
    "nmog_exhaust_grams_per_mile",
    "acetaldehyde_exhaust_grams_per_mile",
    "acrolein_exhaust_grams_per_mile",
    "benzene_exhaust_grams_per_mile",
    "13_butadiene_exhaust_grams_per_mile",
    "ethylbenzene_exhaust_grams_per_mile",
    "formaldehyde_exhaust_grams_per_mile",
    "naphthalene_exhaust_grams_per_mile",
    "15pah_exhaust_grams_per_mile",
    "co_exhaust_grams_per_mile",
    "nox_exhaust_grams_per_mile",
    "ch4_exhaust_grams_per_mile",
    "n2o_exhaust_grams_per_mile",
    "pm25_brakewear_grams_per_mile",
    "pm25_tirewear_grams_per_mile",
    "nmog_refueling_spillage_grams_per_gallon",
    "benzene_refueling_spillage_grams_per_gallon",
    "ethylbenzene_refueling_spillage_grams_per_gallon",
    "naphthalene_refueling_spillage_grams_per_gallon",
    "sox_exhaust_grams_per_gallon",
];

/// Rate names for battery electric vehicles, in output order
pub const ELECTRICITY_RATE_NAMES: [&str; 2] = [
    "pm25_brakewear_grams_per_mile",
    "pm25_tirewear_grams_per_mile",
];

/// The rate names used for a fuel family
pub fn rate_names(fuel: EmissionFuel) -> &'static [&'static str] {
    match fuel {
        EmissionFuel::Gasoline => &GASOLINE_RATE_NAMES,
        EmissionFuel::Diesel => &DIESEL_RATE_NAMES,
        EmissionFuel::Electricity => &ELECTRICITY_RATE_NAMES,
    }
}

/// Whether `name` is used by any fuel family
pub fn is_known_rate_name(name: &str) -> bool {
    GASOLINE_RATE_NAMES.contains(&name) || DIESEL_RATE_NAMES.contains(&name)
}

/// The quantity a vehicle emission rate is multiplied by
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateBasis {
    /// Grams per mile travelled
    PerMile,
    /// Grams per gallon of fuel consumed
    PerGallon,
}

/// The pollutant species and basis of a vehicle emission rate name
pub fn rate_species(name: &str) -> Option<(&'static str, RateBasis)> {
    let basis = if name.ends_with("_grams_per_mile") {
        RateBasis::PerMile
    } else if name.ends_with("_grams_per_gallon") {
        RateBasis::PerGallon
    } else {
        return None;
    };

    let species = match name.split('_').next()? {
        "pm25" => "pm25",
        "nmog" => "voc",
        "acetaldehyde" => "acetaldehyde",
        "acrolein" => "acrolein",
        "benzene" => "benzene",
        "13" => "butadiene13",
        "ethylbenzene" => "ethylbenzene",
        "formaldehyde" => "formaldehyde",
        "naphthalene" => "naphthalene",
        "15pah" => "pah15",
        "co" => "co",
        "nox" => "nox",
        "ch4" => "ch4",
        "n2o" => "n2o",
        "sox" => "sox",
        _ => return None,
    };

    Some((species, basis))
}

/// How one vehicle emission rate varies with age
#[derive(Debug, Clone, PartialEq)]
pub enum RateCurve {
    /// `slope * age + intercept`
    Linear {
        /// Change in rate per year of age
        slope: f64,
        /// Rate at age zero
        intercept: f64,
    },
    /// A rate for each tabulated age. Ages beyond the table use the nearest tabulated age.
    ByAge(BTreeMap<u32, f64>),
}

impl RateCurve {
    /// The rate at `age`
    pub fn value(&self, age: u32) -> f64 {
        match self {
            Self::Linear { slope, intercept } => slope * f64::from(age) + intercept,
            Self::ByAge(values) => values
                .range(..=age)
                .next_back()
                .or_else(|| values.iter().next())
                .map(|(_, value)| *value)
                .unwrap_or_default(),
        }
    }
}

/// The rates for one source type, regulatory class and fuel from a start year on, keyed by rate
/// name
pub type RateCurves = HashMap<String, RateCurve>;

/// Identifies a rate table
pub type VehicleRateTableKey = (String, RegClass, EmissionFuel);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct VehicleRateCacheKey {
    sourcetype: &'static str,
    reg_class: RegClass,
    fuel: EmissionFuel,
    model_year: u32,
    age: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedRates {
    start_year: u32,
    values: Rc<[f64]>,
}

/// A resolved vehicle emission rate lookup, for the rate details output
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleRateDetail {
    /// Start year of the rates used
    pub start_year: u32,
    /// Model year of the vehicle
    pub model_year: u32,
    /// MOVES source type
    pub sourcetype: &'static str,
    /// Regulatory class
    pub reg_class: RegClass,
    /// Fuel family
    pub fuel: EmissionFuel,
    /// Age used for the lookup, after capping
    pub age: u32,
    /// Rates in the order given by [`rate_names`]
    pub values: Rc<[f64]>,
}

/// Vehicle emission rates for one session, with a cache of resolved lookups
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleEmissionRates {
    tables: HashMap<VehicleRateTableKey, StartYearMap<RateCurves>>,
    cache: HashMap<VehicleRateCacheKey, ResolvedRates>,
}

impl VehicleEmissionRates {
    /// Create a new [`VehicleEmissionRates`] with an empty cache
    pub fn new(tables: HashMap<VehicleRateTableKey, StartYearMap<RateCurves>>) -> Self {
        Self {
            tables,
            cache: HashMap::new(),
        }
    }

    /// The emission rates of `vehicle` at `age`, in the order given by [`rate_names`].
    ///
    /// Rates are taken from the greatest start year not after the model year. Ages are capped at
    /// [`MAX_RATE_AGE`].
    pub fn get(&mut self, vehicle: &Vehicle, age: u32) -> Result<Rc<[f64]>> {
        let key = VehicleRateCacheKey {
            sourcetype: vehicle.sourcetype(),
            reg_class: vehicle.reg_class_id,
            fuel: vehicle.emission_fuel,
            model_year: vehicle.model_year,
            age: age.min(MAX_RATE_AGE),
        };
        if let Some(resolved) = self.cache.get(&key) {
            return Ok(resolved.values.clone());
        }

        let table = self
            .tables
            .get(&(key.sourcetype.to_string(), key.reg_class, key.fuel))
            .with_context(|| {
                format!(
                    "No emission rates for sourcetype '{}', reg class {}, fuel {}",
                    key.sourcetype, key.reg_class, key.fuel
                )
            })?;
        let start_year = table.start_year_for(key.model_year);
        let curves = table.get(key.model_year);
        let values: Rc<[f64]> = rate_names(key.fuel)
            .iter()
            .map(|name| curves.get(*name).map_or(0.0, |curve| curve.value(key.age)))
            .collect();

        self.cache.insert(
            key,
            ResolvedRates {
                start_year,
                values: values.clone(),
            },
        );

        Ok(values)
    }

    /// The number of resolved lookups held in the cache
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Every resolved lookup, sorted by key
    pub fn details(&self) -> Vec<VehicleRateDetail> {
        let mut keys: Vec<&VehicleRateCacheKey> = self.cache.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let resolved = &self.cache[key];
                VehicleRateDetail {
                    start_year: resolved.start_year,
                    model_year: key.model_year,
                    sourcetype: key.sourcetype,
                    reg_class: key.reg_class,
                    fuel: key.fuel,
                    age: key.age,
                    values: resolved.values.clone(),
                }
            })
            .collect()
    }
}

/// Generation and emission rates of one EGU case
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EguCase {
    /// Total US electricity generation in the case
    pub kwh_generation_us: f64,
    /// Emission rates in grams per kWh generated
    pub grams_per_kwh: PollutantValues,
}

/// The low and high demand EGU cases for a calendar year
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EguCases {
    /// Low electricity demand case
    pub low_demand: EguCase,
    /// High electricity demand case
    pub high_demand: EguCase,
}

impl Interpolate for EguCases {
    fn lerp(lower: &Self, upper: &Self, t: f64) -> Self {
        let lerp_case = |lower: &EguCase, upper: &EguCase| EguCase {
            kwh_generation_us: f64::lerp(&lower.kwh_generation_us, &upper.kwh_generation_us, t),
            grams_per_kwh: PollutantValues::lerp(&lower.grams_per_kwh, &upper.grams_per_kwh, t),
        };

        Self {
            low_demand: lerp_case(&lower.low_demand, &upper.low_demand),
            high_demand: lerp_case(&lower.high_demand, &upper.high_demand),
        }
    }
}

/// EGU rates resolved for a session's electricity generation in one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct EguRateDetail {
    /// Calendar year
    pub calendar_year: u32,
    /// Electricity generated for the session's fleet
    pub session_kwh_generation: f64,
    /// Generation in the low demand case
    pub low_demand_kwh_generation: f64,
    /// Generation in the high demand case
    pub high_demand_kwh_generation: f64,
    /// Interpolated rates in grams per kWh
    pub grams_per_kwh: PollutantValues,
}

/// EGU emission rates for every calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct EguRates {
    cases: YearSeries<EguCases>,
}

impl EguRates {
    /// Create a new [`EguRates`] table
    pub fn new(cases: YearSeries<EguCases>) -> Self {
        Self { cases }
    }

    /// Rates for a fleet requiring `kwh_generation` in `calendar_year`.
    ///
    /// Each rate is interpolated between the two cases according to where the fleet's generation
    /// lies between theirs. A negative result is replaced by the mean of the two case rates.
    pub fn rates_for(&self, calendar_year: u32, kwh_generation: f64) -> EguRateDetail {
        let cases = self.cases.get(calendar_year);
        let (low, high) = (&cases.low_demand, &cases.high_demand);
        let values = low
            .grams_per_kwh
            .values()
            .into_iter()
            .zip(high.grams_per_kwh.values())
            .zip(PollutantValues::FIELD_NAMES)
            .map(|((low_rate, high_rate), species)| {
                let rate = interpolate_between(
                    kwh_generation,
                    (low.kwh_generation_us, low_rate),
                    (high.kwh_generation_us, high_rate),
                );
                if rate < 0.0 {
                    debug!("Negative {species} EGU rate in {calendar_year}, using mean of cases");
                    0.5 * (low_rate + high_rate)
                } else {
                    rate
                }
            })
            .collect::<Vec<_>>();

        EguRateDetail {
            calendar_year,
            session_kwh_generation: kwh_generation,
            low_demand_kwh_generation: low.kwh_generation_us,
            high_demand_kwh_generation: high.kwh_generation_us,
            grams_per_kwh: PollutantValues::from_values(&values),
        }
    }
}

/// The type of fuel produced by a refinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefineryFuel {
    /// Gasoline
    Gasoline,
    /// Diesel
    Diesel,
}

impl RefineryFuel {
    /// The label used in input and output files
    pub fn label(self) -> &'static str {
        match self {
            Self::Gasoline => "gasoline",
            Self::Diesel => "diesel",
        }
    }
}

/// Refinery emission rates in grams per gallon for every calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct RefineryRates {
    gasoline: YearSeries<PollutantValues>,
    diesel: YearSeries<PollutantValues>,
}

impl RefineryRates {
    /// Create a new [`RefineryRates`] table
    pub fn new(gasoline: YearSeries<PollutantValues>, diesel: YearSeries<PollutantValues>) -> Self {
        Self { gasoline, diesel }
    }

    /// The rates for a fuel in `calendar_year`
    pub fn get(&self, fuel: RefineryFuel, calendar_year: u32) -> &PollutantValues {
        match fuel {
            RefineryFuel::Gasoline => self.gasoline.get(calendar_year),
            RefineryFuel::Diesel => self.diesel.get(calendar_year),
        }
    }

    /// Every year of the dense table for both fuels
    pub fn iter(&self) -> impl Iterator<Item = (u32, RefineryFuel, &PollutantValues)> {
        let gasoline = self
            .gasoline
            .iter()
            .map(|(year, rates)| (year, RefineryFuel::Gasoline, rates));
        let diesel = self
            .diesel
            .iter()
            .map(|(year, rates)| (year, RefineryFuel::Diesel, rates));
        gasoline.chain(diesel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{bev, egu_rates, vehicle, vehicle_emission_rates};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[test]
    fn test_rate_name_counts() {
        assert_eq!(rate_names(EmissionFuel::Gasoline).len(), 32);
        assert_eq!(rate_names(EmissionFuel::Diesel).len(), 21);
        assert_eq!(rate_names(EmissionFuel::Electricity).len(), 2);
    }

    #[test]
    fn test_every_rate_name_has_species() {
        for name in GASOLINE_RATE_NAMES.iter().chain(&DIESEL_RATE_NAMES) {
            assert!(rate_species(name).is_some(), "{name}");
        }
    }

    #[rstest]
    #[case("13_butadiene_exhaust_grams_per_mile", "butadiene13", RateBasis::PerMile)]
    #[case("nmog_refueling_spillage_grams_per_gallon", "voc", RateBasis::PerGallon)]
    #[case("ethylbenzene_exhaust_grams_per_mile", "ethylbenzene", RateBasis::PerMile)]
    fn test_rate_species(
        #[case] name: &str,
        #[case] species: &str,
        #[case] basis: RateBasis,
    ) {
        assert_eq!(rate_species(name), Some((species, basis)));
    }

    #[test]
    fn test_rate_curve() {
        let linear = RateCurve::Linear {
            slope: 0.01,
            intercept: 0.1,
        };
        assert_approx_eq!(f64, linear.value(10), 0.2);

        let by_age = RateCurve::ByAge(BTreeMap::from([(0, 1.0), (5, 2.0)]));
        assert_eq!(by_age.value(3), 1.0);
        assert_eq!(by_age.value(40), 2.0);
    }

    #[rstest]
    fn test_vehicle_rates_cached(mut vehicle_emission_rates: VehicleEmissionRates, vehicle: Vehicle) {
        let rates = vehicle_emission_rates.get(&vehicle, 0).unwrap();
        assert_eq!(rates.len(), 32);
        // nox_exhaust_grams_per_mile = 0.001 * age + 0.01
        assert_approx_eq!(f64, rates[11], 0.01);

        // Ages past the cap share a cache entry
        vehicle_emission_rates.get(&vehicle, 31).unwrap();
        let capped = vehicle_emission_rates.get(&vehicle, 45).unwrap();
        assert_approx_eq!(f64, capped[11], 0.04);
        assert_eq!(vehicle_emission_rates.cache_len(), 2);

        let details = vehicle_emission_rates.details();
        assert_eq!(details[0].age, 0);
        assert_eq!(details[1].age, MAX_RATE_AGE);
    }

    #[rstest]
    fn test_vehicle_rates_bev(mut vehicle_emission_rates: VehicleEmissionRates, bev: Vehicle) {
        let rates = vehicle_emission_rates.get(&bev, 2).unwrap();
        assert_eq!(rates.len(), 2);
    }

    #[rstest]
    fn test_vehicle_rates_missing_table(
        mut vehicle_emission_rates: VehicleEmissionRates,
        mut vehicle: Vehicle,
    ) {
        vehicle.reg_class_id = RegClass::Mediumduty;
        assert!(vehicle_emission_rates.get(&vehicle, 0).is_err());
    }

    #[rstest]
    fn test_egu_rates_interpolated(egu_rates: EguRates) {
        // Cases: low 1000 kWh at 0.5 g/kWh NOx, high 2000 kWh at 0.3 g/kWh NOx
        let detail = egu_rates.rates_for(2025, 1500.0);
        assert_approx_eq!(f64, detail.grams_per_kwh.nox, 0.4);
        assert_eq!(detail.low_demand_kwh_generation, 1000.0);
    }

    #[rstest]
    fn test_egu_negative_rate_uses_mean(egu_rates: EguRates) {
        // Extrapolating far past the high case would make NOx negative
        let detail = egu_rates.rates_for(2025, 10000.0);
        assert_approx_eq!(f64, detail.grams_per_kwh.nox, 0.4);
    }
}

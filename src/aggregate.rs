//! Aggregation of per-vehicle effects by calendar year and by model year.
use crate::fleet::{BodyStyle, FuelingClass, InUseFuel, RegClass, Vehicle};
use crate::physical::{
    PhysicalEffects, PhysicalTotals, UpstreamInputs, VehiclePhysicalEffects,
    apply_action_upstream, apply_no_action_upstream,
};
use crate::values::ValueFields;
use anyhow::Result;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;

/// Key of calendar year aggregates. Ordered by calendar year first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnualKey {
    /// Calendar year
    pub calendar_year: u32,
    /// Regulatory class
    pub reg_class_id: RegClass,
    /// In-use fuel, as written in input files
    pub in_use_fuel_id: String,
    /// Fueling class
    pub fueling_class: FuelingClass,
}

/// An [`AnnualKey`] without its calendar year
pub type AnnualGroup = (RegClass, String, FuelingClass);

impl AnnualKey {
    /// Names of the key columns in output files
    pub const COLUMNS: [&'static str; 4] =
        ["calendar_year", "reg_class_id", "in_use_fuel_id", "fueling_class"];

    /// The key of `vehicle` in `calendar_year`
    pub fn new(vehicle: &Vehicle, calendar_year: u32) -> Self {
        Self {
            calendar_year,
            reg_class_id: vehicle.reg_class_id,
            in_use_fuel_id: vehicle.in_use_fuel_id.to_string(),
            fueling_class: vehicle.fueling_class,
        }
    }

    /// The key fields other than calendar year
    pub fn group(&self) -> AnnualGroup {
        (
            self.reg_class_id,
            self.in_use_fuel_id.clone(),
            self.fueling_class,
        )
    }

    /// Source ID of criteria pollutant cost factors for on-road emissions, e.g. `car pump gasoline`
    pub fn vehicle_source_id(&self) -> Result<String> {
        let fuel = InUseFuel::parse(&self.in_use_fuel_id)?;
        Ok(format!("{} {}", self.reg_class_id, fuel.primary_fuel()))
    }

    /// Key values in [`AnnualKey::COLUMNS`] order
    pub fn fields(&self) -> Vec<String> {
        vec![
            self.calendar_year.to_string(),
            self.reg_class_id.to_string(),
            self.in_use_fuel_id.clone(),
            self.fueling_class.to_string(),
        ]
    }
}

/// Values keyed by calendar year, regulatory class, fuel and fueling class
pub type AnnualTable<T> = BTreeMap<AnnualKey, T>;

/// Key of model year aggregates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelYearKey {
    /// Model year
    pub model_year: u32,
    /// Body style
    pub body_style: BodyStyle,
    /// In-use fuel, as written in input files
    pub in_use_fuel_id: String,
    /// Fueling class, if model years are broken down by powertrain
    pub fueling_class: Option<FuelingClass>,
}

impl ModelYearKey {
    /// Names of the key columns in output files
    pub const COLUMNS: [&'static str; 4] =
        ["model_year", "body_style", "in_use_fuel_id", "fueling_class"];

    /// The key of `vehicle`
    pub fn new(vehicle: &Vehicle, include_fueling_class: bool) -> Self {
        Self {
            model_year: vehicle.model_year,
            body_style: vehicle.body_style,
            in_use_fuel_id: vehicle.in_use_fuel_id.to_string(),
            fueling_class: include_fueling_class.then_some(vehicle.fueling_class),
        }
    }

    /// Key values in [`ModelYearKey::COLUMNS`] order. An absent fueling class is written `all`.
    pub fn fields(&self) -> Vec<String> {
        vec![
            self.model_year.to_string(),
            self.body_style.to_string(),
            self.in_use_fuel_id.clone(),
            self.fueling_class
                .map_or_else(|| "all".to_string(), |class| class.to_string()),
        ]
    }
}

/// Sum values sharing a key
pub fn sum_by_key<K, T, I>(items: I) -> BTreeMap<K, T>
where
    K: Ord,
    T: Default + AddAssign,
    I: IntoIterator<Item = (K, T)>,
{
    let mut table: BTreeMap<K, T> = BTreeMap::new();
    for (key, value) in items {
        *table.entry(key).or_default() += value;
    }
    table
}

/// Every key present in either table
pub fn union_keys<K: Ord + Clone, A, B>(
    first: &BTreeMap<K, A>,
    second: &BTreeMap<K, B>,
) -> BTreeSet<K> {
    let keys: BTreeSet<K> = first.keys().chain(second.keys()).cloned().collect();
    if keys.len() != first.len() || keys.len() != second.len() {
        debug!(
            "Pairing {} keys with {} keys over {} keys, missing values are zero",
            first.len(),
            second.len(),
            keys.len()
        );
    }

    keys
}

/// Fill in refinery inventories and oil use of annual physical effects.
///
/// Each action key is paired with the matching no-action key. Keys only present in the
/// no-action table are added to the action table so their upstream changes are counted.
pub fn apply_upstream<'a, I>(
    no_action: &mut AnnualTable<PhysicalEffects>,
    actions: I,
    inputs: UpstreamInputs,
) where
    I: IntoIterator<Item = &'a mut AnnualTable<PhysicalEffects>>,
{
    for (key, effects) in no_action.iter_mut() {
        apply_no_action_upstream(key.calendar_year, effects, inputs);
    }

    for action in actions {
        for key in no_action.keys() {
            action.entry(key.clone()).or_default();
        }
        for (key, effects) in action.iter_mut() {
            let no_action_totals = no_action
                .get(key)
                .map(|effects| effects.totals)
                .unwrap_or_default();
            apply_action_upstream(key.calendar_year, effects, &no_action_totals, inputs);
        }
    }
}

/// Share the refinery inventories and oil use of each annual key out among its vehicles.
///
/// Vehicles sharing a key share a fuel mix, so each takes its share of the key's liquid fuel.
/// Keys without liquid fuel use are shared by registered count.
pub fn allocate_upstream(
    effects: &mut [VehiclePhysicalEffects],
    annual: &AnnualTable<PhysicalEffects>,
) {
    let weights: AnnualTable<PhysicalTotals> = sum_by_key(effects.iter().map(|row| {
        (
            AnnualKey::new(&row.vehicle, row.calendar_year),
            row.effects.totals,
        )
    }));

    for row in effects {
        let key = AnnualKey::new(&row.vehicle, row.calendar_year);
        let (Some(key_effects), Some(key_totals)) = (annual.get(&key), weights.get(&key)) else {
            continue;
        };
        let share = if key_totals.fuel_consumption_gallons > 0.0 {
            row.effects.totals.fuel_consumption_gallons / key_totals.fuel_consumption_gallons
        } else if key_totals.registered_count > 0.0 {
            row.effects.totals.registered_count / key_totals.registered_count
        } else {
            0.0
        };

        let from = &key_effects.totals;
        let totals = &mut row.effects.totals;
        totals.refined_gasoline_gallons = from.refined_gasoline_gallons * share;
        totals.refined_diesel_gallons = from.refined_diesel_gallons * share;
        totals.barrels_of_oil = from.barrels_of_oil * share;
        totals.imported_oil_bbl_change = from.imported_oil_bbl_change * share;
        row.effects.refinery = key_effects.refinery.scaled(share);
    }
}

/// Action minus no-action effects over the union of keys. A missing side counts as zero.
pub fn physical_deltas(
    no_action: &AnnualTable<PhysicalEffects>,
    action: &AnnualTable<PhysicalEffects>,
) -> AnnualTable<PhysicalEffects> {
    union_keys(no_action, action)
        .into_iter()
        .map(|key| {
            let a = action.get(&key).copied().unwrap_or_default();
            let na = no_action.get(&key).copied().unwrap_or_default();
            (key, a - na)
        })
        .collect()
}

/// Physical effects of each model year over its first `years` years.
///
/// Only model years from `first_year` whose whole period ends by `last_year` are included.
/// Legacy vehicles are never included.
pub fn model_year_physical(
    effects: &[VehiclePhysicalEffects],
    years: u32,
    first_year: u32,
    last_year: u32,
    include_fueling_class: bool,
) -> BTreeMap<ModelYearKey, PhysicalEffects> {
    sum_by_key(
        effects
            .iter()
            .filter(|row| {
                let vehicle = &row.vehicle;
                !vehicle.is_legacy
                    && vehicle.model_year >= first_year
                    && vehicle.model_year + years <= last_year + 1
                    && row.age < years
            })
            .map(|row| {
                (
                    ModelYearKey::new(&row.vehicle, include_fueling_class),
                    row.effects,
                )
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost_factors::EnergySecurityFactors;
    use crate::emission_rates::RefineryRates;
    use crate::fixture::{bev, energy_security, general_inputs, refinery_rates, vehicle};
    use float_cmp::assert_approx_eq;
    use std::rc::Rc;
    use crate::input::general::GeneralInputs;
    use crate::rates::YearSeries;
    use crate::safety::SafetyTotals;
    use rstest::rstest;

    fn gallons(gallons: f64) -> PhysicalEffects {
        PhysicalEffects {
            totals: PhysicalTotals {
                fuel_consumption_gallons: gallons,
                gasoline_gallons: gallons,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[rstest]
    fn test_annual_key(vehicle: Vehicle, bev: Vehicle) {
        let key = AnnualKey::new(&vehicle, 2030);
        assert_eq!(key.fields()[0], "2030");
        assert_eq!(key.vehicle_source_id().unwrap(), "car pump gasoline");
        assert!(AnnualKey::new(&vehicle, 2029) < AnnualKey::new(&bev, 2030));
    }

    #[rstest]
    fn test_model_year_key_without_powertrain(vehicle: Vehicle) {
        let key = ModelYearKey::new(&vehicle, false);
        assert_eq!(key.fields()[3], "all");
        assert_eq!(
            ModelYearKey::new(&vehicle, true).fields()[3],
            vehicle.fueling_class.to_string()
        );
    }

    #[rstest]
    fn test_sum_by_key(vehicle: Vehicle) {
        let key = AnnualKey::new(&vehicle, 2025);
        let totals = SafetyTotals {
            vmt: 10.0,
            ..Default::default()
        };
        let table = sum_by_key([(key.clone(), totals), (key.clone(), totals)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table[&key].vmt, 20.0);
    }

    #[rstest]
    fn test_upstream_adds_no_action_only_keys(
        vehicle: Vehicle,
        bev: Vehicle,
        refinery_rates: RefineryRates,
        energy_security: YearSeries<EnergySecurityFactors>,
        general_inputs: GeneralInputs,
    ) {
        let inputs = UpstreamInputs {
            refinery_rates: &refinery_rates,
            energy_security: &energy_security,
            general: &general_inputs,
        };
        let ice_key = AnnualKey::new(&vehicle, 2025);
        let bev_key = AnnualKey::new(&bev, 2025);
        let mut no_action = AnnualTable::from([(ice_key.clone(), gallons(500.0))]);
        let mut action = AnnualTable::from([(bev_key.clone(), PhysicalEffects::default())]);
        apply_upstream(&mut no_action, [&mut action], inputs);

        assert_eq!(action.len(), 2);
        let replaced = &action[&ice_key];
        assert_eq!(replaced.totals.refined_gasoline_gallons, 250.0);
        assert!(replaced.totals.imported_oil_bbl_change < 0.0);
        assert_eq!(action[&bev_key].totals.refined_gasoline_gallons, 0.0);

        let deltas = physical_deltas(&no_action, &action);
        assert_eq!(deltas[&ice_key].totals.fuel_consumption_gallons, -500.0);
        assert_eq!(deltas[&ice_key].totals.refined_gasoline_gallons, -250.0);
    }

    #[rstest]
    fn test_model_year_physical(vehicle: Vehicle) {
        let vehicle = Rc::new(vehicle);
        let effects: Vec<_> = (0..3)
            .map(|age| VehiclePhysicalEffects {
                vehicle: vehicle.clone(),
                calendar_year: vehicle.model_year + age,
                age,
                annual_vmt: 100.0,
                odometer: 100.0 * f64::from(age + 1),
                effects: gallons(10.0),
            })
            .collect();
        let first = vehicle.model_year;
        let table = model_year_physical(&effects, 2, first, first + 5, true);
        let key = ModelYearKey::new(&vehicle, true);
        assert_eq!(table[&key].totals.fuel_consumption_gallons, 20.0);
        assert!(model_year_physical(&effects, 2, first + 1, first + 5, true).is_empty());
    }

    #[rstest]
    fn test_allocate_upstream_to_model_years(
        vehicle: Vehicle,
        refinery_rates: RefineryRates,
        energy_security: YearSeries<EnergySecurityFactors>,
        general_inputs: GeneralInputs,
    ) {
        let inputs = UpstreamInputs {
            refinery_rates: &refinery_rates,
            energy_security: &energy_security,
            general: &general_inputs,
        };
        let older = Rc::new(Vehicle {
            id: "vehicle_0".into(),
            model_year: 2024,
            ..vehicle.clone()
        });
        let newer = Rc::new(vehicle);
        let row = |vehicle: &Rc<Vehicle>, gallons_used: f64| VehiclePhysicalEffects {
            vehicle: vehicle.clone(),
            calendar_year: 2025,
            age: 2025 - vehicle.model_year,
            annual_vmt: 100.0,
            odometer: 100.0,
            effects: gallons(gallons_used),
        };
        let mut effects = vec![row(&older, 300.0), row(&newer, 100.0)];
        let mut annual = sum_by_key(
            effects
                .iter()
                .map(|row| (AnnualKey::new(&row.vehicle, row.calendar_year), row.effects)),
        );
        apply_upstream(&mut annual, Vec::<&mut AnnualTable<PhysicalEffects>>::new(), inputs);
        allocate_upstream(&mut effects, &annual);

        let key = AnnualKey::new(&newer, 2025);
        assert_eq!(effects[1].effects.totals.refined_gasoline_gallons, 100.0);
        assert!(effects[1].effects.refinery.co2 > 0.0);
        assert_approx_eq!(
            f64,
            effects[0].effects.refinery.co2 + effects[1].effects.refinery.co2,
            annual[&key].refinery.co2
        );
        assert_approx_eq!(
            f64,
            effects[1].effects.totals.barrels_of_oil,
            annual[&key].totals.barrels_of_oil / 4.0
        );

        // Refinery emissions reach the model year totals
        let table = model_year_physical(&effects, 1, 2025, 2030, true);
        let my_key = ModelYearKey::new(&newer, true);
        assert!(table[&my_key].refinery.co2 > 0.0);
        assert!(table[&my_key].total().co2 > table[&my_key].vehicle.co2);
    }
}

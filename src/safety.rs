//! Fatality effects of vehicle mass changes.
use crate::fleet::{BodyStyle, Vehicle, VehicleID};
use crate::rates::StartYearMap;
use crate::values::value_struct;
use anyhow::{Context, Result};
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Recorded in `check_for_0` when a weight change fits none of the threshold cases
pub const WEIGHT_SPLIT_SENTINEL: f64 = 10000.0;

/// How the fatality rate of a body style responds to mass changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyValue {
    /// Curb weight dividing the two response regimes
    pub threshold_lbs: f64,
    /// Fractional fatality rate change per 100 lbs added below the threshold
    pub change_per_100_lbs_below: f64,
    /// Fractional fatality rate change per 100 lbs added at or above the threshold
    pub change_per_100_lbs_at_or_above: f64,
}

/// Safety values keyed by body style
pub type SafetyValues = HashMap<BodyStyle, SafetyValue>;

/// Base fatality rates per billion miles by model year and age
#[derive(Debug, Clone, PartialEq)]
pub struct FatalityRates {
    rates: StartYearMap<BTreeMap<u32, f64>>,
}

impl FatalityRates {
    /// Create a new [`FatalityRates`] table
    pub fn new(rates: StartYearMap<BTreeMap<u32, f64>>) -> Self {
        Self { rates }
    }

    /// The base rate for a vehicle of `model_year` at `age`. Ages outside the table use the
    /// nearest tabulated age.
    pub fn get(&self, model_year: u32, age: u32) -> f64 {
        let by_age = self.rates.get(model_year);
        by_age
            .range(..=age)
            .next_back()
            .or_else(|| by_age.iter().next())
            .map(|(_, rate)| *rate)
            .unwrap_or_default()
    }
}

/// A change in curb weight split either side of a threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSplit {
    /// Total change in curb weight
    pub lbs_changed: f64,
    /// Portion of the change below the threshold
    pub below_threshold: f64,
    /// Portion of the change at or above the threshold
    pub above_threshold: f64,
    /// Zero when the portions account for the whole change
    pub check_for_0: f64,
}

impl WeightSplit {
    /// Split the change from `base_weight` to `final_weight` about `threshold`
    pub fn new(threshold: f64, base_weight: f64, final_weight: f64) -> Self {
        let lbs_changed = final_weight - base_weight;
        let split = if base_weight <= threshold && final_weight <= threshold {
            Some((lbs_changed, 0.0))
        } else if base_weight > threshold && final_weight > threshold {
            Some((0.0, lbs_changed))
        } else if base_weight > threshold && final_weight <= threshold {
            Some((final_weight - threshold, threshold - base_weight))
        } else if base_weight <= threshold && final_weight > threshold {
            Some((threshold - base_weight, final_weight - threshold))
        } else {
            None
        };

        match split {
            Some((below_threshold, above_threshold)) => Self {
                lbs_changed,
                below_threshold,
                above_threshold,
                check_for_0: lbs_changed.abs() - below_threshold.abs() - above_threshold.abs(),
            },
            None => {
                debug!("Weight change {base_weight} -> {final_weight} fits no threshold case");
                Self {
                    lbs_changed,
                    below_threshold: 0.0,
                    above_threshold: 0.0,
                    check_for_0: WEIGHT_SPLIT_SENTINEL,
                }
            }
        }
    }
}

/// Safety effects of one vehicle in one calendar year
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyEffects {
    /// The vehicle
    pub vehicle_id: VehicleID,
    /// Calendar year
    pub calendar_year: u32,
    /// Age in years
    pub age: u32,
    /// Curb weight of the base year vehicle
    pub base_year_curbweight_lbs: f64,
    /// Curb weight
    pub curbweight_lbs: f64,
    /// Split of the weight change about the body style's threshold
    pub weight_split: WeightSplit,
    /// Fractional change in fatality rate from weight change below the threshold
    pub rate_change_below: f64,
    /// Fractional change in fatality rate from weight change above the threshold
    pub rate_change_above: f64,
    /// Registered vehicles
    pub registered_count: f64,
    /// Miles travelled
    pub vmt: f64,
    /// Fatality rate of the base year vehicle
    pub base_fatality_rate: f64,
    /// Fatality rate after the weight change
    pub session_fatality_rate: f64,
    /// Fatalities at the base year vehicle's rate
    pub base_fatalities: f64,
    /// Fatalities at the session's rate
    pub session_fatalities: f64,
}

value_struct! {
    /// Summable safety effects of a group of vehicles
    SafetyTotals {
        /// Registered vehicles
        registered_count,
        /// Miles travelled
        vmt,
        /// Fatalities at base year vehicle rates
        base_fatalities,
        /// Fatalities at session rates
        session_fatalities,
    }
}

impl SafetyEffects {
    /// The summable part of the effects
    pub fn totals(&self) -> SafetyTotals {
        SafetyTotals {
            registered_count: self.registered_count,
            vmt: self.vmt,
            base_fatalities: self.base_fatalities,
            session_fatalities: self.session_fatalities,
        }
    }
}

/// Calculate the safety effects of `vehicle` travelling `vmt` miles at `age`
pub fn calc_safety_effects(
    vehicle: &Vehicle,
    calendar_year: u32,
    age: u32,
    registered_count: f64,
    vmt: f64,
    safety_values: &SafetyValues,
    fatality_rates: &FatalityRates,
) -> Result<SafetyEffects> {
    let values = safety_values
        .get(&vehicle.body_style)
        .with_context(|| format!("No safety values for body style {}", vehicle.body_style))?;
    let weight_split = WeightSplit::new(
        values.threshold_lbs,
        vehicle.base_year_curbweight_lbs,
        vehicle.curbweight_lbs,
    );
    let rate_change_below = -values.change_per_100_lbs_below * weight_split.below_threshold / 100.0;
    let rate_change_above =
        -values.change_per_100_lbs_at_or_above * weight_split.above_threshold / 100.0;

    let base_fatality_rate = fatality_rates.get(vehicle.model_year, age);
    let session_fatality_rate =
        base_fatality_rate * (1.0 + rate_change_below) * (1.0 + rate_change_above);

    Ok(SafetyEffects {
        vehicle_id: vehicle.id.clone(),
        calendar_year,
        age,
        base_year_curbweight_lbs: vehicle.base_year_curbweight_lbs,
        curbweight_lbs: vehicle.curbweight_lbs,
        weight_split,
        rate_change_below,
        rate_change_above,
        registered_count,
        vmt,
        base_fatality_rate,
        session_fatality_rate,
        base_fatalities: base_fatality_rate * vmt / 1e9,
        session_fatalities: session_fatality_rate * vmt / 1e9,
    })
}

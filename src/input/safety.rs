//! Code for reading the safety values and fatality rates files.
use super::*;
use crate::fleet::BodyStyle;
use crate::rates::StartYearMap;
use crate::safety::{FatalityRates, SafetyValue, SafetyValues};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Template for the safety values file
pub const SAFETY_VALUES_TEMPLATE: Template = Template {
    name: "safety_values",
    version: "0.1",
    columns: &[
        "body_style",
        "threshold_lbs",
        "change_per_100_lbs_below_threshold",
        "change_per_100_lbs_at_or_above_threshold",
    ],
};

/// Template for the fatality rates file
pub const FATALITY_RATES_TEMPLATE: Template = Template {
    name: "fatality_rates",
    version: "0.1",
    columns: &[
        "start_model_year",
        "age",
        "fatality_rate_per_billion_miles",
    ],
};

#[derive(Debug, Deserialize, PartialEq)]
struct SafetyValueRaw {
    body_style: BodyStyle,
    threshold_lbs: f64,
    change_per_100_lbs_below_threshold: f64,
    change_per_100_lbs_at_or_above_threshold: f64,
}

/// Read the safety values file. Every body style must be present.
pub fn read_safety_values(file_path: &Path) -> Result<SafetyValues> {
    let rows = read_csv::<SafetyValueRaw>(file_path, &SAFETY_VALUES_TEMPLATE)?;
    read_safety_values_from_iter(rows.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_safety_values_from_iter<I>(iter: I) -> Result<SafetyValues>
where
    I: Iterator<Item = SafetyValueRaw>,
{
    let mut values = SafetyValues::new();
    for raw in iter {
        ensure!(
            raw.threshold_lbs > 0.0,
            "threshold_lbs for {} must be positive",
            raw.body_style
        );
        let value = SafetyValue {
            threshold_lbs: raw.threshold_lbs,
            change_per_100_lbs_below: raw.change_per_100_lbs_below_threshold,
            change_per_100_lbs_at_or_above: raw.change_per_100_lbs_at_or_above_threshold,
        };
        try_insert(&mut values, raw.body_style, value)?;
    }

    for body_style in [BodyStyle::Sedan, BodyStyle::CuvSuv, BodyStyle::Pickup] {
        ensure!(
            values.contains_key(&body_style),
            "No safety values for body style {body_style}"
        );
    }

    Ok(values)
}

#[derive(Debug, Deserialize, PartialEq)]
struct FatalityRateRaw {
    start_model_year: u32,
    age: u32,
    fatality_rate_per_billion_miles: f64,
}

/// Read the fatality rates file
pub fn read_fatality_rates(file_path: &Path) -> Result<FatalityRates> {
    let rows = read_csv::<FatalityRateRaw>(file_path, &FATALITY_RATES_TEMPLATE)?;
    read_fatality_rates_from_iter(rows.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_fatality_rates_from_iter<I>(iter: I) -> Result<FatalityRates>
where
    I: Iterator<Item = FatalityRateRaw>,
{
    let mut by_year: BTreeMap<u32, BTreeMap<u32, f64>> = BTreeMap::new();
    for raw in iter {
        ensure!(
            raw.fatality_rate_per_billion_miles >= 0.0,
            "Negative fatality rate for start model year {} age {}",
            raw.start_model_year,
            raw.age
        );
        ensure!(
            by_year
                .entry(raw.start_model_year)
                .or_default()
                .insert(raw.age, raw.fatality_rate_per_billion_miles)
                .is_none(),
            "Fatality rate for start model year {} age {} given more than once",
            raw.start_model_year,
            raw.age
        );
    }

    Ok(FatalityRates::new(StartYearMap::new(by_year)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;

    fn safety_row(body_style: BodyStyle) -> SafetyValueRaw {
        SafetyValueRaw {
            body_style,
            threshold_lbs: 3000.0,
            change_per_100_lbs_below_threshold: 0.5,
            change_per_100_lbs_at_or_above_threshold: 0.3,
        }
    }

    #[test]
    fn test_read_safety_values() {
        let rows = [BodyStyle::Sedan, BodyStyle::CuvSuv, BodyStyle::Pickup].map(safety_row);
        let values = read_safety_values_from_iter(rows.into_iter()).unwrap();
        assert_eq!(values[&BodyStyle::Pickup].threshold_lbs, 3000.0);
    }

    #[test]
    fn test_read_safety_values_missing_body_style() {
        let rows = [BodyStyle::Sedan, BodyStyle::Pickup].map(safety_row);
        assert_error!(
            read_safety_values_from_iter(rows.into_iter()),
            "No safety values for body style cuv_suv"
        );
    }

    #[test]
    fn test_read_fatality_rates() {
        let rows = [(2010, 0, 10.0), (2010, 5, 12.0), (2020, 0, 8.0)].map(|(year, age, rate)| {
            FatalityRateRaw {
                start_model_year: year,
                age,
                fatality_rate_per_billion_miles: rate,
            }
        });
        let rates = read_fatality_rates_from_iter(rows.into_iter()).unwrap();
        assert_eq!(rates.get(2015, 7), 12.0);
        assert_eq!(rates.get(2025, 3), 8.0);
        assert_eq!(rates.get(2005, 0), 10.0);
    }
}

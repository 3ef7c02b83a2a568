//! Code for reading the legacy fleet and the tables used to age it.
use super::*;
use crate::deflators::{Deflators, DollarValued, adjust_dollars};
use crate::fleet::{BodyStyle, InUseFuel, RegClass};
use crate::legacy::{FixedByAge, LegacyFleetRow};
use crate::rates::{StartYearMap, YearSeries};
use crate::vmt::ContextStockAndVmt;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Template for the legacy fleet file
pub const LEGACY_FLEET_TEMPLATE: Template = Template {
    name: "legacy_fleet",
    version: "0.1",
    columns: &[
        "model_year",
        "age",
        "calendar_year",
        "reg_class_id",
        "body_style",
        "market_class_id",
        "in_use_fuel_id",
        "registered_count",
        "miles_per_gallon",
        "kwh_per_mile",
        "curbweight_lbs",
        "transaction_price_dollars",
        "dollar_basis",
    ],
};

/// Template for the re-registration file
pub const REREGISTRATION_TEMPLATE: Template = Template {
    name: "reregistration_fixed_by_age",
    version: "0.1",
    columns: &[
        "start_model_year",
        "market_class_id",
        "age",
        "reregistered_proportion",
    ],
};

/// Template for the annual VMT file
pub const ANNUAL_VMT_TEMPLATE: Template = Template {
    name: "annual_vmt_fixed_by_age",
    version: "0.1",
    columns: &["start_model_year", "market_class_id", "age", "annual_vmt"],
};

/// Template for the context stock and VMT file
pub const CONTEXT_STOCK_AND_VMT_TEMPLATE: Template = Template {
    name: "context_stock_and_vmt",
    version: "0.1",
    columns: &["calendar_year", "context_stock", "context_vmt"],
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct LegacyFleetRaw {
    model_year: u32,
    age: u32,
    calendar_year: u32,
    reg_class_id: RegClass,
    body_style: BodyStyle,
    market_class_id: String,
    in_use_fuel_id: String,
    registered_count: f64,
    miles_per_gallon: f64,
    kwh_per_mile: f64,
    curbweight_lbs: f64,
    transaction_price_dollars: f64,
    dollar_basis: u32,
}

impl DollarValued for LegacyFleetRaw {
    fn dollar_basis(&self) -> u32 {
        self.dollar_basis
    }

    fn set_dollar_basis(&mut self, year: u32) {
        self.dollar_basis = year;
    }

    fn dollar_values_mut(&mut self) -> Vec<&mut f64> {
        vec![&mut self.transaction_price_dollars]
    }
}

/// Read the legacy fleet file, converting prices to analysis-basis dollars.
///
/// Every row must be for the same calendar year.
pub fn read_legacy_fleet(file_path: &Path, deflators: &Deflators) -> Result<Vec<LegacyFleetRow>> {
    let mut rows = read_csv::<LegacyFleetRaw>(file_path, &LEGACY_FLEET_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;
    read_legacy_fleet_from_iter(rows.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_legacy_fleet_from_iter<I>(iter: I) -> Result<Vec<LegacyFleetRow>>
where
    I: Iterator<Item = LegacyFleetRaw>,
{
    let mut calendar_year = None;
    let mut rows = Vec::new();
    for raw in iter {
        match calendar_year {
            None => calendar_year = Some(raw.calendar_year),
            Some(year) => ensure!(
                year == raw.calendar_year,
                "Legacy fleet must be for a single calendar year, found {year} and {}",
                raw.calendar_year
            ),
        }
        ensure!(
            raw.calendar_year >= raw.model_year && raw.age == raw.calendar_year - raw.model_year,
            "Age {} does not match model year {} in {}",
            raw.age,
            raw.model_year,
            raw.calendar_year
        );
        ensure!(
            raw.registered_count >= 0.0,
            "Negative registered_count for model year {} {}",
            raw.model_year,
            raw.market_class_id
        );
        let in_use_fuel_id = InUseFuel::parse(&raw.in_use_fuel_id)?;

        rows.push(LegacyFleetRow {
            model_year: raw.model_year,
            age: raw.age,
            calendar_year: raw.calendar_year,
            reg_class_id: raw.reg_class_id,
            body_style: raw.body_style,
            market_class_id: raw.market_class_id,
            in_use_fuel_id,
            registered_count: raw.registered_count,
            miles_per_gallon: raw.miles_per_gallon,
            kwh_per_mile: raw.kwh_per_mile,
            curbweight_lbs: raw.curbweight_lbs,
            transaction_price_dollars: raw.transaction_price_dollars,
        });
    }
    ensure!(!rows.is_empty(), "Legacy fleet is empty");

    Ok(rows)
}

#[derive(Debug, Deserialize, PartialEq)]
struct ReregistrationRaw {
    start_model_year: u32,
    market_class_id: String,
    age: u32,
    #[serde(deserialize_with = "deserialise_proportion")]
    reregistered_proportion: f64,
}

#[derive(Debug, Deserialize, PartialEq)]
struct AnnualVmtRaw {
    start_model_year: u32,
    market_class_id: String,
    age: u32,
    annual_vmt: f64,
}

/// Read the re-registration file
pub fn read_reregistration(file_path: &Path) -> Result<FixedByAge> {
    let rows = read_csv::<ReregistrationRaw>(file_path, &REREGISTRATION_TEMPLATE)?;
    let entries = rows.into_iter().map(|raw| {
        (
            raw.start_model_year,
            raw.market_class_id,
            raw.age,
            raw.reregistered_proportion,
        )
    });
    fixed_by_age_from_iter(entries).with_context(|| input_err_msg(file_path))
}

/// Read the annual VMT file
pub fn read_annual_vmt(file_path: &Path) -> Result<FixedByAge> {
    let rows = read_csv::<AnnualVmtRaw>(file_path, &ANNUAL_VMT_TEMPLATE)?;
    let entries = rows
        .into_iter()
        .map(|raw| (raw.start_model_year, raw.market_class_id, raw.age, raw.annual_vmt));
    fixed_by_age_from_iter(entries).with_context(|| input_err_msg(file_path))
}

fn fixed_by_age_from_iter<I>(iter: I) -> Result<FixedByAge>
where
    I: Iterator<Item = (u32, String, u32, f64)>,
{
    let mut tables: HashMap<String, BTreeMap<u32, BTreeMap<u32, f64>>> = HashMap::new();
    for (start_model_year, market_class_id, age, value) in iter {
        ensure!(value >= 0.0, "Negative value for {market_class_id} at age {age}");
        let by_age = tables
            .entry(market_class_id.clone())
            .or_default()
            .entry(start_model_year)
            .or_default();
        ensure!(
            by_age.insert(age, value).is_none(),
            "Duplicate entry for {market_class_id}, start model year {start_model_year}, \
            age {age}"
        );
    }

    let tables = tables
        .into_iter()
        .map(|(market_class_id, entries)| Ok((market_class_id, StartYearMap::new(entries)?)))
        .collect::<Result<_>>()?;

    Ok(FixedByAge::new(tables))
}

#[derive(Debug, Deserialize, PartialEq)]
struct ContextStockAndVmtRaw {
    calendar_year: u32,
    context_stock: f64,
    context_vmt: f64,
}

/// Read the context stock and VMT file
pub fn read_context_stock_and_vmt(file_path: &Path) -> Result<YearSeries<ContextStockAndVmt>> {
    let rows = read_csv::<ContextStockAndVmtRaw>(file_path, &CONTEXT_STOCK_AND_VMT_TEMPLATE)?;
    read_context_stock_and_vmt_from_iter(rows.into_iter())
        .with_context(|| input_err_msg(file_path))
}

fn read_context_stock_and_vmt_from_iter<I>(iter: I) -> Result<YearSeries<ContextStockAndVmt>>
where
    I: Iterator<Item = ContextStockAndVmtRaw>,
{
    let mut points = BTreeMap::new();
    for raw in iter {
        ensure!(
            raw.context_stock > 0.0 && raw.context_vmt > 0.0,
            "Context stock and VMT for {} must be positive",
            raw.calendar_year
        );
        let value = ContextStockAndVmt {
            stock: raw.context_stock,
            vmt: raw.context_vmt,
        };
        ensure!(
            points.insert(raw.calendar_year, value).is_none(),
            "Duplicate context stock and VMT for {}",
            raw.calendar_year
        );
    }

    YearSeries::new(points)
}

//! Code for reading the on-road fuels, context fuel prices and electricity prices files.
use super::*;
use crate::deflators::{DollarValued, Deflators, adjust_dollars};
use crate::fuels::{ContextFuelPrices, FuelPrice, OnroadFuel, OnroadFuels};
use crate::model::parameters::ElectricityPricesSource;
use crate::rates::{StartYearMap, YearSeries};
use itertools::Itertools;
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Template for the on-road fuels file
pub const ONROAD_FUELS_TEMPLATE: Template = Template {
    name: "onroad_fuels",
    version: "0.1",
    columns: &[
        "fuel_id",
        "start_year",
        "unit",
        "direct_co2e_grams_per_unit",
        "transmission_efficiency",
    ],
};

/// Template for the context fuel prices file
pub const CONTEXT_FUEL_PRICES_TEMPLATE: Template = Template {
    name: "context_fuel_prices",
    version: "0.1",
    columns: &[
        "calendar_year",
        "fuel_id",
        "retail_dollars_per_unit",
        "pretax_dollars_per_unit",
        "dollar_basis",
    ],
};

/// Template for the electricity prices file
pub const ELECTRICITY_PRICES_TEMPLATE: Template = Template {
    name: "electricity_prices",
    version: "0.1",
    columns: &[
        "source",
        "session_policy",
        "calendar_year",
        "retail_dollars_per_kwh",
        "pretax_dollars_per_kwh",
        "dollar_basis",
    ],
};

#[derive(Debug, Deserialize, PartialEq)]
struct OnroadFuelRaw {
    fuel_id: String,
    start_year: u32,
    unit: String,
    direct_co2e_grams_per_unit: f64,
    transmission_efficiency: f64,
}

/// Read the on-road fuels file
pub fn read_onroad_fuels(file_path: &Path) -> Result<OnroadFuels> {
    let fuels_csv = read_csv::<OnroadFuelRaw>(file_path, &ONROAD_FUELS_TEMPLATE)?;
    read_onroad_fuels_from_iter(fuels_csv.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_onroad_fuels_from_iter<I>(iter: I) -> Result<OnroadFuels>
where
    I: Iterator<Item = OnroadFuelRaw>,
{
    let mut by_fuel: HashMap<String, BTreeMap<u32, OnroadFuel>> = HashMap::new();
    for raw in iter {
        ensure!(
            matches!(raw.unit.as_str(), "gallon" | "kWh"),
            "Unknown unit '{}' for fuel {}",
            raw.unit,
            raw.fuel_id
        );
        ensure!(
            raw.transmission_efficiency > 0.0 && raw.transmission_efficiency <= 1.0,
            "transmission_efficiency for fuel {} must be in (0, 1]",
            raw.fuel_id
        );
        ensure!(
            raw.unit == "kWh" || raw.direct_co2e_grams_per_unit > 0.0,
            "direct_co2e_grams_per_unit for liquid fuel {} must be positive",
            raw.fuel_id
        );
        let fuel = OnroadFuel {
            unit: raw.unit,
            direct_co2e_grams_per_unit: raw.direct_co2e_grams_per_unit,
            transmission_efficiency: raw.transmission_efficiency,
        };
        let entries = by_fuel.entry(raw.fuel_id.clone()).or_default();
        ensure!(
            entries.insert(raw.start_year, fuel).is_none(),
            "Fuel {} has start year {} more than once",
            raw.fuel_id,
            raw.start_year
        );
    }

    let fuels = by_fuel
        .into_iter()
        .map(|(fuel_id, entries)| Ok((fuel_id, StartYearMap::new(entries)?)))
        .collect::<Result<_>>()?;

    Ok(OnroadFuels::new(fuels))
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct FuelPriceRaw {
    calendar_year: u32,
    fuel_id: String,
    retail_dollars_per_unit: f64,
    pretax_dollars_per_unit: f64,
    dollar_basis: u32,
}

impl DollarValued for FuelPriceRaw {
    fn dollar_basis(&self) -> u32 {
        self.dollar_basis
    }

    fn set_dollar_basis(&mut self, year: u32) {
        self.dollar_basis = year;
    }

    fn dollar_values_mut(&mut self) -> Vec<&mut f64> {
        vec![
            &mut self.retail_dollars_per_unit,
            &mut self.pretax_dollars_per_unit,
        ]
    }
}

/// Read the context fuel prices file, converting to analysis-basis dollars
pub fn read_context_fuel_prices(
    file_path: &Path,
    deflators: &Deflators,
) -> Result<ContextFuelPrices> {
    let mut rows = read_csv::<FuelPriceRaw>(file_path, &CONTEXT_FUEL_PRICES_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;
    read_context_fuel_prices_from_iter(rows.into_iter())
        .with_context(|| input_err_msg(file_path))
}

fn read_context_fuel_prices_from_iter<I>(iter: I) -> Result<ContextFuelPrices>
where
    I: Iterator<Item = FuelPriceRaw>,
{
    let mut by_fuel: HashMap<String, BTreeMap<u32, FuelPrice>> = HashMap::new();
    for raw in iter {
        let price = FuelPrice {
            retail: raw.retail_dollars_per_unit,
            pretax: raw.pretax_dollars_per_unit,
        };
        ensure!(
            by_fuel
                .entry(raw.fuel_id.clone())
                .or_default()
                .insert(raw.calendar_year, price)
                .is_none(),
            "Price for fuel {} in {} given more than once",
            raw.fuel_id,
            raw.calendar_year
        );
    }

    let prices = by_fuel
        .into_iter()
        .map(|(fuel_id, points)| Ok((fuel_id, YearSeries::new(points)?)))
        .collect::<Result<_>>()?;

    Ok(ContextFuelPrices::new(prices))
}

/// A row of the electricity prices file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ElectricityPriceRow {
    source: String,
    session_policy: String,
    calendar_year: u32,
    retail_dollars_per_kwh: f64,
    pretax_dollars_per_kwh: f64,
    dollar_basis: u32,
}

impl DollarValued for ElectricityPriceRow {
    fn dollar_basis(&self) -> u32 {
        self.dollar_basis
    }

    fn set_dollar_basis(&mut self, year: u32) {
        self.dollar_basis = year;
    }

    fn dollar_values_mut(&mut self) -> Vec<&mut f64> {
        vec![
            &mut self.retail_dollars_per_kwh,
            &mut self.pretax_dollars_per_kwh,
        ]
    }
}

/// Electricity prices for every source and session, in analysis-basis dollars
#[derive(Debug, Clone, PartialEq)]
pub struct ElectricityPrices {
    rows: Vec<ElectricityPriceRow>,
}

impl ElectricityPrices {
    /// The price series for a session.
    ///
    /// Rows are taken from the chosen source. Rows labelled with the session's policy are used if
    /// there are any, otherwise those labelled `all`.
    pub fn for_session(
        &self,
        source: ElectricityPricesSource,
        session_policy: &str,
    ) -> Result<YearSeries<FuelPrice>> {
        let source_label = source.to_string();
        let from_source = self
            .rows
            .iter()
            .filter(|row| row.source.eq_ignore_ascii_case(&source_label))
            .collect_vec();
        let mut selected = from_source
            .iter()
            .filter(|row| row.session_policy == session_policy)
            .collect_vec();
        if selected.is_empty() {
            debug!("No {source_label} electricity prices for {session_policy}, using 'all'");
            selected = from_source
                .iter()
                .filter(|row| row.session_policy == "all")
                .collect_vec();
        }
        ensure!(
            !selected.is_empty(),
            "No {source_label} electricity prices for session {session_policy}"
        );

        let mut points = BTreeMap::new();
        for row in selected {
            let price = FuelPrice {
                retail: row.retail_dollars_per_kwh,
                pretax: row.pretax_dollars_per_kwh,
            };
            ensure!(
                points.insert(row.calendar_year, price).is_none(),
                "Electricity price for {} in {} given more than once",
                session_policy,
                row.calendar_year
            );
        }

        YearSeries::new(points)
    }
}

/// Read the electricity prices file, converting to analysis-basis dollars
pub fn read_electricity_prices(
    file_path: &Path,
    deflators: &Deflators,
) -> Result<ElectricityPrices> {
    let mut rows = read_csv::<ElectricityPriceRow>(file_path, &ELECTRICITY_PRICES_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;

    Ok(ElectricityPrices { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, deflators};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn price_row(policy: &str, year: u32, retail: f64) -> ElectricityPriceRow {
        ElectricityPriceRow {
            source: "AEO".into(),
            session_policy: policy.into(),
            calendar_year: year,
            retail_dollars_per_kwh: retail,
            pretax_dollars_per_kwh: retail * 0.9,
            dollar_basis: 2020,
        }
    }

    #[test]
    fn test_onroad_fuels_bad_unit() {
        let raw = OnroadFuelRaw {
            fuel_id: "pump gasoline".into(),
            start_year: 2020,
            unit: "litre".into(),
            direct_co2e_grams_per_unit: 8887.0,
            transmission_efficiency: 1.0,
        };
        assert_error!(
            read_onroad_fuels_from_iter(std::iter::once(raw)),
            "Unknown unit 'litre' for fuel pump gasoline"
        );
    }

    #[rstest]
    fn test_context_fuel_prices_adjusted_before_interpolation(deflators: Deflators) {
        // 2018 dollars are worth 1/0.9 of 2020 dollars
        let mut rows = vec![
            FuelPriceRaw {
                calendar_year: 2020,
                fuel_id: "pump gasoline".into(),
                retail_dollars_per_unit: 2.7,
                pretax_dollars_per_unit: 1.8,
                dollar_basis: 2018,
            },
            FuelPriceRaw {
                calendar_year: 2022,
                fuel_id: "pump gasoline".into(),
                retail_dollars_per_unit: 3.0,
                pretax_dollars_per_unit: 2.0,
                dollar_basis: 2020,
            },
        ];
        adjust_dollars(&deflators, &mut rows).unwrap();
        let prices = read_context_fuel_prices_from_iter(rows.into_iter()).unwrap();
        let price = prices.get("pump gasoline", 2021).unwrap();
        assert_approx_eq!(f64, price.retail, 3.0);
        assert_approx_eq!(f64, price.pretax, 2.0);
    }

    #[test]
    fn test_electricity_prices_for_session() {
        let prices = ElectricityPrices {
            rows: vec![
                price_row("all", 2020, 0.10),
                price_row("all", 2030, 0.20),
                price_row("action_1", 2020, 0.15),
            ],
        };
        let series = prices
            .for_session(ElectricityPricesSource::Aeo, "no_action")
            .unwrap();
        assert_approx_eq!(f64, series.get(2025).retail, 0.15);

        let series = prices
            .for_session(ElectricityPricesSource::Aeo, "action_1")
            .unwrap();
        assert_approx_eq!(f64, series.get(2025).retail, 0.15);

        assert_error!(
            prices.for_session(ElectricityPricesSource::Ipm, "no_action"),
            "No IPM electricity prices for session no_action"
        );
    }
}

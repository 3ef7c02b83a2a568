//! Code for reading vehicle, EGU and refinery emission rates.
use super::*;
use crate::emission_rates::{
    EguCase, EguCases, EguRates, RateCurve, RateCurves, RefineryRates, VehicleEmissionRates,
    VehicleRateTableKey, is_known_rate_name,
};
use crate::fleet::{EmissionFuel, RegClass};
use crate::rates::{StartYearMap, YearSeries};
use crate::values::{PollutantValues, ValueFields};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Template for vehicle emission rates given as a linear equation in age
pub const VEHICLE_RATES_EQUATION_TEMPLATE: Template = Template {
    name: "emission_rates_vehicles",
    version: "0.2",
    columns: &[
        "start_year",
        "sourcetype_name",
        "reg_class_id",
        "in_use_fuel_id",
        "rate_name",
        "independent_variable",
        "slope_rate",
        "intercept_rate",
    ],
};

/// Template for vehicle emission rates tabulated by age
pub const VEHICLE_RATES_BY_AGE_TEMPLATE: Template = Template {
    name: "emission_rates_vehicles_by_age",
    version: "0.3",
    columns: &[
        "start_year",
        "sourcetype_name",
        "reg_class_id",
        "in_use_fuel_id",
        "age",
    ],
};

/// Template for EGU emission rates
pub const EGU_RATES_TEMPLATE: Template = Template {
    name: "emission_rates_egu",
    version: "0.1",
    columns: &["calendar_year", "case_id", "kwh_generation_us"],
};

/// Template for refinery emission rates
pub const REFINERY_RATES_TEMPLATE: Template = Template {
    name: "emission_rates_refinery",
    version: "0.1",
    columns: &["calendar_year", "fuel_type"],
};

type RateTables = HashMap<VehicleRateTableKey, BTreeMap<u32, RateCurves>>;

/// Read the vehicle emission rates file in whichever shape its template declares
pub fn read_vehicle_emission_rates(file_path: &Path) -> Result<VehicleEmissionRates> {
    let template_name = peek_template_name(file_path)?;
    let tables = if template_name == VEHICLE_RATES_BY_AGE_TEMPLATE.name {
        let table = read_template_csv(file_path, &VEHICLE_RATES_BY_AGE_TEMPLATE)?;
        read_rates_by_age(&table).with_context(|| input_err_msg(file_path))?
    } else {
        let table = read_template_csv(file_path, &VEHICLE_RATES_EQUATION_TEMPLATE)?;
        read_rates_equation(&table).with_context(|| input_err_msg(file_path))?
    };

    let tables = tables
        .into_iter()
        .map(|(key, entries)| Ok((key, StartYearMap::new(entries)?)))
        .collect::<Result<_>>()
        .with_context(|| input_err_msg(file_path))?;

    Ok(VehicleEmissionRates::new(tables))
}

/// The key columns common to both shapes
fn table_key(row: &CsvRow) -> Result<(u32, VehicleRateTableKey)> {
    let fuel_id = row.get_str("in_use_fuel_id")?;
    let fuel = EmissionFuel::from_fuel_name(fuel_id)
        .with_context(|| format!("Unknown in_use_fuel_id '{fuel_id}'"))?;
    let reg_class: RegClass = parse_label(row.get_str("reg_class_id")?)?;

    Ok((
        row.get_u32("start_year")?,
        (row.get_str("sourcetype_name")?.to_string(), reg_class, fuel),
    ))
}

fn read_rates_equation(table: &CsvTable) -> Result<RateTables> {
    let mut tables = RateTables::new();
    for (idx, row) in table.rows().enumerate() {
        read_equation_row(&row, &mut tables)
            .with_context(|| format!("Invalid data on row {}", idx + 3))?;
    }

    Ok(tables)
}

fn read_equation_row(row: &CsvRow, tables: &mut RateTables) -> Result<()> {
    let (start_year, key) = table_key(row)?;
    let rate_name = row.get_str("rate_name")?;
    ensure!(
        is_known_rate_name(rate_name),
        "Unknown rate name '{rate_name}'"
    );
    let independent_variable = row.get_str("independent_variable")?;
    ensure!(
        independent_variable == "age",
        "Unsupported independent variable '{independent_variable}'"
    );
    let curve = RateCurve::Linear {
        slope: row.get_f64("slope_rate")?,
        intercept: row.get_f64("intercept_rate")?,
    };

    let curves = tables.entry(key).or_default().entry(start_year).or_default();
    ensure!(
        curves.insert(rate_name.to_string(), curve).is_none(),
        "Rate {rate_name} given more than once for start year {start_year}"
    );

    Ok(())
}

/// Leading columns of the tabular shape, in the order they must appear
const BY_AGE_KEY_COLUMNS: [&str; 5] = [
    "start_year",
    "sourcetype_name",
    "reg_class_id",
    "in_use_fuel_id",
    "age",
];

fn read_rates_by_age(table: &CsvTable) -> Result<RateTables> {
    let headers = table.headers().collect_vec();
    ensure!(
        headers.len() >= BY_AGE_KEY_COLUMNS.len()
            && headers[..BY_AGE_KEY_COLUMNS.len()] == BY_AGE_KEY_COLUMNS,
        "Columns must begin with {}",
        BY_AGE_KEY_COLUMNS.join(", ")
    );
    let rate_columns = headers[BY_AGE_KEY_COLUMNS.len()..]
        .iter()
        .copied()
        .filter(|column| *column != "notes")
        .collect_vec();
    for column in &rate_columns {
        ensure!(is_known_rate_name(column), "Unknown rate column '{column}'");
    }

    let mut tables = RateTables::new();
    for (idx, row) in table.rows().enumerate() {
        read_by_age_row(&row, &rate_columns, &mut tables)
            .with_context(|| format!("Invalid data on row {}", idx + 3))?;
    }

    Ok(tables)
}

fn read_by_age_row(row: &CsvRow, rate_columns: &[&str], tables: &mut RateTables) -> Result<()> {
    let (start_year, key) = table_key(row)?;
    let age = row.get_u32("age")?;
    let curves = tables.entry(key).or_default().entry(start_year).or_default();
    for column in rate_columns {
        let value = row.get_f64_or_zero(column)?;
        let curve = curves
            .entry((*column).to_string())
            .or_insert_with(|| RateCurve::ByAge(BTreeMap::new()));
        if let RateCurve::ByAge(values) = curve {
            ensure!(
                values.insert(age, value).is_none(),
                "Age {age} given more than once for start year {start_year}"
            );
        }
    }

    Ok(())
}

/// Read pollutant columns named `<species><suffix>`, treating absent columns as zero
fn read_pollutant_columns(row: &CsvRow, suffix: &str) -> Result<PollutantValues> {
    let values: Vec<f64> = PollutantValues::FIELD_NAMES
        .iter()
        .map(|species| row.get_f64_or_zero(&format!("{species}{suffix}")))
        .try_collect()?;

    Ok(PollutantValues::from_values(&values))
}

/// Read the EGU emission rates file.
///
/// Each calendar year needs a `low_demand_case` and a `high_demand_case` row.
pub fn read_egu_rates(file_path: &Path) -> Result<EguRates> {
    let table = read_template_csv(file_path, &EGU_RATES_TEMPLATE)?;
    read_egu_rates_from_table(&table).with_context(|| input_err_msg(file_path))
}

fn read_egu_rates_from_table(table: &CsvTable) -> Result<EguRates> {
    let mut cases: BTreeMap<u32, (Option<EguCase>, Option<EguCase>)> = BTreeMap::new();
    for row in table.rows() {
        let year = row.get_u32("calendar_year")?;
        let case = EguCase {
            kwh_generation_us: row.get_f64("kwh_generation_us")?,
            grams_per_kwh: read_pollutant_columns(&row, "_grams_per_kwh")?,
        };
        let entry = cases.entry(year).or_default();
        let slot = match row.get_str("case_id")? {
            "low_demand_case" => &mut entry.0,
            "high_demand_case" => &mut entry.1,
            other => bail!("Unknown case_id '{other}'"),
        };
        ensure!(slot.is_none(), "Case given more than once for {year}");
        *slot = Some(case);
    }

    let points = cases
        .into_iter()
        .map(|(year, cases)| match cases {
            (Some(low_demand), Some(high_demand)) => Ok((
                year,
                EguCases {
                    low_demand,
                    high_demand,
                },
            )),
            _ => bail!("Both low and high demand cases are required for {year}"),
        })
        .collect::<Result<_>>()?;

    Ok(EguRates::new(YearSeries::new(points)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FuelType {
    Gasoline,
    Diesel,
}

/// Read the refinery emission rates file
pub fn read_refinery_rates(file_path: &Path) -> Result<RefineryRates> {
    let table = read_template_csv(file_path, &REFINERY_RATES_TEMPLATE)?;
    read_refinery_rates_from_table(&table).with_context(|| input_err_msg(file_path))
}

fn read_refinery_rates_from_table(table: &CsvTable) -> Result<RefineryRates> {
    let mut gasoline = BTreeMap::new();
    let mut diesel = BTreeMap::new();
    for row in table.rows() {
        let year = row.get_u32("calendar_year")?;
        let rates = read_pollutant_columns(&row, "_grams_per_gallon")?;
        let points = match parse_label(row.get_str("fuel_type")?)? {
            FuelType::Gasoline => &mut gasoline,
            FuelType::Diesel => &mut diesel,
        };
        ensure!(
            points.insert(year, rates).is_none(),
            "Refinery rates for {year} given more than once"
        );
    }
    ensure!(
        !gasoline.is_empty() && !diesel.is_empty(),
        "Refinery rates are required for both gasoline and diesel"
    );

    Ok(RefineryRates::new(
        YearSeries::new(gasoline)?,
        YearSeries::new(diesel)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emission_rates::RefineryFuel;
    use crate::fixture::{assert_error, vehicle, write_template_csv};
    use crate::fleet::Vehicle;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    fn test_read_equation_rates(vehicle: Vehicle) {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "rates.csv",
            "emission_rates_vehicles",
            "0.2",
            "start_year,sourcetype_name,reg_class_id,in_use_fuel_id,rate_name,\
            independent_variable,slope_rate,intercept_rate\n\
            2020,passenger car,car,pump gasoline,nox_exhaust_grams_per_mile,age,0.002,0.01\n\
            2027,passenger car,car,pump gasoline,nox_exhaust_grams_per_mile,age,0.001,0.005",
        );
        let mut rates = read_vehicle_emission_rates(&file_path).unwrap();

        // Model year 2025 uses the 2020 rates
        let values = rates.get(&vehicle, 5).unwrap();
        assert_approx_eq!(f64, values[11], 0.02);
        assert_eq!(values[0], 0.0);
    }

    #[rstest]
    fn test_read_by_age_rates(vehicle: Vehicle) {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "rates.csv",
            "emission_rates_vehicles_by_age",
            "0.3",
            "start_year,sourcetype_name,reg_class_id,in_use_fuel_id,age,\
            nox_exhaust_grams_per_mile,co_exhaust_grams_per_mile,notes\n\
            2030,passenger car,car,pump gasoline,0,0.01,1.0,\n\
            2030,passenger car,car,pump gasoline,1,0.02,1.5,later ages use age 1",
        );
        let mut rates = read_vehicle_emission_rates(&file_path).unwrap();

        // No start year at or before 2025 so the earliest is used
        let values = rates.get(&vehicle, 4).unwrap();
        assert_approx_eq!(f64, values[11], 0.02);
        assert_approx_eq!(f64, values[10], 1.5);
    }

    #[test]
    fn test_read_by_age_rates_bad_column_order() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "rates.csv",
            "emission_rates_vehicles_by_age",
            "0.3",
            "sourcetype_name,start_year,reg_class_id,in_use_fuel_id,age\n\
            passenger car,2030,car,pump gasoline,0",
        );
        assert!(read_vehicle_emission_rates(&file_path).is_err());
    }

    #[test]
    fn test_read_equation_rates_unknown_name() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "rates.csv",
            "emission_rates_vehicles",
            "0.2",
            "start_year,sourcetype_name,reg_class_id,in_use_fuel_id,rate_name,\
            independent_variable,slope_rate,intercept_rate\n\
            2020,passenger car,car,pump gasoline,lead_exhaust_grams_per_mile,age,0,1",
        );
        let err = read_vehicle_emission_rates(&file_path).unwrap_err();
        assert!(
            err.chain()
                .any(|cause| cause.to_string() == "Unknown rate name 'lead_exhaust_grams_per_mile'")
        );
    }

    #[test]
    fn test_read_egu_rates() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "egu.csv",
            "emission_rates_egu",
            "0.1",
            "calendar_year,case_id,kwh_generation_us,nox_grams_per_kwh,co2_grams_per_kwh\n\
            2020,low_demand_case,1000,0.5,400\n\
            2020,high_demand_case,2000,0.3,300\n\
            2030,low_demand_case,1000,0.1,200\n\
            2030,high_demand_case,2000,0.1,100",
        );
        let egu = read_egu_rates(&file_path).unwrap();
        let detail = egu.rates_for(2025, 1000.0);
        assert_approx_eq!(f64, detail.grams_per_kwh.nox, 0.3);
        assert_approx_eq!(f64, detail.grams_per_kwh.co2, 300.0);
        assert_eq!(detail.grams_per_kwh.sox, 0.0);
    }

    #[test]
    fn test_read_egu_rates_missing_case() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "egu.csv",
            "emission_rates_egu",
            "0.1",
            "calendar_year,case_id,kwh_generation_us\n2020,low_demand_case,1000",
        );
        assert_error!(
            read_egu_rates(&file_path),
            format!("Error reading {}", file_path.display())
        );
    }

    #[test]
    fn test_read_refinery_rates() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "refinery.csv",
            "emission_rates_refinery",
            "0.1",
            "calendar_year,fuel_type,voc_grams_per_gallon,co2_grams_per_gallon\n\
            2020,gasoline,1.0,2000\n\
            2030,gasoline,2.0,1000\n\
            2020,diesel,0.5,1500",
        );
        let rates = read_refinery_rates(&file_path).unwrap();
        assert_approx_eq!(f64, rates.get(RefineryFuel::Gasoline, 2025).voc, 1.5);
        assert_approx_eq!(f64, rates.get(RefineryFuel::Diesel, 2040).co2, 1500.0);
    }
}

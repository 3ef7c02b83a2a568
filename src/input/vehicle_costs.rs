//! Code for reading the maintenance, repair, refueling, insurance and powertrain cost files.
use super::*;
use crate::deflators::{Deflators, DollarValued, adjust_dollars};
use crate::expression::Expression;
use crate::fleet::{BodyStyle, FuelingClass, OperatingVehicleType, RepairVehicleType};
use crate::vehicle_costs::{
    BatteryOffsets, INSURANCE_VARIABLES, InsuranceAndTaxes, InsuranceItem, MaintenanceCosts,
    MaintenanceCurve, REFUELING_VARIABLES, REPAIR_VARIABLES, RefuelingCosts, RepairCosts,
    ScaledExpression, VehicleCostTables,
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Template for the maintenance cost file
pub const MAINTENANCE_TEMPLATE: Template = Template {
    name: "maintenance_cost",
    version: "0.1",
    columns: &["powertrain_type", "slope", "intercept", "dollar_basis"],
};

/// Template for the repair cost file
pub const REPAIR_TEMPLATE: Template = Template {
    name: "repair_cost",
    version: "0.1",
    columns: &["powertrain_type", "repair_type", "value", "dollar_basis"],
};

/// Template for the refueling cost file
pub const REFUELING_TEMPLATE: Template = Template {
    name: "refueling_cost",
    version: "0.1",
    columns: &["refuel_type", "operating_veh_type", "value", "dollar_basis"],
};

/// Template for the insurance and taxes file
pub const INSURANCE_TEMPLATE: Template = Template {
    name: "insurance_and_taxes_cost_factors",
    version: "0.1",
    columns: &["item", "body_style", "value"],
};

/// Template for the powertrain cost file
pub const POWERTRAIN_COST_TEMPLATE: Template = Template {
    name: "powertrain_cost",
    version: "0.2",
    columns: &["powertrain_type", "item", "value", "dollar_basis"],
};

/// Template for the powertrain cost file used with full electric vehicle powertrain costs
pub const POWERTRAIN_COST_FEV_TEMPLATE: Template = Template {
    version: "0.3",
    ..POWERTRAIN_COST_TEMPLATE
};

/// Paths to the vehicle cost files
#[derive(Debug, Clone, Copy)]
pub struct VehicleCostPaths<'a> {
    /// Maintenance costs
    pub maintenance: &'a Path,
    /// Repair costs
    pub repair: &'a Path,
    /// Refueling costs
    pub refueling: &'a Path,
    /// Insurance and taxes
    pub insurance_and_taxes: &'a Path,
}

/// Read every vehicle cost file. Dollar values are converted with the CPI deflators.
pub fn read_vehicle_cost_tables(
    paths: VehicleCostPaths,
    cpi_deflators: &Deflators,
) -> Result<VehicleCostTables> {
    Ok(VehicleCostTables {
        maintenance: read_maintenance_costs(paths.maintenance, cpi_deflators)?,
        repair: read_repair_costs(paths.repair, cpi_deflators)?,
        refueling: read_refueling_costs(paths.refueling, cpi_deflators)?,
        insurance_and_taxes: read_insurance_and_taxes(paths.insurance_and_taxes)?,
    })
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct MaintenanceRaw {
    powertrain_type: FuelingClass,
    slope: f64,
    intercept: f64,
    dollar_basis: u32,
}

impl DollarValued for MaintenanceRaw {
    fn dollar_basis(&self) -> u32 {
        self.dollar_basis
    }

    fn set_dollar_basis(&mut self, year: u32) {
        self.dollar_basis = year;
    }

    fn dollar_values_mut(&mut self) -> Vec<&mut f64> {
        vec![&mut self.slope, &mut self.intercept]
    }
}

/// Read the maintenance cost file
pub fn read_maintenance_costs(file_path: &Path, deflators: &Deflators) -> Result<MaintenanceCosts> {
    let mut rows = read_csv::<MaintenanceRaw>(file_path, &MAINTENANCE_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;

    let mut costs = MaintenanceCosts::new();
    for raw in rows {
        let curve = MaintenanceCurve {
            slope: raw.slope,
            intercept: raw.intercept,
        };
        try_insert(&mut costs, raw.powertrain_type, curve)
            .with_context(|| input_err_msg(file_path))?;
    }

    Ok(costs)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct RepairRaw {
    powertrain_type: FuelingClass,
    repair_type: RepairVehicleType,
    value: String,
    dollar_basis: u32,
}

/// Read the repair cost file
pub fn read_repair_costs(file_path: &Path, deflators: &Deflators) -> Result<RepairCosts> {
    let rows = read_csv::<RepairRaw>(file_path, &REPAIR_TEMPLATE)?;
    read_repair_costs_from_iter(rows.into_iter(), deflators)
        .with_context(|| input_err_msg(file_path))
}

fn read_repair_costs_from_iter<I>(iter: I, deflators: &Deflators) -> Result<RepairCosts>
where
    I: Iterator<Item = RepairRaw>,
{
    let mut expressions = HashMap::new();
    for raw in iter {
        let expression = Expression::compile(&raw.value, REPAIR_VARIABLES)?;
        let scale = deflators.conversion_factor(raw.dollar_basis)?;
        try_insert(
            &mut expressions,
            (raw.powertrain_type, raw.repair_type),
            ScaledExpression::new(expression, scale),
        )?;
    }

    Ok(RepairCosts::new(expressions))
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RefuelType {
    Bev,
    Liquid,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct RefuelingRaw {
    refuel_type: RefuelType,
    operating_veh_type: OperatingVehicleType,
    value: String,
    dollar_basis: u32,
}

/// Read the refueling cost file.
///
/// BEV rows give cost per mile as an expression over `range`. Liquid rows give a constant cost
/// per gallon.
pub fn read_refueling_costs(file_path: &Path, deflators: &Deflators) -> Result<RefuelingCosts> {
    let rows = read_csv::<RefuelingRaw>(file_path, &REFUELING_TEMPLATE)?;
    read_refueling_costs_from_iter(rows.into_iter(), deflators)
        .with_context(|| input_err_msg(file_path))
}

fn read_refueling_costs_from_iter<I>(iter: I, deflators: &Deflators) -> Result<RefuelingCosts>
where
    I: Iterator<Item = RefuelingRaw>,
{
    let mut costs = RefuelingCosts::default();
    for raw in iter {
        let expression = Expression::compile(&raw.value, REFUELING_VARIABLES)?;
        let scale = deflators.conversion_factor(raw.dollar_basis)?;
        match raw.refuel_type {
            RefuelType::Bev => try_insert(
                &mut costs.bev,
                raw.operating_veh_type,
                ScaledExpression::new(expression, scale),
            )?,
            RefuelType::Liquid => {
                ensure!(
                    expression.is_constant(),
                    "Liquid refueling cost for {} must be a number",
                    raw.operating_veh_type
                );
                let per_gallon = expression.eval(&[0.0]) * scale;
                try_insert(&mut costs.liquid, raw.operating_veh_type, per_gallon)?;
            }
        }
    }

    Ok(costs)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct InsuranceRaw {
    item: InsuranceItem,
    body_style: String,
    value: String,
}

/// Read the insurance and taxes file. A body style of `all` applies to every body style.
pub fn read_insurance_and_taxes(file_path: &Path) -> Result<InsuranceAndTaxes> {
    let rows = read_csv::<InsuranceRaw>(file_path, &INSURANCE_TEMPLATE)?;
    read_insurance_from_iter(rows.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_insurance_from_iter<I>(iter: I) -> Result<InsuranceAndTaxes>
where
    I: Iterator<Item = InsuranceRaw>,
{
    let mut expressions = HashMap::new();
    for raw in iter {
        let body_style = match raw.body_style.as_str() {
            "all" => None,
            other => Some(parse_label::<BodyStyle>(other)?),
        };
        let expression = Expression::compile(&raw.value, INSURANCE_VARIABLES)?;
        try_insert(&mut expressions, (raw.item, body_style), expression)?;
    }

    for item in [
        InsuranceItem::DepreciationRate,
        InsuranceItem::InsuranceRate,
        InsuranceItem::SalesTaxRate,
    ] {
        ensure!(
            expressions.keys().any(|(key_item, _)| *key_item == item),
            "No values given for {item}"
        );
    }

    Ok(InsuranceAndTaxes::new(expressions))
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct PowertrainCostRaw {
    powertrain_type: String,
    item: String,
    value: String,
    dollar_basis: u32,
}

/// Read the battery offsets from a session's powertrain cost file. Other items are ignored.
pub fn read_battery_offsets(
    file_path: &Path,
    fev: bool,
    deflators: &Deflators,
) -> Result<BatteryOffsets> {
    let template = if fev {
        &POWERTRAIN_COST_FEV_TEMPLATE
    } else {
        &POWERTRAIN_COST_TEMPLATE
    };
    let rows = read_csv::<PowertrainCostRaw>(file_path, template)?;
    read_battery_offsets_from_iter(rows.into_iter(), deflators)
        .with_context(|| input_err_msg(file_path))
}

fn read_battery_offsets_from_iter<I>(iter: I, deflators: &Deflators) -> Result<BatteryOffsets>
where
    I: Iterator<Item = PowertrainCostRaw>,
{
    let mut offsets = HashMap::new();
    for raw in iter.filter(|raw| raw.item == "battery_offset") {
        let powertrain: FuelingClass = parse_label(&raw.powertrain_type)?;
        let scale = deflators.conversion_factor(raw.dollar_basis)?;
        let by_year = parse_dollars_per_kwh(&raw.value)?
            .into_iter()
            .map(|(year, value)| (year, value * scale))
            .collect();
        try_insert(&mut offsets, powertrain, by_year)?;
    }

    Ok(BatteryOffsets::new(offsets))
}

/// Parse a literal such as `{'dollars_per_kwh': {2023: 0, 2024: 35}}`
fn parse_dollars_per_kwh(literal: &str) -> Result<BTreeMap<u32, f64>> {
    let invalid = || format!("Invalid battery offset: {literal}");
    let inner = literal
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .with_context(invalid)?;
    let (key, years) = inner.split_once(':').with_context(invalid)?;
    ensure!(
        key.trim().trim_matches(|c: char| c == '\'' || c == '"') == "dollars_per_kwh",
        "Battery offset must be given as dollars_per_kwh: {literal}"
    );
    let years = years
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .with_context(invalid)?;

    let mut by_year = BTreeMap::new();
    for entry in years.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (year, value) = entry.split_once(':').with_context(invalid)?;
        let year: u32 = year.trim().parse().with_context(invalid)?;
        let value: f64 = value.trim().parse().with_context(invalid)?;
        ensure!(
            by_year.insert(year, value).is_none(),
            "Year {year} given more than once in battery offset"
        );
    }

    Ok(by_year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, bev, deflators, vehicle, write_template_csv};
    use crate::fleet::Vehicle;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    #[test]
    fn test_parse_dollars_per_kwh() {
        let by_year = parse_dollars_per_kwh("{'dollars_per_kwh': {2023: 0, 2024: 35.5}}").unwrap();
        assert_eq!(by_year, BTreeMap::from([(2023, 0.0), (2024, 35.5)]));
        assert!(parse_dollars_per_kwh("{'dollars': {2023: 0}}").is_err());
        assert!(parse_dollars_per_kwh("35").is_err());
    }

    #[rstest]
    fn test_read_battery_offsets(deflators: Deflators, mut bev: Vehicle) {
        let rows = [
            PowertrainCostRaw {
                powertrain_type: "BEV".into(),
                item: "battery_offset".into(),
                value: "{'dollars_per_kwh': {2025: 27}}".into(),
                dollar_basis: 2018,
            },
            PowertrainCostRaw {
                powertrain_type: "ICE".into(),
                item: "engine_cost".into(),
                value: "100 * liters".into(),
                dollar_basis: 2020,
            },
        ];
        let offsets = read_battery_offsets_from_iter(rows.into_iter(), &deflators).unwrap();
        bev.battery_kwh = 10.0;
        assert_approx_eq!(f64, offsets.credit_per_vehicle(&bev), 300.0);
    }

    #[rstest]
    fn test_read_repair_costs_scaled(deflators: Deflators, vehicle: Vehicle) {
        let rows = [RepairRaw {
            powertrain_type: FuelingClass::Ice,
            repair_type: RepairVehicleType::Car,
            value: "0.009 * (age + 1)".into(),
            dollar_basis: 2018,
        }];
        let costs = read_repair_costs_from_iter(rows.into_iter(), &deflators).unwrap();
        assert_approx_eq!(f64, costs.cost_per_mile(&vehicle, 0).unwrap(), 0.01);
    }

    #[rstest]
    fn test_read_repair_costs_bad_expression(deflators: Deflators) {
        let rows = [RepairRaw {
            powertrain_type: FuelingClass::Ice,
            repair_type: RepairVehicleType::Car,
            value: "odometer * 2".into(),
            dollar_basis: 2020,
        }];
        assert_error!(
            read_repair_costs_from_iter(rows.into_iter(), &deflators),
            "Invalid expression: odometer * 2"
        );
    }

    #[rstest]
    fn test_read_refueling_costs(deflators: Deflators) {
        let rows = [
            RefuelingRaw {
                refuel_type: RefuelType::Bev,
                operating_veh_type: OperatingVehicleType::Car,
                value: "9 / range".into(),
                dollar_basis: 2018,
            },
            RefuelingRaw {
                refuel_type: RefuelType::Liquid,
                operating_veh_type: OperatingVehicleType::Car,
                value: "0.18".into(),
                dollar_basis: 2018,
            },
        ];
        let costs = read_refueling_costs_from_iter(rows.into_iter(), &deflators).unwrap();
        assert_approx_eq!(
            f64,
            costs
                .bev_cost_per_mile(OperatingVehicleType::Car, 100.0)
                .unwrap(),
            0.1
        );
        assert_approx_eq!(
            f64,
            costs.liquid_cost_per_gallon(OperatingVehicleType::Car).unwrap(),
            0.2
        );
    }

    #[rstest]
    fn test_read_refueling_liquid_must_be_constant(deflators: Deflators) {
        let rows = [RefuelingRaw {
            refuel_type: RefuelType::Liquid,
            operating_veh_type: OperatingVehicleType::Suv,
            value: "range / 100".into(),
            dollar_basis: 2020,
        }];
        assert_error!(
            read_refueling_costs_from_iter(rows.into_iter(), &deflators),
            "Liquid refueling cost for suv must be a number"
        );
    }

    #[test]
    fn test_read_insurance_and_taxes() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "insurance.csv",
            "insurance_and_taxes_cost_factors",
            "0.1",
            "item,body_style,value\n\
            depreciation_rate,all,0.1\n\
            insurance_rate,all,0.02 + 0.0 * age\n\
            sales_tax_rate,all,0.05\n\
            sales_tax_rate,pickup,0.06",
        );
        let table = read_insurance_and_taxes(&file_path).unwrap();
        assert_eq!(
            table
                .rate(InsuranceItem::SalesTaxRate, BodyStyle::CuvSuv, 0.0, 0)
                .unwrap(),
            0.05
        );
    }

    #[test]
    fn test_read_insurance_missing_item() {
        let rows = [InsuranceRaw {
            item: InsuranceItem::DepreciationRate,
            body_style: "all".into(),
            value: "0.1".into(),
        }];
        assert_error!(
            read_insurance_from_iter(rows.into_iter()),
            "No values given for insurance_rate"
        );
    }
}

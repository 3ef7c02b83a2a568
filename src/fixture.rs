//! Fixtures for tests

use crate::cost_factors::{
    CapDollarsPerTon, CapValuation, CongestionNoise, CostFactors, CriteriaCostFactors,
    EnergySecurityFactors, GhgDollarsPerTon, RateLabel, ScghgCostFactors, ScghgScope,
};
use crate::deflators::Deflators;
use crate::emission_rates::{
    EguCase, EguCases, EguRates, RateCurve, RateCurves, RefineryRates, VehicleEmissionRates,
};
use crate::expression::Expression;
use crate::fleet::{
    BodyStyle, EmissionFuel, FuelingClass, InUseFuel, OperatingVehicleType, RegClass,
    RepairVehicleType, Vehicle, VehicleMap,
};
use crate::fuels::{ContextFuelPrices, FuelPrice, OnroadFuel, OnroadFuels};
use crate::input::general::GeneralInputs;
use crate::legacy::{FixedByAge, LegacyFleetRow};
use crate::model::parameters::{
    BatchParameters, CostAccrual, ElectricityPricesSource, FileFormat, GhgScope,
};
use crate::rates::{StartYearMap, YearSeries};
use crate::safety::{FatalityRates, SafetyValue, SafetyValues};
use crate::values::PollutantValues;
use crate::vehicle_costs::{
    INSURANCE_VARIABLES, InsuranceAndTaxes, InsuranceItem, MaintenanceCurve, REFUELING_VARIABLES,
    REPAIR_VARIABLES, RefuelingCosts, RepairCosts, ScaledExpression, VehicleCostTables,
};
use indexmap::indexmap;
use map_macro::hash_map;
use rstest::fixture;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// Write an input file with the template header row followed by `body`
pub fn write_template_csv(
    dir: &Path,
    file_name: &str,
    template_name: &str,
    version: &str,
    body: &str,
) -> PathBuf {
    let file_path = dir.join(file_name);
    let contents = format!(
        "input_template_name:,{template_name},input_template_version:,{version}\n{body}\n"
    );
    fs::write(&file_path, contents).unwrap();
    file_path
}

#[fixture]
pub fn deflators() -> Deflators {
    Deflators::new(hash_map! {2018 => 0.9, 2019 => 0.95, 2020 => 1.0, 2022 => 1.1}).unwrap()
}

#[fixture]
pub fn vehicle() -> Vehicle {
    Vehicle {
        id: "vehicle_1".into(),
        model_year: 2025,
        manufacturer_id: "consolidated_OEM".into(),
        name: "Sedan".into(),
        reg_class_id: RegClass::Car,
        base_year_reg_class_id: "car".into(),
        context_size_class: "Midsize".into(),
        body_style: BodyStyle::Sedan,
        in_use_fuel_id: InUseFuel::single("pump gasoline"),
        market_class_id: "sedan_wagon.ICE".into(),
        fueling_class: FuelingClass::Ice,
        base_year_powertrain_type: "ICE".into(),
        footprint_ft2: 46.0,
        base_year_curbweight_lbs: 3500.0,
        curbweight_lbs: 3500.0,
        onroad_direct_co2e_grams_per_mile: 300.0,
        onroad_direct_kwh_per_mile: 0.0,
        new_vehicle_mfr_cost_dollars: 25000.0,
        price_dollars: 30000.0,
        price_modification_dollars: 0.0,
        battery_cost: 0.0,
        battery_kwh: 0.0,
        onroad_charge_depleting_range_mi: 0.0,
        emission_fuel: EmissionFuel::Gasoline,
        is_legacy: false,
    }
}

#[fixture]
pub fn bev(vehicle: Vehicle) -> Vehicle {
    Vehicle {
        id: "bev_1".into(),
        name: "Sedan BEV".into(),
        in_use_fuel_id: InUseFuel::single("US electricity"),
        market_class_id: "sedan_wagon.BEV".into(),
        fueling_class: FuelingClass::Bev,
        base_year_powertrain_type: "BEV".into(),
        curbweight_lbs: 4000.0,
        onroad_direct_co2e_grams_per_mile: 0.0,
        onroad_direct_kwh_per_mile: 0.3,
        new_vehicle_mfr_cost_dollars: 32000.0,
        price_dollars: 38000.0,
        battery_cost: 9000.0,
        battery_kwh: 75.0,
        onroad_charge_depleting_range_mi: 250.0,
        emission_fuel: EmissionFuel::Electricity,
        ..vehicle
    }
}

#[fixture]
pub fn vehicles(vehicle: Vehicle, bev: Vehicle) -> VehicleMap {
    indexmap! {
        vehicle.id.clone() => Rc::new(vehicle),
        bev.id.clone() => Rc::new(bev),
    }
}

#[fixture]
pub fn onroad_fuels() -> OnroadFuels {
    let fuel = |unit: &str, co2e: f64, efficiency: f64| {
        StartYearMap::new(BTreeMap::from([(
            2010,
            OnroadFuel {
                unit: unit.into(),
                direct_co2e_grams_per_unit: co2e,
                transmission_efficiency: efficiency,
            },
        )]))
        .unwrap()
    };

    OnroadFuels::new(hash_map! {
        "pump gasoline".to_string() => fuel("gallon", 8887.0, 1.0),
        "pump diesel".to_string() => fuel("gallon", 10180.0, 1.0),
        "US electricity".to_string() => fuel("kWh", 0.0, 0.935),
    })
}

#[fixture]
pub fn context_fuel_prices() -> ContextFuelPrices {
    let series = |retail_2025: f64, pretax_2025: f64| {
        YearSeries::new(BTreeMap::from([
            (
                2025,
                FuelPrice {
                    retail: retail_2025,
                    pretax: pretax_2025,
                },
            ),
            (
                2035,
                FuelPrice {
                    retail: retail_2025 + 0.5,
                    pretax: pretax_2025 + 0.5,
                },
            ),
        ]))
        .unwrap()
    };

    ContextFuelPrices::new(hash_map! {
        "pump gasoline".to_string() => series(3.0, 2.5),
        "pump diesel".to_string() => series(3.5, 3.0),
    })
}

#[fixture]
pub fn electricity_prices() -> YearSeries<FuelPrice> {
    YearSeries::new(BTreeMap::from([
        (
            2025,
            FuelPrice {
                retail: 0.13,
                pretax: 0.12,
            },
        ),
        (
            2035,
            FuelPrice {
                retail: 0.15,
                pretax: 0.14,
            },
        ),
    ]))
    .unwrap()
}

#[fixture]
pub fn vehicle_emission_rates() -> VehicleEmissionRates {
    let gasoline: RateCurves = HashMap::from([
        (
            "nox_exhaust_grams_per_mile".to_string(),
            RateCurve::Linear {
                slope: 0.001,
                intercept: 0.01,
            },
        ),
        (
            "pm25_exhaust_grams_per_mile".to_string(),
            RateCurve::ByAge(BTreeMap::from([(0, 0.002), (10, 0.004)])),
        ),
        (
            "benzene_evap_permeation_grams_per_gallon".to_string(),
            RateCurve::Linear {
                slope: 0.0,
                intercept: 0.05,
            },
        ),
    ]);
    let electricity: RateCurves = HashMap::from([
        (
            "pm25_brakewear_grams_per_mile".to_string(),
            RateCurve::Linear {
                slope: 0.0,
                intercept: 0.003,
            },
        ),
        (
            "pm25_tirewear_grams_per_mile".to_string(),
            RateCurve::Linear {
                slope: 0.0,
                intercept: 0.002,
            },
        ),
    ]);
    let table = |curves: RateCurves| StartYearMap::new(BTreeMap::from([(2020, curves)])).unwrap();

    VehicleEmissionRates::new(HashMap::from([
        (
            ("passenger car".to_string(), RegClass::Car, EmissionFuel::Gasoline),
            table(gasoline),
        ),
        (
            ("passenger car".to_string(), RegClass::Car, EmissionFuel::Electricity),
            table(electricity),
        ),
    ]))
}

#[fixture]
pub fn egu_rates() -> EguRates {
    let case = |kwh_generation_us: f64, nox: f64, co2: f64| EguCase {
        kwh_generation_us,
        grams_per_kwh: PollutantValues {
            nox,
            co2,
            ..Default::default()
        },
    };
    let cases = EguCases {
        low_demand: case(1000.0, 0.5, 400.0),
        high_demand: case(2000.0, 0.3, 300.0),
    };

    EguRates::new(YearSeries::new(BTreeMap::from([(2025, cases)])).unwrap())
}

#[fixture]
pub fn refinery_rates() -> RefineryRates {
    let series = |co2: f64, nox: f64| {
        YearSeries::new(BTreeMap::from([(
            2020,
            PollutantValues {
                co2,
                nox,
                voc: 0.5,
                ..Default::default()
            },
        )]))
        .unwrap()
    };

    RefineryRates::new(series(2000.0, 1.0), series(1500.0, 0.8))
}

#[fixture]
pub fn energy_security() -> YearSeries<EnergySecurityFactors> {
    YearSeries::new(BTreeMap::from([
        (
            2020,
            EnergySecurityFactors {
                dollars_per_bbl: 3.0,
                oil_import_reduction_share: 0.9,
            },
        ),
        (
            2030,
            EnergySecurityFactors {
                dollars_per_bbl: 4.0,
                oil_import_reduction_share: 0.9,
            },
        ),
    ]))
    .unwrap()
}

#[fixture]
pub fn general_inputs() -> GeneralInputs {
    GeneralInputs {
        grams_per_us_ton: 907_185.0,
        grams_per_metric_ton: 1_000_000.0,
        gal_per_bbl: 42.0,
        e0_in_retail_gasoline: 0.9,
        e0_energy_density_ratio: 0.95,
        diesel_energy_density_ratio: 1.0,
        gwp_ch4: 25.0,
        gwp_n2o: 298.0,
        years_in_consumer_view_1: 5,
        years_in_consumer_view_2: 8,
        social_discount_rates: vec![0.03, 0.07],
        include_powertrain_type_in_consumer_cost_view: true,
        fuel_reduction_leading_to_reduced_domestic_refining: 0.5,
    }
}

#[fixture]
pub fn legacy_fleet_rows() -> Vec<LegacyFleetRow> {
    vec![LegacyFleetRow {
        model_year: 2018,
        age: 6,
        calendar_year: 2024,
        reg_class_id: RegClass::Car,
        body_style: BodyStyle::Sedan,
        market_class_id: "sedan_wagon.ICE".into(),
        in_use_fuel_id: InUseFuel::single("pump gasoline"),
        registered_count: 1000.0,
        miles_per_gallon: 30.0,
        kwh_per_mile: 0.0,
        curbweight_lbs: 3300.0,
        transaction_price_dollars: 30000.0,
    }]
}

/// Build a [`FixedByAge`] table for the `sedan_wagon.ICE` market class
fn sedan_by_age(values: BTreeMap<u32, f64>) -> FixedByAge {
    FixedByAge::new(hash_map! {
        "sedan_wagon.ICE".to_string() =>
            StartYearMap::new(BTreeMap::from([(2000, values)])).unwrap(),
    })
}

#[fixture]
pub fn reregistration() -> FixedByAge {
    sedan_by_age(BTreeMap::from([
        (6, 0.85),
        (7, 0.8),
        (8, 0.7),
        (9, 0.6),
    ]))
}

#[fixture]
pub fn annual_vmt_by_age() -> FixedByAge {
    let mut values: BTreeMap<u32, f64> = (0..=6).map(|age| (age, 10000.0)).collect();
    values.insert(7, 9000.0);
    values.insert(8, 8500.0);
    values.insert(9, 8000.0);
    sedan_by_age(values)
}

#[fixture]
pub fn fatality_rates() -> FatalityRates {
    FatalityRates::new(
        StartYearMap::new(BTreeMap::from([(
            2000,
            BTreeMap::from([(0, 8.0), (10, 12.0)]),
        )]))
        .unwrap(),
    )
}

#[fixture]
pub fn safety_values() -> SafetyValues {
    hash_map! {
        BodyStyle::Sedan => SafetyValue {
            threshold_lbs: 3000.0,
            change_per_100_lbs_below: 0.5,
            change_per_100_lbs_at_or_above: 0.3,
        },
        BodyStyle::CuvSuv => SafetyValue {
            threshold_lbs: 4000.0,
            change_per_100_lbs_below: 0.3,
            change_per_100_lbs_at_or_above: 0.1,
        },
        BodyStyle::Pickup => SafetyValue {
            threshold_lbs: 5000.0,
            change_per_100_lbs_below: 0.2,
            change_per_100_lbs_at_or_above: -0.1,
        },
    }
}

#[fixture]
pub fn vehicle_cost_tables() -> VehicleCostTables {
    let scaled = |source: &str, variables: &'static [&'static str]| {
        ScaledExpression::new(Expression::compile(source, variables).unwrap(), 1.0)
    };
    let insurance = |source: &str| Expression::compile(source, INSURANCE_VARIABLES).unwrap();

    VehicleCostTables {
        maintenance: hash_map! {
            FuelingClass::Ice => MaintenanceCurve { slope: 1e-7, intercept: 0.02 },
            FuelingClass::Bev => MaintenanceCurve { slope: 6e-8, intercept: 0.012 },
        },
        repair: RepairCosts::new(hash_map! {
            (FuelingClass::Ice, RepairVehicleType::Car) =>
                scaled("0.01 * (age + 1)", REPAIR_VARIABLES),
            (FuelingClass::Bev, RepairVehicleType::Car) =>
                scaled("0.008 * (age + 1)", REPAIR_VARIABLES),
        }),
        refueling: RefuelingCosts {
            bev: hash_map! {
                OperatingVehicleType::Car => scaled("10 / range", REFUELING_VARIABLES),
            },
            liquid: hash_map! {OperatingVehicleType::Car => 0.2},
        },
        insurance_and_taxes: InsuranceAndTaxes::new(hash_map! {
            (InsuranceItem::SalesTaxRate, Some(BodyStyle::Sedan)) => insurance("0.05"),
            (InsuranceItem::SalesTaxRate, None) => insurance("0.06"),
            (InsuranceItem::DepreciationRate, None) => insurance("0.1"),
            (InsuranceItem::InsuranceRate, None) => insurance("0.02"),
        }),
    }
}

#[fixture]
pub fn cost_factors(energy_security: YearSeries<EnergySecurityFactors>) -> CostFactors {
    let valuation = CapValuation {
        study: "Wu".into(),
        rate: RateLabel::new("0.03").unwrap(),
    };
    let cap = |pm25: f64, sox: f64, nox: f64| {
        YearSeries::new(BTreeMap::from([(2020, CapDollarsPerTon { pm25, sox, nox })])).unwrap()
    };
    let criteria = CriteriaCostFactors::new(
        [
            ("car pump gasoline", cap(500_000.0, 100_000.0, 10_000.0)),
            ("truck pump gasoline", cap(450_000.0, 90_000.0, 9_000.0)),
            ("car US electricity", cap(500_000.0, 100_000.0, 10_000.0)),
            ("egu", cap(100_000.0, 50_000.0, 8_000.0)),
            ("refinery", cap(300_000.0, 70_000.0, 9_000.0)),
        ]
        .into_iter()
        .map(|(source, series)| ((source.to_string(), valuation.clone()), series))
        .collect(),
    );

    let ghg = |co2: f64| {
        YearSeries::new(BTreeMap::from([
            (
                2025,
                GhgDollarsPerTon {
                    co2,
                    ch4: 20.0 * co2,
                    n2o: 250.0 * co2,
                },
            ),
            (
                2035,
                GhgDollarsPerTon {
                    co2: 1.2 * co2,
                    ch4: 24.0 * co2,
                    n2o: 300.0 * co2,
                },
            ),
        ]))
        .unwrap()
    };
    let scghg = ScghgCostFactors::new(hash_map! {
        (ScghgScope::Global, RateLabel::new("0.025").unwrap()) => ghg(200.0),
        (ScghgScope::Global, RateLabel::new("0.05").unwrap()) => ghg(80.0),
        (ScghgScope::Domestic, RateLabel::new("0.025").unwrap()) => ghg(20.0),
    });

    CostFactors {
        criteria,
        scghg,
        energy_security,
        congestion_noise: hash_map! {
            RegClass::Car => CongestionNoise {
                congestion_dollars_per_mile: 0.06,
                noise_dollars_per_mile: 0.001,
            },
            RegClass::Truck => CongestionNoise {
                congestion_dollars_per_mile: 0.07,
                noise_dollars_per_mile: 0.001,
            },
        },
    }
}

#[fixture]
pub fn batch_parameters() -> BatchParameters {
    BatchParameters {
        batch_name: "test_batch".into(),
        vehicles_base_year: 2024,
        analysis_initial_year: 2025,
        analysis_final_year: 2035,
        cost_accrual: CostAccrual::EndOfYear,
        discount_values_to_year: 2025,
        vmt_rebound_rate_ice: -0.1,
        vmt_rebound_rate_bev: 0.0,
        net_benefit_ghg_scope: GhgScope::Global,
        electricity_prices_source: ElectricityPricesSource::Aeo,
        powertrain_costs_fev: false,
        save_vehicle_safety_effects_files: false,
        save_vehicle_physical_effects_files: false,
        save_vehicle_cost_effects_files: false,
        file_format: FileFormat::Csv,
    }
}

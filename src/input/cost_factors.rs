//! Code for reading the criteria, SC-GHG, energy security and congestion/noise cost factors.
use super::*;
use crate::cost_factors::{
    CapDollarsPerTon, CapValuation, CongestionNoise, CongestionNoiseFactors, CostFactors,
    CriteriaCostFactors, EnergySecurityFactors, GhgDollarsPerTon, RateLabel, ScghgCostFactors,
    ScghgScope,
};
use crate::deflators::{Deflators, DollarValued, adjust_dollars};
use crate::fleet::RegClass;
use crate::rates::YearSeries;
use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Template for the criteria air pollutant cost factors file
pub const CRITERIA_TEMPLATE: Template = Template {
    name: "cost_factors_criteria",
    version: "0.1",
    columns: &[
        "calendar_year",
        "source_id",
        "study",
        "rate",
        "pm25_dollars_per_uston",
        "sox_dollars_per_uston",
        "nox_dollars_per_uston",
        "dollar_basis",
    ],
};

/// Template for the social cost of greenhouse gases file
pub const SCGHG_TEMPLATE: Template = Template {
    name: "cost_factors_scghg",
    version: "0.1",
    columns: &[
        "calendar_year",
        "scope",
        "rate",
        "co2_dollars_per_metricton",
        "ch4_dollars_per_metricton",
        "n2o_dollars_per_metricton",
        "dollar_basis",
    ],
};

/// Template for the energy security cost factors file
pub const ENERGY_SECURITY_TEMPLATE: Template = Template {
    name: "cost_factors_energysecurity",
    version: "0.1",
    columns: &[
        "calendar_year",
        "dollars_per_bbl",
        "oil_import_reduction_as_percent_of_total_oil_demand_reduction",
        "dollar_basis",
    ],
};

/// Template for the congestion and noise cost factors file
pub const CONGESTION_NOISE_TEMPLATE: Template = Template {
    name: "cost_factors_congestion_noise",
    version: "0.1",
    columns: &[
        "reg_class_id",
        "congestion_cost_dollars_per_mile",
        "noise_cost_dollars_per_mile",
        "dollar_basis",
    ],
};

/// Paths to the cost factor files
#[derive(Debug, Clone, Copy)]
pub struct CostFactorPaths<'a> {
    /// Criteria air pollutant cost factors
    pub criteria: &'a Path,
    /// Social cost of greenhouse gases
    pub scghg: &'a Path,
    /// Energy security
    pub energy_security: &'a Path,
    /// Congestion and noise
    pub congestion_noise: &'a Path,
}

/// Read every cost factors file, converting to analysis-basis dollars with the IP deflators
pub fn read_cost_factors(paths: CostFactorPaths, deflators: &Deflators) -> Result<CostFactors> {
    let criteria = read_criteria_cost_factors(paths.criteria, deflators)?;
    if !criteria.enabled() {
        info!("Criteria cost factors are all zero: health effects will not be valued");
    }

    Ok(CostFactors {
        criteria,
        scghg: read_scghg_cost_factors(paths.scghg, deflators)?,
        energy_security: read_energy_security(paths.energy_security, deflators)?,
        congestion_noise: read_congestion_noise(paths.congestion_noise, deflators)?,
    })
}

/// Implement [`DollarValued`] for a raw row type with a `dollar_basis` field
macro_rules! impl_dollar_valued {
    ($raw:ty, $($field:ident),+) => {
        impl DollarValued for $raw {
            fn dollar_basis(&self) -> u32 {
                self.dollar_basis
            }

            fn set_dollar_basis(&mut self, year: u32) {
                self.dollar_basis = year;
            }

            fn dollar_values_mut(&mut self) -> Vec<&mut f64> {
                vec![$(&mut self.$field),+]
            }
        }
    };
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct CriteriaRaw {
    calendar_year: u32,
    source_id: String,
    study: String,
    rate: String,
    pm25_dollars_per_uston: f64,
    sox_dollars_per_uston: f64,
    nox_dollars_per_uston: f64,
    dollar_basis: u32,
}

impl_dollar_valued!(
    CriteriaRaw,
    pm25_dollars_per_uston,
    sox_dollars_per_uston,
    nox_dollars_per_uston
);

/// Read the criteria air pollutant cost factors file
pub fn read_criteria_cost_factors(
    file_path: &Path,
    deflators: &Deflators,
) -> Result<CriteriaCostFactors> {
    let mut rows = read_csv::<CriteriaRaw>(file_path, &CRITERIA_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;
    read_criteria_from_iter(rows.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_criteria_from_iter<I>(iter: I) -> Result<CriteriaCostFactors>
where
    I: Iterator<Item = CriteriaRaw>,
{
    let mut points: HashMap<(String, CapValuation), BTreeMap<u32, CapDollarsPerTon>> =
        HashMap::new();
    for raw in iter {
        let valuation = CapValuation {
            study: raw.study,
            rate: RateLabel::new(&raw.rate)?,
        };
        let values = CapDollarsPerTon {
            pm25: raw.pm25_dollars_per_uston,
            sox: raw.sox_dollars_per_uston,
            nox: raw.nox_dollars_per_uston,
        };
        ensure!(
            points
                .entry((raw.source_id.clone(), valuation))
                .or_default()
                .insert(raw.calendar_year, values)
                .is_none(),
            "Criteria cost factors for source '{}' in {} given more than once",
            raw.source_id,
            raw.calendar_year
        );
    }

    let factors = points
        .into_iter()
        .map(|(key, points)| Ok((key, YearSeries::new(points)?)))
        .collect::<Result<_>>()?;

    Ok(CriteriaCostFactors::new(factors))
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct ScghgRaw {
    calendar_year: u32,
    scope: ScghgScope,
    rate: String,
    co2_dollars_per_metricton: f64,
    ch4_dollars_per_metricton: f64,
    n2o_dollars_per_metricton: f64,
    dollar_basis: u32,
}

impl_dollar_valued!(
    ScghgRaw,
    co2_dollars_per_metricton,
    ch4_dollars_per_metricton,
    n2o_dollars_per_metricton
);

/// Read the social cost of greenhouse gases file
pub fn read_scghg_cost_factors(
    file_path: &Path,
    deflators: &Deflators,
) -> Result<ScghgCostFactors> {
    let mut rows = read_csv::<ScghgRaw>(file_path, &SCGHG_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;
    read_scghg_from_iter(rows.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_scghg_from_iter<I>(iter: I) -> Result<ScghgCostFactors>
where
    I: Iterator<Item = ScghgRaw>,
{
    let mut points: HashMap<(ScghgScope, RateLabel), BTreeMap<u32, GhgDollarsPerTon>> =
        HashMap::new();
    for raw in iter {
        let values = GhgDollarsPerTon {
            co2: raw.co2_dollars_per_metricton,
            ch4: raw.ch4_dollars_per_metricton,
            n2o: raw.n2o_dollars_per_metricton,
        };
        ensure!(
            points
                .entry((raw.scope, RateLabel::new(&raw.rate)?))
                .or_default()
                .insert(raw.calendar_year, values)
                .is_none(),
            "SC-GHG cost factors for {} scope at rate {} in {} given more than once",
            raw.scope,
            raw.rate,
            raw.calendar_year
        );
    }

    let factors = points
        .into_iter()
        .map(|(key, points)| Ok((key, YearSeries::new(points)?)))
        .collect::<Result<_>>()?;

    Ok(ScghgCostFactors::new(factors))
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct EnergySecurityRaw {
    calendar_year: u32,
    dollars_per_bbl: f64,
    #[serde(deserialize_with = "deserialise_proportion")]
    oil_import_reduction_as_percent_of_total_oil_demand_reduction: f64,
    dollar_basis: u32,
}

impl_dollar_valued!(EnergySecurityRaw, dollars_per_bbl);

/// Read the energy security cost factors file
pub fn read_energy_security(
    file_path: &Path,
    deflators: &Deflators,
) -> Result<YearSeries<EnergySecurityFactors>> {
    let mut rows = read_csv::<EnergySecurityRaw>(file_path, &ENERGY_SECURITY_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;

    let mut points = BTreeMap::new();
    for raw in rows {
        let factors = EnergySecurityFactors {
            dollars_per_bbl: raw.dollars_per_bbl,
            oil_import_reduction_share: raw
                .oil_import_reduction_as_percent_of_total_oil_demand_reduction,
        };
        ensure!(
            points.insert(raw.calendar_year, factors).is_none(),
            "{}: energy security factors for {} given more than once",
            file_path.display(),
            raw.calendar_year
        );
    }

    YearSeries::new(points).with_context(|| input_err_msg(file_path))
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct CongestionNoiseRaw {
    reg_class_id: RegClass,
    congestion_cost_dollars_per_mile: f64,
    noise_cost_dollars_per_mile: f64,
    dollar_basis: u32,
}

impl_dollar_valued!(
    CongestionNoiseRaw,
    congestion_cost_dollars_per_mile,
    noise_cost_dollars_per_mile
);

/// Read the congestion and noise cost factors file
pub fn read_congestion_noise(
    file_path: &Path,
    deflators: &Deflators,
) -> Result<CongestionNoiseFactors> {
    let mut rows = read_csv::<CongestionNoiseRaw>(file_path, &CONGESTION_NOISE_TEMPLATE)?;
    adjust_dollars(deflators, &mut rows).with_context(|| input_err_msg(file_path))?;

    let mut factors = CongestionNoiseFactors::new();
    for raw in rows {
        let value = CongestionNoise {
            congestion_dollars_per_mile: raw.congestion_cost_dollars_per_mile,
            noise_dollars_per_mile: raw.noise_cost_dollars_per_mile,
        };
        try_insert(&mut factors, raw.reg_class_id, value)
            .with_context(|| input_err_msg(file_path))?;
    }

    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{deflators, write_template_csv};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    fn criteria_row(year: u32, pm25: f64, dollar_basis: u32) -> CriteriaRaw {
        CriteriaRaw {
            calendar_year: year,
            source_id: "egu".into(),
            study: "Wu".into(),
            rate: "0.03".into(),
            pm25_dollars_per_uston: pm25,
            sox_dollars_per_uston: 0.0,
            nox_dollars_per_uston: 0.0,
            dollar_basis,
        }
    }

    #[rstest]
    fn test_criteria_adjusted_then_interpolated(deflators: Deflators) {
        let mut rows = vec![criteria_row(2020, 90.0, 2018), criteria_row(2030, 200.0, 2020)];
        adjust_dollars(&deflators, &mut rows).unwrap();
        let factors = read_criteria_from_iter(rows.into_iter()).unwrap();
        let valuation = &factors.valuations()[0];
        let values = factors.get("egu", valuation, 2025).unwrap();
        assert_approx_eq!(f64, values.pm25, 150.0);
    }

    #[test]
    fn test_criteria_duplicate_year() {
        let rows = [criteria_row(2020, 1.0, 2020), criteria_row(2020, 2.0, 2020)];
        assert!(read_criteria_from_iter(rows.into_iter()).is_err());
    }

    #[rstest]
    fn test_read_scghg(deflators: Deflators) {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "scghg.csv",
            "cost_factors_scghg",
            "0.1",
            "calendar_year,scope,rate,co2_dollars_per_metricton,ch4_dollars_per_metricton,\
            n2o_dollars_per_metricton,dollar_basis\n\
            2020,global,0.02,180,1600,50000,2020\n\
            2020,domestic,0.02,18,160,5000,2020\n\
            2020,global,0.03,90,900,30000,2018",
        );
        let factors = read_scghg_cost_factors(&file_path, &deflators).unwrap();
        let rates = factors.rates(ScghgScope::Global);
        assert_eq!(rates.len(), 2);
        let values = factors.get(ScghgScope::Global, &rates[1], 2050).unwrap();
        assert_approx_eq!(f64, values.co2, 100.0);
        assert_eq!(factors.rates(ScghgScope::Domestic).len(), 1);
    }

    #[rstest]
    fn test_read_congestion_noise(deflators: Deflators) {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "congestion.csv",
            "cost_factors_congestion_noise",
            "0.1",
            "reg_class_id,congestion_cost_dollars_per_mile,noise_cost_dollars_per_mile,dollar_basis\n\
            car,0.063,0.0009,2018\n\
            truck,0.056,0.0009,2018",
        );
        let factors = read_congestion_noise(&file_path, &deflators).unwrap();
        assert_approx_eq!(
            f64,
            factors[&RegClass::Car].congestion_dollars_per_mile,
            0.07
        );
        assert!(!factors.contains_key(&RegClass::Mediumduty));
    }

    #[rstest]
    fn test_read_energy_security_bad_share(deflators: Deflators) {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "es.csv",
            "cost_factors_energysecurity",
            "0.1",
            "calendar_year,dollars_per_bbl,\
            oil_import_reduction_as_percent_of_total_oil_demand_reduction,dollar_basis\n\
            2020,3.0,90.7,2020",
        );
        assert!(read_energy_security(&file_path, &deflators).is_err());
    }
}

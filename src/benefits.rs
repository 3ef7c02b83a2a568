//! Benefits of each action session relative to the no-action session, and the social cost of
//! each session's greenhouse gas emissions.
//!
//! Sessions are paired by [`AnnualKey`] over the union of both sides' keys; a key missing from
//! one side counts as zero there. Cost deltas are action minus no-action, so a saving is
//! negative. Inventory deltas are no-action minus action, so a reduction is positive and is
//! valued as a benefit.
use crate::aggregate::{AnnualKey, AnnualTable, union_keys};
use crate::cost_factors::{
    CapDollarsPerTon, CapValuation, CostFactors, GhgDollarsPerTon, RateLabel, ScghgScope,
};
use crate::costs::CostValues;
use crate::model::parameters::GhgScope;
use crate::physical::PhysicalEffects;
use crate::values::PollutantValues;
use anyhow::Result;

/// Cost fields whose deltas are subtracted from benefits to give net benefits.
///
/// Refueling time and fuel taxes are left out: taxes are a transfer and refueling time is not
/// counted as a social cost.
pub const NET_BENEFIT_COST_FIELDS: [&str; 7] = [
    "fuel_pretax_dollars",
    "vehicle_cost_dollars",
    "insurance_dollars",
    "congestion_dollars",
    "noise_dollars",
    "maintenance_dollars",
    "repair_dollars",
];

const GHG_GASES: [&str; 3] = ["co2", "ch4", "n2o"];

/// Value of reduced emissions of each greenhouse gas, plus the total
fn ghg_values(tons: &PollutantValues, dollars: &GhgDollarsPerTon) -> [f64; 4] {
    let co2 = tons.co2 * dollars.co2;
    let ch4 = tons.ch4 * dollars.ch4;
    let n2o = tons.n2o * dollars.n2o;
    [co2, ch4, n2o, co2 + ch4 + n2o]
}

fn cap_value(tons: &PollutantValues, dollars: &CapDollarsPerTon) -> f64 {
    tons.pm25 * dollars.pm25 + tons.sox * dollars.sox + tons.nox * dollars.nox
}

fn cost_value(costs: &CostValues, field: &str) -> f64 {
    match field {
        "fuel_pretax_dollars" => costs.fuel_pretax_dollars,
        "vehicle_cost_dollars" => costs.vehicle_cost_dollars,
        "insurance_dollars" => costs.insurance_dollars,
        "congestion_dollars" => costs.congestion_dollars,
        "noise_dollars" => costs.noise_dollars,
        "maintenance_dollars" => costs.maintenance_dollars,
        "repair_dollars" => costs.repair_dollars,
        _ => 0.0,
    }
}

/// The scopes whose climate benefits count towards net benefits
fn net_scopes(scope: GhgScope) -> Vec<ScghgScope> {
    match scope {
        GhgScope::Global => vec![ScghgScope::Global],
        GhgScope::Domestic => vec![ScghgScope::Domestic],
        GhgScope::Both => vec![ScghgScope::Global, ScghgScope::Domestic],
    }
}

/// One net benefit combination: a climate valuation, optionally with a health valuation
struct NetBenefit {
    name: String,
    ghg_column: usize,
    cap_column: Option<usize>,
}

/// Calculates the columns of the benefits tables
pub struct BenefitCalculator<'a> {
    cost_factors: &'a CostFactors,
    ghg: Vec<(ScghgScope, RateLabel)>,
    cap: Vec<CapValuation>,
    net: Vec<NetBenefit>,
}

impl<'a> BenefitCalculator<'a> {
    /// Create a calculator for the valuations present in `cost_factors`
    pub fn new(cost_factors: &'a CostFactors, net_benefit_scope: GhgScope) -> Self {
        let ghg: Vec<(ScghgScope, RateLabel)> = [ScghgScope::Global, ScghgScope::Domestic]
            .into_iter()
            .flat_map(|scope| {
                cost_factors
                    .scghg
                    .rates(scope)
                    .into_iter()
                    .map(move |rate| (scope, rate))
            })
            .collect();
        let cap = if cost_factors.criteria.enabled() {
            cost_factors.criteria.valuations()
        } else {
            Vec::new()
        };

        let mut calculator = Self {
            cost_factors,
            ghg,
            cap,
            net: Vec::new(),
        };
        calculator.net = calculator.net_benefits(net_benefit_scope);
        calculator
    }

    fn ghg_offset(&self) -> usize {
        NET_BENEFIT_COST_FIELDS.len()
    }

    fn cap_offset(&self) -> usize {
        self.ghg_offset() + 4 * self.ghg.len()
    }

    fn energy_security_column(&self) -> usize {
        self.cap_offset() + self.cap.len()
    }

    fn drive_value_column(&self) -> usize {
        self.energy_security_column() + 1
    }

    fn net_benefits(&self, scope: GhgScope) -> Vec<NetBenefit> {
        let scopes = net_scopes(scope);
        let mut net = Vec::new();
        for (idx, (ghg_scope, rate)) in self.ghg.iter().enumerate() {
            if !scopes.contains(ghg_scope) {
                continue;
            }
            let ghg_column = self.ghg_offset() + 4 * idx + 3;
            let ghg_name = format!("{ghg_scope}_{}", rate.as_str());
            if self.cap.is_empty() {
                net.push(NetBenefit {
                    name: format!("net_benefit_{ghg_name}_dollars"),
                    ghg_column,
                    cap_column: None,
                });
            }
            for (cap_idx, valuation) in self.cap.iter().enumerate() {
                net.push(NetBenefit {
                    name: format!(
                        "net_benefit_{ghg_name}_{}_{}_dollars",
                        valuation.study.to_lowercase(),
                        valuation.rate.as_str()
                    ),
                    ghg_column,
                    cap_column: Some(self.cap_offset() + cap_idx),
                });
            }
        }
        net
    }

    /// Names of the columns returned by [`BenefitCalculator::calc`]
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = NET_BENEFIT_COST_FIELDS
            .iter()
            .map(|field| format!("{field}_delta"))
            .collect();
        for (scope, rate) in &self.ghg {
            for gas in GHG_GASES.iter().chain(&["ghg"]) {
                names.push(format!("{gas}_{scope}_{}_benefit_dollars", rate.as_str()));
            }
        }
        for valuation in &self.cap {
            names.push(format!(
                "cap_{}_{}_benefit_dollars",
                valuation.study.to_lowercase(),
                valuation.rate.as_str()
            ));
        }
        names.push("energy_security_benefit_dollars".into());
        names.push("drive_value_benefit_dollars".into());
        names
    }

    /// The rate embedded in each column, if any
    pub fn own_rates(&self) -> Vec<Option<f64>> {
        let mut rates = vec![None; NET_BENEFIT_COST_FIELDS.len()];
        for (_, rate) in &self.ghg {
            rates.extend([Some(rate.value()); 4]);
        }
        rates.extend(self.cap.iter().map(|valuation| Some(valuation.rate.value())));
        rates.extend([None, None]);
        rates
    }

    /// Names of the net benefit columns returned by [`BenefitCalculator::net_benefit_values`]
    pub fn net_column_names(&self) -> Vec<String> {
        self.net.iter().map(|net| net.name.clone()).collect()
    }

    /// Net benefits from a row of (possibly discounted) benefit columns
    pub fn net_benefit_values(&self, values: &[f64]) -> Vec<f64> {
        let cost_deltas: f64 = values[..NET_BENEFIT_COST_FIELDS.len()].iter().sum();
        let common = values[self.energy_security_column()] + values[self.drive_value_column()];
        self.net
            .iter()
            .map(|net| {
                let cap = net.cap_column.map_or(0.0, |column| values[column]);
                values[net.ghg_column] + cap + common - cost_deltas
            })
            .collect()
    }

    /// Benefit columns for each key of either session
    pub fn calc(
        &self,
        no_action_physical: &AnnualTable<PhysicalEffects>,
        action_physical: &AnnualTable<PhysicalEffects>,
        no_action_costs: &AnnualTable<CostValues>,
        action_costs: &AnnualTable<CostValues>,
    ) -> Result<AnnualTable<Vec<f64>>> {
        let mut keys = union_keys(no_action_physical, action_physical);
        keys.extend(union_keys(no_action_costs, action_costs));

        keys.into_iter()
            .map(|key| {
                let na = no_action_physical.get(&key).copied().unwrap_or_default();
                let a = action_physical.get(&key).copied().unwrap_or_default();
                let na_costs = no_action_costs.get(&key).copied().unwrap_or_default();
                let a_costs = action_costs.get(&key).copied().unwrap_or_default();
                let values = self.row(&key, &na, &a, &(a_costs - na_costs))?;
                Ok((key, values))
            })
            .collect()
    }

    fn row(
        &self,
        key: &AnnualKey,
        no_action: &PhysicalEffects,
        action: &PhysicalEffects,
        cost_deltas: &CostValues,
    ) -> Result<Vec<f64>> {
        let year = key.calendar_year;
        let factors = self.cost_factors;
        let mut values: Vec<f64> = NET_BENEFIT_COST_FIELDS
            .iter()
            .map(|field| cost_value(cost_deltas, field))
            .collect();

        let total_reduction = no_action.total() - action.total();
        for (scope, rate) in &self.ghg {
            let dollars = factors.scghg.get(*scope, rate, year)?;
            values.extend(ghg_values(&total_reduction, &dollars));
        }

        if !self.cap.is_empty() {
            let vehicle_reduction = no_action.vehicle - action.vehicle;
            let egu_reduction = no_action.egu - action.egu;
            let refinery_reduction = no_action.refinery - action.refinery;
            let vehicle_source = key.vehicle_source_id()?;
            for valuation in &self.cap {
                let criteria = &factors.criteria;
                let value = cap_value(
                    &vehicle_reduction,
                    &criteria.get(&vehicle_source, valuation, year)?,
                ) + cap_value(&egu_reduction, &criteria.get("egu", valuation, year)?)
                    + cap_value(
                        &refinery_reduction,
                        &criteria.get("refinery", valuation, year)?,
                    );
                values.push(value);
            }
        }

        let imports_change =
            action.totals.imported_oil_bbl_change - no_action.totals.imported_oil_bbl_change;
        values.push(-imports_change * factors.energy_security.get(year).dollars_per_bbl);

        // Drive value is the value of extra driving, so an increase is a benefit
        values.push(cost_deltas.drive_value_dollars);

        Ok(values)
    }
}

/// The social cost of one session's greenhouse gas emissions
pub struct SocialCosts {
    /// Column names
    pub columns: Vec<String>,
    /// The rate embedded in each column
    pub own_rates: Vec<Option<f64>>,
    /// The costs
    pub table: AnnualTable<Vec<f64>>,
}

/// Value a session's total greenhouse gas emissions at every rate available for `scope`
pub fn social_costs(
    physical: &AnnualTable<PhysicalEffects>,
    cost_factors: &CostFactors,
    scope: ScghgScope,
) -> Result<SocialCosts> {
    let rates = cost_factors.scghg.rates(scope);
    let mut columns = Vec::new();
    let mut own_rates = Vec::new();
    for rate in &rates {
        for gas in GHG_GASES.iter().chain(&["ghg"]) {
            columns.push(format!("{gas}_{scope}_{}_cost_dollars", rate.as_str()));
            own_rates.push(Some(rate.value()));
        }
    }

    let mut table = AnnualTable::new();
    for (key, effects) in physical {
        let tons = effects.total();
        let mut values = Vec::with_capacity(columns.len());
        for rate in &rates {
            let dollars = cost_factors.scghg.get(scope, rate, key.calendar_year)?;
            values.extend(ghg_values(&tons, &dollars));
        }
        table.insert(key.clone(), values);
    }

    Ok(SocialCosts {
        columns,
        own_rates,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{cost_factors, vehicle};
    use crate::fleet::Vehicle;
    use crate::physical::PhysicalTotals;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn column(calculator: &BenefitCalculator, name: &str) -> usize {
        calculator
            .column_names()
            .iter()
            .position(|column| column == name)
            .unwrap()
    }

    fn co2(tons: f64) -> PhysicalEffects {
        PhysicalEffects {
            vehicle: PollutantValues {
                co2: tons,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[rstest]
    fn test_action_only_key_still_reported(vehicle: Vehicle, cost_factors: CostFactors) {
        let calculator = BenefitCalculator::new(&cost_factors, GhgScope::Global);
        let key = AnnualKey::new(&vehicle, 2025);
        let action_costs = AnnualTable::from([(
            key.clone(),
            CostValues {
                drive_value_dollars: 10.0,
                ..Default::default()
            },
        )]);
        let table = calculator
            .calc(
                &AnnualTable::new(),
                &AnnualTable::new(),
                &AnnualTable::new(),
                &action_costs,
            )
            .unwrap();
        let values = &table[&key];
        assert_eq!(values[column(&calculator, "drive_value_benefit_dollars")], 10.0);
    }

    #[rstest]
    fn test_ghg_benefit_of_reduction(vehicle: Vehicle, cost_factors: CostFactors) {
        let calculator = BenefitCalculator::new(&cost_factors, GhgScope::Global);
        let key = AnnualKey::new(&vehicle, 2025);
        let no_action = AnnualTable::from([(key.clone(), co2(10.0))]);
        let action = AnnualTable::from([(key.clone(), co2(4.0))]);
        let table = calculator
            .calc(&no_action, &action, &AnnualTable::new(), &AnnualTable::new())
            .unwrap();
        let values = &table[&key];
        // SC-CO2 is $200 per ton at 2.5% in 2025
        let co2_column = column(&calculator, "co2_global_0.025_benefit_dollars");
        assert_approx_eq!(f64, values[co2_column], 6.0 * 200.0);
        let ghg_column = column(&calculator, "ghg_global_0.025_benefit_dollars");
        assert_approx_eq!(f64, values[ghg_column], 6.0 * 200.0);
    }

    #[rstest]
    fn test_energy_security_benefit(vehicle: Vehicle, cost_factors: CostFactors) {
        let calculator = BenefitCalculator::new(&cost_factors, GhgScope::Global);
        let key = AnnualKey::new(&vehicle, 2025);
        let action = AnnualTable::from([(
            key.clone(),
            PhysicalEffects {
                totals: PhysicalTotals {
                    imported_oil_bbl_change: -2.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        )]);
        let table = calculator
            .calc(&AnnualTable::new(), &action, &AnnualTable::new(), &AnnualTable::new())
            .unwrap();
        let dollars_per_bbl = cost_factors.energy_security.get(2025).dollars_per_bbl;
        let values = &table[&key];
        assert_approx_eq!(
            f64,
            values[column(&calculator, "energy_security_benefit_dollars")],
            2.0 * dollars_per_bbl
        );
    }

    #[rstest]
    fn test_net_benefit_is_benefits_minus_costs(vehicle: Vehicle, cost_factors: CostFactors) {
        let calculator = BenefitCalculator::new(&cost_factors, GhgScope::Both);
        let key = AnnualKey::new(&vehicle, 2025);
        let no_action = AnnualTable::from([(key.clone(), co2(10.0))]);
        let action_costs = AnnualTable::from([(
            key.clone(),
            CostValues {
                vehicle_cost_dollars: 500.0,
                fuel_pretax_dollars: -200.0,
                refueling_dollars: 1000.0,
                ..Default::default()
            },
        )]);
        let table = calculator
            .calc(&no_action, &AnnualTable::new(), &AnnualTable::new(), &action_costs)
            .unwrap();
        let values = &table[&key];
        let net = calculator.net_benefit_values(values);
        let names = calculator.net_column_names();
        assert_eq!(net.len(), names.len());
        assert!(!net.is_empty());

        let ghg = values[column(&calculator, "ghg_global_0.025_benefit_dollars")];
        let cap_columns: Vec<usize> = calculator
            .column_names()
            .iter()
            .enumerate()
            .filter(|(_, name)| name.starts_with("cap_"))
            .map(|(idx, _)| idx)
            .collect();
        let cap = cap_columns.first().map_or(0.0, |column| values[*column]);
        // Refueling is not part of net benefits
        assert_approx_eq!(f64, net[0], ghg + cap - 300.0);
    }

    #[rstest]
    fn test_own_rates_match_columns(cost_factors: CostFactors) {
        let calculator = BenefitCalculator::new(&cost_factors, GhgScope::Global);
        let names = calculator.column_names();
        let rates = calculator.own_rates();
        assert_eq!(names.len(), rates.len());
        let co2_column = column(&calculator, "co2_global_0.025_benefit_dollars");
        assert_eq!(rates[co2_column], Some(0.025));
        assert_eq!(rates[0], None);
    }

    #[rstest]
    fn test_social_costs(vehicle: Vehicle, cost_factors: CostFactors) {
        let key = AnnualKey::new(&vehicle, 2025);
        let physical = AnnualTable::from([(key.clone(), co2(3.0))]);
        let social = social_costs(&physical, &cost_factors, ScghgScope::Global).unwrap();
        assert_eq!(social.columns[0], "co2_global_0.025_cost_dollars");
        assert_approx_eq!(f64, social.table[&key][0], 600.0);
    }
}

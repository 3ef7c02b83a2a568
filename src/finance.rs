//! Discounting of monetary streams: present values, equivalent annualised values and model year
//! lifetime ("consumer view") totals.
use crate::aggregate::{AnnualGroup, AnnualKey, AnnualTable, ModelYearKey};
use crate::costs::{CostValues, TECH_COST_FIELDS, VehicleCostEffects};
use crate::model::parameters::CostAccrual;
use crate::values::ValueFields;
use std::collections::{BTreeMap, HashMap};
use strum::Display;

/// The kind of value in a discounted row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum Series {
    /// The value in one year, discounted to the discount year
    AnnualValue,
    /// The sum of annual values from the discount year to this year
    PresentValue,
    /// The constant annual value with the same present value
    AnnualizedValue,
}

/// Factor converting a value `exponent` years after the discount year to a present value
pub fn discount_factor(rate: f64, exponent: u32) -> f64 {
    1.0 / (1.0 + rate).powi(i32::try_from(exponent).unwrap_or(i32::MAX))
}

/// Factor converting a present value into an equivalent annualised value over `periods` years.
///
/// Fewer than one period leaves the present value unchanged.
pub fn annualisation_factor(periods: u32, rate: f64, accrual: CostAccrual) -> f64 {
    if periods < 1 {
        return 1.0;
    }
    let periods_f = f64::from(periods);
    let denominator_periods = match accrual {
        CostAccrual::StartOfYear => periods + 1,
        CostAccrual::EndOfYear => periods,
    };
    if rate == 0.0 {
        return 1.0 / f64::from(denominator_periods);
    }
    let growth = (1.0 + rate).powf(periods_f);
    let denominator_growth = (1.0 + rate).powf(f64::from(denominator_periods));
    rate * growth / (denominator_growth - 1.0)
}

/// Discounts annual streams to a fixed year
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discounter {
    to_year: u32,
    accrual: CostAccrual,
}

/// One row of a discounted table
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountedRow {
    /// Calendar year and group
    pub key: AnnualKey,
    /// Which series the values belong to
    pub series: Series,
    /// The discount rate applied to columns without their own rate
    pub discount_rate: f64,
    /// The values, in the column order of the discounted table
    pub values: Vec<f64>,
}

impl Discounter {
    /// Create a discounter to `to_year`
    pub fn new(to_year: u32, accrual: CostAccrual) -> Self {
        Self { to_year, accrual }
    }

    /// Years of discounting applied to a value in `calendar_year`. Never negative.
    pub fn exponent(&self, calendar_year: u32) -> u32 {
        (calendar_year + self.accrual.offset()).saturating_sub(self.to_year)
    }

    /// The value of `value` in `calendar_year`, discounted to the discount year
    pub fn annual_value(&self, value: f64, rate: f64, calendar_year: u32) -> f64 {
        value * discount_factor(rate, self.exponent(calendar_year))
    }

    /// The equivalent annualised value of a present value accumulated up to `calendar_year`
    pub fn annualized_value(&self, present_value: f64, rate: f64, calendar_year: u32) -> f64 {
        present_value * annualisation_factor(self.exponent(calendar_year), rate, self.accrual)
    }

    /// Discount an annual table.
    ///
    /// The result holds undiscounted annual values (rate zero) followed, for each rate in
    /// `rates`, by annual, present and annualised values. Columns with their own rate in
    /// `own_rates`, such as climate benefits valued at a specific rate, are discounted at that
    /// rate whatever the row's rate.
    pub fn discount(
        &self,
        table: &AnnualTable<Vec<f64>>,
        own_rates: &[Option<f64>],
        rates: &[f64],
    ) -> Vec<DiscountedRow> {
        let mut rows: Vec<DiscountedRow> = table
            .iter()
            .map(|(key, values)| DiscountedRow {
                key: key.clone(),
                series: Series::AnnualValue,
                discount_rate: 0.0,
                values: values.clone(),
            })
            .collect();

        for &rate in rates {
            let column_rates: Vec<f64> = own_rates
                .iter()
                .map(|own_rate| own_rate.unwrap_or(rate))
                .collect();
            let mut annual = Vec::with_capacity(table.len());
            let mut present = Vec::with_capacity(table.len());
            let mut annualized = Vec::with_capacity(table.len());
            let mut running: HashMap<AnnualGroup, Vec<f64>> = HashMap::new();

            // Keys are in calendar year order, so running sums accumulate forwards in time
            for (key, values) in table {
                let year = key.calendar_year;
                let annual_values: Vec<f64> = values
                    .iter()
                    .zip(&column_rates)
                    .map(|(value, rate)| self.annual_value(*value, *rate, year))
                    .collect();
                let present_values = if year < self.to_year {
                    annual_values.clone()
                } else {
                    let sums = running
                        .entry(key.group())
                        .or_insert_with(|| vec![0.0; values.len()]);
                    for (sum, value) in sums.iter_mut().zip(&annual_values) {
                        *sum += value;
                    }
                    sums.clone()
                };
                let annualized_values = present_values
                    .iter()
                    .zip(&column_rates)
                    .map(|(value, rate)| self.annualized_value(*value, *rate, year))
                    .collect();

                let row = |series, values| DiscountedRow {
                    key: key.clone(),
                    series,
                    discount_rate: rate,
                    values,
                };
                annual.push(row(Series::AnnualValue, annual_values));
                present.push(row(Series::PresentValue, present_values));
                annualized.push(row(Series::AnnualizedValue, annualized_values));
            }
            rows.extend(annual);
            rows.extend(present);
            rows.extend(annualized);
        }

        rows
    }
}

/// Lifetime costs of one model year group over a fixed number of years
#[derive(Debug, Clone, PartialEq)]
pub struct ModelYearCosts {
    /// The model year group
    pub key: ModelYearKey,
    /// The discount rate
    pub discount_rate: f64,
    /// Vehicles sold
    pub sales: f64,
    /// Discounted costs over the period
    pub costs: CostValues,
}

impl ModelYearCosts {
    /// Costs per vehicle sold
    pub fn per_vehicle(&self) -> CostValues {
        if self.sales > 0.0 {
            self.costs.scaled(1.0 / self.sales)
        } else {
            CostValues::default()
        }
    }
}

/// Options of a consumer view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumerView<'a> {
    /// Number of years of ownership counted
    pub years: u32,
    /// First calendar year of the analysis
    pub first_year: u32,
    /// Last calendar year of the analysis
    pub last_year: u32,
    /// When costs accrue within a year
    pub accrual: CostAccrual,
    /// Discount rates
    pub rates: &'a [f64],
    /// Whether groups are broken down by powertrain
    pub include_fueling_class: bool,
}

/// Model year lifetime costs from the buyer's point of view.
///
/// Each model year's costs over its first `years` years are discounted to its model year.
/// Technology costs are paid at purchase so are not discounted. Only model years from the first
/// analysis year whose whole period lies inside the analysis are included. Legacy vehicles are
/// never included.
pub fn consumer_view(costs: &[VehicleCostEffects], view: ConsumerView) -> Vec<ModelYearCosts> {
    let tech_columns: Vec<bool> = CostValues::FIELD_NAMES
        .iter()
        .map(|name| TECH_COST_FIELDS.contains(name))
        .collect();
    let mut totals: BTreeMap<(ModelYearKey, u64), (f64, f64, CostValues)> = BTreeMap::new();

    for row in costs {
        let vehicle = &row.vehicle;
        if vehicle.is_legacy
            || vehicle.model_year < view.first_year
            || vehicle.model_year + view.years > view.last_year + 1
            || row.age >= view.years
        {
            continue;
        }

        let key = ModelYearKey::new(vehicle, view.include_fueling_class);
        let exponent = row.age + view.accrual.offset();
        for &rate in view.rates {
            let factor = discount_factor(rate, exponent);
            let values: Vec<f64> = row
                .costs
                .values()
                .into_iter()
                .zip(&tech_columns)
                .map(|(value, is_tech)| if *is_tech { value } else { value * factor })
                .collect();
            let entry = totals
                .entry((key.clone(), rate.to_bits()))
                .or_insert((rate, 0.0, CostValues::default()));
            if row.age == 0 {
                entry.1 += row.registered_count;
            }
            entry.2 += CostValues::from_values(&values);
        }
    }

    totals
        .into_iter()
        .map(|((key, _), (discount_rate, sales, costs))| ModelYearCosts {
            key,
            discount_rate,
            sales,
            costs,
        })
        .collect()
}

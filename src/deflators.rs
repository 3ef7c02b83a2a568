//! Conversion of dollar values between dollar basis years.
use crate::input::InputError;
use anyhow::{Result, ensure};
use std::collections::HashMap;

/// Maps a dollar basis year to its price adjustment factor.
///
/// Exactly one year has a factor of one. That year is the analysis dollar basis, i.e. the year in
/// which all monetary values are expressed internally once adjusted.
#[derive(Debug, Clone, PartialEq)]
pub struct Deflators {
    factors: HashMap<u32, f64>,
    analysis_basis: u32,
}

impl Deflators {
    /// Create a new [`Deflators`] table, discovering the analysis dollar basis.
    pub fn new(factors: HashMap<u32, f64>) -> Result<Self> {
        let unity_years: Vec<u32> = factors
            .iter()
            .filter(|&(_, factor)| *factor == 1.0)
            .map(|(year, _)| *year)
            .collect();
        ensure!(
            unity_years.len() == 1,
            "Exactly one year must have an adjustment factor of 1 (found {})",
            unity_years.len()
        );
        ensure!(
            factors.values().all(|factor| factor.is_finite() && *factor > 0.0),
            "Adjustment factors must be finite and greater than zero"
        );

        Ok(Self {
            analysis_basis: unity_years[0],
            factors,
        })
    }

    /// The year whose dollars all adjusted values are expressed in
    pub fn analysis_basis(&self) -> u32 {
        self.analysis_basis
    }

    /// The multiplier converting dollars of `dollar_basis` into analysis-basis dollars
    pub fn conversion_factor(&self, dollar_basis: u32) -> Result<f64> {
        let Some(factor) = self.factors.get(&dollar_basis) else {
            Err(InputError::DollarBasisMissing { year: dollar_basis })?
        };

        Ok(self.factors[&self.analysis_basis] / factor)
    }

    /// Convert a single value into analysis-basis dollars
    pub fn adjust(&self, value: f64, dollar_basis: u32) -> Result<f64> {
        Ok(value * self.conversion_factor(dollar_basis)?)
    }
}

/// An input row carrying one or more dollar values and the basis year they are expressed in
pub trait DollarValued {
    /// The dollar basis year of the row
    fn dollar_basis(&self) -> u32;

    /// Set the dollar basis year of the row
    fn set_dollar_basis(&mut self, year: u32);

    /// Mutable references to every dollar-valued field
    fn dollar_values_mut(&mut self) -> Vec<&mut f64>;
}

/// Convert every dollar-valued field in `rows` to analysis-basis dollars.
///
/// Rows already in analysis-basis dollars are left unchanged, so applying this twice has the
/// same effect as applying it once.
pub fn adjust_dollars<T: DollarValued>(deflators: &Deflators, rows: &mut [T]) -> Result<()> {
    for row in rows.iter_mut() {
        let factor = deflators.conversion_factor(row.dollar_basis())?;
        for value in row.dollar_values_mut() {
            *value *= factor;
        }
        row.set_dollar_basis(deflators.analysis_basis());
    }

    Ok(())
}

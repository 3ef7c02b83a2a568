//! Monetary values of emissions, oil imports, congestion and noise.
use crate::fleet::RegClass;
use crate::rates::YearSeries;
use crate::values::value_struct;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use strum::Display;

value_struct! {
    /// Benefit per US ton of each criteria air pollutant
    CapDollarsPerTon {
        /// Fine particulate matter
        pm25,
        /// Sulphur oxides
        sox,
        /// Nitrogen oxides
        nox,
    }
}

value_struct! {
    /// Social cost per metric ton of each greenhouse gas
    GhgDollarsPerTon {
        /// Carbon dioxide
        co2,
        /// Methane
        ch4,
        /// Nitrous oxide
        n2o,
    }
}

/// A discount rate as written in a cost factors file, e.g. `0.03`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLabel(String);

impl RateLabel {
    /// Create a label, checking it holds a number
    pub fn new(label: &str) -> Result<Self> {
        let label = label.trim();
        label
            .parse::<f64>()
            .with_context(|| format!("Invalid discount rate '{label}'"))?;
        Ok(Self(label.to_string()))
    }

    /// The rate as a number
    pub fn value(&self) -> f64 {
        self.0.parse().unwrap_or_default()
    }

    /// The label as written
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A health study and discount rate under which criteria pollutant benefits are valued
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapValuation {
    /// The health study, e.g. `Wu`
    pub study: String,
    /// Discount rate embedded in the valuation
    pub rate: RateLabel,
}

/// Criteria pollutant benefit-per-ton values by source, study and rate
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaCostFactors {
    factors: HashMap<(String, CapValuation), YearSeries<CapDollarsPerTon>>,
    enabled: bool,
}

impl CriteriaCostFactors {
    /// Create a new [`CriteriaCostFactors`] table.
    ///
    /// Health effects are only valued when some factor is non-zero.
    pub fn new(factors: HashMap<(String, CapValuation), YearSeries<CapDollarsPerTon>>) -> Self {
        let enabled = factors.values().any(|series| {
            series
                .iter()
                .any(|(_, values)| values.pm25 != 0.0 || values.sox != 0.0 || values.nox != 0.0)
        });

        Self { factors, enabled }
    }

    /// Whether health effects are valued in this run
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Every study and rate combination, sorted
    pub fn valuations(&self) -> Vec<CapValuation> {
        let mut valuations: Vec<CapValuation> = self
            .factors
            .keys()
            .map(|(_, valuation)| valuation.clone())
            .collect();
        valuations.sort();
        valuations.dedup();
        valuations
    }

    /// Benefit per ton for emissions from `source_id` in `year`
    pub fn get(
        &self,
        source_id: &str,
        valuation: &CapValuation,
        year: u32,
    ) -> Result<CapDollarsPerTon> {
        let series = self
            .factors
            .get(&(source_id.to_string(), valuation.clone()))
            .with_context(|| {
                format!(
                    "No criteria cost factors for source '{source_id}', study {}, rate {}",
                    valuation.study,
                    valuation.rate.as_str()
                )
            })?;

        Ok(*series.get(year))
    }
}

/// Geographic scope of social cost of greenhouse gas values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScghgScope {
    /// Damages worldwide
    Global,
    /// Damages within the US
    Domestic,
}

/// Social cost of greenhouse gases by scope and rate
#[derive(Debug, Clone, PartialEq)]
pub struct ScghgCostFactors {
    factors: HashMap<(ScghgScope, RateLabel), YearSeries<GhgDollarsPerTon>>,
}

impl ScghgCostFactors {
    /// Create a new [`ScghgCostFactors`] table
    pub fn new(factors: HashMap<(ScghgScope, RateLabel), YearSeries<GhgDollarsPerTon>>) -> Self {
        Self { factors }
    }

    /// The rates available for a scope, sorted
    pub fn rates(&self, scope: ScghgScope) -> Vec<RateLabel> {
        let mut rates: Vec<RateLabel> = self
            .factors
            .keys()
            .filter(|(key_scope, _)| *key_scope == scope)
            .map(|(_, rate)| rate.clone())
            .collect();
        rates.sort();
        rates
    }

    /// Cost per metric ton in `year`
    pub fn get(&self, scope: ScghgScope, rate: &RateLabel, year: u32) -> Result<GhgDollarsPerTon> {
        let series = self
            .factors
            .get(&(scope, rate.clone()))
            .with_context(|| {
                format!("No SC-GHG cost factors for {scope} scope at rate {}", rate.as_str())
            })?;

        Ok(*series.get(year))
    }
}

value_struct! {
    /// Energy security value of reduced oil imports
    EnergySecurityFactors {
        /// Value per barrel of imported oil avoided
        dollars_per_bbl,
        /// Share of a reduction in oil demand met by reduced imports
        oil_import_reduction_share,
    }
}

/// Congestion and noise costs per mile travelled
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CongestionNoise {
    /// Congestion cost per mile
    pub congestion_dollars_per_mile: f64,
    /// Noise cost per mile
    pub noise_dollars_per_mile: f64,
}

/// Congestion and noise costs keyed by regulatory class
pub type CongestionNoiseFactors = HashMap<RegClass, CongestionNoise>;

/// All the externality cost factors for a batch
#[derive(Debug, Clone, PartialEq)]
pub struct CostFactors {
    /// Criteria pollutant benefits per ton
    pub criteria: CriteriaCostFactors,
    /// Social cost of greenhouse gases
    pub scghg: ScghgCostFactors,
    /// Energy security values
    pub energy_security: YearSeries<EnergySecurityFactors>,
    /// Congestion and noise costs
    pub congestion_noise: CongestionNoiseFactors,
}

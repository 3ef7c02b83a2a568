//! Defines the [`BatchParameters`] struct, which holds the scalar options of a batch settings file.
use anyhow::{Context, Result, bail, ensure};
use serde_string_enum::DeserializeLabeledStringEnum;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// The largest action session number
pub const MAX_ACTION_SESSIONS: u8 = 7;

/// When costs are assumed to accrue within a year
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Default)]
pub enum CostAccrual {
    /// At the start of the year, so costs in the discount year are not discounted
    #[string = "start-of-year"]
    StartOfYear,
    /// At the end of the year
    #[default]
    #[string = "end-of-year"]
    EndOfYear,
}

impl CostAccrual {
    /// Added to the number of years since the discount year to give the discount exponent
    pub fn offset(self) -> u32 {
        match self {
            Self::StartOfYear => 0,
            Self::EndOfYear => 1,
        }
    }
}

impl fmt::Display for CostAccrual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartOfYear => write!(f, "start-of-year"),
            Self::EndOfYear => write!(f, "end-of-year"),
        }
    }
}

/// Which social cost of greenhouse gases flows into net benefits
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Default)]
pub enum GhgScope {
    /// Global damages
    #[default]
    #[string = "global"]
    Global,
    /// Domestic damages
    #[string = "domestic"]
    Domestic,
    /// Net benefits are reported for both
    #[string = "both"]
    Both,
}

impl fmt::Display for GhgScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Domestic => write!(f, "domestic"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// Which rows of the electricity prices file are used
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Default)]
pub enum ElectricityPricesSource {
    /// Annual Energy Outlook prices, shared by every session
    #[default]
    #[string = "AEO"]
    Aeo,
    /// Integrated Planning Model prices, which may differ by session
    #[string = "IPM"]
    Ipm,
}

impl fmt::Display for ElectricityPricesSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aeo => write!(f, "AEO"),
            Self::Ipm => write!(f, "IPM"),
        }
    }
}

/// Format of output files
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Default)]
pub enum FileFormat {
    /// Comma-separated values
    #[default]
    #[string = "csv"]
    Csv,
    /// Parquet. Recognised so that it can be rejected with a clear message.
    #[string = "parquet"]
    Parquet,
}

/// The policy a session represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionPolicy {
    /// The reference session defining the context stock, VMT and fuel cost per mile
    Context,
    /// The no-action policy
    NoAction,
    /// One of the numbered action policies
    Action(u8),
}

impl SessionPolicy {
    /// Every session policy, in processing order
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::Context, Self::NoAction]
            .into_iter()
            .chain((1..=MAX_ACTION_SESSIONS).map(Self::Action))
    }

    /// Whether this is an action policy
    pub fn is_action(self) -> bool {
        matches!(self, Self::Action(_))
    }
}

impl fmt::Display for SessionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context => write!(f, "context"),
            Self::NoAction => write!(f, "no_action"),
            Self::Action(n) => write!(f, "action_{n}"),
        }
    }
}

impl FromStr for SessionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "context" => Ok(Self::Context),
            "no_action" => Ok(Self::NoAction),
            _ => {
                let number = s
                    .strip_prefix("action_")
                    .and_then(|n| n.parse::<u8>().ok())
                    .with_context(|| format!("Unknown session policy '{s}'"))?;
                ensure!(
                    (1..=MAX_ACTION_SESSIONS).contains(&number),
                    "Action session number must be between 1 and {MAX_ACTION_SESSIONS}: {s}"
                );
                Ok(Self::Action(number))
            }
        }
    }
}

/// The scalar options of a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchParameters {
    /// Name of the batch, used to label outputs
    pub batch_name: String,
    /// Calendar year of the base year fleet
    pub vehicles_base_year: u32,
    /// First year of the analysis
    pub analysis_initial_year: u32,
    /// Last year of the analysis
    pub analysis_final_year: u32,
    /// When costs accrue within a year
    pub cost_accrual: CostAccrual,
    /// Year to which present values are discounted
    pub discount_values_to_year: u32,
    /// VMT rebound elasticity for vehicles using liquid fuel
    pub vmt_rebound_rate_ice: f64,
    /// VMT rebound elasticity for battery electric vehicles
    pub vmt_rebound_rate_bev: f64,
    /// Which SC-GHG scope flows into net benefits
    pub net_benefit_ghg_scope: GhgScope,
    /// Which electricity prices are used
    pub electricity_prices_source: ElectricityPricesSource,
    /// Whether powertrain cost files use the newer template
    pub powertrain_costs_fev: bool,
    /// Write per-vehicle safety effects
    pub save_vehicle_safety_effects_files: bool,
    /// Write per-vehicle physical effects
    pub save_vehicle_physical_effects_files: bool,
    /// Write per-vehicle cost effects
    pub save_vehicle_cost_effects_files: bool,
    /// Format of output files
    pub file_format: FileFormat,
}

impl BatchParameters {
    /// The calendar years in which effects are calculated
    pub fn analysis_years(&self) -> RangeInclusive<u32> {
        let first = self
            .analysis_initial_year
            .max(self.vehicles_base_year + 1);
        first..=self.analysis_final_year
    }

    /// Check that the parameters are consistent
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.analysis_initial_year <= self.analysis_final_year,
            "analysis_initial_year must not be after analysis_final_year"
        );
        ensure!(
            self.vehicles_base_year < self.analysis_final_year,
            "vehicles_base_year must be before analysis_final_year"
        );
        for (name, rate) in [
            ("vmt_rebound_rate_ice", self.vmt_rebound_rate_ice),
            ("vmt_rebound_rate_bev", self.vmt_rebound_rate_bev),
        ] {
            if rate > 0.0 {
                bail!("{name} must not be positive");
            }
        }
        ensure!(
            self.file_format == FileFormat::Csv,
            "file_format parquet is not supported, only csv output can be written"
        );

        Ok(())
    }
}

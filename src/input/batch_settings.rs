//! Code for reading the batch settings file.
use super::*;
use crate::model::parameters::{BatchParameters, SessionPolicy};
use serde::Deserialize;

/// Template for the batch settings file
pub const BATCH_SETTINGS_TEMPLATE: Template = Template {
    name: "effects_batch_settings",
    version: "0.1",
    columns: &["parameter", "session_policy", "value", "full_path"],
};

/// The `session_policy` of rows applying to the whole batch
const ALL_SESSIONS: &str = "all";

/// Paths to the input files shared by every session
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPaths {
    /// Implicit price deflators
    pub ip_deflators: PathBuf,
    /// Consumer price index deflators
    pub cpi_deflators: PathBuf,
    /// Legacy fleet
    pub legacy_fleet: PathBuf,
    /// Re-registration proportions by age
    pub reregistration_fixed_by_age: PathBuf,
    /// Annual VMT by age
    pub annual_vmt_fixed_by_age: PathBuf,
    /// Context stock and VMT
    pub context_stock_and_vmt: PathBuf,
    /// Safety values
    pub safety_values: PathBuf,
    /// Fatality rates
    pub fatality_rates: PathBuf,
    /// On-road fuels
    pub onroad_fuels: PathBuf,
    /// Context fuel prices
    pub context_fuel_prices: PathBuf,
    /// Electricity prices
    pub electricity_prices: PathBuf,
    /// EGU emission rates
    pub emission_rates_egu: PathBuf,
    /// Refinery emission rates
    pub emission_rates_refinery: PathBuf,
    /// Criteria air pollutant cost factors
    pub cost_factors_criteria: PathBuf,
    /// Social cost of greenhouse gases
    pub cost_factors_scghg: PathBuf,
    /// Energy security cost factors
    pub cost_factors_energysecurity: PathBuf,
    /// Congestion and noise cost factors
    pub cost_factors_congestion_noise: PathBuf,
    /// Maintenance costs
    pub maintenance_cost: PathBuf,
    /// Repair costs
    pub repair_cost: PathBuf,
    /// Refueling costs
    pub refueling_cost: PathBuf,
    /// Insurance and taxes cost factors
    pub insurance_and_taxes_cost_factors: PathBuf,
    /// General inputs for effects
    pub general_inputs_for_effects: PathBuf,
}

/// Name and input paths of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// The policy the session represents
    pub policy: SessionPolicy,
    /// Name of the session
    pub name: String,
    /// Vehicles file
    pub vehicles: PathBuf,
    /// Vehicle annual data file
    pub vehicle_annual_data: PathBuf,
    /// Vehicle emission rates file. Not used by the context session.
    pub emission_rates_vehicles: Option<PathBuf>,
    /// Powertrain cost file. Not used by the context session.
    pub powertrain_cost: Option<PathBuf>,
}

/// The contents of a batch settings file
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    /// Scalar options
    pub parameters: BatchParameters,
    /// Batch-wide input paths
    pub paths: BatchPaths,
    /// Enabled sessions, in processing order
    pub sessions: Vec<SessionSettings>,
}

impl BatchSettings {
    /// The settings of the session with the given policy
    pub fn session(&self, policy: SessionPolicy) -> Option<&SessionSettings> {
        self.sessions.iter().find(|session| session.policy == policy)
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct BatchSettingRaw {
    parameter: String,
    session_policy: String,
    value: Option<String>,
    full_path: Option<String>,
}

/// Entries of a batch settings file keyed by (parameter, session_policy)
struct SettingsTable {
    values: HashMap<(String, String), String>,
    paths: HashMap<(String, String), PathBuf>,
}

impl SettingsTable {
    fn value(&self, parameter: &str, session_policy: &str) -> Option<&str> {
        self.values
            .get(&(parameter.to_string(), session_policy.to_string()))
            .map(String::as_str)
    }

    fn batch_value(&self, parameter: &str) -> Result<&str> {
        self.value(parameter, ALL_SESSIONS)
            .with_context(|| format!("Missing batch setting '{parameter}'"))
    }

    fn batch_parse<T: std::str::FromStr>(&self, parameter: &str) -> Result<T> {
        let value = self.batch_value(parameter)?;
        value
            .parse()
            .ok()
            .with_context(|| format!("Invalid value '{value}' for batch setting '{parameter}'"))
    }

    fn batch_label<T: DeserializeOwned>(&self, parameter: &str) -> Result<T> {
        parse_label(self.batch_value(parameter)?)
            .with_context(|| format!("Invalid batch setting '{parameter}'"))
    }

    fn batch_bool(&self, parameter: &str) -> Result<bool> {
        parse_bool(self.batch_value(parameter)?)
            .with_context(|| format!("Invalid batch setting '{parameter}'"))
    }

    fn path(&self, parameter: &str, session_policy: &str) -> Option<PathBuf> {
        self.paths
            .get(&(parameter.to_string(), session_policy.to_string()))
            .cloned()
    }

    fn batch_path(&self, parameter: &str) -> Result<PathBuf> {
        self.path(parameter, ALL_SESSIONS)
            .with_context(|| format!("Missing path for '{parameter}'"))
    }
}

/// Read the batch settings file.
///
/// Relative paths are resolved against the folder containing the file.
pub fn read_batch_settings(file_path: &Path) -> Result<BatchSettings> {
    let rows = read_csv::<BatchSettingRaw>(file_path, &BATCH_SETTINGS_TEMPLATE)?;
    let base_dir = file_path.parent().unwrap_or(Path::new("."));
    read_batch_settings_from_iter(rows.into_iter(), base_dir)
        .with_context(|| input_err_msg(file_path))
}

fn read_batch_settings_from_iter<I>(iter: I, base_dir: &Path) -> Result<BatchSettings>
where
    I: Iterator<Item = BatchSettingRaw>,
{
    let mut table = SettingsTable {
        values: HashMap::new(),
        paths: HashMap::new(),
    };
    for raw in iter {
        let key = (raw.parameter, raw.session_policy);
        ensure!(
            key.1 == ALL_SESSIONS || key.1.parse::<SessionPolicy>().is_ok(),
            "Unknown session policy '{}' for '{}'",
            key.1,
            key.0
        );
        match (raw.value, raw.full_path) {
            (_, Some(path)) if !path.trim().is_empty() => {
                try_insert(&mut table.paths, key, base_dir.join(path.trim()))?
            }
            (Some(value), _) => try_insert(&mut table.values, key, value.trim().to_string())?,
            _ => bail!("No value or path given for '{}' ({})", key.0, key.1),
        }
    }

    let parameters = read_parameters(&table)?;
    parameters.validate()?;
    let paths = read_batch_paths(&table)?;
    let sessions = read_sessions(&table)?;

    Ok(BatchSettings {
        parameters,
        paths,
        sessions,
    })
}

fn read_parameters(table: &SettingsTable) -> Result<BatchParameters> {
    Ok(BatchParameters {
        batch_name: table.batch_value("batch_name")?.to_string(),
        vehicles_base_year: table.batch_parse("vehicles_base_year")?,
        analysis_initial_year: table.batch_parse("analysis_initial_year")?,
        analysis_final_year: table.batch_parse("analysis_final_year")?,
        cost_accrual: table.batch_label("cost_accrual")?,
        discount_values_to_year: table.batch_parse("discount_values_to_year")?,
        vmt_rebound_rate_ice: table.batch_parse("vmt_rebound_rate_ice")?,
        vmt_rebound_rate_bev: table.batch_parse("vmt_rebound_rate_bev")?,
        net_benefit_ghg_scope: table.batch_label("net_benefit_ghg_scope")?,
        electricity_prices_source: table.batch_label("electricity_prices_source")?,
        powertrain_costs_fev: table.batch_bool("powertrain_costs_fev")?,
        save_vehicle_safety_effects_files: table.batch_bool("save_vehicle_safety_effects_files")?,
        save_vehicle_physical_effects_files: table
            .batch_bool("save_vehicle_physical_effects_files")?,
        save_vehicle_cost_effects_files: table.batch_bool("save_vehicle_cost_effects_files")?,
        file_format: table.batch_label("file_format")?,
    })
}

fn read_batch_paths(table: &SettingsTable) -> Result<BatchPaths> {
    Ok(BatchPaths {
        ip_deflators: table.batch_path("ip_deflators")?,
        cpi_deflators: table.batch_path("cpi_deflators")?,
        legacy_fleet: table.batch_path("legacy_fleet")?,
        reregistration_fixed_by_age: table.batch_path("reregistration_fixed_by_age")?,
        annual_vmt_fixed_by_age: table.batch_path("annual_vmt_fixed_by_age")?,
        context_stock_and_vmt: table.batch_path("context_stock_and_vmt")?,
        safety_values: table.batch_path("safety_values")?,
        fatality_rates: table.batch_path("fatality_rates")?,
        onroad_fuels: table.batch_path("onroad_fuels")?,
        context_fuel_prices: table.batch_path("context_fuel_prices")?,
        electricity_prices: table.batch_path("electricity_prices")?,
        emission_rates_egu: table.batch_path("emission_rates_egu")?,
        emission_rates_refinery: table.batch_path("emission_rates_refinery")?,
        cost_factors_criteria: table.batch_path("cost_factors_criteria")?,
        cost_factors_scghg: table.batch_path("cost_factors_scghg")?,
        cost_factors_energysecurity: table.batch_path("cost_factors_energysecurity")?,
        cost_factors_congestion_noise: table.batch_path("cost_factors_congestion_noise")?,
        maintenance_cost: table.batch_path("maintenance_cost")?,
        repair_cost: table.batch_path("repair_cost")?,
        refueling_cost: table.batch_path("refueling_cost")?,
        insurance_and_taxes_cost_factors: table.batch_path("insurance_and_taxes_cost_factors")?,
        general_inputs_for_effects: table.batch_path("general_inputs_for_effects")?,
    })
}

fn read_sessions(table: &SettingsTable) -> Result<Vec<SessionSettings>> {
    let mut sessions = Vec::new();
    for policy in SessionPolicy::all() {
        let label = policy.to_string();
        let Some(name) = table.value("session_name", &label) else {
            continue;
        };
        let required = |parameter: &str| {
            table
                .path(parameter, &label)
                .with_context(|| format!("Missing path for '{parameter}' in session {label}"))
        };
        let (emission_rates_vehicles, powertrain_cost) = if policy == SessionPolicy::Context {
            (None, None)
        } else {
            (
                Some(required("emission_rates_vehicles")?),
                Some(required("powertrain_cost")?),
            )
        };

        sessions.push(SessionSettings {
            policy,
            name: name.to_string(),
            vehicles: required("vehicles")?,
            vehicle_annual_data: required("vehicle_annual_data")?,
            emission_rates_vehicles,
            powertrain_cost,
        });
    }

    for policy in [SessionPolicy::Context, SessionPolicy::NoAction] {
        ensure!(
            sessions.iter().any(|session| session.policy == policy),
            "A {policy} session is required"
        );
    }

    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use crate::model::parameters::{CostAccrual, GhgScope};

    const VALUES: [(&str, &str); 15] = [
        ("batch_name", "test"),
        ("vehicles_base_year", "2024"),
        ("analysis_initial_year", "2025"),
        ("analysis_final_year", "2030"),
        ("cost_accrual", "end-of-year"),
        ("discount_values_to_year", "2025"),
        ("vmt_rebound_rate_ice", "-0.1"),
        ("vmt_rebound_rate_bev", "0"),
        ("net_benefit_ghg_scope", "global"),
        ("electricity_prices_source", "AEO"),
        ("powertrain_costs_fev", "false"),
        ("save_vehicle_safety_effects_files", "false"),
        ("save_vehicle_physical_effects_files", "true"),
        ("save_vehicle_cost_effects_files", "false"),
        ("file_format", "csv"),
    ];

    const BATCH_PATHS: [&str; 22] = [
        "ip_deflators",
        "cpi_deflators",
        "legacy_fleet",
        "reregistration_fixed_by_age",
        "annual_vmt_fixed_by_age",
        "context_stock_and_vmt",
        "safety_values",
        "fatality_rates",
        "onroad_fuels",
        "context_fuel_prices",
        "electricity_prices",
        "emission_rates_egu",
        "emission_rates_refinery",
        "cost_factors_criteria",
        "cost_factors_scghg",
        "cost_factors_energysecurity",
        "cost_factors_congestion_noise",
        "maintenance_cost",
        "repair_cost",
        "refueling_cost",
        "insurance_and_taxes_cost_factors",
        "general_inputs_for_effects",
    ];

    fn value(parameter: &str, session_policy: &str, value: &str) -> BatchSettingRaw {
        BatchSettingRaw {
            parameter: parameter.into(),
            session_policy: session_policy.into(),
            value: Some(value.into()),
            full_path: None,
        }
    }

    fn path(parameter: &str, session_policy: &str) -> BatchSettingRaw {
        BatchSettingRaw {
            parameter: parameter.into(),
            session_policy: session_policy.into(),
            value: None,
            full_path: Some(format!("{parameter}.csv")),
        }
    }

    fn session_rows(policy: &str) -> Vec<BatchSettingRaw> {
        let mut rows = vec![
            value("session_name", policy, policy),
            path("vehicles", policy),
            path("vehicle_annual_data", policy),
        ];
        if policy != "context" {
            rows.push(path("emission_rates_vehicles", policy));
            rows.push(path("powertrain_cost", policy));
        }
        rows
    }

    fn rows() -> Vec<BatchSettingRaw> {
        let mut rows: Vec<_> = VALUES
            .iter()
            .map(|(parameter, v)| value(parameter, "all", v))
            .collect();
        rows.extend(BATCH_PATHS.iter().map(|parameter| path(parameter, "all")));
        for policy in ["context", "no_action", "action_1"] {
            rows.extend(session_rows(policy));
        }
        rows
    }

    #[test]
    fn test_read_batch_settings() {
        let settings = read_batch_settings_from_iter(rows().into_iter(), Path::new("inputs")).unwrap();
        assert_eq!(settings.parameters.cost_accrual, CostAccrual::EndOfYear);
        assert_eq!(settings.parameters.net_benefit_ghg_scope, GhgScope::Global);
        assert!(settings.parameters.save_vehicle_physical_effects_files);
        assert_eq!(settings.paths.legacy_fleet, Path::new("inputs/legacy_fleet.csv"));
        assert_eq!(settings.sessions.len(), 3);
        let context = settings.session(SessionPolicy::Context).unwrap();
        assert!(context.emission_rates_vehicles.is_none());
        let action = settings.session(SessionPolicy::Action(1)).unwrap();
        assert_eq!(action.name, "action_1");
        assert!(action.powertrain_cost.is_some());
    }

    #[test]
    fn test_missing_no_action_session() {
        let rows = rows()
            .into_iter()
            .filter(|row| row.session_policy != "no_action");
        assert_error!(
            read_batch_settings_from_iter(rows, Path::new(".")),
            "A no_action session is required"
        );
    }

    #[test]
    fn test_missing_batch_setting() {
        let rows = rows()
            .into_iter()
            .filter(|row| row.parameter != "cost_accrual");
        assert_error!(
            read_batch_settings_from_iter(rows, Path::new(".")),
            "Missing batch setting 'cost_accrual'"
        );
    }

    #[test]
    fn test_unknown_session_policy() {
        let mut rows = rows();
        rows.push(value("session_name", "action_9", "too many"));
        assert_error!(
            read_batch_settings_from_iter(rows.into_iter(), Path::new(".")),
            "Unknown session policy 'action_9' for 'session_name'"
        );
    }

    #[test]
    fn test_missing_session_path() {
        let rows = rows().into_iter().filter(|row| {
            !(row.parameter == "powertrain_cost" && row.session_policy == "action_1")
        });
        assert_error!(
            read_batch_settings_from_iter(rows, Path::new(".")),
            "Missing path for 'powertrain_cost' in session action_1"
        );
    }
}

//! Code for reading the general inputs for effects file.
use super::*;
use serde::Deserialize;

/// Template for the general inputs file
pub const GENERAL_INPUTS_TEMPLATE: Template = Template {
    name: "general_inputs_for_effects",
    version: "0.1",
    columns: &["item", "value"],
};

/// Physical constants and analysis options which apply to every session
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralInputs {
    /// Grams in a US (short) ton
    pub grams_per_us_ton: f64,
    /// Grams in a metric ton
    pub grams_per_metric_ton: f64,
    /// Gallons in a barrel of oil
    pub gal_per_bbl: f64,
    /// Share of retail gasoline which is petroleum (E0)
    pub e0_in_retail_gasoline: f64,
    /// Energy density of E0 relative to crude oil
    pub e0_energy_density_ratio: f64,
    /// Energy density of diesel relative to crude oil
    pub diesel_energy_density_ratio: f64,
    /// Global warming potential of methane
    pub gwp_ch4: f64,
    /// Global warming potential of nitrous oxide
    pub gwp_n2o: f64,
    /// Length of the first consumer view period
    pub years_in_consumer_view_1: u32,
    /// Length of the second consumer view period
    pub years_in_consumer_view_2: u32,
    /// Discount rates applied to costs and benefits
    pub social_discount_rates: Vec<f64>,
    /// Whether consumer views are broken down by powertrain
    pub include_powertrain_type_in_consumer_cost_view: bool,
    /// Share of reduced fuel demand met by reduced domestic refining
    pub fuel_reduction_leading_to_reduced_domestic_refining: f64,
}

#[derive(Debug, Deserialize, PartialEq)]
struct GeneralInputRaw {
    item: String,
    value: String,
}

/// Read the general inputs file
pub fn read_general_inputs(file_path: &Path) -> Result<GeneralInputs> {
    let rows = read_csv::<GeneralInputRaw>(file_path, &GENERAL_INPUTS_TEMPLATE)?;
    read_general_inputs_from_iter(rows.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_general_inputs_from_iter<I>(iter: I) -> Result<GeneralInputs>
where
    I: Iterator<Item = GeneralInputRaw>,
{
    let mut items = HashMap::new();
    for raw in iter {
        try_insert(&mut items, raw.item, raw.value)?;
    }

    let get = |item: &str| -> Result<&str> {
        items
            .get(item)
            .map(String::as_str)
            .with_context(|| format!("Missing general input '{item}'"))
    };
    let get_f64 = |item: &str| -> Result<f64> {
        let value = get(item)?;
        value
            .parse()
            .with_context(|| format!("Invalid value '{value}' for general input '{item}'"))
    };
    let get_u32 = |item: &str| -> Result<u32> {
        let value = get(item)?;
        value
            .parse()
            .with_context(|| format!("Invalid value '{value}' for general input '{item}'"))
    };

    let inputs = GeneralInputs {
        grams_per_us_ton: get_f64("grams_per_us_ton")?,
        grams_per_metric_ton: get_f64("grams_per_metric_ton")?,
        gal_per_bbl: get_f64("gal_per_bbl")?,
        e0_in_retail_gasoline: get_f64("e0_in_retail_gasoline")?,
        e0_energy_density_ratio: get_f64("e0_energy_density_ratio")?,
        diesel_energy_density_ratio: get_f64("diesel_energy_density_ratio")?,
        gwp_ch4: get_f64("gwp_ch4")?,
        gwp_n2o: get_f64("gwp_n2o")?,
        years_in_consumer_view_1: get_u32("years_in_consumer_view_1")?,
        years_in_consumer_view_2: get_u32("years_in_consumer_view_2")?,
        social_discount_rates: parse_rate_list(get("social_discount_rates")?)?,
        include_powertrain_type_in_consumer_cost_view: parse_bool(get(
            "include_powertrain_type_in_consumer_cost_view",
        )?)?,
        fuel_reduction_leading_to_reduced_domestic_refining: get_f64(
            "fuel_reduction_leading_to_reduced_domestic_refining",
        )?,
    };
    check_general_inputs(&inputs)?;

    Ok(inputs)
}

fn check_general_inputs(inputs: &GeneralInputs) -> Result<()> {
    for (name, value) in [
        ("grams_per_us_ton", inputs.grams_per_us_ton),
        ("grams_per_metric_ton", inputs.grams_per_metric_ton),
        ("gal_per_bbl", inputs.gal_per_bbl),
    ] {
        ensure!(value > 0.0, "{name} must be positive");
    }
    ensure!(
        (0.0..=1.0).contains(&inputs.fuel_reduction_leading_to_reduced_domestic_refining),
        "fuel_reduction_leading_to_reduced_domestic_refining must be between 0 and 1"
    );
    ensure!(
        inputs.years_in_consumer_view_1 > 0 && inputs.years_in_consumer_view_2 > 0,
        "Consumer view periods must be at least one year"
    );

    Ok(())
}

/// Parse a list of discount rates such as `[0.02, 0.03, 0.07]`
fn parse_rate_list(value: &str) -> Result<Vec<f64>> {
    let inner = value.trim();
    let inner = inner
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(inner);
    let rates: Vec<f64> = inner
        .split(',')
        .map(str::trim)
        .filter(|rate| !rate.is_empty())
        .map(|rate| {
            rate.parse()
                .with_context(|| format!("Invalid discount rate '{rate}'"))
        })
        .try_collect()?;
    ensure!(!rates.is_empty(), "At least one social discount rate is required");
    for rate in &rates {
        ensure!(
            (0.0..1.0).contains(rate),
            "Discount rate {rate} must be at least 0 and less than 1"
        );
    }
    ensure!(
        is_sorted_and_unique(rates.iter().copied()),
        "Social discount rates must be given in increasing order"
    );

    Ok(rates)
}

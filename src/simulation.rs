//! Functionality for running the effects calculations over every session of a batch.
use crate::aggregate::{
    AnnualKey, AnnualTable, ModelYearKey, allocate_upstream, apply_upstream, model_year_physical,
    physical_deltas, sum_by_key,
};
use crate::benefits::{BenefitCalculator, social_costs};
use crate::cost_factors::ScghgScope;
use crate::costs::{CostCalculator, CostInputs, CostValues, VehicleCostEffects};
use crate::emission_rates::{EguRateDetail, VehicleRateDetail};
use crate::finance::{ConsumerView, DiscountedRow, Discounter, ModelYearCosts, consumer_view};
use crate::fleet::VehicleAnnualRow;
use crate::fuels::FuelPrices;
use crate::legacy::{LegacyFleetAger, LegacyPreRow};
use crate::model::{BatchInputs, SessionInputs, SessionPolicy};
use crate::physical::{
    PhysicalEffects, PhysicalInputs, UpstreamInputs, VehiclePhysicalEffects,
    calc_physical_effects_for_year,
};
use crate::safety::{SafetyEffects, SafetyTotals, calc_safety_effects};
use crate::values::ValueFields;
use crate::vmt::{ContextCostPerMile, ReboundRates, VmtAdjuster, VmtAdjustments};
use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::BTreeMap;

/// The per-vehicle and annual effects of one session
pub struct SessionEffects {
    /// The session's policy
    pub policy: SessionPolicy,
    /// The session's name
    pub name: String,
    /// The ratios normalising the session to the context
    pub vmt_adjustments: VmtAdjustments,
    /// Per-vehicle safety effects
    pub safety: Vec<SafetyEffects>,
    /// Safety effects summed by annual key
    pub safety_annual: AnnualTable<SafetyTotals>,
    /// Per-vehicle physical effects
    pub physical: Vec<VehiclePhysicalEffects>,
    /// Per-vehicle cost effects
    pub costs: Vec<VehicleCostEffects>,
    /// EGU rates resolved for each calendar year
    pub egu_rates: Vec<EguRateDetail>,
    /// Every vehicle emission rate the session looked up
    pub vehicle_rates: Vec<VehicleRateDetail>,
}

impl SessionEffects {
    /// Physical effects summed by annual key.
    ///
    /// Upstream effects are only included once [`summarise`] has shared them out to vehicles.
    pub fn physical_annual(&self) -> AnnualTable<PhysicalEffects> {
        sum_by_key(
            self.physical
                .iter()
                .map(|row| (AnnualKey::new(&row.vehicle, row.calendar_year), row.effects)),
        )
    }

    /// Cost effects summed by annual key
    pub fn costs_annual(&self) -> AnnualTable<CostValues> {
        sum_by_key(
            self.costs
                .iter()
                .map(|row| (AnnualKey::new(&row.vehicle, row.calendar_year), row.costs)),
        )
    }
}

/// A discounted table covering several sessions
pub struct DiscountedTable {
    /// Names of the value columns
    pub columns: Vec<String>,
    /// Rows, tagged with the session they belong to
    pub rows: Vec<(SessionPolicy, DiscountedRow)>,
}

/// Model year lifetime costs over one consumer view period
pub struct ConsumerViewResults {
    /// Length of the period in years
    pub years: u32,
    /// Rows, tagged with the session they belong to
    pub rows: Vec<(SessionPolicy, ModelYearCosts)>,
}

/// Model year physical effects over one consumer view period
pub struct ModelYearPhysical {
    /// Length of the period in years
    pub years: u32,
    /// The session the effects belong to
    pub policy: SessionPolicy,
    /// The effects by model year
    pub table: BTreeMap<ModelYearKey, PhysicalEffects>,
}

/// Everything calculated for a batch
pub struct BatchResults {
    /// The effects of the no-action session followed by each action session
    pub sessions: Vec<SessionEffects>,
    /// Annual physical effects of each session, upstream effects included
    pub physical_annual: BTreeMap<SessionPolicy, AnnualTable<PhysicalEffects>>,
    /// Action minus no-action physical effects of each action session
    pub physical_deltas: BTreeMap<SessionPolicy, AnnualTable<PhysicalEffects>>,
    /// Discounted cost effects of each session
    pub costs: DiscountedTable,
    /// Discounted benefits of each action session
    pub benefits: DiscountedTable,
    /// Discounted social costs of greenhouse gases, by scope
    pub social_costs: Vec<(ScghgScope, DiscountedTable)>,
    /// Model year lifetime costs for each consumer view period
    pub consumer_views: Vec<ConsumerViewResults>,
    /// Model year physical effects for each consumer view period
    pub model_year_physical: Vec<ModelYearPhysical>,
}

/// Run every session of the batch and derive the batch results.
///
/// # Arguments:
///
/// * `batch` - The batch-level inputs
pub fn run(batch: &BatchInputs) -> Result<BatchResults> {
    let context_settings = batch
        .settings
        .session(SessionPolicy::Context)
        .context("No context session")?;
    info!("Session: {} (context)", context_settings.name);
    let context = batch.load_session(context_settings)?;
    let context_prices = FuelPrices::new(
        &batch.context_fuel_prices,
        context.electricity_prices.clone(),
    );
    let context_cpm = ContextCostPerMile::calculate(
        &context.vehicles,
        &context.annual_data,
        &batch.onroad_fuels,
        &context_prices,
    )?;
    debug!("Context fuel cost per mile has {} entries", context_cpm.len());

    let mut sessions = Vec::new();
    for settings in &batch.settings.sessions {
        if settings.policy == SessionPolicy::Context {
            continue;
        }
        info!("Session: {} ({})", settings.name, settings.policy);
        let inputs = batch.load_session(settings)?;
        sessions.push(run_session(batch, &context_cpm, inputs)?);
    }

    summarise(batch, sessions)
}

/// Run one no-action or action session over the analysis years.
///
/// Years are processed in ascending order as odometers, legacy fleet survival and cumulative
/// maintenance carry over from one year to the next.
pub fn run_session(
    batch: &BatchInputs,
    context_cpm: &ContextCostPerMile,
    mut session: SessionInputs,
) -> Result<SessionEffects> {
    let parameters = batch.parameters();
    let policy = session.settings.policy;
    let years = parameters.analysis_years();
    let mut vehicle_rates = session
        .emission_rates
        .take()
        .with_context(|| format!("No vehicle emission rates for session {policy}"))?;
    let battery_offsets = session.battery_offsets.take().unwrap_or_default();
    let prices = FuelPrices::new(
        &batch.context_fuel_prices,
        session.electricity_prices.clone(),
    );

    let mut ager = LegacyFleetAger::new(
        &batch.legacy_fleet,
        &batch.reregistration,
        &batch.annual_vmt,
    );
    let mut legacy_rows: BTreeMap<u32, Vec<LegacyPreRow>> = BTreeMap::new();
    for year in years.clone() {
        legacy_rows.insert(year, ager.pre_adjustment_rows(year, &batch.onroad_fuels)?);
    }
    let all_legacy: Vec<LegacyPreRow> = legacy_rows.values().flatten().cloned().collect();
    let vmt_adjustments = VmtAdjustments::calculate(
        &session.annual_data,
        &all_legacy,
        &batch.context_stock_and_vmt,
        years.clone(),
    );

    let mut rows_by_year: BTreeMap<u32, Vec<&VehicleAnnualRow>> = BTreeMap::new();
    for row in &session.annual_data {
        rows_by_year.entry(row.calendar_year).or_default().push(row);
    }

    let rebound_rates = ReboundRates {
        ice: parameters.vmt_rebound_rate_ice,
        bev: parameters.vmt_rebound_rate_bev,
    };
    let mut adjuster = VmtAdjuster::new(&batch.onroad_fuels, &prices, context_cpm, rebound_rates);
    let mut cost_calculator = CostCalculator::new(CostInputs {
        fuels: &batch.onroad_fuels,
        prices: &prices,
        tables: &batch.vehicle_costs,
        congestion_noise: &batch.cost_factors.congestion_noise,
        battery_offsets: &battery_offsets,
    });
    let physical_inputs = PhysicalInputs {
        fuels: &batch.onroad_fuels,
        egu_rates: &batch.egu_rates,
        general: &batch.general,
    };

    let mut safety = Vec::new();
    let mut safety_annual = AnnualTable::new();
    let mut physical = Vec::new();
    let mut costs = Vec::new();
    let mut egu_rates = Vec::new();
    for year in years {
        info!("Calendar year: {year}");
        let session_rows = rows_by_year.get(&year).map_or(&[][..], Vec::as_slice);
        let mut rows =
            adjuster.adjust(session_rows.iter().copied(), &session.vehicles, &vmt_adjustments)?;
        let legacy = legacy_rows.get(&year).map_or(&[][..], Vec::as_slice);
        rows.extend(ager.adjust(legacy, &vmt_adjustments));

        for row in &rows {
            let effects = calc_safety_effects(
                &row.vehicle,
                year,
                row.age,
                row.registered_count,
                row.vmt,
                &batch.safety_values,
                &batch.fatality_rates,
            )?;
            *safety_annual
                .entry(AnnualKey::new(&row.vehicle, year))
                .or_default() += effects.totals();
            safety.push(effects);
        }

        let (year_physical, egu) =
            calc_physical_effects_for_year(year, &rows, &mut vehicle_rates, physical_inputs)?;
        physical.extend(year_physical);
        egu_rates.push(egu);
        costs.extend(cost_calculator.calc_for_year(&rows)?);
    }
    debug!(
        "Session {policy} resolved {} vehicle emission rate keys",
        vehicle_rates.cache_len()
    );

    Ok(SessionEffects {
        policy,
        name: session.settings.name,
        vmt_adjustments,
        safety,
        safety_annual,
        physical,
        costs,
        egu_rates,
        vehicle_rates: vehicle_rates.details(),
    })
}

/// Derive the annual, discounted, paired and model year results from the sessions' effects
pub fn summarise(batch: &BatchInputs, mut sessions: Vec<SessionEffects>) -> Result<BatchResults> {
    let parameters = batch.parameters();
    let general = &batch.general;
    let cost_factors = &batch.cost_factors;

    let mut physical_annual: BTreeMap<SessionPolicy, AnnualTable<PhysicalEffects>> = sessions
        .iter()
        .map(|session| (session.policy, session.physical_annual()))
        .collect();
    let costs_annual: BTreeMap<SessionPolicy, AnnualTable<CostValues>> = sessions
        .iter()
        .map(|session| (session.policy, session.costs_annual()))
        .collect();

    let mut no_action_physical = physical_annual
        .remove(&SessionPolicy::NoAction)
        .context("No no-action session")?;
    apply_upstream(
        &mut no_action_physical,
        physical_annual.values_mut(),
        UpstreamInputs {
            refinery_rates: &batch.refinery_rates,
            energy_security: &cost_factors.energy_security,
            general,
        },
    );
    let physical_deltas = physical_annual
        .iter()
        .map(|(policy, action)| (*policy, physical_deltas(&no_action_physical, action)))
        .collect();
    physical_annual.insert(SessionPolicy::NoAction, no_action_physical);
    for session in &mut sessions {
        if let Some(annual) = physical_annual.get(&session.policy) {
            allocate_upstream(&mut session.physical, annual);
        }
    }

    let discounter = Discounter::new(parameters.discount_values_to_year, parameters.cost_accrual);
    let rates = &general.social_discount_rates;

    let own_rates = vec![None; CostValues::FIELD_NAMES.len()];
    let mut cost_rows = Vec::new();
    for (policy, table) in &costs_annual {
        let values = table
            .iter()
            .map(|(key, costs)| (key.clone(), costs.values()))
            .collect();
        cost_rows.extend(
            discounter
                .discount(&values, &own_rates, rates)
                .into_iter()
                .map(|row| (*policy, row)),
        );
    }
    let costs = DiscountedTable {
        columns: CostValues::FIELD_NAMES.iter().map(ToString::to_string).collect(),
        rows: cost_rows,
    };

    let benefits = calc_benefits(
        batch,
        &discounter,
        &physical_annual,
        &costs_annual,
    )?;

    let mut scoped_social_costs = Vec::new();
    for scope in [ScghgScope::Global, ScghgScope::Domestic] {
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        for (policy, table) in &physical_annual {
            let session_costs = social_costs(table, cost_factors, scope)?;
            rows.extend(
                discounter
                    .discount(&session_costs.table, &session_costs.own_rates, rates)
                    .into_iter()
                    .map(|row| (*policy, row)),
            );
            columns = session_costs.columns;
        }
        scoped_social_costs.push((scope, DiscountedTable { columns, rows }));
    }

    let mut view_rates = vec![0.0];
    view_rates.extend(rates.iter().copied());
    let mut consumer_views = Vec::new();
    let mut my_physical = Vec::new();
    for years in [
        general.years_in_consumer_view_1,
        general.years_in_consumer_view_2,
    ] {
        let view = ConsumerView {
            years,
            first_year: parameters.analysis_initial_year,
            last_year: parameters.analysis_final_year,
            accrual: parameters.cost_accrual,
            rates: &view_rates,
            include_fueling_class: general.include_powertrain_type_in_consumer_cost_view,
        };
        let mut rows = Vec::new();
        for session in &sessions {
            rows.extend(
                consumer_view(&session.costs, view)
                    .into_iter()
                    .map(|row| (session.policy, row)),
            );
            my_physical.push(ModelYearPhysical {
                years,
                policy: session.policy,
                table: model_year_physical(
                    &session.physical,
                    years,
                    view.first_year,
                    view.last_year,
                    view.include_fueling_class,
                ),
            });
        }
        consumer_views.push(ConsumerViewResults { years, rows });
    }

    Ok(BatchResults {
        sessions,
        physical_annual,
        physical_deltas,
        costs,
        benefits,
        social_costs: scoped_social_costs,
        consumer_views,
        model_year_physical: my_physical,
    })
}

/// Benefits of each action session relative to the no-action session.
///
/// Net benefits are derived from the discounted benefit and cost columns of each row.
fn calc_benefits(
    batch: &BatchInputs,
    discounter: &Discounter,
    physical_annual: &BTreeMap<SessionPolicy, AnnualTable<PhysicalEffects>>,
    costs_annual: &BTreeMap<SessionPolicy, AnnualTable<CostValues>>,
) -> Result<DiscountedTable> {
    let calculator =
        BenefitCalculator::new(&batch.cost_factors, batch.parameters().net_benefit_ghg_scope);
    let own_rates = calculator.own_rates();
    let mut columns = calculator.column_names();
    columns.extend(calculator.net_column_names());

    let empty_physical = AnnualTable::new();
    let empty_costs = AnnualTable::new();
    let no_action_physical = physical_annual
        .get(&SessionPolicy::NoAction)
        .unwrap_or(&empty_physical);
    let no_action_costs = costs_annual
        .get(&SessionPolicy::NoAction)
        .unwrap_or(&empty_costs);

    let mut rows = Vec::new();
    for (policy, action_physical) in physical_annual {
        if !policy.is_action() {
            continue;
        }
        let action_costs = costs_annual.get(policy).unwrap_or(&empty_costs);
        let table = calculator.calc(
            no_action_physical,
            action_physical,
            no_action_costs,
            action_costs,
        )?;
        for mut row in
            discounter.discount(&table, &own_rates, &batch.general.social_discount_rates)
        {
            let net = calculator.net_benefit_values(&row.values);
            row.values.extend(net);
            rows.push((*policy, row));
        }
    }

    Ok(DiscountedTable { columns, rows })
}

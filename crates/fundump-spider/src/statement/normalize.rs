use super::catalog::{Catalog, Formula, Source, StatementCatalog};
use super::{delta, MetricValue, NormalizedPeriod, StatementSet};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Raw value the upstream provider puts in place of access-restricted data.
pub const ACCESS_DENIED: &str = "1.11";

/// One upstream fact.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLineItem {
    pub period_id: String,
    pub item_id: u32,
    pub value: String,
}

/// One upstream reporting period and all of its line items.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPeriod {
    pub period_id: String,
    pub year: i32,
    pub items: Vec<RawLineItem>,
}

impl RawPeriod {
    // the first fact wins when upstream repeats an id within a period
    fn lookup(&self) -> HashMap<u32, &str> {
        let mut map = HashMap::with_capacity(self.items.len());
        for item in &self.items {
            map.entry(item.item_id).or_insert(item.value.as_str());
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeriodOutcome {
    Kept(NormalizedPeriod),
    /// More line items than the threshold were redacted.
    Dropped { redacted: usize },
}

/// Project one raw period onto one statement of the catalog.
pub fn normalize_period(
    statement: &StatementCatalog,
    period: &RawPeriod,
    redaction_threshold: usize,
) -> PeriodOutcome {
    let items = period.lookup();
    let number = |id: u32| {
        items
            .get(&id)
            .filter(|raw| **raw != ACCESS_DENIED)
            .and_then(|raw| parse_number(raw))
    };

    let mut redacted = 0;
    let mut values: Vec<(String, MetricValue)> = Vec::with_capacity(statement.metrics.len());
    for metric in &statement.metrics {
        let value = match metric.source {
            Source::LineItem { id } => match items.get(&id) {
                None => MetricValue::Unavailable,
                Some(&ACCESS_DENIED) => {
                    redacted += 1;
                    MetricValue::Unavailable
                }
                Some(raw) => match parse_number(raw) {
                    Some(value) => MetricValue::Number(metric.sign.apply(value)),
                    None => {
                        trace!("line item {id} of period {} is not a number: {raw:?}", period.period_id);
                        MetricValue::Unavailable
                    }
                },
            },

            Source::Derived(Formula::FreeCashFlow { cash_from_ops, capex }) => {
                match (number(cash_from_ops), number(capex)) {
                    (Some(ops), Some(capex)) => MetricValue::Number(metric.sign.apply(ops + capex)),
                    _ => MetricValue::Unset,
                }
            }

            Source::Derived(Formula::FreeCashFlowMargin {
                free_cash_flow,
                revenues,
            }) => {
                let fcf = values[free_cash_flow].1.as_number();
                match (fcf, number(revenues)) {
                    (Some(fcf), Some(revenue)) if revenue != 0.0 => {
                        MetricValue::Number(metric.sign.apply(fcf * 100.0 / revenue))
                    }
                    _ => MetricValue::Unset,
                }
            }

            Source::Delta { .. } => MetricValue::Unset,
        };
        values.push((metric.name.clone(), value));
    }

    if redacted > redaction_threshold {
        return PeriodOutcome::Dropped { redacted };
    }

    PeriodOutcome::Kept(NormalizedPeriod {
        statement: statement.kind,
        year: period.year,
        values,
    })
}

/// Normalize every period against every statement, then fill in the year-over-year deltas.
///
/// Periods keep the order upstream returned them in.
pub fn normalize(catalog: &Catalog, periods: &[RawPeriod], redaction_threshold: usize) -> StatementSet {
    let mut set = StatementSet::default();

    for statement in catalog.statements() {
        let mut kept = Vec::with_capacity(periods.len());
        let mut dropped = 0;
        for period in periods {
            match normalize_period(statement, period, redaction_threshold) {
                PeriodOutcome::Kept(normalized) => kept.push(normalized),
                PeriodOutcome::Dropped { redacted } => {
                    debug!(
                        "dropping {} period {} ({}), {redacted} line items redacted",
                        statement.kind, period.period_id, period.year
                    );
                    dropped += 1;
                }
            }
        }

        delta::compute_deltas(statement, &mut kept);

        set.periods.insert(statement.kind, kept);
        if dropped > 0 {
            set.dropped.insert(statement.kind, dropped);
        }
    }

    set
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

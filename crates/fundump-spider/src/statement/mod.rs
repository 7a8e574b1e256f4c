//! Financial statements: the metric catalog, per-period normalization and year-over-year deltas.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod catalog;
pub mod delta;
pub mod normalize;

pub use catalog::{Catalog, Formula, MetricSpec, Sign, Source, StatementCatalog};
pub use delta::{compute_deltas, yoy_change};
pub use normalize::{normalize, normalize_period, PeriodOutcome, RawLineItem, RawPeriod};

/// The fixed set of statements the catalog can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum StatementKind {
    #[serde(rename = "Income Statement")]
    IncomeStatement,
    #[serde(rename = "Balance Sheet")]
    BalanceSheet,
    #[serde(rename = "Cash Flow Statement")]
    CashFlow,
}

impl StatementKind {
    pub const ALL: [StatementKind; 3] = [
        StatementKind::IncomeStatement,
        StatementKind::BalanceSheet,
        StatementKind::CashFlow,
    ];

    /// Label stored in the `statement` column and used for export file names.
    pub fn name(&self) -> &'static str {
        match self {
            StatementKind::IncomeStatement => "Income Statement",
            StatementKind::BalanceSheet => "Balance Sheet",
            StatementKind::CashFlow => "Cash Flow Statement",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The value of one metric within one period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Number(f64),
    /// The line item was missing, redacted or not a number.
    Unavailable,
    /// A derived or delta value that has not been (or could not be) computed.
    Unset,
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn from_option(value: Option<f64>) -> Self {
        match value {
            Some(value) => MetricValue::Number(value),
            None => MetricValue::Unavailable,
        }
    }
}

/// One statement for one reporting period.
///
/// `values` holds exactly one entry per metric of the statement's catalog, in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPeriod {
    pub statement: StatementKind,
    pub year: i32,
    pub values: Vec<(String, MetricValue)>,
}

impl NormalizedPeriod {
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values
            .iter()
            .find(|(metric, _)| metric == name)
            .map(|(_, value)| *value)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|value| value.as_number())
    }
}

/// Every statement of one company, each an ascending sequence of periods.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementSet {
    pub periods: BTreeMap<StatementKind, Vec<NormalizedPeriod>>,
    /// Periods removed by the redaction gate, per statement.
    pub dropped: BTreeMap<StatementKind, usize>,
}

impl StatementSet {
    pub fn get(&self, kind: StatementKind) -> &[NormalizedPeriod] {
        self.periods.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.periods.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_names_round_trip() {
        for kind in StatementKind::ALL {
            assert_eq!(StatementKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(StatementKind::from_name("Cash Flow"), None);
    }
}

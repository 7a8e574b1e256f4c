//! Where normalized statements end up: flattened facts for the database, or tabular exports.
use crate::error::Result;
use crate::statement::{MetricValue, StatementSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub mod export;
pub mod pg;

pub use pg::PgFactSink;

/// One row of the `financials` table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PersistedFact {
    pub symbol: String,
    pub statement: String,
    pub fiscal_year: i32,
    pub fiscal_period: String,
    pub key: String,
    pub value: Option<f64>,
    pub currency: String,
}

/// The identity of a fact; at most one row exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactKey {
    pub symbol: String,
    pub statement: String,
    pub fiscal_year: i32,
    pub fiscal_period: String,
    pub key: String,
}

impl PersistedFact {
    pub fn key(&self) -> FactKey {
        FactKey {
            symbol: self.symbol.clone(),
            statement: self.statement.clone(),
            fiscal_year: self.fiscal_year,
            fiscal_period: self.fiscal_period.clone(),
            key: self.key.clone(),
        }
    }
}

/// What happens when a fact's key is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// First write wins; later writes of the same key are no-ops.
    #[default]
    Ignore,
    /// Later writes replace the stored value and currency.
    Update,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" | "nothing" => Ok(ConflictPolicy::Ignore),
            "update" | "overwrite" => Ok(ConflictPolicy::Update),
            other => Err(format!("unknown conflict policy {other:?}, expected ignore or update")),
        }
    }
}

/// Labels stamped on every fact of a run.
#[derive(Debug, Clone)]
pub struct FactLabels<'a> {
    pub symbol: &'a str,
    pub fiscal_period: &'a str,
    /// Stamped on each statement's last period instead of `fiscal_period`.
    pub trailing_period: Option<&'a str>,
    pub currency: &'a str,
}

/// Flatten every period of every statement into facts, one per metric.
///
/// Unavailable and unset values become `None`. Without a trailing label, a trailing period that
/// shares its fiscal year with the last full year also shares its keys.
pub fn flatten(labels: &FactLabels<'_>, statements: &StatementSet) -> Vec<PersistedFact> {
    let mut facts = Vec::new();
    for periods in statements.periods.values() {
        let last = periods.len().saturating_sub(1);
        for (idx, period) in periods.iter().enumerate() {
            let fiscal_period = match labels.trailing_period {
                Some(label) if idx == last => label,
                _ => labels.fiscal_period,
            };
            for (key, value) in &period.values {
                facts.push(PersistedFact {
                    symbol: labels.symbol.to_string(),
                    statement: period.statement.name().to_string(),
                    fiscal_year: period.year,
                    fiscal_period: fiscal_period.to_string(),
                    key: key.clone(),
                    value: value.as_number(),
                    currency: labels.currency.to_string(),
                });
            }
        }
    }
    facts
}

/// Group facts back into `(statement, fiscal_year) -> key -> value`.
pub fn regroup(facts: &[PersistedFact]) -> BTreeMap<(String, i32), BTreeMap<String, MetricValue>> {
    let mut groups: BTreeMap<(String, i32), BTreeMap<String, MetricValue>> = BTreeMap::new();
    for fact in facts {
        groups
            .entry((fact.statement.clone(), fact.fiscal_year))
            .or_default()
            .insert(fact.key.clone(), MetricValue::from_option(fact.value));
    }
    groups
}

/// A durable keyed store of facts.
#[async_trait]
pub trait FactSink: Send {
    /// Write one company's facts as a single unit, returning how many rows changed.
    async fn write(&mut self, facts: &[PersistedFact]) -> Result<u64>;

    /// Remove every fact of `symbol`, returning how many rows were removed.
    async fn delete_company(&mut self, symbol: &str) -> Result<u64>;

    /// Swap every stored fact of `symbol` for `facts` as a single unit, returning how many rows
    /// were written.
    async fn replace_company(&mut self, symbol: &str, facts: &[PersistedFact]) -> Result<u64>;
}

/// An in-process [`FactSink`] with the same key semantics as the `financials` table.
#[derive(Debug, Default)]
pub struct MemoryFactSink {
    pub policy: ConflictPolicy,
    rows: BTreeMap<FactKey, PersistedFact>,
}

impl MemoryFactSink {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            rows: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &FactKey) -> Option<&PersistedFact> {
        self.rows.get(key)
    }

    pub fn facts(&self) -> Vec<PersistedFact> {
        self.rows.values().cloned().collect()
    }
}

#[async_trait]
impl FactSink for MemoryFactSink {
    async fn write(&mut self, facts: &[PersistedFact]) -> Result<u64> {
        let mut changed = 0;
        for fact in facts {
            let key = fact.key();
            match (self.rows.contains_key(&key), self.policy) {
                (true, ConflictPolicy::Ignore) => continue,
                _ => {
                    self.rows.insert(key, fact.clone());
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn delete_company(&mut self, symbol: &str) -> Result<u64> {
        let before = self.rows.len();
        self.rows.retain(|key, _| key.symbol != symbol);
        Ok((before - self.rows.len()) as u64)
    }

    async fn replace_company(&mut self, symbol: &str, facts: &[PersistedFact]) -> Result<u64> {
        self.delete_company(symbol).await?;
        self.write(facts).await
    }
}

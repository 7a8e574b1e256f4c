use super::StatementKind;
use crate::error::{Result, SpiderError};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Metric names containing this marker are year-over-year deltas of the name without it.
pub const DELTA_MARKER: &str = " YoY";

/// Upstream line items free cash flow reads when the statement does not declare them.
pub const CASH_FROM_OPERATIONS_ID: u32 = 2006;
pub const CAPITAL_EXPENDITURE_ID: u32 = 2021;

const REVENUES: &str = "Revenues";
const FREE_CASH_FLOW: &str = "Free Cash Flow";
const CASH_FROM_OPERATIONS: &str = "Cash from Operations";
const CAPITAL_EXPENDITURE: &str = "Capital Expenditure";

/// Computations the normalizer knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaTag {
    FreeCashFlow,
    FreeCashFlowMargin,
}

/// A resolved formula, with its inputs bound to line-item ids or metric positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formula {
    /// Cash from operations + capital expenditure (capex is reported negative).
    FreeCashFlow { cash_from_ops: u32, capex: u32 },
    /// Free cash flow of the same period over revenues, as a percentage.
    FreeCashFlowMargin { free_cash_flow: usize, revenues: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    LineItem { id: u32 },
    Derived(Formula),
    /// Year-over-year change of the metric at position `base` in the same statement.
    Delta { base: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Identity,
    Negated,
}

impl Sign {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Sign::Identity => value,
            Sign::Negated => -value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub source: Source,
    pub sign: Sign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementCatalog {
    pub kind: StatementKind,
    pub metrics: Vec<MetricSpec>,
}

impl StatementCatalog {
    pub fn position(&self, name: &str) -> Option<usize> {
        self.metrics.iter().position(|metric| metric.name == name)
    }
}

/// The parsed, validated set of metrics per statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    statements: Vec<StatementCatalog>,
}

impl Catalog {
    /// The catalog compiled into the crate.
    pub fn builtin() -> Self {
        Self::parse(builtin_file()).expect("built-in metric catalog is valid")
    }

    /// Load and validate a JSON catalog file.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let file: CatalogFile = crate::fs::read_json(path).await?;
        Self::parse(file)
    }

    /// Validate a declarative catalog, resolving every metric into a typed [`Source`].
    pub fn parse(file: CatalogFile) -> Result<Self> {
        let mut seen_kinds = HashSet::new();
        for entry in &file.statements {
            if !seen_kinds.insert(entry.statement) {
                return Err(SpiderError::Catalog(format!(
                    "statement {} declared twice",
                    entry.statement
                )));
            }
        }

        // the margin formula reads the income statement's revenue line item
        let revenues = file
            .statements
            .iter()
            .filter(|entry| entry.statement == StatementKind::IncomeStatement)
            .flat_map(|entry| entry.metrics.iter())
            .find(|metric| metric.name == REVENUES)
            .and_then(|metric| metric.id);

        let mut statements = Vec::with_capacity(file.statements.len());
        for entry in file.statements {
            statements.push(parse_statement(entry, revenues)?);
        }
        debug!(
            "metric catalog parsed, {} statements, {} metrics",
            statements.len(),
            statements.iter().map(|s| s.metrics.len()).sum::<usize>()
        );

        Ok(Self { statements })
    }

    pub fn statements(&self) -> &[StatementCatalog] {
        &self.statements
    }

    pub fn statement(&self, kind: StatementKind) -> Option<&StatementCatalog> {
        self.statements.iter().find(|s| s.kind == kind)
    }
}

fn parse_statement(entry: StatementEntry, revenues: Option<u32>) -> Result<StatementCatalog> {
    let kind = entry.statement;
    let fail = |reason: String| SpiderError::Catalog(format!("{kind}: {reason}"));

    let mut names = HashSet::new();
    for metric in &entry.metrics {
        if metric.name == "year" {
            return Err(fail("\"year\" is reserved".to_string()));
        }
        if !names.insert(metric.name.as_str()) {
            return Err(fail(format!("metric {:?} declared twice", metric.name)));
        }
    }

    let position = |name: &str| entry.metrics.iter().position(|m| m.name == name);
    let line_item = |name: &str, default: u32| {
        entry
            .metrics
            .iter()
            .find(|m| m.name == name && m.formula.is_none())
            .and_then(|m| m.id)
            .unwrap_or(default)
    };

    let mut metrics = Vec::with_capacity(entry.metrics.len());
    for (idx, metric) in entry.metrics.iter().enumerate() {
        let source = if metric.name.contains(DELTA_MARKER) {
            if metric.id.is_some() || metric.formula.is_some() {
                return Err(fail(format!(
                    "delta metric {:?} cannot carry an id or formula",
                    metric.name
                )));
            }
            let base_name = metric.name.replace(DELTA_MARKER, "");
            let base = position(&base_name).ok_or_else(|| {
                fail(format!("delta metric {:?} has no base {base_name:?}", metric.name))
            })?;
            Source::Delta { base }
        } else if let Some(tag) = metric.formula {
            let formula = match tag {
                FormulaTag::FreeCashFlow => Formula::FreeCashFlow {
                    cash_from_ops: line_item(CASH_FROM_OPERATIONS, CASH_FROM_OPERATIONS_ID),
                    capex: line_item(CAPITAL_EXPENDITURE, CAPITAL_EXPENDITURE_ID),
                },
                FormulaTag::FreeCashFlowMargin => {
                    // must be resolved before the margin within the same period
                    let free_cash_flow = position(FREE_CASH_FLOW)
                        .filter(|&fcf| fcf < idx)
                        .ok_or_else(|| {
                            fail(format!("{:?} needs {FREE_CASH_FLOW:?} declared before it", metric.name))
                        })?;
                    let revenues = revenues.ok_or_else(|| {
                        fail(format!(
                            "{:?} needs an income statement {REVENUES:?} line item",
                            metric.name
                        ))
                    })?;
                    Formula::FreeCashFlowMargin {
                        free_cash_flow,
                        revenues,
                    }
                }
            };
            Source::Derived(formula)
        } else {
            let id = metric
                .id
                .ok_or_else(|| fail(format!("metric {:?} has neither id nor formula", metric.name)))?;
            Source::LineItem { id }
        };

        metrics.push(MetricSpec {
            name: metric.name.clone(),
            source,
            sign: if metric.negate {
                Sign::Negated
            } else {
                Sign::Identity
            },
        });
    }

    // a delta of a delta would read a value that is never normalized
    for metric in &metrics {
        if let Source::Delta { base } = metric.source {
            if matches!(metrics[base].source, Source::Delta { .. }) {
                return Err(fail(format!("{:?} is a delta of a delta", metric.name)));
            }
        }
    }

    Ok(StatementCatalog { kind, metrics })
}

// -- DECLARATIVE FORM --

/// A catalog as written in a JSON file.
///
/// ```json
/// {
///     "statements": [
///         {
///             "statement": "Income Statement",
///             "metrics": [
///                 { "name": "Revenues", "id": 28 },
///                 { "name": "Revenues YoY" },
///                 { "name": "Income Tax Expense", "id": 75, "negate": true }
///             ]
///         }
///     ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFile {
    pub statements: Vec<StatementEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementEntry {
    pub statement: StatementKind,
    pub metrics: Vec<MetricEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub formula: Option<FormulaTag>,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Clone, Copy)]
enum Decl {
    Item(u32),
    Negated(u32),
    Derive(FormulaTag),
    Delta,
}

use Decl::*;

const INCOME_STATEMENT: &[(&str, Decl)] = &[
    ("Revenues", Item(28)),
    ("Revenues YoY", Delta),
    ("Cost Of Goods Sold", Item(34)),
    ("Gross Profit", Item(10)),
    ("Gross Profit YoY", Delta),
    ("Selling General & Admin Expenses", Item(102)),
    ("R&D Expenses", Item(100)),
    ("Operating Income", Item(21)),
    ("Operating Income YoY", Delta),
    ("Interest Expense", Item(82)),
    ("EBT Incl. Unusual Items", Item(139)),
    ("Income Tax Expense", Negated(75)),
    ("Net Income", Item(15)),
    ("Net Income YoY", Delta),
    ("Diluted EPS", Item(142)),
    ("Diluted EPS YoY", Delta),
    ("Weighted Average Diluted Shares Outstanding", Item(342)),
    ("EBITDA", Item(4051)),
    ("EBITDA YoY", Delta),
];

const BALANCE_SHEET: &[(&str, Decl)] = &[
    ("Cash And Equivalents", Item(1096)),
    ("Total Cash And Short Term Investments", Item(1002)),
    ("Total Receivables", Item(1001)),
    ("Inventory", Item(1043)),
    ("Total Current Assets", Item(1008)),
    ("Net Property Plant And Equipment", Item(1004)),
    ("Goodwill", Item(1171)),
    ("Total Assets", Item(1007)),
    ("Total Assets YoY", Delta),
    ("Accounts Payable", Item(1018)),
    ("Total Current Liabilities", Item(1009)),
    ("Long-Term Debt", Item(1049)),
    ("Total Liabilities", Item(1276)),
    ("Total Equity", Item(1275)),
    ("Total Equity YoY", Delta),
    ("Total Debt", Item(4173)),
    ("Net Debt", Item(4364)),
];

const CASH_FLOW: &[(&str, Decl)] = &[
    ("Depreciation & Amortization", Item(2160)),
    ("Cash from Operations", Item(CASH_FROM_OPERATIONS_ID)),
    ("Cash from Operations YoY", Delta),
    ("Capital Expenditure", Item(CAPITAL_EXPENDITURE_ID)),
    ("Cash from Investing", Item(2005)),
    ("Total Debt Repaid", Item(2166)),
    ("Repurchase of Common Stock", Item(2164)),
    ("Common Dividends Paid", Item(2022)),
    ("Cash from Financing", Item(2004)),
    ("Net Change in Cash", Item(2093)),
    ("Free Cash Flow", Derive(FormulaTag::FreeCashFlow)),
    ("Free Cash Flow YoY", Delta),
    ("% Free Cash Flow Margins", Derive(FormulaTag::FreeCashFlowMargin)),
];

fn builtin_file() -> CatalogFile {
    let entry = |statement, decls: &[(&str, Decl)]| StatementEntry {
        statement,
        metrics: decls
            .iter()
            .map(|&(name, decl)| MetricEntry {
                name: name.to_string(),
                id: match decl {
                    Item(id) | Negated(id) => Some(id),
                    _ => None,
                },
                formula: match decl {
                    Derive(tag) => Some(tag),
                    _ => None,
                },
                negate: matches!(decl, Negated(_)),
            })
            .collect(),
    };

    CatalogFile {
        statements: vec![
            entry(StatementKind::IncomeStatement, INCOME_STATEMENT),
            entry(StatementKind::BalanceSheet, BALANCE_SHEET),
            entry(StatementKind::CashFlow, CASH_FLOW),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(json: serde_json::Value) -> CatalogFile {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn builtin_catalog_resolves_sources() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.statements().len(), 3);

        let income = catalog.statement(StatementKind::IncomeStatement).unwrap();
        let revenues = income.position("Revenues").unwrap();
        let yoy = &income.metrics[income.position("Revenues YoY").unwrap()];
        assert_eq!(yoy.source, Source::Delta { base: revenues });

        let tax = &income.metrics[income.position("Income Tax Expense").unwrap()];
        assert_eq!(tax.sign, Sign::Negated);
        assert_eq!(tax.source, Source::LineItem { id: 75 });

        let cash_flow = catalog.statement(StatementKind::CashFlow).unwrap();
        let margin = &cash_flow.metrics[cash_flow.position("% Free Cash Flow Margins").unwrap()];
        assert_eq!(
            margin.source,
            Source::Derived(Formula::FreeCashFlowMargin {
                free_cash_flow: cash_flow.position("Free Cash Flow").unwrap(),
                revenues: 28,
            })
        );
    }

    #[test]
    fn delta_without_base_is_rejected() {
        let err = Catalog::parse(file(serde_json::json!({
            "statements": [{
                "statement": "Balance Sheet",
                "metrics": [{ "name": "Total Assets YoY" }]
            }]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("no base"));
    }

    #[test]
    fn duplicates_and_reserved_names_are_rejected() {
        let dup = Catalog::parse(file(serde_json::json!({
            "statements": [{
                "statement": "Balance Sheet",
                "metrics": [
                    { "name": "Goodwill", "id": 1171 },
                    { "name": "Goodwill", "id": 1172 }
                ]
            }]
        })));
        assert!(matches!(dup, Err(SpiderError::Catalog(_))));

        let year = Catalog::parse(file(serde_json::json!({
            "statements": [{
                "statement": "Balance Sheet",
                "metrics": [{ "name": "year", "id": 1 }]
            }]
        })));
        assert!(matches!(year, Err(SpiderError::Catalog(_))));
    }

    #[test]
    fn margin_requires_revenues_and_free_cash_flow() {
        let err = Catalog::parse(file(serde_json::json!({
            "statements": [{
                "statement": "Cash Flow Statement",
                "metrics": [
                    { "name": "Free Cash Flow", "formula": "free_cash_flow" },
                    { "name": "% Free Cash Flow Margins", "formula": "free_cash_flow_margin" }
                ]
            }]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("Revenues"));
    }

    #[test]
    fn free_cash_flow_reads_the_declared_line_items() {
        let catalog = Catalog::parse(file(serde_json::json!({
            "statements": [{
                "statement": "Cash Flow Statement",
                "metrics": [
                    { "name": "Cash from Operations", "id": 9006 },
                    { "name": "Capital Expenditure", "id": 9021 },
                    { "name": "Free Cash Flow", "formula": "free_cash_flow" }
                ]
            }]
        })))
        .unwrap();
        let cash_flow = catalog.statement(StatementKind::CashFlow).unwrap();
        assert_eq!(
            cash_flow.metrics[2].source,
            Source::Derived(Formula::FreeCashFlow {
                cash_from_ops: 9006,
                capex: 9021
            })
        );

        let undeclared = Catalog::parse(file(serde_json::json!({
            "statements": [{
                "statement": "Cash Flow Statement",
                "metrics": [{ "name": "Free Cash Flow", "formula": "free_cash_flow" }]
            }]
        })))
        .unwrap();
        assert_eq!(
            undeclared.statement(StatementKind::CashFlow).unwrap().metrics[0].source,
            Source::Derived(Formula::FreeCashFlow {
                cash_from_ops: CASH_FROM_OPERATIONS_ID,
                capex: CAPITAL_EXPENDITURE_ID
            })
        );
    }

    #[test]
    fn line_item_without_id_is_rejected() {
        let err = Catalog::parse(file(serde_json::json!({
            "statements": [{
                "statement": "Income Statement",
                "metrics": [{ "name": "Revenues" }]
            }]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("neither id nor formula"));
    }
}

use async_trait::async_trait;
use fundump_spider::pipeline::{process_company, refresh_company, run_batch, WriteMode};
use fundump_spider::sink::{ConflictPolicy, FactKey, FactSink, MemoryFactSink};
use fundump_spider::statement::{Catalog, RawLineItem, RawPeriod, StatementKind};
use fundump_spider::tikr::{client::classify, CompanyIds, PeriodFetcher};
use fundump_spider::{SpiderConfig, SpiderError};
use reqwest::StatusCode;
use std::collections::HashMap;

const MSFT: &str = include_str!("fixtures/msft_financials.json");

/// Serves canned periods per ticker; `None` periods make the fetch fail.
#[derive(Default)]
struct FakeFetcher {
    companies: HashMap<String, (CompanyIds, Option<Vec<RawPeriod>>)>,
    fetches: usize,
}

impl FakeFetcher {
    fn with(mut self, ticker: &str, periods: Option<Vec<RawPeriod>>) -> Self {
        let n = self.companies.len() as i64 + 1;
        let ids = CompanyIds {
            trading_id: n * 10,
            company_id: n,
        };
        self.companies.insert(ticker.to_string(), (ids, periods));
        self
    }
}

#[async_trait]
impl PeriodFetcher for FakeFetcher {
    async fn find_company(&mut self, ticker: &str) -> fundump_spider::Result<Option<CompanyIds>> {
        Ok(self.companies.get(ticker).map(|(ids, _)| *ids))
    }

    async fn fetch_periods(&mut self, ids: CompanyIds) -> fundump_spider::Result<Vec<RawPeriod>> {
        self.fetches += 1;
        let (_, periods) = self
            .companies
            .values()
            .find(|(known, _)| *known == ids)
            .expect("fetch for a company that was found");
        periods
            .clone()
            .ok_or_else(|| SpiderError::UpstreamShape("no dates in response".to_string()))
    }
}

fn msft_periods() -> Vec<RawPeriod> {
    classify(StatusCode::OK, MSFT).unwrap().into_periods().unwrap()
}

fn config() -> SpiderConfig {
    SpiderConfig {
        rate_limit_secs: (0, 0),
        ..SpiderConfig::default()
    }
}

fn key(statement: StatementKind, year: i32, key: &str) -> FactKey {
    FactKey {
        symbol: "MSFT".to_string(),
        statement: statement.name().to_string(),
        fiscal_year: year,
        fiscal_period: "FY".to_string(),
        key: key.to_string(),
    }
}

fn value(sink: &MemoryFactSink, statement: StatementKind, year: i32, name: &str) -> Option<f64> {
    sink.get(&key(statement, year, name))
        .unwrap_or_else(|| panic!("missing fact {statement} {year} {name}"))
        .value
}

/// A company whose balance sheet is fully redacted in every period.
fn redacted_periods() -> Vec<RawPeriod> {
    let catalog = Catalog::builtin();
    let balance = catalog.statement(StatementKind::BalanceSheet).unwrap();
    (2020..2023)
        .map(|year| {
            let period_id = format!("r{year}");
            let mut items: Vec<RawLineItem> = balance
                .metrics
                .iter()
                .filter_map(|metric| match metric.source {
                    fundump_spider::statement::Source::LineItem { id } => Some(id),
                    _ => None,
                })
                .map(|item_id| RawLineItem {
                    period_id: period_id.clone(),
                    item_id,
                    value: "1.11".to_string(),
                })
                .collect();
            items.push(RawLineItem {
                period_id: period_id.clone(),
                item_id: 28,
                value: "10".to_string(),
            });
            RawPeriod {
                period_id,
                year,
                items,
            }
        })
        .collect()
}

#[tokio::test]
async fn company_is_normalized_and_persisted() {
    let catalog = Catalog::builtin();
    let mut fetcher = FakeFetcher::default().with("MSFT", Some(msft_periods()));
    let mut sink = MemoryFactSink::new(ConflictPolicy::Ignore);

    let report = process_company(&mut fetcher, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap();

    let metrics = |kind| catalog.statement(kind).unwrap().metrics.len();
    let expected = 3 * metrics(StatementKind::IncomeStatement)
        + 2 * metrics(StatementKind::BalanceSheet)
        + 3 * metrics(StatementKind::CashFlow);
    assert_eq!(report.facts, expected);
    assert_eq!(report.written as usize, expected);
    assert_eq!(report.periods, 8);
    assert_eq!(report.dropped, 1);
    assert_eq!(sink.len(), expected);

    use StatementKind::*;
    assert_eq!(value(&sink, IncomeStatement, 2021, "Revenues YoY"), None);
    assert_eq!(value(&sink, IncomeStatement, 2022, "Revenues YoY"), Some(50.0));
    assert_eq!(value(&sink, IncomeStatement, 2023, "Revenues YoY"), Some(50.0));
    assert_eq!(value(&sink, IncomeStatement, 2022, "Net Income YoY"), Some(100.0));
    assert_eq!(value(&sink, IncomeStatement, 2021, "Income Tax Expense"), Some(-5.0));
    assert_eq!(value(&sink, IncomeStatement, 2023, "Diluted EPS"), None);

    assert_eq!(value(&sink, CashFlow, 2021, "Free Cash Flow"), Some(30.0));
    assert_eq!(value(&sink, CashFlow, 2021, "% Free Cash Flow Margins"), Some(30.0));
    assert_eq!(value(&sink, CashFlow, 2022, "% Free Cash Flow Margins"), Some(20.0));
    assert_eq!(value(&sink, CashFlow, 2023, "% Free Cash Flow Margins"), Some(40.0));
    assert_eq!(value(&sink, CashFlow, 2022, "Free Cash Flow YoY"), Some(0.0));
    assert_eq!(value(&sink, CashFlow, 2022, "Cash from Operations YoY"), Some(20.0));

    // the redacted 2022 balance sheet is gone; deltas run over the kept periods
    assert!(sink.get(&key(BalanceSheet, 2022, "Total Assets")).is_none());
    assert_eq!(value(&sink, BalanceSheet, 2023, "Total Assets YoY"), Some(20.0));
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let catalog = Catalog::builtin();
    let mut fetcher = FakeFetcher::default().with("MSFT", Some(msft_periods()));
    let mut sink = MemoryFactSink::new(ConflictPolicy::Ignore);

    let first = process_company(&mut fetcher, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap();
    let rows = sink.facts();

    let second = process_company(&mut fetcher, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap();
    assert_eq!(second.facts, first.facts);
    assert_eq!(second.written, 0);
    assert_eq!(sink.facts(), rows);
}

#[tokio::test]
async fn refresh_after_delete() {
    let catalog = Catalog::builtin();
    let mut fetcher = FakeFetcher::default().with("MSFT", Some(msft_periods()));
    let mut sink = MemoryFactSink::new(ConflictPolicy::Ignore);

    let first = process_company(&mut fetcher, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap();
    assert_eq!(sink.delete_company("MSFT").await.unwrap() as usize, first.facts);
    assert!(sink.is_empty());

    let again = process_company(&mut fetcher, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap();
    assert_eq!(again.written as usize, first.facts);
}

#[tokio::test]
async fn refresh_replaces_stale_facts() {
    let catalog = Catalog::builtin();
    let mut fetcher = FakeFetcher::default().with("MSFT", Some(msft_periods()));
    let mut sink = MemoryFactSink::new(ConflictPolicy::Ignore);

    let revenues = key(StatementKind::IncomeStatement, 2021, "Revenues");
    let stale = fundump_spider::sink::PersistedFact {
        symbol: revenues.symbol.clone(),
        statement: revenues.statement.clone(),
        fiscal_year: revenues.fiscal_year,
        fiscal_period: revenues.fiscal_period.clone(),
        key: revenues.key.clone(),
        value: Some(999.0),
        currency: "USD".to_string(),
    };
    let mut retired = stale.clone();
    retired.key = "Retired Metric".to_string();
    sink.write(&[stale, retired.clone()]).await.unwrap();

    let report = refresh_company(&mut fetcher, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap();
    assert_eq!(report.written as usize, report.facts);
    assert_eq!(sink.len(), report.facts);
    assert_eq!(value(&sink, StatementKind::IncomeStatement, 2021, "Revenues"), Some(100.0));
    assert!(sink.get(&retired.key()).is_none());
}

#[tokio::test]
async fn failed_refresh_keeps_stored_facts() {
    let catalog = Catalog::builtin();
    let mut sink = MemoryFactSink::new(ConflictPolicy::Ignore);
    let mut fetcher = FakeFetcher::default().with("MSFT", Some(msft_periods()));
    process_company(&mut fetcher, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap();
    let stored = sink.facts();

    let mut broken = FakeFetcher::default().with("MSFT", None);
    let err = refresh_company(&mut broken, &mut sink, &catalog, &config(), "MSFT")
        .await
        .unwrap_err();
    assert!(matches!(err, SpiderError::UpstreamShape(_)));
    assert_eq!(sink.facts(), stored);

    let symbols = vec!["MSFT".to_string(), "NOPE".to_string()];
    let report = run_batch(&mut broken, &mut sink, &catalog, &config(), &symbols, WriteMode::Replace, false)
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 2);
    assert_eq!(sink.facts(), stored);
}

#[tokio::test]
async fn fully_redacted_statement_persists_nothing() {
    let catalog = Catalog::builtin();
    let mut fetcher = FakeFetcher::default().with("ZZZ", Some(redacted_periods()));
    let mut sink = MemoryFactSink::default();

    let report = process_company(&mut fetcher, &mut sink, &catalog, &config(), "ZZZ")
        .await
        .unwrap();
    assert_eq!(report.dropped, 3);

    let balance = StatementKind::BalanceSheet.name();
    let facts = sink.facts();
    assert!(!facts.is_empty());
    assert!(facts.iter().all(|fact| fact.statement != balance));
}

#[tokio::test]
async fn batch_continues_past_failures() {
    let catalog = Catalog::builtin();
    let mut fetcher = FakeFetcher::default()
        .with("MSFT", Some(msft_periods()))
        .with("BROKEN", None)
        .with("ZZZ", Some(redacted_periods()));
    let mut sink = MemoryFactSink::default();

    let symbols: Vec<String> = ["MSFT", "NOPE", "BROKEN", "ZZZ"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = run_batch(&mut fetcher, &mut sink, &catalog, &config(), &symbols, WriteMode::Merge, false)
        .await
        .unwrap();

    let succeeded: Vec<&str> = report.succeeded.iter().map(|c| c.symbol.as_str()).collect();
    assert_eq!(succeeded, vec!["MSFT", "ZZZ"]);

    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].0, "NOPE");
    assert!(matches!(report.failed[0].1, SpiderError::CompanyNotFound(_)));
    assert_eq!(report.failed[1].0, "BROKEN");
    assert!(matches!(report.failed[1].1, SpiderError::UpstreamShape(_)));

    // an unknown ticker is never fetched
    assert_eq!(fetcher.fetches, 3);
}

//! Company by company: fetch the raw periods, normalize them, compute deltas, persist the facts.
use crate::config::SpiderConfig;
use crate::error::{Result, SpiderError};
use crate::sink::{export, flatten, FactLabels, FactSink, PgFactSink};
use crate::statement::{normalize, Catalog, RawPeriod, StatementSet};
use crate::tikr::{client::classify, CredentialProvider, PeriodFetcher, TikrClient};
use crate::tui::{self, BatchProgress, Status};
use deadpool_postgres::Pool;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace};

/// The catalog at `METRIC_CATALOG`, or the built-in one.
pub async fn load_catalog(config: &SpiderConfig) -> Result<Catalog> {
    match &config.catalog_path {
        Some(path) => {
            debug!("loading metric catalog from {}", path.display());
            Catalog::from_path(path).await
        }
        None => Ok(Catalog::builtin()),
    }
}

/// Normalize raw periods and enrich them with year-over-year deltas.
pub fn build_statements(catalog: &Catalog, periods: &[RawPeriod], redaction_threshold: usize) -> StatementSet {
    normalize(catalog, periods, redaction_threshold)
}

/// Resolve `symbol` upstream and build its statements.
pub async fn fetch_statements<F>(
    fetcher: &mut F,
    catalog: &Catalog,
    config: &SpiderConfig,
    symbol: &str,
) -> Result<StatementSet>
where
    F: PeriodFetcher + ?Sized,
{
    let ids = fetcher
        .find_company(symbol)
        .await?
        .ok_or_else(|| SpiderError::CompanyNotFound(symbol.to_string()))?;
    debug!(
        "found company [{symbol}] (trading id {}, company id {})",
        ids.trading_id, ids.company_id
    );

    let periods = fetcher.fetch_periods(ids).await?;
    trace!("{} raw periods fetched for [{symbol}]", periods.len());

    Ok(build_statements(catalog, &periods, config.redaction_threshold))
}

/// What one company's pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyReport {
    pub symbol: String,
    /// Periods kept, over every statement.
    pub periods: usize,
    /// Periods dropped for redaction, over every statement.
    pub dropped: usize,
    pub facts: usize,
    /// Rows the sink actually changed.
    pub written: u64,
}

/// How a company's new facts meet the ones already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Write through the sink's conflict policy.
    #[default]
    Merge,
    /// Replace the company's stored facts, once the new ones are in hand.
    Replace,
}

/// Fetch, normalize and persist one company as a single sink write.
pub async fn process_company<F, S>(
    fetcher: &mut F,
    sink: &mut S,
    catalog: &Catalog,
    config: &SpiderConfig,
    symbol: &str,
) -> Result<CompanyReport>
where
    F: PeriodFetcher + ?Sized,
    S: FactSink + ?Sized,
{
    collect_company(fetcher, sink, catalog, config, symbol, WriteMode::Merge).await
}

/// Like [`process_company`], but the company's stored facts are swapped for the fresh ones.
///
/// A failed fetch leaves the stored facts untouched.
pub async fn refresh_company<F, S>(
    fetcher: &mut F,
    sink: &mut S,
    catalog: &Catalog,
    config: &SpiderConfig,
    symbol: &str,
) -> Result<CompanyReport>
where
    F: PeriodFetcher + ?Sized,
    S: FactSink + ?Sized,
{
    collect_company(fetcher, sink, catalog, config, symbol, WriteMode::Replace).await
}

async fn collect_company<F, S>(
    fetcher: &mut F,
    sink: &mut S,
    catalog: &Catalog,
    config: &SpiderConfig,
    symbol: &str,
    mode: WriteMode,
) -> Result<CompanyReport>
where
    F: PeriodFetcher + ?Sized,
    S: FactSink + ?Sized,
{
    let time = std::time::Instant::now();
    let statements = fetch_statements(fetcher, catalog, config, symbol).await?;

    let labels = FactLabels {
        symbol,
        fiscal_period: &config.fiscal_period,
        trailing_period: config.trailing_period.as_deref(),
        currency: &config.currency,
    };
    let facts = flatten(&labels, &statements);
    let written = match mode {
        WriteMode::Merge => sink.write(&facts).await,
        WriteMode::Replace => sink.replace_company(symbol, &facts).await,
    }
    .map_err(|err| {
        error!("failed to persist financials for [{symbol}], error({err})");
        err
    })?;
    debug!("[{symbol}] persisted, {}", crate::time_elapsed(time));

    Ok(CompanyReport {
        symbol: symbol.to_string(),
        periods: statements.periods.values().map(Vec::len).sum(),
        dropped: statements.dropped.values().sum(),
        facts: facts.len(),
        written,
    })
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<CompanyReport>,
    /// Symbol and the error that stopped it.
    pub failed: Vec<(String, SpiderError)>,
}

/// Process `symbols` one after another, pausing inside the rate-limit window between two
/// companies. A failing company is logged and the batch moves on.
pub async fn run_batch<F, S>(
    fetcher: &mut F,
    sink: &mut S,
    catalog: &Catalog,
    config: &SpiderConfig,
    symbols: &[String],
    mode: WriteMode,
    tui: bool,
) -> Result<BatchReport>
where
    F: PeriodFetcher + ?Sized,
    S: FactSink + ?Sized,
{
    let time = std::time::Instant::now();
    let progress = match tui {
        true => Some(BatchProgress::new(symbols.len())?),
        false => None,
    };

    let mut report = BatchReport::default();
    for (idx, symbol) in symbols.iter().enumerate() {
        let spinner = progress
            .as_ref()
            .map(|progress| progress.spinner(format!("collecting {symbol} ...")));

        match collect_company(fetcher, sink, catalog, config, symbol, mode).await {
            Ok(company) => {
                info!(
                    "[{symbol}] {} periods ({} dropped), {} facts, {} written",
                    company.periods, company.dropped, company.facts, company.written
                );
                if let Some(progress) = &progress {
                    progress.println(Status::Done, &format!("Inserted financials for {symbol}"));
                    progress.succeeded();
                }
                report.succeeded.push(company);
            }
            Err(err) => {
                error!("failed to collect financials for [{symbol}], error({err})");
                if let Some(progress) = &progress {
                    progress.println(Status::Failed, &format!("{symbol}: {err}"));
                    progress.failed();
                }
                report.failed.push((symbol.clone(), err));
            }
        }

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        if idx + 1 < symbols.len() {
            let delay = config.rate_limit_delay();
            debug!("waiting {delay:?} before the next company");
            tokio::time::sleep(delay).await;
        }
    }

    if let Some(progress) = &progress {
        progress.finish();
    }
    info!(
        "{} companies collected, {} failed, {}",
        report.succeeded.len(),
        report.failed.len(),
        crate::time_elapsed(time)
    );

    Ok(report)
}

/// Scrape `symbols` (every company in the database when `None`) into Postgres.
pub async fn scrape(
    pool: &Pool,
    config: &SpiderConfig,
    catalog: &Catalog,
    symbols: Option<Vec<String>>,
    mode: WriteMode,
    tui: bool,
) -> Result<BatchReport> {
    let symbols = match symbols {
        Some(symbols) => symbols,
        None => crate::stock::companies::fetch_symbols(pool).await?,
    };
    if tui {
        tui::banner(Status::Info, "TIKR statements scraper: ready");
        tui::banner(Status::Info, &format!("Found {} symbols", symbols.len()));
    }

    let credentials = CredentialProvider::from_config(config).await?;
    let mut client = TikrClient::new(config, credentials)?;
    let mut sink = PgFactSink::new(pool.clone(), config.conflict_policy);

    let report = run_batch(&mut client, &mut sink, catalog, config, &symbols, mode, tui).await?;
    if tui {
        tui::banner(
            Status::Done,
            &format!(
                "Done: {} succeeded, {} failed",
                report.succeeded.len(),
                report.failed.len()
            ),
        );
    }
    Ok(report)
}

/// Statements of a saved financials response, without touching the network.
pub async fn statements_from_file(catalog: &Catalog, config: &SpiderConfig, path: &Path) -> Result<StatementSet> {
    trace!("reading financials response from {}", path.display());
    let body = tokio::fs::read_to_string(path).await?;
    let periods = classify(StatusCode::OK, &body)?.into_periods()?;
    Ok(build_statements(catalog, &periods, config.redaction_threshold))
}

/// Export one company's statements as CSV files under `<out>/<TICKER>_<YYYY-MM-DD>/`.
///
/// With `from_file` the statements are read from a saved financials response instead of upstream.
pub async fn export_company(
    config: &SpiderConfig,
    catalog: &Catalog,
    ticker: &str,
    out: &Path,
    from_file: Option<&Path>,
) -> Result<Vec<PathBuf>> {
    let statements = match from_file {
        Some(path) => statements_from_file(catalog, config, path).await?,
        None => {
            let credentials = CredentialProvider::from_config(config).await?;
            let mut client = TikrClient::new(config, credentials)?;
            fetch_statements(&mut client, catalog, config, ticker).await?
        }
    };

    let dir = out.join(export_dir_name(ticker, chrono::Local::now().date_naive()));
    export::export_csv(&dir, ticker, &statements).await
}

/// `MSFT_2024-06-30`
pub fn export_dir_name(ticker: &str, date: chrono::NaiveDate) -> String {
    format!("{ticker}_{}", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_dir_is_ticker_and_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert_eq!(export_dir_name("MSFT", date), "MSFT_2024-06-30");
    }

    #[tokio::test]
    async fn builtin_catalog_without_path() {
        let catalog = load_catalog(&SpiderConfig::default()).await.unwrap();
        assert_eq!(catalog.statements().len(), 3);
    }

    #[tokio::test]
    async fn statements_from_saved_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msft.json");
        tokio::fs::write(
            &path,
            r#"{
                "dates": [
                    {"financialperiodid": 1, "calendaryear": 2022},
                    {"financialperiodid": 2, "calendaryear": 2023}
                ],
                "data": [
                    {"financialperiodid": 1, "dataitemid": 28, "dataitemvalue": "200"},
                    {"financialperiodid": 2, "dataitemid": 28, "dataitemvalue": "250"}
                ]
            }"#,
        )
        .await
        .unwrap();

        let set = statements_from_file(&Catalog::builtin(), &SpiderConfig::default(), &path)
            .await
            .unwrap();
        let income = set.get(crate::statement::StatementKind::IncomeStatement);
        assert_eq!(income.len(), 2);
        assert_eq!(income[1].number("Revenues YoY"), Some(25.0));
    }
}

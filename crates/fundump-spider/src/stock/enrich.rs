use super::companies;
use crate::error::{Result, SpiderError};
use crate::http::*;
use crate::tui::{BatchProgress, Status};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, trace, warn};

const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
const SUMMARY_URL: &str = "https://query2.finance.yahoo.com/v10/finance/quoteSummary";
const QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";
const MODULES: &str = "assetProfile,fundProfile,price,quoteType,summaryProfile";

/// Column a listing row is identified by; enriched files carry it as well.
const LISTING_SYMBOL: &str = "Symbol";
/// A row whose `exchange` is filled has already been enriched.
const ENRICHED_MARKER: &str = "exchange";

/// Flat `field -> value` metadata of one ticker, keyed by the yfinance field names.
pub type Metadata = HashMap<String, String>;

/// Something that can look up a ticker's metadata.
#[async_trait]
pub trait MetadataFetcher: Send {
    async fn fetch_metadata(&mut self, symbol: &str) -> Result<Metadata>;
}

// fetch
// ----------------------------------------------------------------------------

/// Yahoo Finance quote endpoints, behind the cookie and crumb handshake they require.
#[derive(Debug)]
pub struct YahooClient {
    http: HttpClient,
    crumb: Option<String>,
}

impl YahooClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .user_agent(user_agent)
            .cookie_store(true)
            .build()?;
        Ok(Self { http, crumb: None })
    }

    async fn crumb(&mut self) -> Result<String> {
        if let Some(crumb) = &self.crumb {
            return Ok(crumb.clone());
        }

        // sets the session cookie; the page itself answers 404
        if let Err(err) = self.http.get(COOKIE_URL).send().await {
            debug!("cookie request failed, error({err})");
        }

        let response = self.http.get(CRUMB_URL).send().await.map_err(|err| {
            error!("failed to fetch Yahoo Finance crumb, error({err})");
            err
        })?;
        let status = response.status();
        let crumb = response.text().await?.trim().to_string();
        if !status.is_success() || crumb.is_empty() || crumb.contains('<') {
            return Err(SpiderError::UpstreamShape(format!(
                "Yahoo Finance crumb answered {status}"
            )));
        }

        trace!("Yahoo Finance crumb acquired");
        self.crumb = Some(crumb.clone());
        Ok(crumb)
    }

    /// GET `url` with the crumb, renewing it once when it is rejected.
    async fn get(&mut self, url: &str, query: &[(&str, &str)]) -> Result<(StatusCode, String)> {
        let mut renewed = false;
        loop {
            let crumb = self.crumb().await?;
            let response = self
                .http
                .get(url)
                .query(query)
                .query(&[("crumb", crumb.as_str())])
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !renewed {
                debug!("Yahoo Finance crumb rejected; renewing");
                self.crumb = None;
                renewed = true;
                continue;
            }
            return Ok((status, response.text().await?));
        }
    }
}

#[async_trait]
impl MetadataFetcher for YahooClient {
    async fn fetch_metadata(&mut self, symbol: &str) -> Result<Metadata> {
        let url = format!("{SUMMARY_URL}/{symbol}");
        let (status, body) = self.get(&url, &[("modules", MODULES)]).await?;
        let mut metadata = parse_quote_summary(&body).map_err(|err| {
            error!("failed to parse Yahoo Finance profile for [{symbol}] ({status}), error({err})");
            err
        })?;

        // the quote endpoint adds exchange and market details the profile lacks
        match self.get(QUOTE_URL, &[("symbols", symbol)]).await {
            Ok((_, body)) => match parse_quote(&body) {
                Ok(quote) => {
                    for (field, value) in quote {
                        metadata.entry(field).or_insert(value);
                    }
                }
                Err(err) => warn!("no Yahoo Finance quote for [{symbol}], error({err})"),
            },
            Err(err) => warn!("failed to fetch Yahoo Finance quote for [{symbol}], error({err})"),
        }

        Ok(metadata)
    }
}

// de
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: Envelope,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "quoteResponse")]
    quote_response: Envelope,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    error: Option<Value>,
}

impl Envelope {
    fn first(self, what: &str) -> Result<Map<String, Value>> {
        if let Some(err) = self.error.filter(|err| !err.is_null()) {
            return Err(SpiderError::UpstreamShape(format!("{what}: {err}")));
        }
        self.result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| SpiderError::UpstreamShape(format!("{what}: no result")))
    }
}

/// Scalars as text; `{"raw": 1, "fmt": "1"}` pairs become their raw value.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Object(object) => object.get("raw").and_then(scalar),
        _ => None,
    }
}

fn collect(object: &Map<String, Value>, metadata: &mut Metadata) {
    for (field, value) in object {
        if let Some(text) = scalar(value) {
            metadata.entry(field.clone()).or_insert(text);
        }
    }
}

/// Merge every module of a `quoteSummary` answer into one flat map.
pub fn parse_quote_summary(body: &str) -> Result<Metadata> {
    let response: QuoteSummaryResponse = serde_json::from_str(body)?;
    let modules = response.quote_summary.first("quote summary")?;

    let mut metadata = Metadata::new();
    for module in modules.values() {
        if let Value::Object(object) = module {
            collect(object, &mut metadata);
        }
    }
    Ok(metadata)
}

/// The first result of a `v7/finance/quote` answer.
pub fn parse_quote(body: &str) -> Result<Metadata> {
    let response: QuoteResponse = serde_json::from_str(body)?;
    let quote = response.quote_response.first("quote")?;

    let mut metadata = Metadata::new();
    collect(&quote, &mut metadata);
    Ok(metadata)
}

// enrich
// ----------------------------------------------------------------------------

/// What an enrichment run did.
#[derive(Debug, Default)]
pub struct EnrichReport {
    /// Rows appended to the output, failed lookups included.
    pub written: usize,
    /// Symbols already enriched in the output.
    pub skipped: usize,
    /// Symbols written with empty metadata and the error that left them empty.
    pub failed: Vec<(String, SpiderError)>,
}

/// `tickers.csv` -> `tickers_enriched.csv`, next to the input.
pub fn enriched_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "companies".to_string());
    input.with_file_name(format!("{stem}_enriched.csv"))
}

struct Table {
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

impl Table {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    fn symbol_column(&self) -> Option<usize> {
        self.column(LISTING_SYMBOL).or_else(|| self.column("symbol"))
    }
}

/// Symbols of `output` whose row already carries an exchange.
fn enriched_symbols(output: &Table) -> HashSet<String> {
    let (Some(symbol), Some(marker)) = (output.symbol_column(), output.column(ENRICHED_MARKER)) else {
        return HashSet::new();
    };
    output
        .rows
        .iter()
        .filter(|row| row.get(marker).is_some_and(|value| !value.is_empty()))
        .filter_map(|row| row.get(symbol).map(str::to_string))
        .collect()
}

/// The listing columns, then every metadata field the company loader reads.
fn output_headers(input: &Table) -> Vec<String> {
    let mut headers = input.headers.clone();
    for field in companies::enriched_fields() {
        if !headers.iter().any(|header| header == field) {
            headers.push(field.to_string());
        }
    }
    headers
}

/// One output row: metadata fields from `metadata`, everything else (and metadata the lookup
/// did not return) from the listing row.
fn enriched_row(
    headers: &[String],
    input: &Table,
    row: &csv::StringRecord,
    metadata: &Metadata,
) -> Vec<String> {
    let fields = companies::enriched_fields();
    headers
        .iter()
        .map(|header| {
            let listed = input.column(header).and_then(|idx| row.get(idx));
            let fetched = fields
                .iter()
                .any(|field| *field == header.as_str())
                .then(|| metadata.get(header))
                .flatten();
            fetched
                .map(String::as_str)
                .or(listed)
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

async fn append(path: &Path, records: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().from_writer(vec![]);
    for record in records {
        writer.write_record(record)?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Enrich every listed symbol of `input` with its metadata, appending one row per symbol to
/// `output` as soon as it is fetched.
///
/// Symbols already enriched in `output` are skipped, lookups run one at a time with `delay`
/// between them, and a failed lookup is written with empty metadata.
pub async fn enrich<F>(
    fetcher: &mut F,
    input: &Path,
    output: &Path,
    delay: Duration,
    tui: bool,
) -> Result<EnrichReport>
where
    F: MetadataFetcher + ?Sized,
{
    let time = std::time::Instant::now();
    let listing = Table::parse(&tokio::fs::read(input).await?)?;
    let symbol_idx = listing.symbol_column().ok_or_else(|| {
        SpiderError::UpstreamShape(format!("{} has no {LISTING_SYMBOL} column", input.display()))
    })?;

    // resume an earlier run: keep its header layout and skip what it enriched
    let (headers, done, fresh) = match tokio::fs::read(output).await {
        Ok(bytes) if !bytes.is_empty() => {
            let existing = Table::parse(&bytes)?;
            let done = enriched_symbols(&existing);
            (existing.headers, done, false)
        }
        Ok(_) => (output_headers(&listing), HashSet::new(), true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            (output_headers(&listing), HashSet::new(), true)
        }
        Err(err) => return Err(err.into()),
    };
    if fresh {
        append(output, &[headers.clone()]).await?;
    }

    let mut report = EnrichReport::default();
    let pending: Vec<&csv::StringRecord> = listing
        .rows
        .iter()
        .filter(|row| {
            let symbol = row.get(symbol_idx).unwrap_or_default();
            if symbol.is_empty() {
                return false;
            }
            let enriched = done.contains(symbol);
            if enriched {
                trace!("[{symbol}] already enriched, skipping");
                report.skipped += 1;
            }
            !enriched
        })
        .collect();
    info!(
        "{} symbols to enrich, {} already enriched",
        pending.len(),
        report.skipped
    );

    let progress = match tui {
        true => Some(BatchProgress::new(pending.len())?),
        false => None,
    };

    for (idx, row) in pending.iter().enumerate() {
        let symbol = row.get(symbol_idx).unwrap_or_default();
        let spinner = progress
            .as_ref()
            .map(|progress| progress.spinner(format!("enriching {symbol} ...")));

        let metadata = match fetcher.fetch_metadata(symbol).await {
            Ok(metadata) => {
                debug!(
                    "[{symbol}] -> {}, {}",
                    metadata.get("exchange").map(String::as_str).unwrap_or_default(),
                    metadata.get("sector").map(String::as_str).unwrap_or_default()
                );
                if let Some(progress) = &progress {
                    progress.println(Status::Done, &format!("Enriched {symbol}"));
                    progress.succeeded();
                }
                metadata
            }
            Err(err) => {
                error!("failed to fetch metadata for [{symbol}], error({err})");
                if let Some(progress) = &progress {
                    progress.println(Status::Failed, &format!("{symbol}: {err}"));
                    progress.failed();
                }
                report.failed.push((symbol.to_string(), err));
                Metadata::new()
            }
        };

        append(output, &[enriched_row(&headers, &listing, row, &metadata)]).await?;
        report.written += 1;

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        if idx + 1 < pending.len() {
            tokio::time::sleep(delay).await;
        }
    }

    if let Some(progress) = &progress {
        progress.finish();
    }
    info!(
        "{} rows appended to {}, {} failed, {}",
        report.written,
        output.display(),
        report.failed.len(),
        crate::time_elapsed(time)
    );

    Ok(report)
}

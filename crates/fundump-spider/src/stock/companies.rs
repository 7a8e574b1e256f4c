use crate::error::Result;
use crate::{http::*, sql};
use deadpool_postgres::Pool;
use std::collections::HashMap;
use std::path::Path;
use tokio_postgres::types::ToSql;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Int,
}

/// A `companies` column and the CSV headers it is read from, in order of preference.
#[derive(Debug)]
struct Column {
    name: &'static str,
    headers: &'static [&'static str],
    kind: Kind,
}

const fn text(name: &'static str, headers: &'static [&'static str]) -> Column {
    Column {
        name,
        headers,
        kind: Kind::Text,
    }
}

const fn int(name: &'static str, headers: &'static [&'static str]) -> Column {
    Column {
        name,
        headers,
        kind: Kind::Int,
    }
}

// Enriched listings use the yfinance camelCase headers; raw exchange listings only carry a few
// title-cased ones.
const COLUMNS: &[Column] = &[
    text("symbol", &["symbol", "Symbol"]),
    text("short_name", &["shortName", "Name"]),
    text("long_name", &["longName", "Name"]),
    text("display_name", &["displayName", "Name"]),
    text("language", &["language"]),
    text("region", &["region"]),
    text("exchange", &["exchange", "Stock Exchange"]),
    text("full_exchange_name", &["fullExchangeName", "Stock Exchange (MIC)"]),
    text("market", &["market"]),
    text("quote_type", &["quoteType"]),
    text("type_disp", &["typeDisp"]),
    text("exchange_timezone_name", &["exchangeTimezoneName"]),
    text("exchange_timezone_short_name", &["exchangeTimezoneShortName"]),
    int("gmt_offset_milliseconds", &["gmtOffSetMilliseconds"]),
    text("market_state", &["marketState"]),
    text("message_board_id", &["messageBoardId"]),
    text("quote_source_name", &["quoteSourceName"]),
    text("triggerable", &["triggerable"]),
    text("custom_price_alert_confidence", &["customPriceAlertConfidence"]),
    text("has_pre_post_market_data", &["hasPrePostMarketData"]),
    int("first_trade_date_milliseconds", &["firstTradeDateMilliseconds"]),
    text("address1", &["address1"]),
    text("city", &["city"]),
    text("state", &["state"]),
    text("zip", &["zip"]),
    text("country", &["country"]),
    text("phone", &["phone"]),
    text("website", &["website"]),
    text("industry", &["industry"]),
    text("industry_key", &["industryKey"]),
    text("industry_disp", &["industryDisp"]),
    text("sector", &["sector"]),
    text("sector_key", &["sectorKey"]),
    text("sector_disp", &["sectorDisp"]),
    text("category", &["category"]),
    text("fund_family", &["fundFamily"]),
    text("legal_type", &["legalType"]),
    text("long_business_summary", &["longBusinessSummary"]),
    int("full_time_employees", &["fullTimeEmployees"]),
];

/// The enriched-listing header of every column, e.g. `shortName` for `short_name`.
pub(crate) fn enriched_fields() -> Vec<&'static str> {
    COLUMNS
        .iter()
        .filter_map(|column| column.headers.first().copied())
        .collect()
}

/// One parsed cell of a company row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(Option<String>),
    Int(Option<i64>),
}

impl Cell {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Cell::Text(value) => value,
            Cell::Int(value) => value,
        }
    }
}

/// A company row, one cell per `companies` column.
#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub symbol: String,
    cells: Vec<Cell>,
}

impl Company {
    /// The cell of column `name`.
    pub fn get(&self, name: &str) -> Option<&Cell> {
        COLUMNS
            .iter()
            .position(|column| column.name == name)
            .and_then(|idx| self.cells.get(idx))
    }
}

/// pandas writes missing values as `nan`; treat those like empty cells.
fn present(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    match raw {
        "" | "nan" | "NaN" | "None" | "null" => None,
        _ => Some(raw),
    }
}

/// `"12"`, `"12.0"` and `"12.9"` are all 12; anything else is null.
fn lenient_int(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| n.trunc() as i64)
    })
}

/// Parse a company listing CSV. Rows without a symbol are skipped, and a symbol listed twice
/// keeps its last row (a resumed enrichment appends the fresher one).
pub fn parse_companies(bytes: &[u8]) -> Result<Vec<Company>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(idx, header)| (header.trim().to_string(), idx))
        .collect();

    let mut companies: Vec<Company> = vec![];
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let pick = |column: &Column| {
            column
                .headers
                .iter()
                .filter_map(|header| headers.get(*header))
                .filter_map(|&idx| record.get(idx))
                .find_map(present)
        };

        let cells: Vec<Cell> = COLUMNS
            .iter()
            .map(|column| match column.kind {
                Kind::Text => Cell::Text(pick(column).map(str::to_string)),
                Kind::Int => Cell::Int(pick(column).and_then(lenient_int)),
            })
            .collect();

        let Some(Cell::Text(Some(symbol))) = cells.first().cloned() else {
            warn!("skipping company row {} without a symbol", line + 2);
            continue;
        };
        match positions.get(&symbol) {
            Some(&idx) => {
                trace!("[{symbol}] listed again on row {}; keeping the later row", line + 2);
                companies[idx] = Company { symbol, cells };
            }
            None => {
                positions.insert(symbol.clone(), companies.len());
                companies.push(Company { symbol, cells });
            }
        }
    }

    Ok(companies)
}

/// `INSERT INTO companies (...) VALUES ($1, ...) ON CONFLICT (symbol) DO NOTHING`
fn insert_sql() -> String {
    let names: Vec<&str> = COLUMNS.iter().map(|column| column.name).collect();
    let params: Vec<String> = (1..=COLUMNS.len()).map(|n| format!("${n}")).collect();
    format!(
        "INSERT INTO companies ({}) VALUES ({}) ON CONFLICT (symbol) DO NOTHING",
        names.join(", "),
        params.join(", ")
    )
}

/// Insert companies in one transaction, returning how many were new.
pub async fn insert(pg_client: &mut PgClient, companies: &[Company]) -> Result<u64> {
    let time = std::time::Instant::now();

    let query = pg_client.prepare(&insert_sql()).await?;
    let tx = pg_client.transaction().await?;

    let mut inserted = 0;
    for company in companies {
        let params: Vec<&(dyn ToSql + Sync)> = company.cells.iter().map(Cell::as_sql).collect();
        inserted += tx.execute(&query, &params).await.map_err(|err| {
            error!("failed to insert company [{}], error({err})", company.symbol);
            err
        })?;
    }

    tx.commit().await?;
    debug!(
        "{inserted} of {} companies inserted, {}",
        companies.len(),
        crate::time_elapsed(time)
    );

    Ok(inserted)
}

/// Load a company listing CSV at `path` into `companies`.
pub async fn load(pool: &Pool, path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    trace!("reading companies from {}", path.display());
    let bytes = tokio::fs::read(path).await?;
    let companies = parse_companies(&bytes)?;

    let mut pg_client = pool.get().await?;
    insert(&mut pg_client, &companies).await
}

/// Every symbol in `companies`, alphabetically.
pub async fn fetch_symbols(pool: &Pool) -> Result<Vec<String>> {
    let pg_client = pool.get().await?;
    let rows = pg_client.query(sql::SELECT_SYMBOLS, &[]).await?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

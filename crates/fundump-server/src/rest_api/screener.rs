use super::internal_error;
use actix_web::{post, web, HttpResponse, Responder};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tokio_postgres::types::ToSql;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Int,
}

/// Company columns a filter may reference, with their SQL type.
const COLUMNS: &[(&str, &str, Kind)] = &[
    ("symbol", "c.symbol", Kind::Text),
    ("short_name", "c.short_name", Kind::Text),
    ("long_name", "c.long_name", Kind::Text),
    ("sector", "c.sector", Kind::Text),
    ("industry", "c.industry", Kind::Text),
    ("market", "c.market", Kind::Text),
    ("exchange", "c.exchange", Kind::Text),
    ("country", "c.country", Kind::Text),
    ("full_time_employees", "c.full_time_employees", Kind::Int),
];

/// The qualified column of a filterable field.
pub fn column(field: &str) -> Option<&'static str> {
    COLUMNS
        .iter()
        .find(|(name, _, _)| *name == field)
        .map(|(_, column, _)| *column)
}

fn kind(field: &str) -> Option<Kind> {
    COLUMNS
        .iter()
        .find(|(name, _, _)| *name == field)
        .map(|(_, _, kind)| *kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl FromStr for Op {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Ok(Op::Eq),
            "!=" | "<>" => Ok(Op::Ne),
            "<" => Ok(Op::Lt),
            "<=" => Ok(Op::Le),
            ">" => Ok(Op::Gt),
            ">=" => Ok(Op::Ge),
            "like" => Ok(Op::Like),
            other => Err(format!("unsupported operator {other:?}")),
        }
    }
}

impl Op {
    fn sql(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Like => "LIKE",
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ScreenerFilter {
    pub field: String,
    pub op: String,
    #[schema(value_type = Object)]
    pub value: Value,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ScreenerRequest {
    #[serde(default)]
    pub filters: Vec<ScreenerFilter>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Int(i64),
}

impl Param {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Param::Text(value) => value,
            Param::Int(value) => value,
        }
    }
}

/// Company query of a screener request, fully parameterized.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyQuery {
    pub sql: String,
    pub params: Vec<Param>,
}

const SELECT_COMPANIES: &str = "SELECT c.symbol, c.short_name, c.long_name, c.sector, c.industry, \
    c.market, c.exchange, c.country, c.full_time_employees FROM companies c";

/// Latest fiscal year of one company.
const SELECT_LATEST_FINANCIALS: &str = "
    SELECT f.statement, f.key, f.value
    FROM financials f
    WHERE f.symbol = $1
    AND f.fiscal_year = (SELECT MAX(fiscal_year) FROM financials WHERE symbol = $1)
";

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn int(field: &str, value: &Value) -> Result<i64, String> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| format!("{field} expects an integer, found {value}"))
}

/// Build the company query. Filters on unknown fields are skipped; unknown operators and
/// values that do not fit the column are rejected.
pub fn build_query(request: &ScreenerRequest) -> Result<CompanyQuery, String> {
    if request.limit < 0 || request.offset < 0 {
        return Err("limit and offset must not be negative".to_string());
    }

    let mut clauses = vec![];
    let mut params = vec![];
    for filter in &request.filters {
        let (Some(column), Some(kind)) = (column(&filter.field), kind(&filter.field)) else {
            log::debug!("ignoring filter on unknown field {:?}", filter.field);
            continue;
        };
        let op: Op = filter.op.parse()?;

        let param = match (op, kind) {
            (Op::Like, Kind::Text) => Param::Text(format!("%{}%", text(&filter.value))),
            (Op::Like, Kind::Int) => return Err(format!("{} does not support like", filter.field)),
            (_, Kind::Text) => Param::Text(text(&filter.value)),
            (_, Kind::Int) => Param::Int(int(&filter.field, &filter.value)?),
        };
        params.push(param);
        clauses.push(format!("{column} {} ${}", op.sql(), params.len()));
    }

    let mut sql = SELECT_COMPANIES.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    params.push(Param::Int(request.limit));
    params.push(Param::Int(request.offset));
    sql.push_str(&format!(
        " ORDER BY c.symbol LIMIT ${} OFFSET ${}",
        params.len() - 1,
        params.len()
    ));

    Ok(CompanyQuery { sql, params })
}

/// `statement -> key -> value`
pub type LatestFinancials = BTreeMap<String, BTreeMap<String, Option<f64>>>;

pub fn group_latest(rows: impl IntoIterator<Item = (String, String, Option<f64>)>) -> LatestFinancials {
    let mut grouped = LatestFinancials::new();
    for (statement, key, value) in rows {
        grouped.entry(statement).or_default().insert(key, value);
    }
    grouped
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScreenerCompany {
    symbol: String,
    short_name: Option<String>,
    long_name: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    market: Option<String>,
    exchange: Option<String>,
    country: Option<String>,
    full_time_employees: Option<i64>,
    #[schema(value_type = Object)]
    latest_financials: LatestFinancials,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScreenerResponse {
    results: Vec<ScreenerCompany>,
}

/// Screen companies
///
/// Filters on company attributes, each result carrying its most recent fiscal year of facts.
#[utoipa::path(
    post,
    path = "/screener",
    request_body = ScreenerRequest,
    responses(
        (status = 200, description = "Matching companies", body = ScreenerResponse, content_type = "application/json"),
        (status = 400, description = "Unsupported operator or value"),
    )
)]
#[post("/screener")]
pub async fn screener(db_pool: web::Data<Pool>, request: web::Json<ScreenerRequest>) -> impl Responder {
    let query = match build_query(&request) {
        Ok(query) => query,
        Err(reason) => {
            return HttpResponse::BadRequest().json(serde_json::json!({ "detail": reason }));
        }
    };
    log::info!("company query: {}", query.sql);

    // establish connection from pool
    let conn = match db_pool.get().await {
        Ok(conn) => conn,
        Err(err) => return internal_error("get connection from pool", err),
    };

    let params: Vec<&(dyn ToSql + Sync)> = query.params.iter().map(Param::as_sql).collect();
    let rows = match conn.query(query.sql.as_str(), &params).await {
        Ok(rows) => rows,
        Err(err) => return internal_error("query companies", err),
    };

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let symbol: String = row.get("symbol");
        let financials = match conn.query(SELECT_LATEST_FINANCIALS, &[&symbol]).await {
            Ok(financials) => financials,
            Err(err) => return internal_error("query latest financials", err),
        };

        results.push(ScreenerCompany {
            short_name: row.get("short_name"),
            long_name: row.get("long_name"),
            sector: row.get("sector"),
            industry: row.get("industry"),
            market: row.get("market"),
            exchange: row.get("exchange"),
            country: row.get("country"),
            full_time_employees: row.get("full_time_employees"),
            latest_financials: group_latest(
                financials
                    .iter()
                    .map(|fin| (fin.get("statement"), fin.get("key"), fin.get("value"))),
            ),
            symbol,
        });
    }

    HttpResponse::Ok().json(ScreenerResponse { results })
}

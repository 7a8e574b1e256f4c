use super::internal_error;
use actix_web::{get, web, HttpResponse, Responder};
use deadpool_postgres::Pool;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio_postgres::types::Type;
use tokio_postgres::Row;

const SELECT_COMPANY: &str = "SELECT * FROM companies WHERE symbol = $1";

const SELECT_FINANCIALS: &str = "
    SELECT fiscal_year, statement, key, value
    FROM financials
    WHERE symbol = $1
    ORDER BY fiscal_year DESC, statement
";

/// One statement of one fiscal year.
#[derive(Debug, PartialEq, Serialize, utoipa::ToSchema)]
pub struct StatementFinancials {
    pub fiscal_year: i32,
    pub statement: String,
    #[schema(value_type = Object)]
    pub data: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CompanyResponse {
    #[schema(value_type = Object)]
    company: Map<String, Value>,
    financials: Vec<StatementFinancials>,
}

/// Group `(fiscal_year, statement, key, value)` rows, keeping the order groups first appear in.
pub fn group_financials(
    rows: impl IntoIterator<Item = (i32, String, String, Option<f64>)>,
) -> Vec<StatementFinancials> {
    let mut groups: Vec<StatementFinancials> = vec![];
    for (fiscal_year, statement, key, value) in rows {
        match groups
            .iter_mut()
            .find(|group| group.fiscal_year == fiscal_year && group.statement == statement)
        {
            Some(group) => {
                group.data.insert(key, value);
            }
            None => groups.push(StatementFinancials {
                fiscal_year,
                statement,
                data: BTreeMap::from([(key, value)]),
            }),
        }
    }
    groups
}

/// Every column of a `companies` row as JSON.
fn row_to_json(row: &Row) -> Map<String, Value> {
    let mut map = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx).ok().flatten().map(Value::from)
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx).ok().flatten().map(Value::from)
        } else {
            row.try_get::<_, Option<String>>(idx).ok().flatten().map(Value::from)
        };
        map.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    map
}

/// Company
///
/// The company row and all of its stored facts, grouped by fiscal year and statement.
#[utoipa::path(
    get,
    path = "/company/{symbol}",
    params(("symbol" = String, Path, description = "Ticker symbol, e.g. MSFT")),
    responses(
        (status = 200, description = "Company and financials", body = CompanyResponse, content_type = "application/json"),
        (status = 404, description = "Company not found"),
    )
)]
#[get("/company/{symbol}")]
pub async fn company(db_pool: web::Data<Pool>, symbol: web::Path<String>) -> impl Responder {
    let symbol = symbol.into_inner();

    // establish connection from pool
    let conn = match db_pool.get().await {
        Ok(conn) => conn,
        Err(err) => return internal_error("get connection from pool", err),
    };

    let company = match conn.query_opt(SELECT_COMPANY, &[&symbol]).await {
        Ok(Some(row)) => row_to_json(&row),
        Ok(None) => {
            return HttpResponse::NotFound().json(serde_json::json!({ "detail": "Company not found" }));
        }
        Err(err) => return internal_error("query company", err),
    };

    let rows = match conn.query(SELECT_FINANCIALS, &[&symbol]).await {
        Ok(rows) => rows,
        Err(err) => return internal_error("query financials", err),
    };
    let financials = group_financials(rows.iter().map(|row| {
        (
            row.get("fiscal_year"),
            row.get("statement"),
            row.get("key"),
            row.get("value"),
        )
    }));

    HttpResponse::Ok().json(CompanyResponse {
        company,
        financials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(year: i32, statement: &str, key: &str, value: Option<f64>) -> (i32, String, String, Option<f64>) {
        (year, statement.to_string(), key.to_string(), value)
    }

    #[test]
    fn financials_grouped_by_year_and_statement() {
        let groups = group_financials(vec![
            row(2023, "Balance Sheet", "Total Assets", Some(1200.0)),
            row(2023, "Income Statement", "Revenues", Some(75.0)),
            row(2023, "Income Statement", "Revenues YoY", Some(50.0)),
            row(2022, "Income Statement", "Revenues", Some(150.0)),
            row(2022, "Income Statement", "Revenues YoY", None),
        ]);

        let keys: Vec<(i32, &str)> = groups
            .iter()
            .map(|group| (group.fiscal_year, group.statement.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (2023, "Balance Sheet"),
                (2023, "Income Statement"),
                (2022, "Income Statement"),
            ]
        );
        assert_eq!(groups[1].data["Revenues YoY"], Some(50.0));
        assert_eq!(groups[2].data["Revenues YoY"], None);
        assert!(group_financials(vec![]).is_empty());
    }
}

use actix_web::{get, HttpResponse, Responder};
use serde::Serialize;

pub mod company;
pub mod screener;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Field names the screener front end offers.
///
/// Only the company attributes among them can be filtered on; see [`screener::column`].
pub const FIELDS: &[&str] = &[
    "symbol",
    "short_name",
    "long_name",
    "sector",
    "industry",
    "market",
    "exchange",
    "country",
    "full_time_employees",
    "market_cap",
    "price_to_book",
    "pe_ratio",
    "dividend_yield",
    "revenue",
    "net_income",
    "total_assets",
    "total_debt",
    "ebitda",
    "fiscal_year",
    "statement",
    "key",
    "value",
];

#[derive(Serialize, utoipa::ToSchema)]
struct Fields {
    fields: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/fields",
    responses(
        (
            status = 200,
            description = "Field names available to the screener",
            body = Fields,
            content_type = "application/json",
            example = json!({"fields": ["symbol", "short_name", "sector"]})
        )
    )
)]
#[get("/fields")]
pub async fn fields() -> impl Responder {
    HttpResponse::Ok().json(Fields {
        fields: FIELDS.iter().map(|field| field.to_string()).collect(),
    })
}

/// Log a database failure and answer 500.
pub(crate) fn internal_error(context: &str, err: impl std::fmt::Display) -> HttpResponse {
    log::error!("failed to {context}, error({err})");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "detail": format!("database error: {err}")
    }))
}

//! The TIKR upstream: company search and per-company financial periods.
use crate::error::Result;
use crate::statement::RawPeriod;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

pub mod client;
pub mod credentials;

pub use client::TikrClient;
pub use credentials::CredentialProvider;

/// The identifier pair TIKR resolves a ticker to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompanyIds {
    pub trading_id: i64,
    pub company_id: i64,
}

/// Anything that can resolve a ticker and hand back its raw reporting periods.
#[async_trait]
pub trait PeriodFetcher: Send {
    /// `None` when the search index has no hit for `ticker`.
    async fn find_company(&mut self, ticker: &str) -> Result<Option<CompanyIds>>;

    /// All reporting periods of a company, in the order upstream lists them.
    async fn fetch_periods(&mut self, ids: CompanyIds) -> Result<Vec<RawPeriod>>;
}

// de
// ----------------------------------------------------------------------------

/// TIKR is loose about JSON types: ids and values show up as strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Any scalar as text; `null` becomes the empty string.
pub(crate) fn de_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Scalar> = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Some(Scalar::Int(n)) => n.to_string(),
        Some(Scalar::Float(n)) => n.to_string(),
        Some(Scalar::Text(s)) => s,
        None => String::new(),
    })
}

/// An integer given either as a number or as numeric text, e.g. `2023`, `"2023"` or `2023.0`.
pub(crate) fn de_int<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Scalar::deserialize(deserializer)? {
        Scalar::Int(n) => Ok(n),
        Scalar::Float(n) if n.fract() == 0.0 && n.is_finite() => Ok(n as i64),
        Scalar::Float(n) => Err(D::Error::custom(format!("expected an integer, found {n}"))),
        Scalar::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("expected an integer, found {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Row {
        #[serde(deserialize_with = "de_int")]
        id: i64,
        #[serde(deserialize_with = "de_text")]
        value: String,
    }

    #[test]
    fn loose_scalars() {
        let rows: Vec<Row> = serde_json::from_str(
            r#"[
                {"id": 28, "value": "1,5"},
                {"id": "2006", "value": 4.25},
                {"id": 2021.0, "value": null}
            ]"#,
        )
        .unwrap();
        assert_eq!(rows[0].id, 28);
        assert_eq!(rows[0].value, "1,5");
        assert_eq!(rows[1].id, 2006);
        assert_eq!(rows[1].value, "4.25");
        assert_eq!(rows[2].id, 2021);
        assert_eq!(rows[2].value, "");

        assert!(serde_json::from_str::<Row>(r#"{"id": "FY", "value": ""}"#).is_err());
    }
}

use super::{de_int, de_text, CompanyIds, CredentialProvider, PeriodFetcher};
use crate::config::SpiderConfig;
use crate::error::{Result, SpiderError};
use crate::http::*;
use crate::statement::{RawLineItem, RawPeriod};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, error, trace, warn};

/// Keys an upstream error body carries instead of `dates`.
const ERROR_KEYS: [&str; 4] = ["error", "errorMessage", "message", "Message"];

// fetch
// ----------------------------------------------------------------------------

/// HTTP client for the TIKR financials endpoint and its company search index.
#[derive(Debug)]
pub struct TikrClient {
    http: HttpClient,
    credentials: CredentialProvider,
    api_url: String,
    search_url: Url,
    search_app_id: String,
    search_api_key: Option<String>,
    auth_max_attempts: u32,
}

impl TikrClient {
    pub fn new(config: &SpiderConfig, credentials: CredentialProvider) -> Result<Self> {
        let search_url = Url::parse(&config.search_url).map_err(|err| SpiderError::Config {
            key: "TIKR_SEARCH_URL".to_string(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            http: crate::std_client_build(&config.user_agent)?,
            credentials,
            api_url: config.api_url.clone(),
            search_url,
            search_app_id: config.search_app_id.clone(),
            search_api_key: config.search_api_key.clone(),
            auth_max_attempts: config.auth_max_attempts,
        })
    }

    /// Fetch the financials of one company, refreshing the access token when upstream rejects it.
    ///
    /// Gives up with [`SpiderError::AuthExhausted`] after `auth_max_attempts` refreshes; any
    /// other malformed response fails immediately.
    pub async fn fetch_financials(&mut self, ids: CompanyIds) -> Result<FinancialsResponse> {
        let mut refreshes = 0;
        loop {
            let token = self.credentials.token().await?;
            match self.request_financials(&token, ids).await {
                Ok(response) => return Ok(response),
                Err(SpiderError::AuthExpired(reason)) => {
                    if refreshes >= self.auth_max_attempts {
                        error!("access token rejected after {refreshes} refreshes, error({reason})");
                        return Err(SpiderError::AuthExhausted {
                            attempts: refreshes,
                        });
                    }
                    refreshes += 1;
                    warn!(
                        "access token rejected ({reason}); refreshing [{refreshes}/{}]",
                        self.auth_max_attempts
                    );
                    self.credentials.refresh().await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn request_financials(&self, token: &str, ids: CompanyIds) -> Result<FinancialsResponse> {
        let payload = serde_json::json!({
            "auth": token,
            "tid": ids.trading_id,
            "cid": ids.company_id,
            "p": "1",
            "repid": 1,
            "v": "v1",
        });

        trace!("requesting financials for {ids:?}");
        let response = self
            .http
            .post(&self.api_url)
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(ORIGIN, "https://app.tikr.com")
            .header(REFERER, "https://app.tikr.com/")
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                error!("failed to fetch financials for {ids:?}, error({err})");
                err
            })?;

        let status = response.status();
        let body = response.text().await?;
        classify(status, &body)
    }

    /// Look a ticker up in the search index, taking the first hit.
    pub async fn search(&self, ticker: &str) -> Result<Option<CompanyIds>> {
        let api_key = self.search_api_key.as_deref().ok_or_else(|| SpiderError::Config {
            key: "TIKR_SEARCH_API_KEY".to_string(),
            reason: "required for company search".to_string(),
        })?;

        let response = self
            .http
            .post(self.search_url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("X-Algolia-Application-Id", &self.search_app_id)
            .header("X-Algolia-API-Key", api_key)
            .body(search_body(ticker))
            .send()
            .await
            .map_err(|err| {
                error!("failed to search for [{ticker}], error({err})");
                err
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SpiderError::UpstreamShape(format!(
                "search for [{ticker}] answered {status}"
            )));
        }

        let ids = serde_json::from_str::<SearchResponse>(&body)
            .map_err(|err| SpiderError::UpstreamShape(format!("search response: {err}")))?
            .first();
        debug!("search for [{ticker}] resolved to {ids:?}");
        Ok(ids)
    }
}

#[async_trait]
impl PeriodFetcher for TikrClient {
    async fn find_company(&mut self, ticker: &str) -> Result<Option<CompanyIds>> {
        self.search(ticker).await
    }

    async fn fetch_periods(&mut self, ids: CompanyIds) -> Result<Vec<RawPeriod>> {
        self.fetch_financials(ids).await?.into_periods()
    }
}

/// Sort an upstream answer into a financials response, an expired credential, or a malformed
/// response.
///
/// A rejected status, an empty object and an object carrying an error message instead of
/// `dates` all mean the token is no longer accepted. Anything else that lacks `dates` is
/// malformed.
pub fn classify(status: StatusCode, body: &str) -> Result<FinancialsResponse> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SpiderError::AuthExpired(format!("upstream answered {status}")));
    }

    let value: serde_json::Value = serde_json::from_str(body).map_err(|err| {
        SpiderError::UpstreamShape(format!("{status} with a body that is not JSON: {err}"))
    })?;

    let Some(object) = value.as_object() else {
        return Err(SpiderError::UpstreamShape(format!(
            "{status} with a non-object body"
        )));
    };

    if !object.contains_key("dates") {
        if object.is_empty() {
            return Err(SpiderError::AuthExpired("empty response".to_string()));
        }
        if let Some(message) = ERROR_KEYS.iter().find_map(|key| object.get(*key)) {
            return Err(SpiderError::AuthExpired(message.to_string()));
        }
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        return Err(SpiderError::UpstreamShape(format!(
            "{status} without dates, found keys {keys:?}"
        )));
    }

    serde_json::from_value(value).map_err(|err| SpiderError::UpstreamShape(err.to_string()))
}

/// Form body of a search request; the index expects a JSON document holding url-encoded params.
pub(crate) fn search_body(ticker: &str) -> String {
    let params = Url::parse_with_params("https://search.invalid/", [("query", ticker), ("distinct", "2")])
        .ok()
        .and_then(|url| url.query().map(str::to_string))
        .unwrap_or_default();
    serde_json::json!({ "params": params }).to_string()
}

// de
// ----------------------------------------------------------------------------

/// Body of a financials response: the reporting periods and every line item across them.
#[derive(Debug, Deserialize)]
pub struct FinancialsResponse {
    pub dates: Vec<PeriodDate>,
    #[serde(default)]
    pub data: Vec<DataItem>,
}

#[derive(Debug, Deserialize)]
pub struct PeriodDate {
    #[serde(deserialize_with = "de_text")]
    pub financialperiodid: String,
    #[serde(deserialize_with = "de_int")]
    pub calendaryear: i64,
}

#[derive(Debug, Deserialize)]
pub struct DataItem {
    #[serde(deserialize_with = "de_text")]
    pub financialperiodid: String,
    #[serde(deserialize_with = "de_int")]
    pub dataitemid: i64,
    #[serde(default, deserialize_with = "de_text")]
    pub dataitemvalue: String,
}

impl FinancialsResponse {
    /// Group the line items under their periods, keeping the order of `dates`.
    pub fn into_periods(self) -> Result<Vec<RawPeriod>> {
        let mut items: HashMap<String, Vec<RawLineItem>> = HashMap::new();
        for item in self.data {
            let Ok(item_id) = u32::try_from(item.dataitemid) else {
                warn!("skipping line item with id {}", item.dataitemid);
                continue;
            };
            items
                .entry(item.financialperiodid.clone())
                .or_default()
                .push(RawLineItem {
                    period_id: item.financialperiodid,
                    item_id,
                    value: item.dataitemvalue,
                });
        }

        self.dates
            .into_iter()
            .map(|date| {
                let year = i32::try_from(date.calendaryear).map_err(|_| {
                    SpiderError::UpstreamShape(format!("calendar year {}", date.calendaryear))
                })?;
                let items = items.remove(&date.financialperiodid).unwrap_or_default();
                Ok(RawPeriod {
                    period_id: date.financialperiodid,
                    year,
                    items,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(deserialize_with = "de_int")]
    tradingitemid: i64,
    #[serde(deserialize_with = "de_int")]
    companyid: i64,
}

impl SearchResponse {
    fn first(&self) -> Option<CompanyIds> {
        self.hits.first().map(|hit| CompanyIds {
            trading_id: hit.tradingitemid,
            company_id: hit.companyid,
        })
    }
}

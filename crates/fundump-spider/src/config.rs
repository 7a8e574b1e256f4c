use crate::error::{Result, SpiderError};
use crate::sink::ConflictPolicy;
use rand::Rng;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://oljizlzlsa.execute-api.us-east-1.amazonaws.com/prod/fin";
pub const DEFAULT_SEARCH_URL: &str = "https://tjpay1dyt8-3.algolianet.com/1/indexes/tikr-feb/query";
pub const DEFAULT_SEARCH_APP_ID: &str = "TJPAY1DYT8";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:108.0) Gecko/20100101 Firefox/108.0";

/// Runtime settings for the spider, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    pub api_url: String,
    pub search_url: String,
    pub search_app_id: String,
    pub search_api_key: Option<String>,
    pub user_agent: String,

    /// Where the access token is cached between runs.
    pub token_path: PathBuf,
    /// Shell command printing a fresh access token on stdout.
    pub token_command: Option<String>,
    /// Fixed access token, used when no command is configured.
    pub static_token: Option<String>,
    pub auth_max_attempts: u32,

    /// A period with more redacted line items than this is dropped.
    pub redaction_threshold: usize,
    /// Inclusive window, in seconds, of the random pause between two companies.
    pub rate_limit_secs: (u64, u64),

    pub conflict_policy: ConflictPolicy,
    pub currency: String,
    pub fiscal_period: String,
    /// Label of each statement's most recent period, when it should differ from `fiscal_period`.
    pub trailing_period: Option<String>,
    pub catalog_path: Option<PathBuf>,

    /// Pause between two ticker metadata lookups.
    pub enrich_delay_secs: u64,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            search_app_id: DEFAULT_SEARCH_APP_ID.to_string(),
            search_api_key: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            token_path: PathBuf::from("token.tmp"),
            token_command: None,
            static_token: None,
            auth_max_attempts: 3,
            redaction_threshold: 10,
            rate_limit_secs: (40, 80),
            conflict_policy: ConflictPolicy::Ignore,
            currency: "USD".to_string(),
            fiscal_period: "FY".to_string(),
            trailing_period: None,
            catalog_path: None,
            enrich_delay_secs: 2,
        }
    }
}

impl SpiderConfig {
    /// Read the configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let text = |key: &str, fallback: String| lookup(key).unwrap_or(fallback);

        let rate_limit_secs = (
            parse_var(&lookup, "RATE_LIMIT_MIN_SECS", default.rate_limit_secs.0)?,
            parse_var(&lookup, "RATE_LIMIT_MAX_SECS", default.rate_limit_secs.1)?,
        );
        if rate_limit_secs.0 > rate_limit_secs.1 {
            return Err(SpiderError::Config {
                key: "RATE_LIMIT_MIN_SECS".to_string(),
                reason: format!(
                    "minimum {} is above maximum {}",
                    rate_limit_secs.0, rate_limit_secs.1
                ),
            });
        }

        let auth_max_attempts = parse_var(&lookup, "AUTH_MAX_ATTEMPTS", default.auth_max_attempts)?;
        if auth_max_attempts == 0 {
            return Err(SpiderError::Config {
                key: "AUTH_MAX_ATTEMPTS".to_string(),
                reason: "must allow at least one attempt".to_string(),
            });
        }

        Ok(Self {
            api_url: text("TIKR_API_URL", default.api_url),
            search_url: text("TIKR_SEARCH_URL", default.search_url),
            search_app_id: text("TIKR_SEARCH_APP_ID", default.search_app_id),
            search_api_key: lookup("TIKR_SEARCH_API_KEY"),
            user_agent: text("USER_AGENT", default.user_agent),
            token_path: lookup("TIKR_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.token_path),
            token_command: lookup("TIKR_TOKEN_COMMAND").filter(|cmd| !cmd.trim().is_empty()),
            static_token: lookup("TIKR_ACCESS_TOKEN").filter(|token| !token.trim().is_empty()),
            auth_max_attempts,
            redaction_threshold: parse_var(
                &lookup,
                "REDACTION_THRESHOLD",
                default.redaction_threshold,
            )?,
            rate_limit_secs,
            conflict_policy: parse_var(&lookup, "CONFLICT_POLICY", default.conflict_policy)?,
            currency: text("CURRENCY", default.currency),
            fiscal_period: text("FISCAL_PERIOD", default.fiscal_period),
            trailing_period: lookup("TRAILING_PERIOD").filter(|label| !label.trim().is_empty()),
            catalog_path: lookup("METRIC_CATALOG").map(PathBuf::from),
            enrich_delay_secs: parse_var(&lookup, "ENRICH_DELAY_SECS", default.enrich_delay_secs)?,
        })
    }

    pub fn enrich_delay(&self) -> Duration {
        Duration::from_secs(self.enrich_delay_secs)
    }

    /// A random pause inside the rate-limit window.
    pub fn rate_limit_delay(&self) -> Duration {
        let (min, max) = self.rate_limit_secs;
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| SpiderError::Config {
            key: key.to_string(),
            reason: format!("{raw:?}: {err}"),
        }),
        None => Ok(default),
    }
}

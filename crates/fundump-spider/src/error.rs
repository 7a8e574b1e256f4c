use thiserror::Error;

/// Everything the spider can fail on.
///
/// Data-quality problems (missing line items, redacted values, unparseable numbers, zero
/// divisors) are not errors; they are folded into the normalized periods as unavailable values.
#[derive(Error, Debug)]
pub enum SpiderError {
    /// The upstream API rejected the current access token.
    #[error("access token expired or rejected: {0}")]
    AuthExpired(String),

    /// The access token was refreshed `attempts` times and upstream still rejected it.
    #[error("access token still rejected after {attempts} refresh attempts")]
    AuthExhausted { attempts: u32 },

    /// The upstream answered with something that is not a financials response.
    #[error("malformed upstream response: {0}")]
    UpstreamShape(String),

    /// The search index returned no hit for the ticker.
    #[error("no company found for ticker {0}")]
    CompanyNotFound(String),

    /// The metric catalog failed validation.
    #[error("invalid metric catalog: {0}")]
    Catalog(String),

    /// A configuration variable holds a value that cannot be used.
    #[error("invalid configuration for {key}: {reason}")]
    Config { key: String, reason: String },

    /// The external token command failed or printed nothing.
    #[error("failed to acquire access token: {0}")]
    TokenSource(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error(transparent)]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Template(#[from] indicatif::style::TemplateError),
}

pub type Result<T> = std::result::Result<T, SpiderError>;

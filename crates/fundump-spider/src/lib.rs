pub mod config;
pub mod error;
pub mod fs;
pub mod pipeline;
pub mod sink;
pub mod statement;

/// Company attributes and stored facts loaded from CSV files.
pub mod stock;

/// Statements scraped from the [TIKR] terminal.
///
/// [TIKR]: https://app.tikr.com
pub mod tikr;

mod sql;
mod tui;

pub use config::SpiderConfig;
pub use error::{Result, SpiderError};

use deadpool_postgres::{ManagerConfig, Pool, RecyclingMethod};
use std::time::Instant;

/// Shortcut for required API elements.
pub(crate) mod http {
    pub(crate) use reqwest::Client as HttpClient;
    pub(crate) use tokio_postgres::Client as PgClient;
}

/// Postgres connection pool for `url`.
pub fn pg_pool(url: &str) -> Result<Pool> {
    let mut pg_config = deadpool_postgres::Config::new();
    pg_config.url = Some(url.to_string());
    pg_config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = pg_config.create_pool(
        Some(deadpool_postgres::Runtime::Tokio1),
        tokio_postgres::NoTls,
    )?;
    Ok(pool)
}

/// HTTP client sending `user_agent` with every request.
pub(crate) fn std_client_build(user_agent: &str) -> Result<http::HttpClient> {
    let client = reqwest::ClientBuilder::new()
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

/// Time since `time`, formatted for logs.
pub fn time_elapsed(time: Instant) -> String {
    format!("time elapsed: {:.2?}", time.elapsed())
}

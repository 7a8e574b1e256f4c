mod cli;

// remote imports
use clap::Parser;
use cli::{Cli, Commands, Table, TraceLevel};
use colored::Colorize;
use deadpool_postgres::Pool;
use dotenv::var;
use fundump_spider::pipeline::{self, WriteMode};
use fundump_spider::sink::{pg::init_schema, PgFactSink};
use fundump_spider::stock::{companies, enrich, financials};
use fundump_spider::SpiderConfig;
use tracing::{debug, info, subscriber, trace, Level};
use tracing_subscriber::FmtSubscriber;

////////////////////////////////////////////////////////////////////////////

// preproccess the trace level
fn preprocess(trace_level: Level) {
    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .finish();
    subscriber::set_global_default(my_subscriber).expect("Set subscriber");
}

fn pool() -> anyhow::Result<Pool> {
    trace!("creating fundump connection pool");
    let pool = fundump_spider::pg_pool(&var("FUNDUMP_URL")?)?;
    debug!("fundump connection pool established");
    Ok(pool)
}

////////////////////////////////////////////////////////////////////////////

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    // set the trace level
    if let Some(trace_level) = cli.trace {
        preprocess(match trace_level {
            TraceLevel::DEBUG => Level::DEBUG,
            TraceLevel::ERROR => Level::ERROR,
            TraceLevel::INFO => Level::INFO,
            TraceLevel::TRACE => Level::TRACE,
            TraceLevel::WARN => Level::WARN,
        });
    }
    trace!("command line input recorded: {cli:?}");

    // if no trace level provided, use tui
    let tui = cli.trace.is_none();

    let config = SpiderConfig::from_env()?;

    match cli.command {
        // `fundump spider [--symbols <SYMBOLS>]`: scrape statements into the database
        Commands::Spider { symbols } => {
            let catalog = pipeline::load_catalog(&config).await?;
            let pool = pool()?;
            let report =
                pipeline::scrape(&pool, &config, &catalog, symbols, WriteMode::Merge, tui).await?;
            for (symbol, err) in &report.failed {
                info!("[{symbol}] not collected: {err}");
            }
        }

        // `fundump export [TICKER]`: statements to CSV files
        Commands::Export {
            ticker,
            out,
            from_file,
        } => {
            let ticker = match ticker {
                Some(ticker) => ticker,
                None => dialoguer::Input::<String>::new()
                    .with_prompt("Ticker")
                    .interact_text()?,
            };
            let ticker = ticker.trim().to_uppercase();

            let catalog = pipeline::load_catalog(&config).await?;
            let written =
                pipeline::export_company(&config, &catalog, &ticker, &out, from_file.as_deref())
                    .await?;
            for path in written {
                println!("{} {}", "[ + ]".green(), path.display());
            }
        }

        // `fundump load <companies|financials> <CSV>`
        Commands::Load { table } => {
            let pool = pool()?;
            match table {
                Table::Companies { path } => {
                    let inserted = companies::load(&pool, &path).await?;
                    println!("{} {inserted} companies inserted", "[ + ]".green());
                }
                Table::Financials { path } => {
                    let mut sink = PgFactSink::new(pool.clone(), config.conflict_policy);
                    let changed = financials::load(&mut sink, &path).await?;
                    println!("{} {changed} facts loaded", "[ + ]".green());
                }
            }
        }

        // `fundump refresh <SYMBOLS>`: scrape again, replacing what is stored
        Commands::Refresh { symbols } => {
            let catalog = pipeline::load_catalog(&config).await?;
            let pool = pool()?;
            let report =
                pipeline::scrape(&pool, &config, &catalog, Some(symbols), WriteMode::Replace, tui)
                    .await?;
            for (symbol, err) in &report.failed {
                info!("[{symbol}] not refreshed, stored facts kept: {err}");
            }
        }

        // `fundump enrich <CSV> [--out <CSV>]`: ticker metadata for `load companies`
        Commands::Enrich { input, out } => {
            let out = out.unwrap_or_else(|| enrich::enriched_path(&input));
            let mut yahoo = enrich::YahooClient::new(&config.user_agent)?;
            let report = enrich::enrich(&mut yahoo, &input, &out, config.enrich_delay(), tui).await?;
            println!(
                "{} {} rows appended to {} ({} already enriched, {} failed)",
                "[ + ]".green(),
                report.written,
                out.display(),
                report.skipped,
                report.failed.len()
            );
        }

        // `fundump init`: create tables
        Commands::Init => {
            let pool = pool()?;
            init_schema(&pool).await?;
            println!("{} schema ready", "[ + ]".green());
        }
    }

    Ok(())
}

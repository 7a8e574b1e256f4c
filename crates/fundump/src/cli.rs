use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing.
    ///
    /// Without it, progress is shown as progress bars instead of logs.
    #[arg(short, long, global = true)]
    pub trace: Option<TraceLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scrape TIKR financial statements into the PostgreSQL database (fundump).
    Spider {
        /// Specify the ticker symbols to scrape.
        ///
        /// If no symbols are provided, spider will collect every company in the database.
        #[arg(short, long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,
    },

    /// Export one company's statements to CSV files, one per statement.
    Export {
        /// Ticker symbol; prompted for when omitted.
        ticker: Option<String>,

        /// Directory the `<TICKER>_<DATE>` folder is written into.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Read a saved financials response instead of calling TIKR.
        #[arg(long, value_name = "JSON")]
        from_file: Option<PathBuf>,
    },

    /// Load CSV files into the database.
    Load {
        #[command(subcommand)]
        table: Table,
    },

    /// Recollect the given symbols, replacing their stored facts once the new ones are in.
    Refresh {
        #[arg(required = true, value_delimiter = ',')]
        symbols: Vec<String>,
    },

    /// Enrich a listing CSV with Yahoo Finance ticker metadata, ready for `load companies`.
    Enrich {
        /// Listing with a `Symbol` column.
        input: PathBuf,

        /// Enriched CSV to append to; `<INPUT>_enriched.csv` by default.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Create the `companies` and `financials` tables.
    Init,
}

#[derive(Subcommand, Debug)]
pub enum Table {
    /// A company listing (enriched yfinance columns or a plain exchange listing).
    Companies { path: PathBuf },

    /// Stored facts in the `financials` column layout.
    Financials { path: PathBuf },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
#[clap(rename_all = "UPPERCASE")]
pub enum TraceLevel {
    DEBUG,
    ERROR,
    INFO,
    TRACE,
    WARN,
}

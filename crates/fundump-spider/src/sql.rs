//////////////////////////////////////////////////////////////////
// schema
//////////////////////////////////////////////////////////////////

/// `companies` holds one row per listed symbol, `financials` one row per statement fact.
pub(crate) static CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS companies (
        symbol VARCHAR PRIMARY KEY,
        short_name VARCHAR,
        long_name VARCHAR,
        display_name VARCHAR,
        language VARCHAR,
        region VARCHAR,
        exchange VARCHAR,
        full_exchange_name VARCHAR,
        market VARCHAR,
        quote_type VARCHAR,
        type_disp VARCHAR,
        exchange_timezone_name VARCHAR,
        exchange_timezone_short_name VARCHAR,
        gmt_offset_milliseconds BIGINT,
        market_state VARCHAR,
        message_board_id VARCHAR,
        quote_source_name VARCHAR,
        triggerable VARCHAR,
        custom_price_alert_confidence VARCHAR,
        has_pre_post_market_data VARCHAR,
        first_trade_date_milliseconds BIGINT,
        address1 VARCHAR,
        city VARCHAR,
        state VARCHAR,
        zip VARCHAR,
        country VARCHAR,
        phone VARCHAR,
        website VARCHAR,
        industry VARCHAR,
        industry_key VARCHAR,
        industry_disp VARCHAR,
        sector VARCHAR,
        sector_key VARCHAR,
        sector_disp VARCHAR,
        category VARCHAR,
        fund_family VARCHAR,
        legal_type VARCHAR,
        long_business_summary TEXT,
        full_time_employees BIGINT
    );

    CREATE TABLE IF NOT EXISTS financials (
        symbol VARCHAR NOT NULL,
        statement VARCHAR NOT NULL,
        fiscal_year INT NOT NULL,
        fiscal_period VARCHAR NOT NULL,
        key VARCHAR NOT NULL,
        value DOUBLE PRECISION,
        currency VARCHAR,
        PRIMARY KEY (symbol, statement, fiscal_year, fiscal_period, key)
    );
";

//////////////////////////////////////////////////////////////////
// companies
//////////////////////////////////////////////////////////////////

pub(crate) static SELECT_SYMBOLS: &str = "
    SELECT symbol FROM companies
    ORDER BY symbol
";

//////////////////////////////////////////////////////////////////
// financials
//////////////////////////////////////////////////////////////////

/// First write wins: a fact already stored under the same key is left untouched.
pub(crate) static INSERT_FACT: &str = "
    INSERT INTO financials (symbol, statement, fiscal_year, fiscal_period, key, value, currency)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (symbol, statement, fiscal_year, fiscal_period, key) DO NOTHING
";

/// Last write wins.
pub(crate) static UPSERT_FACT: &str = "
    INSERT INTO financials (symbol, statement, fiscal_year, fiscal_period, key, value, currency)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (symbol, statement, fiscal_year, fiscal_period, key)
    DO UPDATE SET value = EXCLUDED.value, currency = EXCLUDED.currency
";

pub(crate) static DELETE_FACTS: &str = "
    DELETE FROM financials
    WHERE symbol = $1
";

/// The `companies` table: listing CSVs in, symbols out.
pub mod companies;

/// Listing CSVs enriched with Yahoo Finance ticker metadata.
pub mod enrich;

/// Stored facts loaded straight from a CSV in the `financials` layout.
pub mod financials;

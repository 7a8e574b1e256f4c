use crate::error::Result;
use crate::sink::{FactSink, PersistedFact};
use std::path::Path;
use tracing::{debug, trace};

/// Parse a CSV of stored facts with the `financials` column layout. Empty values are null.
pub fn parse_facts(bytes: &[u8]) -> Result<Vec<PersistedFact>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(bytes);
    let facts = reader
        .deserialize::<PersistedFact>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(facts)
}

/// Load a financials CSV at `path` through `sink`, returning how many rows changed.
pub async fn load<S>(sink: &mut S, path: impl AsRef<Path>) -> Result<u64>
where
    S: FactSink + ?Sized,
{
    let path = path.as_ref();
    trace!("reading financials from {}", path.display());
    let bytes = tokio::fs::read(path).await?;
    let facts = parse_facts(&bytes)?;

    let changed = sink.write(&facts).await?;
    debug!("{changed} of {} facts loaded from {}", facts.len(), path.display());
    Ok(changed)
}

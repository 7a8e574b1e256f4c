use super::{ConflictPolicy, FactSink, PersistedFact};
use crate::error::Result;
use crate::sql;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::{debug, error, trace};

/// Writes facts to the `financials` table, one transaction per call.
#[derive(Clone)]
pub struct PgFactSink {
    pool: Pool,
    policy: ConflictPolicy,
}

impl PgFactSink {
    pub fn new(pool: Pool, policy: ConflictPolicy) -> Self {
        Self { pool, policy }
    }

    fn statement(&self) -> &'static str {
        match self.policy {
            ConflictPolicy::Ignore => sql::INSERT_FACT,
            ConflictPolicy::Update => sql::UPSERT_FACT,
        }
    }
}

async fn insert_facts(
    tx: &deadpool_postgres::Transaction<'_>,
    query: &tokio_postgres::Statement,
    facts: &[PersistedFact],
) -> Result<u64> {
    let mut changed = 0;
    for fact in facts {
        changed += tx
            .execute(
                query,
                &[
                    &fact.symbol,
                    &fact.statement,
                    &fact.fiscal_year,
                    &fact.fiscal_period,
                    &fact.key,
                    &fact.value,
                    &fact.currency,
                ],
            )
            .await
            .map_err(|err| {
                error!(
                    "failed to insert {} fact {} ({}) for [{}], error({err})",
                    fact.statement, fact.key, fact.fiscal_year, fact.symbol
                );
                err
            })?;
    }
    trace!("{changed} of {} facts changed", facts.len());
    Ok(changed)
}

#[async_trait]
impl FactSink for PgFactSink {
    async fn write(&mut self, facts: &[PersistedFact]) -> Result<u64> {
        let time = std::time::Instant::now();
        let mut pg_client = self.pool.get().await?;

        // preprocess pg query as transaction
        let query = pg_client.prepare(self.statement()).await?;
        let tx = pg_client.transaction().await?;

        let changed = insert_facts(&tx, &query, facts).await?;

        tx.commit().await?;
        debug!("facts committed, {}", crate::time_elapsed(time));

        Ok(changed)
    }

    async fn delete_company(&mut self, symbol: &str) -> Result<u64> {
        let pg_client = self.pool.get().await?;
        let removed = pg_client.execute(sql::DELETE_FACTS, &[&symbol]).await?;
        debug!("removed {removed} facts for [{symbol}]");
        Ok(removed)
    }

    async fn replace_company(&mut self, symbol: &str, facts: &[PersistedFact]) -> Result<u64> {
        let time = std::time::Instant::now();
        let mut pg_client = self.pool.get().await?;

        let query = pg_client.prepare(self.statement()).await?;
        let tx = pg_client.transaction().await?;

        // nothing is removed unless the new facts commit with it
        let removed = tx.execute(sql::DELETE_FACTS, &[&symbol]).await?;
        let changed = insert_facts(&tx, &query, facts).await?;

        tx.commit().await?;
        debug!(
            "[{symbol}] {removed} facts replaced by {changed}, {}",
            crate::time_elapsed(time)
        );

        Ok(changed)
    }
}

/// Create the `companies` and `financials` tables when they do not exist.
pub async fn init_schema(pool: &Pool) -> Result<()> {
    let pg_client = pool.get().await?;
    pg_client.batch_execute(sql::CREATE_SCHEMA).await?;
    debug!("schema initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::FactSink;

    fn fact(value: f64) -> PersistedFact {
        PersistedFact {
            symbol: "ZZZTEST".to_string(),
            statement: "Income Statement".to_string(),
            fiscal_year: 2023,
            fiscal_period: "FY".to_string(),
            key: "Revenues".to_string(),
            value: Some(value),
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    #[ignore = "needs a database at FUNDUMP_URL"]
    async fn write_twice_keeps_one_row() {
        let pool = crate::pg_pool(&dotenv::var("FUNDUMP_URL").unwrap()).unwrap();
        init_schema(&pool).await.unwrap();

        let mut sink = PgFactSink::new(pool.clone(), ConflictPolicy::Ignore);
        sink.delete_company("ZZZTEST").await.unwrap();
        assert_eq!(sink.write(&[fact(1.0)]).await.unwrap(), 1);
        assert_eq!(sink.write(&[fact(2.0)]).await.unwrap(), 0);

        let pg_client = pool.get().await.unwrap();
        let rows = pg_client
            .query("SELECT value FROM financials WHERE symbol = 'ZZZTEST'", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<_, Option<f64>>(0), Some(1.0));

        assert_eq!(sink.replace_company("ZZZTEST", &[fact(3.0)]).await.unwrap(), 1);
        let rows = pg_client
            .query("SELECT value FROM financials WHERE symbol = 'ZZZTEST'", &[])
            .await
            .unwrap();
        assert_eq!(rows[0].get::<_, Option<f64>>(0), Some(3.0));

        assert_eq!(sink.delete_company("ZZZTEST").await.unwrap(), 1);
    }
}

use crate::error::Result;
use crate::statement::{NormalizedPeriod, StatementKind, StatementSet};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Column label of the most recent period.
pub const TRAILING_LABEL: &str = "LTM";

/// Lay out one statement as a table: metrics down, fiscal years across.
///
/// The top-left cell holds `symbol` and the last year column is relabeled [`TRAILING_LABEL`].
/// Unavailable values are empty cells.
pub fn tabulate(symbol: &str, periods: &[NormalizedPeriod]) -> Vec<Vec<String>> {
    let Some(first) = periods.first() else {
        return vec![];
    };

    let mut header = Vec::with_capacity(periods.len() + 1);
    header.push(symbol.to_string());
    header.extend(periods.iter().map(|period| period.year.to_string()));
    if let Some(last) = header.last_mut() {
        *last = TRAILING_LABEL.to_string();
    }

    let mut rows = vec![header];
    for (idx, (metric, _)) in first.values.iter().enumerate() {
        let mut row = Vec::with_capacity(periods.len() + 1);
        row.push(metric.clone());
        for period in periods {
            row.push(
                period
                    .values
                    .get(idx)
                    .and_then(|(_, value)| value.as_number())
                    .map(|value| value.to_string())
                    .unwrap_or_default(),
            );
        }
        rows.push(row);
    }
    rows
}

/// File name of one statement's export, e.g. `cash_flow_statement.csv`.
pub fn file_name(kind: StatementKind) -> String {
    format!("{}.csv", kind.name().to_lowercase().replace(' ', "_"))
}

/// Write one CSV per non-empty statement into `dir`, returning the files written.
pub async fn export_csv(dir: &Path, symbol: &str, statements: &StatementSet) -> Result<Vec<PathBuf>> {
    crate::fs::ensure_dir(dir).await?;

    let mut written = vec![];
    for (kind, periods) in &statements.periods {
        if periods.is_empty() {
            trace!("no periods to export for {kind} of [{symbol}]");
            continue;
        }

        let mut writer = csv::WriterBuilder::new().from_writer(vec![]);
        for row in tabulate(symbol, periods) {
            writer.write_record(&row)?;
        }
        let bytes = writer.into_inner().map_err(|err| err.into_error())?;

        let path = dir.join(file_name(*kind));
        tokio::fs::write(&path, bytes).await?;
        debug!("exported {kind} of [{symbol}] to {}", path.display());
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::MetricValue;

    fn period(year: i32, revenue: MetricValue) -> NormalizedPeriod {
        NormalizedPeriod {
            statement: StatementKind::IncomeStatement,
            year,
            values: vec![
                ("Revenues".to_string(), revenue),
                ("Revenues YoY".to_string(), MetricValue::Unset),
            ],
        }
    }

    #[test]
    fn years_across_with_trailing_label() {
        let periods = vec![
            period(2022, MetricValue::Number(100.0)),
            period(2023, MetricValue::Unavailable),
            period(2024, MetricValue::Number(150.5)),
        ];
        let table = tabulate("MSFT", &periods);
        assert_eq!(table[0], vec!["MSFT", "2022", "2023", "LTM"]);
        assert_eq!(table[1], vec!["Revenues", "100", "", "150.5"]);
        assert_eq!(table[2], vec!["Revenues YoY", "", "", ""]);
        assert!(tabulate("MSFT", &[]).is_empty());
    }

    #[tokio::test]
    async fn empty_statements_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = StatementSet::default();
        set.periods.insert(
            StatementKind::IncomeStatement,
            vec![period(2023, MetricValue::Number(1.0))],
        );
        set.periods.insert(StatementKind::BalanceSheet, vec![]);

        let written = export_csv(dir.path(), "MSFT", &set).await.unwrap();
        assert_eq!(written, vec![dir.path().join("income_statement.csv")]);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&written[0])
            .unwrap();
        let rows: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        assert_eq!(rows[0], vec!["MSFT", "LTM"]);
        assert_eq!(rows[1], vec!["Revenues", "1"]);
    }
}

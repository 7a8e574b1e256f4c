use super::catalog::{Source, StatementCatalog};
use super::{MetricValue, NormalizedPeriod};

/// Absolute year-over-year change in percent, rounded to 2 decimals.
///
/// `None` when the previous value is zero or either value is not finite.
pub fn yoy_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 || !current.is_finite() || !previous.is_finite() {
        return None;
    }
    let change = (100.0 - (current / previous) * 100.0).abs();
    Some((change * 100.0).round() / 100.0)
}

/// Fill every delta metric of `periods` from the period before it.
///
/// `periods` must be one statement's sequence in ascending order. Deltas that already hold a
/// value are left alone, and any missing or zero base leaves the delta unset.
pub fn compute_deltas(statement: &StatementCatalog, periods: &mut [NormalizedPeriod]) {
    let deltas: Vec<(usize, usize)> = statement
        .metrics
        .iter()
        .enumerate()
        .filter_map(|(idx, metric)| match metric.source {
            Source::Delta { base } => Some((idx, base)),
            _ => None,
        })
        .collect();
    if deltas.is_empty() {
        return;
    }

    for i in 1..periods.len() {
        let (before, after) = periods.split_at_mut(i);
        let previous = &before[i - 1];
        let current = &mut after[0];

        for &(delta, base) in &deltas {
            if current.values[delta].1.as_number().is_some() {
                continue;
            }
            let (Some(now), Some(then)) = (
                current.values[base].1.as_number(),
                previous.values[base].1.as_number(),
            ) else {
                continue;
            };
            if let Some(change) = yoy_change(now, then) {
                current.values[delta].1 = MetricValue::Number(change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{Catalog, StatementKind};

    fn sequence(statement: &StatementCatalog, bases: &[Option<f64>]) -> Vec<NormalizedPeriod> {
        let revenues = statement.position("Revenues").unwrap();
        bases
            .iter()
            .enumerate()
            .map(|(i, base)| {
                let mut values: Vec<(String, MetricValue)> = statement
                    .metrics
                    .iter()
                    .map(|m| (m.name.clone(), MetricValue::Unset))
                    .collect();
                values[revenues].1 = MetricValue::from_option(*base);
                NormalizedPeriod {
                    statement: statement.kind,
                    year: 2018 + i as i32,
                    values,
                }
            })
            .collect()
    }

    fn revenue_deltas(periods: &[NormalizedPeriod]) -> Vec<Option<f64>> {
        periods.iter().map(|p| p.number("Revenues YoY")).collect()
    }

    #[test]
    fn change_law() {
        assert_eq!(yoy_change(150.0, 100.0), Some(50.0));
        assert_eq!(yoy_change(75.0, 150.0), Some(50.0));
        assert_eq!(yoy_change(110.0, 100.0), Some(10.0));
        assert_eq!(yoy_change(1.0, 3.0), Some(66.67));
        assert_eq!(yoy_change(5.0, 0.0), None);
    }

    #[test]
    fn deltas_across_a_sequence() {
        let catalog = Catalog::builtin();
        let income = catalog.statement(StatementKind::IncomeStatement).unwrap();
        let mut periods = sequence(income, &[Some(100.0), Some(150.0), Some(75.0)]);

        compute_deltas(income, &mut periods);
        // the trailing period still gets the delta from its predecessor
        assert_eq!(revenue_deltas(&periods), vec![None, Some(50.0), Some(50.0)]);
    }

    #[test]
    fn zero_or_missing_bases_are_skipped() {
        let catalog = Catalog::builtin();
        let income = catalog.statement(StatementKind::IncomeStatement).unwrap();
        let mut periods = sequence(
            income,
            &[Some(0.0), Some(100.0), None, Some(80.0), Some(120.0)],
        );

        compute_deltas(income, &mut periods);
        assert_eq!(
            revenue_deltas(&periods),
            vec![None, None, None, None, Some(50.0)]
        );
    }

    #[test]
    fn existing_delta_is_kept() {
        let catalog = Catalog::builtin();
        let income = catalog.statement(StatementKind::IncomeStatement).unwrap();
        let mut periods = sequence(income, &[Some(100.0), Some(200.0)]);
        let yoy = income.position("Revenues YoY").unwrap();
        periods[1].values[yoy].1 = MetricValue::Number(7.0);

        compute_deltas(income, &mut periods);
        assert_eq!(revenue_deltas(&periods), vec![None, Some(7.0)]);
    }

    #[test]
    fn short_sequences_are_untouched() {
        let catalog = Catalog::builtin();
        let income = catalog.statement(StatementKind::IncomeStatement).unwrap();
        let mut periods = sequence(income, &[Some(100.0)]);
        compute_deltas(income, &mut periods);
        assert_eq!(revenue_deltas(&periods), vec![None]);

        let mut empty: Vec<NormalizedPeriod> = vec![];
        compute_deltas(income, &mut empty);
    }
}

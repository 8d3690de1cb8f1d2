//! Mapping result rows back onto segments
//!
//! Rows are decoded purely by position: `c0..cn` hold the finest grouping
//! columns, `m0..mk` the measures and `g0..gr` the grouping indicators.
//! The indicators select the grouping set a row belongs to; the row's
//! coordinates are then the values of that set's columns.
//!
//! ```text
//!   row: [ EU, FR, 2024 | 10.0, 3 | 0 ]   indicators [0] → finest set
//!   row: [ EU, FR, NULL | 25.0, 7 | 1 ]   indicators [1] → set 1 (year rolled up)
//! ```

use crate::error::ExecutionError;
use crate::plan::{GroupingSetsList, ResultLayout};
use crate::segment::SegmentData;
use crate::types::Value;

use super::executor::ResultSet;

/// Decode `result` into one [`SegmentData`] per segment of every grouping set
///
/// The outer vector follows the grouping sets of `list`, the inner one the
/// segments (measures) of each set.
pub fn decode_result(
    list: &GroupingSetsList,
    layout: ResultLayout,
    result: &ResultSet,
) -> Result<Vec<Vec<SegmentData>>, ExecutionError> {
    if !result.columns.is_empty() && result.columns.len() != layout.width() {
        return Err(ExecutionError::Decode(format!(
            "result has {} columns, expected {}",
            result.columns.len(),
            layout.width()
        )));
    }

    let mut data: Vec<Vec<SegmentData>> = list
        .grouping_sets()
        .iter()
        .map(|set| {
            set.segments()
                .iter()
                .map(|_| SegmentData::new(set.columns().len()))
                .collect()
        })
        .collect();

    let mut indicators = Vec::with_capacity(layout.indicators);
    for (row_index, row) in result.rows.iter().enumerate() {
        if row.len() != layout.width() {
            return Err(ExecutionError::Decode(format!(
                "row {} has {} values, expected {}",
                row_index,
                row.len(),
                layout.width()
            )));
        }

        indicators.clear();
        for k in 0..layout.indicators {
            let bit = row[layout.indicator_index(k)].as_grouping_bit().ok_or_else(|| {
                ExecutionError::Decode(format!(
                    "row {} has a non-boolean grouping indicator g{}",
                    row_index, k
                ))
            })?;
            indicators.push(bit);
        }
        let set_index = list.grouping_set_index_for(&indicators).ok_or_else(|| {
            ExecutionError::Decode(format!(
                "row {} has unknown grouping indicators {:?}",
                row_index, indicators
            ))
        })?;

        let positions = list.positions_in_finest(set_index).unwrap_or_default();
        let coordinates = positions
            .iter()
            .map(|&p| {
                row[p].to_value().ok_or_else(|| {
                    ExecutionError::Decode(format!(
                        "row {} column c{} is not a dimension value",
                        row_index, p
                    ))
                })
            })
            .collect::<Result<Vec<Value>, _>>()?;

        for (m, segment_data) in data[set_index].iter_mut().enumerate() {
            let cell = row[layout.measure_index(m)].clone();
            segment_data.insert(coordinates.clone(), cell)?;
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::GroupingSet;
    use crate::segment::{PredicateSet, Segment};
    use crate::types::{Aggregator, Column, Datum, Measure, Star};
    use std::sync::Arc;

    fn rollup_list() -> GroupingSetsList {
        let star = Arc::new(Star::new("sales").with_link("store", "store_id", "id"));
        let columns = vec![
            Arc::new(Column::new("store", "region")),
            Arc::new(Column::new("sales", "year")),
        ];
        let measures = vec![Arc::new(Measure::new("Sales", "sales", Some("amount"), Aggregator::Sum))];
        let finest =
            Segment::batch(&star, &measures, &columns, &PredicateSet::unconstrained(2)).unwrap();
        let by_region: Vec<Arc<Segment>> = finest.iter().map(|s| Arc::new(s.rollup(&[0]).unwrap())).collect();
        GroupingSetsList::new(vec![
            GroupingSet::new(finest).unwrap(),
            GroupingSet::new(by_region).unwrap(),
        ])
        .unwrap()
    }

    fn layout() -> ResultLayout {
        ResultLayout {
            columns: 2,
            measures: 1,
            indicators: 1,
        }
    }

    #[test]
    fn test_rows_routed_by_indicator() {
        let list = rollup_list();
        let result = ResultSet::from_rows(vec![
            vec![Datum::Str("EU".into()), Datum::Int(2023), Datum::Float(1.0), Datum::Int(0)],
            vec![Datum::Str("EU".into()), Datum::Int(2024), Datum::Float(2.0), Datum::Int(0)],
            vec![Datum::Str("EU".into()), Datum::Null, Datum::Float(3.0), Datum::Int(1)],
            vec![Datum::Null, Datum::Int(2024), Datum::Float(0.5), Datum::Int(0)],
        ]);

        let data = decode_result(&list, layout(), &result).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0][0].len(), 3);
        assert_eq!(data[1][0].len(), 1);
        assert_eq!(data[1][0].get(&[Value::str("EU")]), Some(&Datum::Float(3.0)));
        assert_eq!(
            data[0][0].get(&[Value::Null, Value::Int(2024)]),
            Some(&Datum::Float(0.5))
        );
    }

    #[test]
    fn test_wrong_width_rejected() {
        let result = ResultSet::from_rows(vec![vec![Datum::Int(1)]]);
        let err = decode_result(&rollup_list(), layout(), &result).unwrap_err();
        assert!(matches!(err, ExecutionError::Decode(_)));
    }

    #[test]
    fn test_unknown_indicator_rejected() {
        let result = ResultSet::from_rows(vec![vec![
            Datum::Str("EU".into()),
            Datum::Null,
            Datum::Float(1.0),
            Datum::Int(7),
        ]]);
        assert!(decode_result(&rollup_list(), layout(), &result).is_err());
    }

    #[test]
    fn test_float_coordinate_rejected() {
        let result = ResultSet::from_rows(vec![vec![
            Datum::Float(1.5),
            Datum::Int(2024),
            Datum::Float(1.0),
            Datum::Int(0),
        ]]);
        let err = decode_result(&rollup_list(), layout(), &result).unwrap_err();
        assert!(format!("{}", err).contains("not a dimension value"));
    }
}

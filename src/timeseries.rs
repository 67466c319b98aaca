//! Time-series frame plumbing
//!
//! Partitioning rows into independent groups, ordering rows along the time
//! axis, and slicing trailing windows. Groups are keyed and aggregated by
//! their rendered key values, never by processing order, so results are
//! deterministic regardless of row storage order or worker scheduling.

use std::collections::BTreeMap;

use polars::prelude::*;

use crate::error::Result;
use crate::request::OrderKey;

/// Key used for a table processed without any `group_by` columns.
pub const UNGROUPED_KEY: &str = "__all__";

/// Separator between the rendered values of a composite group key.
pub const KEY_SEPARATOR: &str = "|";

/// Render the group key for explicit key values (e.g. from a `when` scenario).
pub fn render_key(values: &[String]) -> String {
    values.join(KEY_SEPARATOR)
}

/// Partition `df` into one sub-frame per distinct `group_by` key.
///
/// An empty `group_by` yields a single pseudo-group under [`UNGROUPED_KEY`].
/// Row order within each sub-frame follows the input frame; callers that need
/// the time axis sort afterwards with [`sort_by_order_keys`].
pub fn partition_by_keys(
    df: &DataFrame,
    group_by: &[String],
) -> Result<BTreeMap<String, DataFrame>> {
    if group_by.is_empty() {
        let mut groups = BTreeMap::new();
        groups.insert(UNGROUPED_KEY.to_string(), df.clone());
        return Ok(groups);
    }

    // Render each key column as strings once, then bucket row indices.
    let mut rendered: Vec<Series> = Vec::with_capacity(group_by.len());
    for name in group_by {
        let series = df
            .column(name.as_str())?
            .as_materialized_series()
            .cast(&DataType::String)?;
        rendered.push(series);
    }
    let accessors = rendered
        .iter()
        .map(|s| s.str())
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut buckets: BTreeMap<String, Vec<IdxSize>> = BTreeMap::new();
    for row in 0..df.height() {
        let key = accessors
            .iter()
            .map(|ca| ca.get(row).unwrap_or("null"))
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR);
        buckets.entry(key).or_default().push(row as IdxSize);
    }

    let mut groups = BTreeMap::new();
    for (key, indices) in buckets {
        let idx = IdxCa::from_vec("".into(), indices);
        groups.insert(key, df.take(&idx)?);
    }
    Ok(groups)
}

/// Sort a frame along the time axis: multi-key sort with a per-key direction.
pub fn sort_by_order_keys(df: &DataFrame, order_by: &[OrderKey]) -> Result<DataFrame> {
    if order_by.is_empty() {
        return Ok(df.clone());
    }
    let by: Vec<PlSmallStr> = order_by.iter().map(|k| k.column.as_str().into()).collect();
    let descending: Vec<bool> = order_by.iter().map(|k| !k.ascending).collect();
    let sorted = df.sort(
        by,
        SortMultipleOptions::default()
            .with_order_descending_multi(descending)
            .with_maintain_order(true),
    )?;
    Ok(sorted)
}

/// At most `window` rows immediately preceding `end` (exclusive).
///
/// A group with fewer rows than the window yields whatever is available;
/// sufficiency of the data is judged by the sampling tolerance, not here.
pub fn trailing_window(df: &DataFrame, end: usize, window: usize) -> DataFrame {
    let end = end.min(df.height());
    let start = end.saturating_sub(window);
    df.slice(start as i64, end - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped_df() -> DataFrame {
        df!(
            "id" => &["b", "a", "b", "a", "b"],
            "ts" => &[2, 1, 1, 2, 3],
            "value" => &[20.0, 1.0, 10.0, 2.0, 30.0]
        )
        .unwrap()
    }

    #[test]
    fn test_partition_no_groups() {
        let df = grouped_df();
        let groups = partition_by_keys(&df, &[]).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.get(UNGROUPED_KEY).unwrap().height(), 5);
    }

    #[test]
    fn test_partition_by_single_key() {
        let df = grouped_df();
        let groups = partition_by_keys(&df, &["id".to_string()]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get("a").unwrap().height(), 2);
        assert_eq!(groups.get("b").unwrap().height(), 3);
    }

    #[test]
    fn test_partition_is_storage_order_independent() {
        let df = grouped_df();
        let groups = partition_by_keys(&df, &["id".to_string()]).unwrap();

        // Permute row storage order; group contents must be identical after
        // sorting along the time axis.
        let permuted = df
            .take(&IdxCa::from_vec("".into(), vec![4u32, 0, 3, 2, 1]))
            .unwrap();
        let groups_permuted = partition_by_keys(&permuted, &["id".to_string()]).unwrap();

        let order = vec![OrderKey { column: "ts".to_string(), ascending: true }];
        for key in ["a", "b"] {
            let lhs = sort_by_order_keys(groups.get(key).unwrap(), &order).unwrap();
            let rhs = sort_by_order_keys(groups_permuted.get(key).unwrap(), &order).unwrap();
            assert!(lhs.equals(&rhs), "group {key} differs under permutation");
        }
    }

    #[test]
    fn test_sort_multi_key_directions() {
        let df = grouped_df();
        let order = vec![
            OrderKey { column: "id".to_string(), ascending: true },
            OrderKey { column: "ts".to_string(), ascending: false },
        ];
        let sorted = sort_by_order_keys(&df, &order).unwrap();
        let ts = sorted
            .column("ts")
            .unwrap()
            .as_materialized_series()
            .i32()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ts, vec![2, 1, 3, 2, 1]);
    }

    #[test]
    fn test_trailing_window_bounds() {
        let df = grouped_df();
        let window = trailing_window(&df, 5, 3);
        assert_eq!(window.height(), 3);
        // Short group: yields what exists, no failure.
        let short = trailing_window(&df, 2, 10);
        assert_eq!(short.height(), 2);
        let empty = trailing_window(&df, 0, 3);
        assert_eq!(empty.height(), 0);
    }
}

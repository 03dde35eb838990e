// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Flattening bridge: logical plan tree to executable [`QueryPlan`]
//!
//! The executor runs the flattened form: a conjunctive predicate list, one
//! `(skip, take)` window with a flag recording whether pagination applies
//! before or after the predicates, and optional aggregate/group-by
//! descriptors. Flattening also validates the plan against the table and
//! resolves the column-access set.

use std::collections::BTreeSet;

use crate::aggregate::{AggregateDescriptor, GroupByDescriptor};
use crate::error::Result;
use crate::plan::LogicalPlan;
use crate::predicate::Predicate;
use crate::table::Table;

/// Executable form of an optimized plan
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Conjunctive predicates, ordered most selective first
    pub predicates: Vec<Predicate>,
    /// Combined selectivity estimate of the predicate list
    pub selectivity: f64,
    /// Rows (or matches) to skip
    pub skip: Option<usize>,
    /// Maximum rows (or matches) to emit
    pub take: Option<usize>,
    /// When true, the `(skip, take)` window restricts raw row positions
    /// before predicate evaluation; otherwise it restricts match ranks
    pub pagination_before_predicates: bool,
    /// Single ungrouped aggregate to compute
    pub aggregate: Option<AggregateDescriptor>,
    /// Grouped aggregation to compute
    pub group_by: Option<GroupByDescriptor>,
    /// Output projection, `None` for all columns
    pub projected_columns: Option<Vec<String>>,
    /// Every column index the plan touches, ascending
    pub column_access: Vec<usize>,
}

/// Flatten `plan` against `table`, validating as it goes
pub(crate) fn flatten(plan: &LogicalPlan, table: &Table) -> Result<QueryPlan> {
    // Linearize root..scan; plans are single-input chains
    let mut chain = Vec::new();
    let mut node = Some(plan);
    while let Some(current) = node {
        chain.push(current);
        node = current.input();
    }

    let mut predicates: Vec<Predicate> = Vec::new();
    let mut selectivity: Option<f64> = None;
    let mut aggregate = None;
    let mut group_by = None;
    let mut projected_columns = None;
    let mut scan = None;
    // Pagination ops with their position relative to the filter
    let mut pagination: Vec<(PageOp, bool)> = Vec::new();
    let mut filter_seen = false;

    for (position, node) in chain.iter().enumerate() {
        match node {
            LogicalPlan::Scan(node) => {
                if position != chain.len() - 1 {
                    return unsupported_err!("scan must be the plan leaf");
                }
                scan = Some(node);
            }
            LogicalPlan::Filter(node) => {
                // A pagination op already recorded below an earlier filter
                // means this filter sits under that pagination: a
                // filter/pagination/filter sandwich has no flattened form
                if pagination.iter().any(|(_, below_filter)| *below_filter) {
                    return unsupported_err!(
                        "filters on both sides of a limit/offset are not supported"
                    );
                }
                if !filter_seen {
                    selectivity = node.selectivity;
                }
                filter_seen = true;
                // chain order is top-down; data flows bottom-up, so deeper
                // predicates run first
                let mut combined = node.predicates.clone();
                combined.extend(predicates);
                predicates = combined;
            }
            LogicalPlan::Project(node) => {
                if projected_columns.is_none() {
                    projected_columns = Some(node.columns.clone());
                }
            }
            LogicalPlan::Limit(node) => {
                pagination.push((PageOp::Limit(node.n), filter_seen));
            }
            LogicalPlan::Offset(node) => {
                pagination.push((PageOp::Offset(node.n), filter_seen));
            }
            LogicalPlan::Aggregate(node) => {
                if position != 0 || aggregate.is_some() || group_by.is_some() {
                    return unsupported_err!("aggregate must be the plan root");
                }
                aggregate = Some(node.aggregate.clone());
            }
            LogicalPlan::GroupBy(node) => {
                if position != 0 || aggregate.is_some() || group_by.is_some() {
                    return unsupported_err!("group-by must be the plan root");
                }
                group_by = Some(node.group_by.clone());
            }
        }
    }

    let Some(scan) = scan else {
        return unsupported_err!("plan has no scan leaf");
    };
    if scan.source != table.name() {
        return invalid_argument_err!(
            "plan scans '{}' but was executed against table '{}'",
            scan.source,
            table.name()
        );
    }
    if scan.schema != table.schema() {
        return invalid_argument_err!(
            "plan schema does not match table '{}'",
            table.name()
        );
    }

    // A pagination op below the filter restricts raw rows; above, match
    // ranks. Mixing both sides has no single-window equivalent.
    let below_filter = pagination
        .iter()
        .filter(|(_, below_filter)| *below_filter)
        .count();
    if below_filter > 0 && below_filter < pagination.len() {
        return unsupported_err!(
            "limit/offset on both sides of a filter are not supported"
        );
    }
    let pagination_before_predicates = !filter_seen || below_filter > 0;

    // Fold the window in data-flow order (scan upward)
    let mut lo = 0usize;
    let mut hi: Option<usize> = None;
    for (op, _) in pagination.iter().rev() {
        match op {
            PageOp::Offset(n) => lo = lo.saturating_add(*n),
            PageOp::Limit(n) => {
                let end = lo.saturating_add(*n);
                hi = Some(hi.map_or(end, |hi| hi.min(end)));
            }
        }
    }
    let skip = (lo > 0).then_some(lo);
    let take = hi.map(|hi| hi.saturating_sub(lo));

    for predicate in &predicates {
        predicate.validate(table)?;
    }
    let selectivity = selectivity.unwrap_or_else(|| {
        predicates
            .iter()
            .map(|predicate| predicate.estimated_selectivity(table))
            .product::<f64>()
            .clamp(0.0, 1.0)
    });

    // Column-access set: predicates, aggregates, key, projection
    let mut access = BTreeSet::new();
    let mut referenced = Vec::new();
    for predicate in &predicates {
        predicate.collect_columns(&mut referenced);
    }
    for column in &referenced {
        access.insert(column.index);
    }
    if let Some(aggregate) = &aggregate {
        if let Some(column) = &aggregate.column {
            access.insert(column.index);
        }
    }
    if let Some(group_by) = &group_by {
        access.insert(group_by.key.index);
        for aggregate in &group_by.aggregates {
            if let Some(column) = &aggregate.column {
                access.insert(column.index);
            }
        }
    }
    if let Some(columns) = &projected_columns {
        for name in columns {
            access.insert(table.column_index(name)?);
        }
    } else if aggregate.is_none() && group_by.is_none() {
        // Full-width materialization touches everything
        for index in 0..table.num_columns() {
            access.insert(index);
        }
    }

    Ok(QueryPlan {
        predicates,
        selectivity,
        skip,
        take,
        pagination_before_predicates,
        aggregate,
        group_by,
        projected_columns,
        column_access: access.into_iter().collect(),
    })
}

#[derive(Debug, Clone, Copy)]
enum PageOp {
    Limit(usize),
    Offset(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateDescriptor, AggregateOp};
    use crate::plan::LogicalPlanBuilder;
    use crate::predicate::tests::int32_cmp;
    use crate::predicate::CompareOp;
    use crate::table::tests::test_table;

    #[test]
    fn filter_then_limit_paginates_matches() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 0))
            .offset(1)
            .limit(2)
            .build();
        let query = flatten(&plan, &table).unwrap();
        assert_eq!(query.skip, Some(1));
        assert_eq!(query.take, Some(2));
        assert!(!query.pagination_before_predicates);
        assert_eq!(query.predicates.len(), 1);
    }

    #[test]
    fn limit_then_filter_paginates_rows_first() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table)
            .limit(3)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 0))
            .build();
        let query = flatten(&plan, &table).unwrap();
        assert_eq!(query.take, Some(3));
        assert!(query.pagination_before_predicates);
    }

    #[test]
    fn limit_without_filter_sets_fast_path() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table).limit(2).build();
        let query = flatten(&plan, &table).unwrap();
        assert!(query.pagination_before_predicates);
        assert_eq!(query.take, Some(2));
        assert_eq!(query.skip, None);
    }

    #[test]
    fn offset_then_limit_window() {
        let table = test_table();
        // data order: offset 10 first, then limit 5
        let plan = LogicalPlanBuilder::scan(&table).offset(10).limit(5).build();
        let query = flatten(&plan, &table).unwrap();
        assert_eq!(query.skip, Some(10));
        assert_eq!(query.take, Some(5));
    }

    #[test]
    fn aggregate_must_be_root() {
        let table = test_table();
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Count, None).unwrap();
        let plan = LogicalPlanBuilder::scan(&table)
            .aggregate(descriptor)
            .limit(1)
            .build();
        assert!(flatten(&plan, &table).is_err());
    }

    #[test]
    fn wrong_table_is_rejected() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table).build();
        let other = {
            use arrow::array::Int32Array;
            use arrow::datatypes::{DataType, Field, Schema};
            use arrow::record_batch::RecordBatch;
            use std::sync::Arc;
            let batch = RecordBatch::try_new(
                Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, false)])),
                vec![Arc::new(Int32Array::from(vec![1]))],
            )
            .unwrap();
            Table::try_new("other", batch, 64).unwrap()
        };
        assert!(flatten(&plan, &other).is_err());
    }

    #[test]
    fn column_access_collects_everything() {
        let table = test_table();
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Sum, Some("b")).unwrap();
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 0))
            .aggregate(descriptor)
            .build();
        let query = flatten(&plan, &table).unwrap();
        assert_eq!(query.column_access, vec![0, 1]);
    }
}

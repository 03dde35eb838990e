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

//! Rule-based plan optimizer
//!
//! Rules run to a fixpoint, so the optimizer is idempotent and its result
//! serves as the plan-cache value:
//!
//! 1. filter merge: adjacent filters combine their predicate lists
//! 2. predicate push-down: a filter swaps under a projection, and under a
//!    group-by when every predicate tests the grouping key
//! 3. limit push-down: a limit over an offset pushes an enlarged limit
//!    below it; limits and offsets pass through projections
//! 4. projection pruning: unreferenced projection entries drop and the
//!    accessed column set propagates to the scan
//! 5. predicate reordering and selectivity annotation from the zone maps
//!
//! The filter/pagination swap of the executable form is realized in the
//! flattening bridge, which records whether pagination sits below the
//! filter; swapping it here would erase that ordering.

use std::collections::BTreeSet;

use log::{debug, trace};

use crate::error::Result;
use crate::plan::{Filter, Limit, LogicalPlan, Offset, Project, Scan};
use crate::predicate::reorder_by_selectivity;
use crate::table::Table;

/// Cap on fixpoint iterations; linear plans settle in two or three
const MAX_PASSES: usize = 8;

/// The rule-based optimizer
#[derive(Debug, Default)]
pub struct Optimizer {}

impl Optimizer {
    /// Create a new optimizer
    pub fn new() -> Self {
        Self {}
    }

    /// Optimize `plan` against `table`, consuming the input tree
    pub fn optimize(&self, plan: LogicalPlan, table: &Table) -> Result<LogicalPlan> {
        let mut current = plan;
        for pass in 0..MAX_PASSES {
            let next = self.single_pass(current.clone(), table)?;
            if next == current {
                trace!("optimizer reached fixpoint after {pass} passes");
                break;
            }
            current = next;
        }
        debug!("optimized plan:\n{current}");
        Ok(current)
    }

    fn single_pass(&self, plan: LogicalPlan, table: &Table) -> Result<LogicalPlan> {
        let plan = merge_filters(plan);
        let plan = push_down_filters(plan);
        let plan = push_down_limits(plan);
        let plan = prune_projection(plan, BTreeSet::new());
        annotate_filters(plan, table)
    }
}

/// Rule 1: adjacent filters merge; combined selectivity is recomputed by the
/// annotation rule under the independence assumption
fn merge_filters(plan: LogicalPlan) -> LogicalPlan {
    map_input(plan, merge_filters, |plan| match plan {
        LogicalPlan::Filter(Filter {
            input,
            predicates,
            ..
        }) => match *input {
            LogicalPlan::Filter(inner) => {
                let mut combined = inner.predicates;
                combined.extend(predicates);
                LogicalPlan::Filter(Filter {
                    input: inner.input,
                    predicates: combined,
                    selectivity: None,
                })
            }
            other => LogicalPlan::Filter(Filter {
                input: Box::new(other),
                predicates,
                selectivity: None,
            }),
        },
        other => other,
    })
}

/// Rule 2: swap a filter under a projection; push under a group-by when
/// every predicate tests the grouping key column
fn push_down_filters(plan: LogicalPlan) -> LogicalPlan {
    map_input(plan, push_down_filters, |plan| match plan {
        LogicalPlan::Filter(Filter {
            input,
            predicates,
            selectivity,
        }) => match *input {
            LogicalPlan::Project(project) => LogicalPlan::Project(Project {
                input: Box::new(push_down_filters(LogicalPlan::Filter(Filter {
                    input: project.input,
                    predicates,
                    selectivity,
                }))),
                columns: project.columns,
            }),
            LogicalPlan::GroupBy(group_by) if predicates_only_touch(&predicates, &group_by.group_by.key.name) => {
                LogicalPlan::GroupBy(crate::plan::GroupBy {
                    input: Box::new(push_down_filters(LogicalPlan::Filter(Filter {
                        input: group_by.input,
                        predicates,
                        selectivity,
                    }))),
                    group_by: group_by.group_by,
                })
            }
            other => LogicalPlan::Filter(Filter {
                input: Box::new(other),
                predicates,
                selectivity,
            }),
        },
        other => other,
    })
}

fn predicates_only_touch(predicates: &[crate::predicate::Predicate], key: &str) -> bool {
    let mut columns = Vec::new();
    for predicate in predicates {
        predicate.collect_columns(&mut columns);
    }
    columns.iter().all(|column| column.name.as_ref() == key)
}

/// Rule 3: `Limit n` over `Offset m` becomes `Offset m` over
/// `Limit (n + m)`; nested limits keep the smaller; limits and offsets slide
/// under projections (a projection never changes the row count)
fn push_down_limits(plan: LogicalPlan) -> LogicalPlan {
    map_input(plan, push_down_limits, |plan| match plan {
        LogicalPlan::Limit(Limit { input, n }) => match *input {
            LogicalPlan::Offset(offset) => LogicalPlan::Offset(Offset {
                input: Box::new(push_down_limits(LogicalPlan::Limit(Limit {
                    input: offset.input,
                    n: n.saturating_add(offset.n),
                }))),
                n: offset.n,
            }),
            LogicalPlan::Limit(inner) => LogicalPlan::Limit(Limit {
                input: inner.input,
                n: n.min(inner.n),
            }),
            LogicalPlan::Project(project) => LogicalPlan::Project(Project {
                input: Box::new(push_down_limits(LogicalPlan::Limit(Limit {
                    input: project.input,
                    n,
                }))),
                columns: project.columns,
            }),
            other => LogicalPlan::Limit(Limit {
                input: Box::new(other),
                n,
            }),
        },
        LogicalPlan::Offset(Offset { input, n }) => match *input {
            LogicalPlan::Project(project) => LogicalPlan::Project(Project {
                input: Box::new(push_down_limits(LogicalPlan::Offset(Offset {
                    input: project.input,
                    n,
                }))),
                columns: project.columns,
            }),
            other => LogicalPlan::Offset(Offset {
                input: Box::new(other),
                n,
            }),
        },
        other => other,
    })
}

/// Rule 4: walk top-down accumulating every referenced column; restrict
/// projection lists to what parents reference and report the final set on
/// the scan
fn prune_projection(plan: LogicalPlan, mut needed: BTreeSet<String>) -> LogicalPlan {
    match plan {
        LogicalPlan::Scan(scan) => LogicalPlan::Scan(Scan {
            projected_columns: if needed.is_empty() {
                None
            } else {
                Some(needed.into_iter().collect())
            },
            ..scan
        }),
        LogicalPlan::Filter(filter) => {
            let mut columns = Vec::new();
            for predicate in &filter.predicates {
                predicate.collect_columns(&mut columns);
            }
            needed.extend(columns.into_iter().map(|column| column.name.to_string()));
            LogicalPlan::Filter(Filter {
                input: Box::new(prune_projection(*filter.input, needed)),
                predicates: filter.predicates,
                selectivity: filter.selectivity,
            })
        }
        LogicalPlan::Project(project) => {
            // The root projection defines the output; deeper ones keep only
            // what parents still reference
            let columns: Vec<String> = if needed.is_empty() {
                project.columns
            } else {
                project
                    .columns
                    .into_iter()
                    .filter(|column| needed.contains(column))
                    .collect()
            };
            needed.extend(columns.iter().cloned());
            LogicalPlan::Project(Project {
                input: Box::new(prune_projection(*project.input, needed)),
                columns,
            })
        }
        LogicalPlan::Limit(limit) => LogicalPlan::Limit(Limit {
            input: Box::new(prune_projection(*limit.input, needed)),
            n: limit.n,
        }),
        LogicalPlan::Offset(offset) => LogicalPlan::Offset(Offset {
            input: Box::new(prune_projection(*offset.input, needed)),
            n: offset.n,
        }),
        LogicalPlan::Aggregate(aggregate) => {
            if let Some(column) = &aggregate.aggregate.column {
                needed.insert(column.name.to_string());
            }
            LogicalPlan::Aggregate(crate::plan::Aggregate {
                input: Box::new(prune_projection(*aggregate.input, needed)),
                aggregate: aggregate.aggregate,
            })
        }
        LogicalPlan::GroupBy(group_by) => {
            needed.insert(group_by.group_by.key.name.to_string());
            for aggregate in &group_by.group_by.aggregates {
                if let Some(column) = &aggregate.column {
                    needed.insert(column.name.to_string());
                }
            }
            LogicalPlan::GroupBy(crate::plan::GroupBy {
                input: Box::new(prune_projection(*group_by.input, needed)),
                group_by: group_by.group_by,
            })
        }
    }
}

/// Rule 5: order predicates by estimated selectivity and attach the
/// combined estimate (product, assuming independence)
fn annotate_filters(plan: LogicalPlan, table: &Table) -> Result<LogicalPlan> {
    Ok(match plan {
        LogicalPlan::Filter(filter) => {
            let mut predicates = filter.predicates;
            reorder_by_selectivity(&mut predicates, table);
            let selectivity = predicates
                .iter()
                .map(|predicate| predicate.estimated_selectivity(table))
                .product::<f64>()
                .clamp(0.0, 1.0);
            LogicalPlan::Filter(Filter {
                input: Box::new(annotate_filters(*filter.input, table)?),
                predicates,
                selectivity: Some(selectivity),
            })
        }
        other => map_input_result(other, |input| annotate_filters(input, table))?,
    })
}

/// Rebuild `plan` with `recurse` applied to its input, then apply `rewrite`
/// to the node itself
fn map_input(
    plan: LogicalPlan,
    recurse: impl Fn(LogicalPlan) -> LogicalPlan,
    rewrite: impl FnOnce(LogicalPlan) -> LogicalPlan,
) -> LogicalPlan {
    let plan = match plan {
        LogicalPlan::Scan(scan) => LogicalPlan::Scan(scan),
        LogicalPlan::Filter(node) => LogicalPlan::Filter(Filter {
            input: Box::new(recurse(*node.input)),
            predicates: node.predicates,
            selectivity: node.selectivity,
        }),
        LogicalPlan::Project(node) => LogicalPlan::Project(Project {
            input: Box::new(recurse(*node.input)),
            columns: node.columns,
        }),
        LogicalPlan::Limit(node) => LogicalPlan::Limit(Limit {
            input: Box::new(recurse(*node.input)),
            n: node.n,
        }),
        LogicalPlan::Offset(node) => LogicalPlan::Offset(Offset {
            input: Box::new(recurse(*node.input)),
            n: node.n,
        }),
        LogicalPlan::Aggregate(node) => LogicalPlan::Aggregate(crate::plan::Aggregate {
            input: Box::new(recurse(*node.input)),
            aggregate: node.aggregate,
        }),
        LogicalPlan::GroupBy(node) => LogicalPlan::GroupBy(crate::plan::GroupBy {
            input: Box::new(recurse(*node.input)),
            group_by: node.group_by,
        }),
    };
    rewrite(plan)
}

fn map_input_result(
    plan: LogicalPlan,
    recurse: impl Fn(LogicalPlan) -> Result<LogicalPlan>,
) -> Result<LogicalPlan> {
    Ok(match plan {
        LogicalPlan::Scan(scan) => LogicalPlan::Scan(scan),
        LogicalPlan::Filter(node) => LogicalPlan::Filter(Filter {
            input: Box::new(recurse(*node.input)?),
            predicates: node.predicates,
            selectivity: node.selectivity,
        }),
        LogicalPlan::Project(node) => LogicalPlan::Project(Project {
            input: Box::new(recurse(*node.input)?),
            columns: node.columns,
        }),
        LogicalPlan::Limit(node) => LogicalPlan::Limit(Limit {
            input: Box::new(recurse(*node.input)?),
            n: node.n,
        }),
        LogicalPlan::Offset(node) => LogicalPlan::Offset(Offset {
            input: Box::new(recurse(*node.input)?),
            n: node.n,
        }),
        LogicalPlan::Aggregate(node) => LogicalPlan::Aggregate(crate::plan::Aggregate {
            input: Box::new(recurse(*node.input)?),
            aggregate: node.aggregate,
        }),
        LogicalPlan::GroupBy(node) => LogicalPlan::GroupBy(crate::plan::GroupBy {
            input: Box::new(recurse(*node.input)?),
            group_by: node.group_by,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateDescriptor, AggregateOp};
    use crate::plan::LogicalPlanBuilder;
    use crate::predicate::tests::int32_cmp;
    use crate::predicate::CompareOp;
    use crate::table::tests::test_table;

    fn assert_optimized(plan: LogicalPlan, table: &Table, expected: &str) {
        let optimized = Optimizer::new().optimize(plan, table).unwrap();
        assert_eq!(format!("{optimized}"), expected);
    }

    #[test]
    fn merges_adjacent_filters() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 1))
            .filter(int32_cmp(&table, "a", CompareOp::Lt, 4))
            .build();
        let optimized = Optimizer::new().optimize(plan, &table).unwrap();
        match optimized {
            LogicalPlan::Filter(filter) => {
                assert_eq!(filter.predicates.len(), 2);
                assert!(matches!(*filter.input, LogicalPlan::Scan(_)));
            }
            other => panic!("expected merged filter, got {other}"),
        }
    }

    #[test]
    fn pushes_filter_below_projection() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table)
            .project(["a", "b"])
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 1))
            .build();
        // a spans [1, 4]; rows above 1 cover the whole range estimate
        let expected = "Projection: a, b\
            \n  Filter: #a > Int32(1), selectivity=1.0000\
            \n    Scan: test projection=[a, b] rows=4 \
            schema=[a:Int32, b:Float64, c:Utf8, d:Boolean]";
        assert_optimized(plan, &table, expected);
    }

    #[test]
    fn limit_over_offset_enlarges_and_swaps() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table)
            .offset(10)
            .limit(100)
            .build();
        let expected = "Offset: 10\
            \n  Limit: 110\
            \n    Scan: test projection=None rows=4 \
            schema=[a:Int32, b:Float64, c:Utf8, d:Boolean]";
        assert_optimized(plan, &table, expected);
    }

    #[test]
    fn nested_limits_keep_smaller() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table).limit(1000).limit(10).build();
        let expected = "Limit: 10\
            \n  Scan: test projection=None rows=4 \
            schema=[a:Int32, b:Float64, c:Utf8, d:Boolean]";
        assert_optimized(plan, &table, expected);
    }

    #[test]
    fn prunes_to_referenced_columns() {
        let table = test_table();
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Sum, Some("a")).unwrap();
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 1))
            .aggregate(descriptor)
            .build();
        let optimized = Optimizer::new().optimize(plan, &table).unwrap();
        let rendered = format!("{optimized}");
        assert!(rendered.contains("projection=[a]"), "got: {rendered}");
    }

    #[test]
    fn reorders_predicates_by_selectivity() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table)
            // wide range first, equality second
            .filter_all(vec![
                int32_cmp(&table, "a", CompareOp::GtEq, 1),
                int32_cmp(&table, "a", CompareOp::Eq, 3),
            ])
            .build();
        let optimized = Optimizer::new().optimize(plan, &table).unwrap();
        match &optimized {
            LogicalPlan::Filter(filter) => {
                // equality (0.1) now leads
                assert!(matches!(
                    filter.predicates[0],
                    crate::predicate::Predicate::Int32Cmp {
                        op: CompareOp::Eq,
                        ..
                    }
                ));
            }
            other => panic!("expected filter, got {other}"),
        }
    }

    #[test]
    fn optimizer_is_idempotent() {
        let table = test_table();
        let plan = LogicalPlanBuilder::scan(&table)
            .project(["a", "b"])
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 1))
            .filter(int32_cmp(&table, "a", CompareOp::Lt, 4))
            .offset(1)
            .limit(2)
            .build();
        let optimizer = Optimizer::new();
        let once = optimizer.optimize(plan, &table).unwrap();
        let twice = optimizer.optimize(once.clone(), &table).unwrap();
        assert_eq!(once, twice);
    }
}

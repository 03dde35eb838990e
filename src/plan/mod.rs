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

//! The logical query plan
//!
//! A plan is an owned tree with exactly one [`Scan`] leaf. The optimizer
//! consumes a tree and returns a new one. The indented [`Display`] rendering
//! is deterministic and doubles as the plan's structural key.

pub mod optimizer;
pub mod query;

use std::fmt::{Display, Formatter};

use arrow::datatypes::SchemaRef;

use crate::aggregate::{AggregateDescriptor, GroupByDescriptor};
use crate::predicate::Predicate;
use crate::table::Table;

/// A node of the logical plan tree
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Leaf: the wrapped record batch
    Scan(Scan),
    /// Row filter over the input
    Filter(Filter),
    /// Column projection over the input
    Project(Project),
    /// Keep the first `n` rows of the input
    Limit(Limit),
    /// Drop the first `n` rows of the input
    Offset(Offset),
    /// Single ungrouped aggregate over the input
    Aggregate(Aggregate),
    /// Grouped aggregates over the input
    GroupBy(GroupBy),
}

/// The single source leaf
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    /// Source table name
    pub source: String,
    /// Source schema; contributes shape (not data) to the structural key
    pub schema: SchemaRef,
    /// Source row count
    pub row_count: usize,
    /// Columns the plan actually touches, filled by projection pruning
    pub projected_columns: Option<Vec<String>>,
}

/// Filter node: the predicate list combines AND-wise
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Input plan
    pub input: Box<LogicalPlan>,
    /// Conjunctive predicate list
    pub predicates: Vec<Predicate>,
    /// Combined selectivity estimate, attached by the optimizer
    pub selectivity: Option<f64>,
}

/// Projection node
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Input plan
    pub input: Box<LogicalPlan>,
    /// Output column names
    pub columns: Vec<String>,
}

/// Limit node
#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    /// Input plan
    pub input: Box<LogicalPlan>,
    /// Maximum number of rows to emit
    pub n: usize,
}

/// Offset node
#[derive(Debug, Clone, PartialEq)]
pub struct Offset {
    /// Input plan
    pub input: Box<LogicalPlan>,
    /// Number of rows to drop
    pub n: usize,
}

/// Ungrouped aggregate node
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Input plan
    pub input: Box<LogicalPlan>,
    /// The aggregate to compute
    pub aggregate: AggregateDescriptor,
}

/// Grouped aggregate node
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    /// Input plan
    pub input: Box<LogicalPlan>,
    /// Key and aggregate descriptors
    pub group_by: GroupByDescriptor,
}

impl LogicalPlan {
    /// The node's input, `None` for the scan leaf
    pub fn input(&self) -> Option<&LogicalPlan> {
        match self {
            LogicalPlan::Scan(_) => None,
            LogicalPlan::Filter(node) => Some(&node.input),
            LogicalPlan::Project(node) => Some(&node.input),
            LogicalPlan::Limit(node) => Some(&node.input),
            LogicalPlan::Offset(node) => Some(&node.input),
            LogicalPlan::Aggregate(node) => Some(&node.input),
            LogicalPlan::GroupBy(node) => Some(&node.input),
        }
    }

    /// Render with two-space indentation per level
    pub fn display_indent(&self) -> impl Display + '_ {
        struct Wrapper<'a>(&'a LogicalPlan);
        impl Display for Wrapper<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                let mut node = Some(self.0);
                let mut depth = 0usize;
                while let Some(current) = node {
                    if depth > 0 {
                        writeln!(f)?;
                        write!(f, "{:indent$}", "", indent = depth * 2)?;
                    }
                    current.fmt_node(f)?;
                    node = current.input();
                    depth += 1;
                }
                Ok(())
            }
        }
        Wrapper(self)
    }

    fn fmt_node(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalPlan::Scan(scan) => {
                write!(f, "Scan: {}", scan.source)?;
                match &scan.projected_columns {
                    Some(columns) => write!(f, " projection=[{}]", columns.join(", "))?,
                    None => write!(f, " projection=None")?,
                }
                write!(f, " rows={}", scan.row_count)?;
                // Schema shape participates in the structural key
                write!(f, " schema=[")?;
                for (i, field) in scan.schema.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:{}", field.name(), field.data_type())?;
                }
                write!(f, "]")
            }
            LogicalPlan::Filter(filter) => {
                write!(f, "Filter: ")?;
                for (i, predicate) in filter.predicates.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{predicate}")?;
                }
                if let Some(selectivity) = filter.selectivity {
                    write!(f, ", selectivity={selectivity:.4}")?;
                }
                Ok(())
            }
            LogicalPlan::Project(project) => {
                write!(f, "Projection: {}", project.columns.join(", "))
            }
            LogicalPlan::Limit(limit) => write!(f, "Limit: {}", limit.n),
            LogicalPlan::Offset(offset) => write!(f, "Offset: {}", offset.n),
            LogicalPlan::Aggregate(aggregate) => {
                write!(f, "Aggregate: {}", aggregate.aggregate)
            }
            LogicalPlan::GroupBy(group_by) => {
                write!(f, "GroupBy: {}", group_by.group_by)
            }
        }
    }
}

impl Display for LogicalPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_indent())
    }
}

/// Builder for [`LogicalPlan`] trees, mirroring query construction order:
/// each call wraps the current plan in a new parent node.
#[derive(Debug, Clone)]
pub struct LogicalPlanBuilder {
    plan: LogicalPlan,
}

impl LogicalPlanBuilder {
    /// Start from a scan of `table`
    pub fn scan(table: &Table) -> Self {
        Self {
            plan: LogicalPlan::Scan(Scan {
                source: table.name().to_string(),
                schema: table.schema(),
                row_count: table.num_rows(),
                projected_columns: None,
            }),
        }
    }

    /// Add a filter with a single predicate
    pub fn filter(self, predicate: Predicate) -> Self {
        self.filter_all(vec![predicate])
    }

    /// Add a filter with a conjunctive predicate list
    pub fn filter_all(self, predicates: Vec<Predicate>) -> Self {
        Self {
            plan: LogicalPlan::Filter(Filter {
                input: Box::new(self.plan),
                predicates,
                selectivity: None,
            }),
        }
    }

    /// Project to the named columns
    pub fn project<I, S>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plan: LogicalPlan::Project(Project {
                input: Box::new(self.plan),
                columns: columns.into_iter().map(Into::into).collect(),
            }),
        }
    }

    /// Keep the first `n` rows
    pub fn limit(self, n: usize) -> Self {
        Self {
            plan: LogicalPlan::Limit(Limit {
                input: Box::new(self.plan),
                n,
            }),
        }
    }

    /// Drop the first `n` rows
    pub fn offset(self, n: usize) -> Self {
        Self {
            plan: LogicalPlan::Offset(Offset {
                input: Box::new(self.plan),
                n,
            }),
        }
    }

    /// Compute a single ungrouped aggregate
    pub fn aggregate(self, aggregate: AggregateDescriptor) -> Self {
        Self {
            plan: LogicalPlan::Aggregate(Aggregate {
                input: Box::new(self.plan),
                aggregate,
            }),
        }
    }

    /// Compute grouped aggregates
    pub fn group_by(self, group_by: GroupByDescriptor) -> Self {
        Self {
            plan: LogicalPlan::GroupBy(GroupBy {
                input: Box::new(self.plan),
                group_by,
            }),
        }
    }

    /// Finish and return the plan
    pub fn build(self) -> LogicalPlan {
        self.plan
    }
}

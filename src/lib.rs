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

#![warn(missing_docs)]
// Clippy lints the codebase holds itself to
#![warn(clippy::needless_pass_by_value)]

//! Permafrost is an embedded analytics query engine over a single immutable
//! Apache Arrow [`RecordBatch`](arrow::record_batch::RecordBatch).
//!
//! A query arrives as a [`LogicalPlan`](plan::LogicalPlan) (or a small SQL
//! subset), is optimized by rewrite rules, cached by structure, and executed
//! against the columnar buffers: predicates evaluate vectorized into a
//! [`SelectionBitmap`](bitmap::SelectionBitmap) with zone-map chunk
//! skipping, aggregates reduce either fused with the filter in a single
//! pass or over the selection, and materialization produces typed rows or a
//! new record batch.
//!
//! ```
//! use std::sync::Arc;
//! use arrow::array::Int32Array;
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use permafrost::exec::{Engine, QueryOutput};
//!
//! # fn main() -> permafrost::error::Result<()> {
//! let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
//! let batch = RecordBatch::try_new(
//!     schema,
//!     vec![Arc::new(Int32Array::from_iter_values(0..100))],
//! )?;
//!
//! let engine = Engine::new()?;
//! let table = engine.wrap("t", batch)?;
//! match engine.sql(&table, "SELECT COUNT(*) FROM t WHERE a >= 90")? {
//!     QueryOutput::Scalar(count) => assert_eq!(count.to_string(), "10"),
//!     _ => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod error;

pub mod aggregate;
pub mod bitmap;
pub mod cache;
pub mod config;
pub mod exec;
pub mod plan;
pub mod predicate;
pub mod scalar;
pub mod table;
pub mod zone;

mod collect;
mod sql;

pub use config::EngineOptions;
pub use error::{Error, Result};
pub use exec::{Engine, QueryOutput};
pub use scalar::ScalarValue;
pub use table::Table;

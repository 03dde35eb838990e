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

//! Shared builders for the integration tests

// Each test binary uses a subset of these helpers
#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use permafrost::{Engine, EngineOptions, Table};

/// Engine + table wrapped with matching chunk geometry
pub fn engine_with(options: EngineOptions) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    Engine::with_options(options).unwrap()
}

pub fn sequential_engine() -> Engine {
    engine_with(EngineOptions::new().with_parallel_execution(false))
}

pub fn parallel_engine() -> Engine {
    engine_with(EngineOptions::new().with_parallel_threshold(1_000))
}

/// `ColA: i32 = row index` over `n` rows
pub fn ramp_batch(n: i32) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("ColA", DataType::Int32, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from_iter_values(0..n))])
        .unwrap()
}

/// `ColA: i32 = row`, `ColB: f64 = row * 0.5`, `ColC: utf8 = cyclic names`
pub fn wide_batch(n: usize) -> RecordBatch {
    const NAMES: [&str; 5] = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let schema = Arc::new(Schema::new(vec![
        Field::new("ColA", DataType::Int32, false),
        Field::new("ColB", DataType::Float64, false),
        Field::new("ColC", DataType::Utf8, false),
    ]));
    let cola: ArrayRef = Arc::new(Int32Array::from_iter_values(0..n as i32));
    let colb: ArrayRef =
        Arc::new(Float64Array::from_iter_values((0..n).map(|i| i as f64 * 0.5)));
    let colc: ArrayRef =
        Arc::new(StringArray::from_iter_values((0..n).map(|i| NAMES[i % 5])));
    RecordBatch::try_new(schema, vec![cola, colb, colc]).unwrap()
}

pub fn wrap(engine: &Engine, name: &str, batch: RecordBatch) -> Table {
    engine.wrap(name, batch).unwrap()
}

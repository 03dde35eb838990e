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

//! A tagged runtime value: aggregate results and group-by keys

use std::fmt::{Display, Formatter};

use arrow::datatypes::{DataType, TimeUnit};

/// A single dynamically typed value, as produced by aggregate operations
/// and group-by key extraction.
///
/// The inner `Option` is `None` for a null of that type.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// Untyped null
    Null,
    /// Boolean value
    Boolean(Option<bool>),
    /// 32-bit signed integer
    Int32(Option<i32>),
    /// 64-bit signed integer
    Int64(Option<i64>),
    /// 32-bit float
    Float32(Option<f32>),
    /// 64-bit float
    Float64(Option<f64>),
    /// 128-bit decimal with precision and scale
    Decimal128(Option<i128>, u8, i8),
    /// UTF-8 string
    Utf8(Option<String>),
    /// Days since the epoch
    Date32(Option<i32>),
    /// Milliseconds since the epoch
    Date64(Option<i64>),
    /// Timestamp in the given unit
    Timestamp(Option<i64>, TimeUnit),
}

impl ScalarValue {
    /// The logical type this value carries
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float32(_) => DataType::Float32,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Decimal128(_, precision, scale) => {
                DataType::Decimal128(*precision, *scale)
            }
            ScalarValue::Utf8(_) => DataType::Utf8,
            ScalarValue::Date32(_) => DataType::Date32,
            ScalarValue::Date64(_) => DataType::Date64,
            ScalarValue::Timestamp(_, unit) => {
                DataType::Timestamp(unit.clone(), None)
            }
        }
    }

    /// Whether this value is null
    pub fn is_null(&self) -> bool {
        match self {
            ScalarValue::Null => true,
            ScalarValue::Boolean(v) => v.is_none(),
            ScalarValue::Int32(v) => v.is_none(),
            ScalarValue::Int64(v) => v.is_none(),
            ScalarValue::Float32(v) => v.is_none(),
            ScalarValue::Float64(v) => v.is_none(),
            ScalarValue::Decimal128(v, _, _) => v.is_none(),
            ScalarValue::Utf8(v) => v.is_none(),
            ScalarValue::Date32(v) => v.is_none(),
            ScalarValue::Date64(v) => v.is_none(),
            ScalarValue::Timestamp(v, _) => v.is_none(),
        }
    }

    /// Extract as i64, converting integer-backed types
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int32(v) => v.map(i64::from),
            ScalarValue::Int64(v) => *v,
            ScalarValue::Date32(v) => v.map(i64::from),
            ScalarValue::Date64(v) => *v,
            ScalarValue::Timestamp(v, _) => *v,
            _ => None,
        }
    }

    /// Extract as f64, converting numeric types
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int32(v) => v.map(f64::from),
            ScalarValue::Int64(v) => v.map(|v| v as f64),
            ScalarValue::Float32(v) => v.map(f64::from),
            ScalarValue::Float64(v) => *v,
            ScalarValue::Decimal128(v, _, scale) => {
                v.map(|v| v as f64 / 10f64.powi(i32::from(*scale)))
            }
            _ => None,
        }
    }
}

macro_rules! format_option {
    ($F:expr, $EXPR:expr) => {
        match $EXPR {
            Some(e) => write!($F, "{e}"),
            None => write!($F, "NULL"),
        }
    };
}

impl Display for ScalarValue {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(v) => format_option!(f, v),
            ScalarValue::Int32(v) => format_option!(f, v),
            ScalarValue::Int64(v) => format_option!(f, v),
            ScalarValue::Float32(v) => format_option!(f, v),
            ScalarValue::Float64(v) => format_option!(f, v),
            ScalarValue::Decimal128(v, _, scale) => match v {
                Some(v) => write!(f, "{}e-{}", v, scale),
                None => write!(f, "NULL"),
            },
            ScalarValue::Utf8(v) => format_option!(f, v),
            ScalarValue::Date32(v) => format_option!(f, v),
            ScalarValue::Date64(v) => format_option!(f, v),
            ScalarValue::Timestamp(v, _) => format_option!(f, v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_round_trip() {
        assert_eq!(ScalarValue::Int32(Some(3)).data_type(), DataType::Int32);
        assert_eq!(
            ScalarValue::Decimal128(Some(1234), 10, 2).data_type(),
            DataType::Decimal128(10, 2)
        );
    }

    #[test]
    fn null_detection() {
        assert!(ScalarValue::Int64(None).is_null());
        assert!(!ScalarValue::Int64(Some(0)).is_null());
        assert!(ScalarValue::Null.is_null());
    }

    #[test]
    fn numeric_extraction() {
        assert_eq!(ScalarValue::Int32(Some(7)).as_i64(), Some(7));
        assert_eq!(ScalarValue::Float64(Some(0.5)).as_f64(), Some(0.5));
        // 1234 at scale 2 is 12.34
        assert_eq!(
            ScalarValue::Decimal128(Some(1234), 10, 2).as_f64(),
            Some(12.34)
        );
        assert_eq!(ScalarValue::Utf8(Some("x".to_string())).as_f64(), None);
    }
}

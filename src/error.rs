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

//! Error types for the Permafrost query engine

use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

use arrow::error::ArrowError;

/// Result type for operations that could result in an [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Permafrost error
#[derive(Debug)]
pub enum Error {
    /// Error returned by the Arrow crate
    ArrowError(ArrowError),
    /// A caller supplied an invalid argument, such as mismatched bitmap
    /// lengths, an unknown column name, or an operator/type combination the
    /// engine does not accept
    InvalidArgument(String),
    /// The query contains a pattern the engine does not recognize
    Unsupported(String),
    /// Min/Max/Avg/First over an empty selection
    EmptySequence(&'static str),
    /// An integer aggregate overflowed its declared output type
    Overflow(String),
    /// Zone map chunk geometry does not match the evaluator chunk geometry
    RowCountMismatch {
        /// Chunk size the table's zone maps were built with
        expected: usize,
        /// Chunk size the evaluator was configured with
        actual: usize,
    },
    /// Failure inside the fused filter+aggregate path. Caught by the
    /// executor to trigger a single bitmap-path retry and only surfaced if
    /// the retry also fails.
    InternalFused(String),
    /// An internal invariant was broken, indicating a bug
    Internal(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Error::ArrowError(e) => write!(f, "Arrow error: {e}"),
            Error::InvalidArgument(desc) => write!(f, "Invalid argument: {desc}"),
            Error::Unsupported(desc) => write!(f, "Unsupported: {desc}"),
            Error::EmptySequence(op) => {
                write!(f, "Empty sequence: {op} requires at least one matching row")
            }
            Error::Overflow(desc) => write!(f, "Overflow: {desc}"),
            Error::RowCountMismatch { expected, actual } => write!(
                f,
                "Row count mismatch: zone maps were built with chunk size {expected} \
                 but the evaluator is configured with chunk size {actual}"
            ),
            Error::InternalFused(desc) => {
                write!(f, "Internal error in fused execution: {desc}")
            }
            Error::Internal(desc) => {
                write!(
                    f,
                    "Internal error: {desc}. This was likely caused by a bug in \
                     Permafrost's code and we would welcome that you file a bug report"
                )
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::ArrowError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArrowError> for Error {
    fn from(e: ArrowError) -> Self {
        Error::ArrowError(e)
    }
}

/// Returns an `Err` wrapping [`Error::Internal`] with a formatted message
#[macro_export]
macro_rules! internal_err {
    ($($args:expr),*) => {
        Err($crate::error::Error::Internal(format!($($args),*)))
    };
}

/// Returns an `Err` wrapping [`Error::InvalidArgument`]
#[macro_export]
macro_rules! invalid_argument_err {
    ($($args:expr),*) => {
        Err($crate::error::Error::InvalidArgument(format!($($args),*)))
    };
}

/// Returns an `Err` wrapping [`Error::Unsupported`]
#[macro_export]
macro_rules! unsupported_err {
    ($($args:expr),*) => {
        Err($crate::error::Error::Unsupported(format!($($args),*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = Error::InvalidArgument("bitmap lengths differ: 64 vs 128".to_string());
        assert_eq!(
            e.to_string(),
            "Invalid argument: bitmap lengths differ: 64 vs 128"
        );

        let e = Error::EmptySequence("MIN");
        assert_eq!(
            e.to_string(),
            "Empty sequence: MIN requires at least one matching row"
        );

        let e = Error::RowCountMismatch {
            expected: 16384,
            actual: 8192,
        };
        assert!(e.to_string().contains("16384"));
        assert!(e.to_string().contains("8192"));
    }

    #[test]
    fn error_macros() {
        fn fail() -> Result<()> {
            internal_err!("partial array had {} slots", 3)
        }
        let err = fail().unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(err.to_string().contains("partial array had 3 slots"));
    }
}

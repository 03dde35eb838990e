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

//! Minimal SQL ingress
//!
//! A regex-recognized subset:
//! `SELECT <projection|*|aggregates> FROM <name> [WHERE <expr>]
//! [GROUP BY <col>] [LIMIT n] [OFFSET m]`. The `WHERE` expression supports
//! `AND`/`OR`/`NOT`, parentheses, the comparison operators, `LIKE` and
//! `IS [NOT] NULL`. The parser emits the same logical plan an expression
//! translator would.

use lazy_static::lazy_static;
use regex::Regex;

use crate::aggregate::{AggregateDescriptor, AggregateOp, GroupByDescriptor};
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::plan::{LogicalPlan, LogicalPlanBuilder};
use crate::predicate::{CompareOp, Predicate, StrOp, StringComparison};
use crate::table::{ColumnData, Table};

lazy_static! {
    static ref SELECT_RE: Regex = Regex::new(
        r"(?is)^\s*select\s+(?P<projection>.+?)\s+from\s+(?P<table>[A-Za-z_][A-Za-z0-9_]*)(?:\s+where\s+(?P<where>.+?))?(?:\s+group\s+by\s+(?P<group>[A-Za-z_][A-Za-z0-9_]*))?(?:\s+limit\s+(?P<limit>\d+))?(?:\s+offset\s+(?P<offset>\d+))?\s*;?\s*$"
    )
    .expect("select recognizer");
    // Permissive variant: OFFSET written before LIMIT
    static ref SELECT_SWAPPED_RE: Regex = Regex::new(
        r"(?is)^\s*select\s+(?P<projection>.+?)\s+from\s+(?P<table>[A-Za-z_][A-Za-z0-9_]*)(?:\s+where\s+(?P<where>.+?))?(?:\s+group\s+by\s+(?P<group>[A-Za-z_][A-Za-z0-9_]*))?\s+offset\s+(?P<offset>\d+)\s+limit\s+(?P<limit>\d+)\s*;?\s*$"
    )
    .expect("swapped pagination recognizer");
    static ref AGGREGATE_RE: Regex = Regex::new(
        r"(?i)^(?P<op>count|sum|avg|min|max)\s*\(\s*(?P<arg>\*|[A-Za-z_][A-Za-z0-9_]*)\s*\)$"
    )
    .expect("aggregate recognizer");
    static ref TOKEN_RE: Regex = Regex::new(
        r"(?i)^\s*(?:(?P<lparen>\()|(?P<rparen>\))|(?P<and>and\b)|(?P<or>or\b)|(?P<not>not\b)|(?P<is>is\b)|(?P<null>null\b)|(?P<like>like\b)|(?P<op><=|>=|<>|!=|=|<|>)|(?P<str>'(?:[^']|'')*')|(?P<num>-?[0-9]+(?:\.[0-9]+)?)|(?P<bool>true\b|false\b)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*))"
    )
    .expect("where tokenizer");
}

/// Parse `sql` into a logical plan over `table`
pub(crate) fn parse(sql: &str, table: &Table, options: &EngineOptions) -> Result<LogicalPlan> {
    let captures = SELECT_RE
        .captures(sql)
        .or_else(|| {
            if options.strict_mode {
                None
            } else {
                SELECT_SWAPPED_RE.captures(sql)
            }
        })
        .ok_or_else(|| {
            Error::Unsupported(format!("statement is not a recognized SELECT: {sql}"))
        })?;

    let source = captures.name("table").expect("table group").as_str();
    if source != table.name() {
        return invalid_argument_err!(
            "query reads '{source}' but was planned against table '{}'",
            table.name()
        );
    }

    // Pagination under a grouping would window the input rows, not the
    // output groups; the dialect does not give that a meaning
    if captures.name("group").is_some()
        && (captures.name("limit").is_some() || captures.name("offset").is_some())
    {
        return unsupported_err!("LIMIT/OFFSET cannot be combined with GROUP BY");
    }

    let mut builder = LogicalPlanBuilder::scan(table);

    if let Some(where_clause) = captures.name("where") {
        let predicate = parse_where(where_clause.as_str(), table)?;
        builder = builder.filter_all(split_conjunction(predicate));
    }

    // SQL applies OFFSET before LIMIT regardless of clause order
    if let Some(offset) = captures.name("offset") {
        let n = parse_count(offset.as_str())?;
        builder = builder.offset(n);
    }
    if let Some(limit) = captures.name("limit") {
        let n = parse_count(limit.as_str())?;
        builder = builder.limit(n);
    }

    let projection = captures.name("projection").expect("projection").as_str();
    let group = captures.name("group").map(|g| g.as_str());
    finish_projection(builder, projection, group, table)
}

fn parse_count(text: &str) -> Result<usize> {
    text.parse::<usize>()
        .map_err(|_| Error::InvalidArgument(format!("invalid row count '{text}'")))
}

/// Attach the projection: `*`, a column list, aggregates, or a
/// GROUP BY with key and aggregates
fn finish_projection(
    builder: LogicalPlanBuilder,
    projection: &str,
    group: Option<&str>,
    table: &Table,
) -> Result<LogicalPlan> {
    let items: Vec<&str> = projection.split(',').map(str::trim).collect();

    if let Some(key) = group {
        let mut aggregates = Vec::new();
        for item in &items {
            if item.eq_ignore_ascii_case(key) {
                // The key column naming itself in the projection is implied
                continue;
            }
            aggregates.push(parse_aggregate(item, table)?);
        }
        let group_by = GroupByDescriptor::try_new(table, key, aggregates)?;
        return Ok(builder.group_by(group_by).build());
    }

    if items.len() == 1 && items[0] == "*" {
        return Ok(builder.build());
    }

    let all_aggregates = items.iter().all(|item| AGGREGATE_RE.is_match(item));
    if all_aggregates {
        if items.len() > 1 {
            return unsupported_err!(
                "multiple aggregates require a GROUP BY clause"
            );
        }
        let descriptor = parse_aggregate(items[0], table)?;
        return Ok(builder.aggregate(descriptor).build());
    }
    if items.iter().any(|item| AGGREGATE_RE.is_match(item)) {
        return unsupported_err!(
            "cannot mix aggregates and plain columns without GROUP BY"
        );
    }

    // Plain column projection; validate names eagerly
    for item in &items {
        table.column_index(item)?;
    }
    Ok(builder.project(items).build())
}

fn parse_aggregate(item: &str, table: &Table) -> Result<AggregateDescriptor> {
    let captures = AGGREGATE_RE.captures(item).ok_or_else(|| {
        Error::Unsupported(format!("'{item}' is not a recognized aggregate"))
    })?;
    let op_text = captures.name("op").expect("op").as_str().to_ascii_lowercase();
    let argument = captures.name("arg").expect("arg").as_str();
    let column = (argument != "*").then_some(argument);
    let op = match op_text.as_str() {
        "count" => {
            // COUNT maps to the 32-bit count; the 64-bit variant is only
            // reachable through the plan API
            AggregateOp::Count
        }
        "sum" => AggregateOp::Sum,
        "avg" => AggregateOp::Avg,
        "min" => AggregateOp::Min,
        "max" => AggregateOp::Max,
        _ => unreachable!("recognizer admits only known aggregates"),
    };
    if column.is_none() && op != AggregateOp::Count {
        return invalid_argument_err!("{op}(*) requires a column");
    }
    AggregateDescriptor::try_new(table, op, column)
}

/// Flatten top-level ANDs into the conjunctive predicate list
fn split_conjunction(predicate: Predicate) -> Vec<Predicate> {
    match predicate {
        Predicate::And(lhs, rhs) => {
            let mut list = split_conjunction(*lhs);
            list.extend(split_conjunction(*rhs));
            list
        }
        other => vec![other],
    }
}

/// One token of a WHERE expression
#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Is,
    Null,
    Like,
    Op(CompareOp),
    Str(String),
    Num(String),
    Bool(bool),
    Ident(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while !rest.trim_start().is_empty() {
        let captures = TOKEN_RE.captures(rest).ok_or_else(|| {
            Error::Unsupported(format!("unrecognized WHERE syntax near '{rest}'"))
        })?;
        let full = captures.get(0).expect("match");
        let token = if captures.name("lparen").is_some() {
            Token::LParen
        } else if captures.name("rparen").is_some() {
            Token::RParen
        } else if captures.name("and").is_some() {
            Token::And
        } else if captures.name("or").is_some() {
            Token::Or
        } else if captures.name("not").is_some() {
            Token::Not
        } else if captures.name("is").is_some() {
            Token::Is
        } else if captures.name("null").is_some() {
            Token::Null
        } else if captures.name("like").is_some() {
            Token::Like
        } else if let Some(op) = captures.name("op") {
            Token::Op(match op.as_str() {
                "=" => CompareOp::Eq,
                "!=" | "<>" => CompareOp::NotEq,
                "<" => CompareOp::Lt,
                "<=" => CompareOp::LtEq,
                ">" => CompareOp::Gt,
                ">=" => CompareOp::GtEq,
                _ => unreachable!(),
            })
        } else if let Some(text) = captures.name("str") {
            let inner = &text.as_str()[1..text.as_str().len() - 1];
            Token::Str(inner.replace("''", "'"))
        } else if let Some(num) = captures.name("num") {
            Token::Num(num.as_str().to_string())
        } else if let Some(value) = captures.name("bool") {
            Token::Bool(value.as_str().eq_ignore_ascii_case("true"))
        } else if let Some(ident) = captures.name("ident") {
            Token::Ident(ident.as_str().to_string())
        } else {
            unreachable!("tokenizer alternatives are exhaustive")
        };
        tokens.push(token);
        rest = &rest[full.end()..];
    }
    Ok(tokens)
}

fn parse_where(text: &str, table: &Table) -> Result<Predicate> {
    let tokens = tokenize(text)?;
    let mut parser = WhereParser {
        tokens,
        position: 0,
        table,
    };
    let predicate = parser.or_expression()?;
    if parser.position != parser.tokens.len() {
        return unsupported_err!("trailing tokens in WHERE clause");
    }
    Ok(predicate)
}

/// Recursive-descent parser with the usual precedence:
/// OR < AND < NOT < comparison
struct WhereParser<'a> {
    tokens: Vec<Token>,
    position: usize,
    table: &'a Table,
}

impl WhereParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(token) if token == *expected => Ok(()),
            other => unsupported_err!("expected {expected:?}, found {other:?}"),
        }
    }

    fn or_expression(&mut self) -> Result<Predicate> {
        let mut left = self.and_expression()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.and_expression()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expression(&mut self) -> Result<Predicate> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Predicate> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                Ok(Predicate::Not(Box::new(self.unary()?)))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.or_expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<Predicate> {
        let name = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => return unsupported_err!("expected column name, found {other:?}"),
        };
        let column = self.table.column_ref(&name)?;
        match self.advance() {
            Some(Token::Op(op)) => {
                let literal = self.advance();
                build_comparison(self.table, column, op, literal)
            }
            Some(Token::Like) => match self.advance() {
                Some(Token::Str(pattern)) => {
                    let (op, needle) = map_like(&pattern)?;
                    Ok(Predicate::Utf8Cmp {
                        column,
                        op,
                        value: needle,
                        comparison: StringComparison::Ordinal,
                    })
                }
                other => {
                    unsupported_err!("LIKE requires a string pattern, found {other:?}")
                }
            },
            Some(Token::Is) => {
                let negated = if self.peek() == Some(&Token::Not) {
                    self.advance();
                    true
                } else {
                    false
                };
                self.expect(&Token::Null)?;
                Ok(Predicate::IsNull { column, negated })
            }
            other => unsupported_err!("expected operator after column, found {other:?}"),
        }
    }
}

/// `%x%` contains, `%x` ends-with, `x%` starts-with, plain equality;
/// interior wildcards are out of the dialect
fn map_like(pattern: &str) -> Result<(StrOp, String)> {
    let starts = pattern.starts_with('%');
    let ends = pattern.len() > 1 && pattern.ends_with('%');
    let trimmed = pattern.trim_matches('%');
    if trimmed.contains('%') {
        return unsupported_err!("LIKE pattern '{pattern}' has interior wildcards");
    }
    let op = match (starts, ends) {
        (true, true) => StrOp::Contains,
        (true, false) => StrOp::EndsWith,
        (false, true) => StrOp::StartsWith,
        (false, false) => StrOp::Eq,
    };
    Ok((op, trimmed.to_string()))
}

fn build_comparison(
    table: &Table,
    column: crate::table::ColumnRef,
    op: CompareOp,
    literal: Option<Token>,
) -> Result<Predicate> {
    let data = table.column_data(column.index)?;
    match (&data, literal) {
        (ColumnData::Int32 { .. }, Some(Token::Num(text))) => Ok(Predicate::Int32Cmp {
            column,
            op,
            value: parse_integer(&text)?,
        }),
        (ColumnData::Int64 { .. }, Some(Token::Num(text))) => Ok(Predicate::Int64Cmp {
            column,
            op,
            value: parse_integer(&text)?,
        }),
        (ColumnData::Float32 { .. }, Some(Token::Num(text))) => Ok(Predicate::Float32Cmp {
            column,
            op,
            value: parse_float(&text)? as f32,
        }),
        (ColumnData::Float64 { .. }, Some(Token::Num(text))) => Ok(Predicate::Float64Cmp {
            column,
            op,
            value: parse_float(&text)?,
        }),
        (ColumnData::Decimal128 { scale, .. }, Some(Token::Num(text))) => {
            Ok(Predicate::DecimalCmp {
                column,
                op,
                value: parse_decimal(&text, *scale)?,
            })
        }
        (ColumnData::Utf8(_) | ColumnData::DictUtf8 { .. }, Some(Token::Str(value))) => {
            let op = match op {
                CompareOp::Eq => StrOp::Eq,
                CompareOp::NotEq => StrOp::NotEq,
                CompareOp::Lt => StrOp::Lt,
                CompareOp::LtEq => StrOp::LtEq,
                CompareOp::Gt => StrOp::Gt,
                CompareOp::GtEq => StrOp::GtEq,
            };
            Ok(Predicate::Utf8Cmp {
                column,
                op,
                value,
                comparison: StringComparison::Ordinal,
            })
        }
        (ColumnData::Boolean { .. }, Some(Token::Bool(value))) => {
            let expected = match op {
                CompareOp::Eq => value,
                CompareOp::NotEq => !value,
                _ => {
                    return invalid_argument_err!(
                        "boolean column '{}' supports only = and !=",
                        column.name
                    )
                }
            };
            Ok(Predicate::Bool { column, expected })
        }
        (_, literal) => invalid_argument_err!(
            "operator/type mismatch: column '{}' compared with {literal:?}",
            column.name
        ),
    }
}

fn parse_integer<T: std::str::FromStr>(text: &str) -> Result<T> {
    text.parse::<T>().map_err(|_| {
        Error::InvalidArgument(format!("'{text}' is not a valid integer literal"))
    })
}

fn parse_float(text: &str) -> Result<f64> {
    text.parse::<f64>().map_err(|_| {
        Error::InvalidArgument(format!("'{text}' is not a valid numeric literal"))
    })
}

/// Scale a decimal literal to the column's scale; excess fractional digits
/// are rejected rather than silently rounded
fn parse_decimal(text: &str, scale: i8) -> Result<i128> {
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1i128, rest),
        None => (1i128, text),
    };
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };
    if fraction.len() > scale.max(0) as usize {
        return invalid_argument_err!(
            "literal '{text}' has more fractional digits than scale {scale}"
        );
    }
    let mut value: i128 = 0;
    for ch in whole.chars().chain(fraction.chars()) {
        let digit = ch.to_digit(10).ok_or_else(|| {
            Error::InvalidArgument(format!("'{text}' is not a valid decimal literal"))
        })?;
        value = value
            .checked_mul(10)
            .and_then(|value| value.checked_add(i128::from(digit)))
            .ok_or_else(|| {
                Error::Overflow(format!("decimal literal '{text}' exceeds 128 bits"))
            })?;
    }
    for _ in 0..(scale.max(0) as usize - fraction.len()) {
        value = value.checked_mul(10).ok_or_else(|| {
            Error::Overflow(format!("decimal literal '{text}' exceeds 128 bits"))
        })?;
    }
    Ok(sign * value)
}

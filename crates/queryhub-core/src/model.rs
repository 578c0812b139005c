// SPDX-License-Identifier: Apache-2.0

//! Decoded, backend-typed query parameters.

use std::time::Duration;

/// Backend-typed parameters of a [`crate::StructuredQuery`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryModel {
    Loki(LokiQuery),
    Prometheus(PrometheusQuery),
    Expression(ExpressionQuery),
}

impl QueryModel {
    pub fn expr(&self) -> Option<&str> {
        match self {
            Self::Loki(q) => Some(&q.expr),
            Self::Prometheus(q) => Some(&q.expr),
            Self::Expression(q) => q.expression.as_deref(),
        }
    }

    pub fn legend_format(&self) -> Option<&str> {
        match self {
            Self::Loki(q) => q.legend_format.as_deref(),
            Self::Prometheus(q) => q.legend_format.as_deref(),
            Self::Expression(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    Range,
    Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LokiQuery {
    pub expr: String,
    pub range: RangeKind,
    pub direction: Direction,
    pub max_lines: u64,
    pub step: Duration,
    pub legend_format: Option<String>,
    /// Set when the query backs a UI feature (e.g. log volume) rather than a panel
    pub supporting_query_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrometheusQuery {
    pub expr: String,
    pub range: RangeKind,
    pub step: Duration,
    pub legend_format: Option<String>,
    pub exemplar: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionQuery {
    /// Expression type, e.g. "math", "reduce", "resample"
    pub expression_type: String,
    pub expression: Option<String>,
}

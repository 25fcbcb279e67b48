//! Resolved metric values.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MetricError;
use crate::metrics::condition::Predicate;
use crate::metrics::id::{MetricId, Scalar};

/// A final scalar metric value.
///
/// This is what aggregate metrics resolve to and what expectation results
/// report as `observed_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MetricValue {
    /// A floating-point metric value (e.g., mean, percentage).
    Double(f64),

    /// An integer metric value (e.g., count).
    Long(i64),

    /// A string metric value (e.g., min of a string column).
    String(String),

    /// A boolean metric value.
    Boolean(bool),

    /// Absent value, e.g. the mean of an empty column.
    Null,
}

impl MetricValue {
    /// Checks if the metric value is numeric (Double or Long).
    pub fn is_numeric(&self) -> bool {
        matches!(self, MetricValue::Double(_) | MetricValue::Long(_))
    }

    /// Attempts to get the numeric value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Double(v) => Some(*v),
            MetricValue::Long(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Attempts to get the value as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Long(v) => Some(*v),
            MetricValue::Double(v) => {
                if v.fract() == 0.0 {
                    Some(*v as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Double(v) => {
                if v.fract() == 0.0 {
                    write!(f, "{v:.0}")
                } else {
                    write!(f, "{v:.4}")
                }
            }
            MetricValue::Long(v) => write!(f, "{v}"),
            MetricValue::String(s) => write!(f, "{s}"),
            MetricValue::Boolean(b) => write!(f, "{b}"),
            MetricValue::Null => write!(f, "null"),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Double(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Long(value)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Boolean(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::String(value.to_string())
    }
}

impl From<Scalar> for MetricValue {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Null => MetricValue::Null,
            Scalar::Bool(v) => MetricValue::Boolean(v),
            Scalar::Int(v) => MetricValue::Long(v),
            Scalar::Float(v) => MetricValue::Double(v),
            Scalar::Text(v) => MetricValue::String(v),
        }
    }
}

/// An identifier for one unexpected row in a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RowSample {
    /// Zero-based row position, used by the in-memory backend.
    Position(u64),
    /// Value of a caller-declared key column, used by the SQL backend.
    Key(Scalar),
}

impl fmt::Display for RowSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSample::Position(p) => write!(f, "#{p}"),
            RowSample::Key(k) => write!(f, "{k}"),
        }
    }
}

/// What a successfully resolved metric holds in the run cache.
///
/// Most metrics resolve to a scalar, but condition metrics resolve to an
/// unevaluated [`Predicate`] and sample metrics to bounded lists. One enum
/// keeps the cache homogeneous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResolvedValue {
    /// A final scalar metric.
    Scalar(MetricValue),
    /// An unevaluated row condition; adapters translate it per backend.
    Condition(Predicate),
    /// A bounded sample of unexpected values.
    Values(Vec<Scalar>),
    /// A bounded sample of unexpected row identifiers.
    Rows(Vec<RowSample>),
}

impl ResolvedValue {
    /// Returns the scalar value, if this is a scalar metric.
    pub fn as_scalar(&self) -> Option<&MetricValue> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value as i64 if it is an integral scalar.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_scalar().and_then(MetricValue::as_i64)
    }

    /// Returns the value as f64 if it is a numeric scalar.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_scalar().and_then(MetricValue::as_f64)
    }

    /// Returns the condition predicate, if this is a condition metric.
    pub fn as_condition(&self) -> Option<&Predicate> {
        match self {
            Self::Condition(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the value sample, if this is a value-sample metric.
    pub fn as_values(&self) -> Option<&[Scalar]> {
        match self {
            Self::Values(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the row sample, if this is a row-sample metric.
    pub fn as_rows(&self) -> Option<&[RowSample]> {
        match self {
            Self::Rows(r) => Some(r),
            _ => None,
        }
    }
}

impl From<MetricValue> for ResolvedValue {
    fn from(value: MetricValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<i64> for ResolvedValue {
    fn from(value: i64) -> Self {
        Self::Scalar(MetricValue::Long(value))
    }
}

impl From<f64> for ResolvedValue {
    fn from(value: f64) -> Self {
        Self::Scalar(MetricValue::Double(value))
    }
}

/// One resolved metric: its identity and its outcome.
///
/// The outcome is a `Result` so a failed computation occupies the cache slot
/// the same way a successful one does; dependents find the failure and
/// propagate it without recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMetric {
    /// The metric's identity.
    pub id: MetricId,
    /// Value or per-metric failure.
    pub result: Result<ResolvedValue, MetricError>,
}

impl ResolvedMetric {
    /// Creates a successfully resolved metric.
    pub fn ok(id: MetricId, value: impl Into<ResolvedValue>) -> Self {
        Self {
            id,
            result: Ok(value.into()),
        }
    }

    /// Creates a failed metric.
    pub fn failed(id: MetricId, error: MetricError) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }

    /// Whether the metric resolved to a value.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::id::MetricDomain;

    #[test]
    fn test_metric_value_as_f64() {
        assert_eq!(MetricValue::Long(42).as_f64(), Some(42.0));
        assert_eq!(MetricValue::Double(0.5).as_f64(), Some(0.5));
        assert_eq!(MetricValue::String("x".into()).as_f64(), None);
        assert_eq!(MetricValue::Null.as_f64(), None);
    }

    #[test]
    fn test_metric_value_as_i64_rejects_fractions() {
        assert_eq!(MetricValue::Double(3.0).as_i64(), Some(3));
        assert_eq!(MetricValue::Double(3.5).as_i64(), None);
    }

    #[test]
    fn test_resolved_value_accessors() {
        let scalar = ResolvedValue::from(7i64);
        assert_eq!(scalar.as_i64(), Some(7));
        assert!(scalar.as_condition().is_none());

        let condition = ResolvedValue::Condition(Predicate::IsNull);
        assert_eq!(condition.as_condition(), Some(&Predicate::IsNull));
        assert!(condition.as_i64().is_none());
    }

    #[test]
    fn test_resolved_metric_constructors() {
        let id = MetricId::new("table.row_count", MetricDomain::table());
        let ok = ResolvedMetric::ok(id.clone(), 10i64);
        assert!(ok.is_ok());

        let failed = ResolvedMetric::failed(id, MetricError::computation("sql", "boom"));
        assert!(!failed.is_ok());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(MetricValue::Double(2.0).to_string(), "2");
        assert_eq!(MetricValue::Double(0.12345).to_string(), "0.1235");
        assert_eq!(RowSample::Position(3).to_string(), "#3");
    }
}

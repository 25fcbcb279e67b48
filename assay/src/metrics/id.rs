//! Metric identity: the cache key and graph-node key of the engine.
//!
//! A metric is identified by three parts: a dotted metric name (for example
//! `column_values.in_set.unexpected_count`), the domain slice of the dataset
//! it is computed over, and the value parameters that change its meaning
//! (for example the membership set). Two requests with equal identity are the
//! same metric and are computed at most once per run.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::metrics::condition::RowFilter;

/// A typed scalar used in metric parameters, predicate arguments, and
/// unexpected-value samples.
///
/// Floats are compared and hashed by IEEE bit pattern so scalars can sit
/// inside identity maps. `NaN` therefore equals itself here; translation
/// rejects `NaN` arguments before they ever reach an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Absent value, produced by sampling null cells.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Text(String),
}

impl Scalar {
    /// Returns the value as a float if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns `true` for [`Scalar::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A metric value parameter: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Single scalar parameter, e.g. a regex pattern.
    Scalar(Scalar),
    /// List parameter, e.g. a membership set.
    List(Vec<Scalar>),
}

impl From<Scalar> for ParamValue {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Scalar(Scalar::Float(v))
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::from(v))
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Scalar(Scalar::Text(v))
    }
}

impl From<Vec<Scalar>> for ParamValue {
    fn from(v: Vec<Scalar>) -> Self {
        Self::List(v)
    }
}

/// Value parameters of a metric, keyed in canonical (sorted) order so that
/// identity comparison and fingerprinting are insertion-order independent.
pub type MetricParams = BTreeMap<String, ParamValue>;

/// The four domain shapes a metric can be computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainKind {
    Table,
    Column,
    ColumnPair,
    MultiColumn,
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Column => write!(f, "column"),
            Self::ColumnPair => write!(f, "column_pair"),
            Self::MultiColumn => write!(f, "multi_column"),
        }
    }
}

/// The column scope of a domain, without the row filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainScope {
    /// The whole table.
    Table,
    /// A single column.
    Column { column: String },
    /// An ordered pair of columns.
    ColumnPair { left: String, right: String },
    /// An ordered set of columns.
    MultiColumn { columns: Vec<String> },
}

/// The slice of the dataset a metric is computed over: a column scope plus an
/// optional row filter. Metrics with different filters never share results,
/// and the executor never mixes them into one backend round trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricDomain {
    /// Which columns the metric reads.
    pub scope: DomainScope,
    /// Optional row condition restricting the domain to matching rows.
    pub filter: Option<RowFilter>,
}

impl MetricDomain {
    /// Creates a whole-table domain.
    pub fn table() -> Self {
        Self {
            scope: DomainScope::Table,
            filter: None,
        }
    }

    /// Creates a single-column domain.
    pub fn column(column: impl Into<String>) -> Self {
        Self {
            scope: DomainScope::Column {
                column: column.into(),
            },
            filter: None,
        }
    }

    /// Creates a column-pair domain.
    pub fn column_pair(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            scope: DomainScope::ColumnPair {
                left: left.into(),
                right: right.into(),
            },
            filter: None,
        }
    }

    /// Creates a multi-column domain.
    pub fn multi_column<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: DomainScope::MultiColumn {
                columns: columns.into_iter().map(Into::into).collect(),
            },
            filter: None,
        }
    }

    /// Attaches a row filter to the domain.
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Returns the domain kind.
    pub fn kind(&self) -> DomainKind {
        match &self.scope {
            DomainScope::Table => DomainKind::Table,
            DomainScope::Column { .. } => DomainKind::Column,
            DomainScope::ColumnPair { .. } => DomainKind::ColumnPair,
            DomainScope::MultiColumn { .. } => DomainKind::MultiColumn,
        }
    }

    /// Returns the single column of a `Column` domain.
    pub fn column_name(&self) -> Option<&str> {
        match &self.scope {
            DomainScope::Column { column } => Some(column),
            _ => None,
        }
    }

    /// Returns every column the domain reads, in declaration order.
    pub fn columns(&self) -> Vec<&str> {
        match &self.scope {
            DomainScope::Table => Vec::new(),
            DomainScope::Column { column } => vec![column.as_str()],
            DomainScope::ColumnPair { left, right } => vec![left.as_str(), right.as_str()],
            DomainScope::MultiColumn { columns } => columns.iter().map(String::as_str).collect(),
        }
    }

    /// Returns a copy of this domain with the same filter but the given scope.
    pub fn rescope(&self, scope: DomainScope) -> Self {
        Self {
            scope,
            filter: self.filter.clone(),
        }
    }
}

impl fmt::Display for MetricDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            DomainScope::Table => write!(f, "table")?,
            DomainScope::Column { column } => write!(f, "column({column})")?,
            DomainScope::ColumnPair { left, right } => write!(f, "column_pair({left}, {right})")?,
            DomainScope::MultiColumn { columns } => {
                write!(f, "multi_column({})", columns.join(", "))?
            }
        }
        if let Some(filter) = &self.filter {
            write!(f, " where {filter}")?;
        }
        Ok(())
    }
}

/// The identity of a metric: name, domain, and value parameters.
///
/// Identity is structural. Equality and hashing cover all three parts, so a
/// `MetricId` works directly as a cache key and graph-node key.
///
/// # Example
///
/// ```rust,ignore
/// use assay::metrics::{MetricDomain, MetricId};
///
/// let id = MetricId::new("column.mean", MetricDomain::column("age"));
/// let bounded = MetricId::new("column_values.between.condition", MetricDomain::column("age"))
///     .with_param("min", 0i64)
///     .with_param("max", 120i64);
/// assert_ne!(id, bounded);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricId {
    /// Dotted metric name, e.g. `table.row_count`.
    pub name: String,
    /// Domain the metric is computed over.
    pub domain: MetricDomain,
    /// Value parameters, canonically ordered.
    pub params: MetricParams,
}

impl MetricId {
    /// Creates a metric identity with no value parameters.
    pub fn new(name: impl Into<String>, domain: MetricDomain) -> Self {
        Self {
            name: name.into(),
            domain,
            params: MetricParams::new(),
        }
    }

    /// Adds a value parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns a sibling identity: same domain and params, different name.
    ///
    /// Derived metrics (unexpected count, samples) locate their condition
    /// dependency this way.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: self.domain.clone(),
            params: self.params.clone(),
        }
    }

    /// Stable hex fingerprint of the full identity.
    ///
    /// Params are canonically ordered by the `BTreeMap`, so fingerprints are
    /// insertion-order independent. Used in logs and error messages; equality
    /// checks use the structural identity, never the fingerprint.
    pub fn fingerprint(&self) -> String {
        let encoded =
            serde_json::to_string(self).unwrap_or_else(|_| format!("{}@{}", self.name, self.domain));
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..16])
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)?;
        if !self.params.is_empty() {
            write!(f, "#{}", &self.fingerprint()[..8])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::condition::{Predicate, RowFilter};
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_identity_is_param_order_independent() {
        let a = MetricId::new(
            "column_values.between.condition",
            MetricDomain::column("age"),
        )
        .with_param("min", 0i64)
        .with_param("max", 120i64);
        let b = MetricId::new(
            "column_values.between.condition",
            MetricDomain::column("age"),
        )
        .with_param("max", 120i64)
        .with_param("min", 0i64);

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_identity_distinguishes_params() {
        let base = MetricId::new(
            "column_values.in_set.unexpected_count",
            MetricDomain::column("status"),
        );
        let with_set = base
            .clone()
            .with_param("value_set", vec![Scalar::from("a"), Scalar::from("b")]);

        assert_ne!(base, with_set);
        assert_ne!(base.fingerprint(), with_set.fingerprint());
    }

    #[test]
    fn test_identity_distinguishes_filters() {
        let plain = MetricId::new("table.row_count", MetricDomain::table());
        let filtered = MetricId::new(
            "table.row_count",
            MetricDomain::table().with_filter(RowFilter::new(
                "status",
                Predicate::InSet {
                    values: vec![Scalar::from("active")],
                },
            )),
        );

        assert_ne!(plain, filtered);
    }

    #[test]
    fn test_float_params_compare_by_bits() {
        let a = MetricId::new("column.mean", MetricDomain::column("age")).with_param("bound", 0.1);
        let b = MetricId::new("column.mean", MetricDomain::column("age")).with_param("bound", 0.1);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_renamed_keeps_domain_and_params() {
        let condition = MetricId::new(
            "column_values.in_set.condition",
            MetricDomain::column("status"),
        )
        .with_param("value_set", vec![Scalar::from("a")]);
        let count = condition.renamed("column_values.in_set.unexpected_count");

        assert_eq!(count.domain, condition.domain);
        assert_eq!(count.params, condition.params);
        assert_eq!(count.name, "column_values.in_set.unexpected_count");
    }

    #[test]
    fn test_display_is_compact() {
        let id = MetricId::new("column.mean", MetricDomain::column("age"));
        assert_eq!(id.to_string(), "column.mean@column(age)");

        let pair = MetricId::new(
            "column_pair_values.equal.condition",
            MetricDomain::column_pair("a", "b"),
        );
        assert!(pair.to_string().starts_with(
            "column_pair_values.equal.condition@column_pair(a, b)"
        ));
    }

    #[test]
    fn test_scalar_untagged_serialization() {
        assert_eq!(serde_json::to_value(Scalar::Int(5)).unwrap(), 5);
        assert_eq!(serde_json::to_value(Scalar::from("x")).unwrap(), "x");
        assert_eq!(
            serde_json::to_value(Scalar::Null).unwrap(),
            serde_json::Value::Null
        );
    }
}

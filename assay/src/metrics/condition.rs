//! Backend-neutral row conditions.
//!
//! A condition metric does not resolve to a number. It resolves to a
//! [`Predicate`]: a small expression tree describing which rows of its domain
//! are unexpected. Adapters translate the tree at execution time, to SQL text
//! on the SQL backend and to vectorized array checks on the in-memory
//! backend, so the same cached condition feeds every derived metric
//! (unexpected count, value samples, row samples) without re-planning.
//!
//! Evaluation is three-valued, matching SQL comparison semantics: a value
//! predicate applied to a null cell is neither true nor false, and only
//! definitely-true rows count as matches. [`Predicate::IsNull`] and
//! [`Predicate::NotNull`] are the only predicates that inspect nullness
//! directly. `Not` flips true and false and leaves unknown alone, so nulls
//! never leak into a negated membership check.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics::id::Scalar;

/// A row-level predicate over a metric domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// The domain value is null. For multi-column domains: any column null.
    IsNull,
    /// The domain value is not null. For multi-column domains: no column null.
    NotNull,
    /// The domain value is a member of the set.
    InSet { values: Vec<Scalar> },
    /// The domain value lies in the range. Open bounds are unconstrained
    /// sides; `strict_*` excludes the boundary itself.
    Between {
        min: Option<Scalar>,
        max: Option<Scalar>,
        strict_min: bool,
        strict_max: bool,
    },
    /// The domain value's string form matches the regular expression.
    MatchesRegex { pattern: String },
    /// The domain value occurs more than once in the domain. For
    /// multi-column domains the value is the column tuple.
    Duplicated,
    /// Both columns of a pair domain hold equal values.
    PairEqual,
    /// The left column of a pair domain exceeds the right one.
    PairGreaterThan { or_equal: bool },
    /// Logical negation in three-valued logic: unknown stays unknown.
    Not { inner: Box<Predicate> },
}

impl Predicate {
    /// Wraps the predicate in a negation, collapsing double negation.
    pub fn negated(self) -> Self {
        match self {
            Self::Not { inner } => *inner,
            other => Self::Not {
                inner: Box::new(other),
            },
        }
    }

    /// Whether the predicate reads a whole pair domain rather than a single
    /// value.
    pub fn is_pairwise(&self) -> bool {
        match self {
            Self::PairEqual | Self::PairGreaterThan { .. } => true,
            Self::Not { inner } => inner.is_pairwise(),
            _ => false,
        }
    }

    /// Whether the predicate needs a second pass over the whole domain
    /// (uniqueness checks) instead of a single row-local evaluation.
    pub fn needs_domain_counts(&self) -> bool {
        match self {
            Self::Duplicated => true,
            Self::Not { inner } => inner.needs_domain_counts(),
            _ => false,
        }
    }

    /// Whether the predicate can serve as a single-column row filter.
    ///
    /// Uniqueness and pair predicates depend on more than one cell and are
    /// rejected for filters at translation time.
    pub fn usable_as_filter(&self) -> bool {
        match self {
            Self::IsNull
            | Self::NotNull
            | Self::InSet { .. }
            | Self::Between { .. }
            | Self::MatchesRegex { .. } => true,
            Self::Not { inner } => inner.usable_as_filter(),
            Self::Duplicated | Self::PairEqual | Self::PairGreaterThan { .. } => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IsNull => write!(f, "is null"),
            Self::NotNull => write!(f, "is not null"),
            Self::InSet { values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "in {{{}}}", rendered.join(", "))
            }
            Self::Between {
                min,
                max,
                strict_min,
                strict_max,
            } => {
                let open = if *strict_min { '(' } else { '[' };
                let close = if *strict_max { ')' } else { ']' };
                let lo = min.as_ref().map_or("-inf".to_string(), |v| v.to_string());
                let hi = max.as_ref().map_or("+inf".to_string(), |v| v.to_string());
                write!(f, "between {open}{lo}, {hi}{close}")
            }
            Self::MatchesRegex { pattern } => write!(f, "matches /{pattern}/"),
            Self::Duplicated => write!(f, "is duplicated"),
            Self::PairEqual => write!(f, "pair equal"),
            Self::PairGreaterThan { or_equal } => {
                if *or_equal {
                    write!(f, "pair left >= right")
                } else {
                    write!(f, "pair left > right")
                }
            }
            Self::Not { inner } => write!(f, "not ({inner})"),
        }
    }
}

/// A row filter attached to a metric domain: keep only rows where `column`
/// satisfies `predicate`. Unknown (null-valued) rows are excluded, the same
/// rule a SQL `WHERE` applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowFilter {
    /// Column the filter reads. May be outside the metric's own domain.
    pub column: String,
    /// Predicate a row must satisfy to stay in the domain.
    pub predicate: Predicate,
}

impl RowFilter {
    /// Creates a row filter.
    pub fn new(column: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            column: column.into(),
            predicate,
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.column, self.predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_negation_collapses() {
        let p = Predicate::InSet {
            values: vec![Scalar::from("a")],
        };
        assert_eq!(p.clone().negated().negated(), p);
    }

    #[test]
    fn test_pairwise_detection_through_not() {
        let p = Predicate::PairGreaterThan { or_equal: false }.negated();
        assert!(p.is_pairwise());
        assert!(!Predicate::IsNull.is_pairwise());
    }

    #[test]
    fn test_filter_usability() {
        assert!(Predicate::NotNull.usable_as_filter());
        assert!(Predicate::InSet {
            values: vec![Scalar::from("active")]
        }
        .negated()
        .usable_as_filter());
        assert!(!Predicate::Duplicated.usable_as_filter());
        assert!(!Predicate::PairEqual.usable_as_filter());
    }

    #[test]
    fn test_display_rendering() {
        let between = Predicate::Between {
            min: Some(Scalar::Int(0)),
            max: Some(Scalar::Int(120)),
            strict_min: false,
            strict_max: true,
        };
        assert_eq!(between.to_string(), "between [0, 120)");

        let filter = RowFilter::new(
            "status",
            Predicate::InSet {
                values: vec![Scalar::from("active"), Scalar::from("trial")],
            },
        );
        assert_eq!(filter.to_string(), "status in {active, trial}");
    }
}

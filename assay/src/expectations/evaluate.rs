//! Folding resolved metrics into expectation outcomes.
//!
//! Evaluation is pure arithmetic over the run cache; by this point every
//! backend round trip has already happened. A plan whose metrics all
//! resolved gets a verdict. A plan missing any metric gets a `Failed`
//! outcome naming every failure, because an unanswered check must never
//! masquerade as a passed or violated one.
//!
//! Counting follows SQL conventions: the `mostly` threshold is boundary
//! inclusive, null rows leave the denominator when the policy ignores
//! them, and an empty denominator satisfies any threshold vacuously.

use std::cmp::Ordering;

use crate::cache::ResolutionCache;
use crate::error::MetricError;
use crate::expectations::translate::{AggregatePlan, ExpectationPlan, MapPlan, PlanKind};
use crate::expectations::{
    ExpectationFailure, ExpectationOutcome, ExpectationResult, MetricFailure, PolicyKind,
};
use crate::metrics::id::{MetricId, Scalar};
use crate::metrics::value::{MetricValue, ResolvedValue, RowSample};

/// Decides one translated expectation from the run cache.
pub fn evaluate(plan: &ExpectationPlan, cache: &ResolutionCache) -> ExpectationOutcome {
    // Collect every failed dependency up front so the report names them
    // all, not just the first one encountered.
    let mut errors = Vec::new();
    for id in plan.roots() {
        if let Err(failure) = fetch(cache, &id) {
            errors.push(failure);
        }
    }
    if !errors.is_empty() {
        return failed(plan, errors);
    }

    let result = match &plan.kind {
        PlanKind::Map(map) => evaluate_map(plan, map, cache),
        PlanKind::Aggregate(aggregate) => evaluate_aggregate(plan, aggregate, cache),
    };
    match result {
        Ok(result) => ExpectationOutcome::Evaluated(result),
        Err(failure) => failed(plan, vec![failure]),
    }
}

fn evaluate_map(
    plan: &ExpectationPlan,
    map: &MapPlan,
    cache: &ResolutionCache,
) -> Result<ExpectationResult, MetricFailure> {
    let unexpected = count_of(cache, &map.unexpected_count)?;
    let element = count_of(cache, &map.element_count)?;
    let missing = count_of(cache, &map.null_count)?;

    let policy = &plan.spec.policy;
    let denominator = if policy.ignore_nulls {
        element - missing
    } else {
        element
    };

    let success = match policy.kind {
        PolicyKind::Exact => unexpected == 0,
        PolicyKind::Mostly(threshold) => {
            if denominator <= 0 {
                // No evaluated rows, nothing violated the check.
                true
            } else {
                let expected_fraction = (denominator - unexpected) as f64 / denominator as f64;
                expected_fraction >= threshold
            }
        }
    };

    let unexpected_list = match &map.values_sample {
        Some(id) => Some(values_of(cache, id)?),
        None => None,
    };
    let unexpected_index_list = match &map.rows_sample {
        Some(id) => Some(rows_of(cache, id)?),
        None => None,
    };

    Ok(ExpectationResult {
        expectation: plan.spec.expectation.clone(),
        domain: plan.spec.domain.clone(),
        success,
        observed_value: None,
        element_count: Some(element),
        missing_count: Some(missing),
        missing_percent: Some(percent(missing, element)),
        unexpected_count: Some(unexpected),
        unexpected_percent: Some(percent(unexpected, denominator)),
        unexpected_list,
        unexpected_index_list,
        meta: plan.spec.meta.clone(),
    })
}

fn evaluate_aggregate(
    plan: &ExpectationPlan,
    aggregate: &AggregatePlan,
    cache: &ResolutionCache,
) -> Result<ExpectationResult, MetricFailure> {
    let value = fetch(cache, &aggregate.observed)?;
    let observed = value
        .as_scalar()
        .ok_or_else(|| shape_failure(&aggregate.observed, "a scalar"))?
        .clone();

    let success = if matches!(observed, MetricValue::Null) {
        // An aggregate over no rows observes nothing, and nothing does not
        // lie in any range.
        false
    } else {
        in_range(&observed, aggregate)?
    };

    Ok(ExpectationResult {
        expectation: plan.spec.expectation.clone(),
        domain: plan.spec.domain.clone(),
        success,
        observed_value: Some(observed),
        element_count: None,
        missing_count: None,
        missing_percent: None,
        unexpected_count: None,
        unexpected_percent: None,
        unexpected_list: None,
        unexpected_index_list: None,
        meta: plan.spec.meta.clone(),
    })
}

fn failed(plan: &ExpectationPlan, errors: Vec<MetricFailure>) -> ExpectationOutcome {
    ExpectationOutcome::Failed(ExpectationFailure {
        expectation: plan.spec.expectation.clone(),
        domain: plan.spec.domain.clone(),
        errors,
    })
}

fn fetch(cache: &ResolutionCache, id: &MetricId) -> Result<ResolvedValue, MetricFailure> {
    match cache.get(id) {
        Some(Ok(value)) => Ok(value),
        Some(Err(error)) => Err(MetricFailure {
            metric: id.to_string(),
            error,
        }),
        None => Err(MetricFailure {
            metric: id.to_string(),
            error: MetricError::aborted("metric was never resolved"),
        }),
    }
}

fn shape_failure(id: &MetricId, expected: &str) -> MetricFailure {
    MetricFailure {
        metric: id.to_string(),
        error: MetricError::computation(
            "evaluator",
            format!("resolved value is not {expected}"),
        ),
    }
}

fn count_of(cache: &ResolutionCache, id: &MetricId) -> Result<i64, MetricFailure> {
    fetch(cache, id)?
        .as_i64()
        .ok_or_else(|| shape_failure(id, "a count"))
}

fn values_of(cache: &ResolutionCache, id: &MetricId) -> Result<Vec<Scalar>, MetricFailure> {
    let value = fetch(cache, id)?;
    value
        .as_values()
        .map(<[Scalar]>::to_vec)
        .ok_or_else(|| shape_failure(id, "a value sample"))
}

fn rows_of(cache: &ResolutionCache, id: &MetricId) -> Result<Vec<RowSample>, MetricFailure> {
    let value = fetch(cache, id)?;
    value
        .as_rows()
        .map(<[RowSample]>::to_vec)
        .ok_or_else(|| shape_failure(id, "a row sample"))
}

fn percent(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

fn in_range(observed: &MetricValue, aggregate: &AggregatePlan) -> Result<bool, MetricFailure> {
    let mut within = true;
    if let Some(min) = &aggregate.min {
        let ordering = compare(observed, min)
            .ok_or_else(|| incomparable(&aggregate.observed, observed, min))?;
        within &= if aggregate.strict_min {
            ordering == Ordering::Greater
        } else {
            ordering != Ordering::Less
        };
    }
    if let Some(max) = &aggregate.max {
        let ordering = compare(observed, max)
            .ok_or_else(|| incomparable(&aggregate.observed, observed, max))?;
        within &= if aggregate.strict_max {
            ordering == Ordering::Less
        } else {
            ordering != Ordering::Greater
        };
    }
    Ok(within)
}

fn compare(observed: &MetricValue, bound: &Scalar) -> Option<Ordering> {
    match (observed.as_f64(), bound.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (observed, bound) {
            (MetricValue::String(a), Scalar::Text(b)) => Some(a.as_str().cmp(b.as_str())),
            _ => None,
        },
    }
}

fn incomparable(id: &MetricId, observed: &MetricValue, bound: &Scalar) -> MetricFailure {
    MetricFailure {
        metric: id.to_string(),
        error: MetricError::computation(
            "evaluator",
            format!("observed value '{observed}' is not comparable with bound '{bound}'"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectations::translate::{translate, types, TranslationContext};
    use crate::expectations::{ExpectationArgs, ExpectationSpec};
    use crate::metrics::id::MetricDomain;
    use crate::metrics::value::ResolvedMetric;

    fn keyed_ctx() -> TranslationContext {
        TranslationContext {
            supports_row_keys: true,
            ..TranslationContext::default()
        }
    }

    fn in_set_plan(mostly: Option<f64>) -> ExpectationPlan {
        let mut spec = ExpectationSpec::new(types::VALUES_IN_SET, MetricDomain::column("status"))
            .with_args(ExpectationArgs {
                value_set: Some(vec![Scalar::from("active"), Scalar::from("trial")]),
                ..Default::default()
            });
        if let Some(threshold) = mostly {
            spec = spec.with_mostly(threshold);
        }
        translate(&spec, &keyed_ctx()).unwrap()
    }

    fn map_of(plan: &ExpectationPlan) -> &MapPlan {
        match &plan.kind {
            PlanKind::Map(map) => map,
            other => panic!("expected a map plan, got {other:?}"),
        }
    }

    fn prime(cache: &ResolutionCache, id: &MetricId, value: impl Into<ResolvedValue>) {
        cache.put(ResolvedMetric::ok(id.clone(), value)).unwrap();
    }

    fn prime_counts(
        cache: &ResolutionCache,
        map: &MapPlan,
        unexpected: i64,
        element: i64,
        missing: i64,
    ) {
        prime(cache, &map.unexpected_count, unexpected);
        prime(cache, &map.element_count, element);
        prime(cache, &map.null_count, missing);
    }

    fn prime_samples(cache: &ResolutionCache, map: &MapPlan, values: Vec<Scalar>) {
        if let Some(id) = &map.values_sample {
            prime(cache, id, ResolvedValue::Values(values));
        }
        if let Some(id) = &map.rows_sample {
            prime(cache, id, ResolvedValue::Rows(vec![RowSample::Key(Scalar::Int(4))]));
        }
    }

    #[test]
    fn test_exact_policy_fails_on_one_unexpected() {
        let plan = in_set_plan(None);
        let cache = ResolutionCache::new();
        prime_counts(&cache, map_of(&plan), 1, 10, 0);
        prime_samples(&cache, map_of(&plan), vec![Scalar::from("bogus")]);

        let outcome = evaluate(&plan, &cache);
        let result = outcome.result().unwrap();
        assert!(!result.success);
        assert_eq!(result.unexpected_count, Some(1));
        assert_eq!(result.element_count, Some(10));
        assert_eq!(result.unexpected_percent, Some(10.0));
        assert_eq!(result.unexpected_list, Some(vec![Scalar::from("bogus")]));
        assert_eq!(
            result.unexpected_index_list,
            Some(vec![RowSample::Key(Scalar::Int(4))])
        );
    }

    #[test]
    fn test_mostly_boundary_is_inclusive() {
        let cache = ResolutionCache::new();
        let at_boundary = in_set_plan(Some(0.8));
        prime_counts(&cache, map_of(&at_boundary), 2, 10, 0);
        prime_samples(&cache, map_of(&at_boundary), vec![Scalar::from("x")]);
        assert!(evaluate(&at_boundary, &cache).is_success());

        let cache = ResolutionCache::new();
        let above_boundary = in_set_plan(Some(0.81));
        prime_counts(&cache, map_of(&above_boundary), 2, 10, 0);
        prime_samples(&cache, map_of(&above_boundary), vec![Scalar::from("x")]);
        assert!(!evaluate(&above_boundary, &cache).is_success());
    }

    #[test]
    fn test_ignoring_nulls_shrinks_the_denominator() {
        let plan = in_set_plan(Some(0.8));
        let cache = ResolutionCache::new();
        // Ten rows, five null. One of the five evaluated rows violates, so
        // the expected fraction is exactly 4/5.
        prime_counts(&cache, map_of(&plan), 1, 10, 5);
        prime_samples(&cache, map_of(&plan), vec![Scalar::from("x")]);

        let outcome = evaluate(&plan, &cache);
        let result = outcome.result().unwrap();
        assert!(result.success);
        assert_eq!(result.unexpected_percent, Some(20.0));
        assert_eq!(result.missing_count, Some(5));
        assert_eq!(result.missing_percent, Some(50.0));
    }

    #[test]
    fn test_empty_domain_is_vacuously_true() {
        let plan = in_set_plan(Some(0.99));
        let cache = ResolutionCache::new();
        prime_counts(&cache, map_of(&plan), 0, 0, 0);
        prime_samples(&cache, map_of(&plan), Vec::new());

        let result_outcome = evaluate(&plan, &cache);
        let result = result_outcome.result().unwrap();
        assert!(result.success);
        assert_eq!(result.unexpected_percent, Some(0.0));
        assert_eq!(result.missing_percent, Some(0.0));
    }

    #[test]
    fn test_all_null_column_passes_under_exact_policy() {
        let plan = in_set_plan(None);
        let cache = ResolutionCache::new();
        // Every row is null, so no row definitely violates membership.
        prime_counts(&cache, map_of(&plan), 0, 5, 5);
        prime_samples(&cache, map_of(&plan), Vec::new());

        let outcome = evaluate(&plan, &cache);
        let result = outcome.result().unwrap();
        assert!(result.success);
        assert_eq!(result.unexpected_count, Some(0));
        assert_eq!(result.unexpected_percent, Some(0.0));
    }

    #[test]
    fn test_not_null_percent_runs_over_all_rows() {
        let spec = ExpectationSpec::new(types::VALUES_NOT_NULL, MetricDomain::column("id"));
        let plan = translate(&spec, &keyed_ctx()).unwrap();
        let cache = ResolutionCache::new();
        prime_counts(&cache, map_of(&plan), 4, 10, 4);
        prime_samples(&cache, map_of(&plan), Vec::new());

        let outcome = evaluate(&plan, &cache);
        let result = outcome.result().unwrap();
        assert!(!result.success);
        // The nulls stay in the denominator for this family.
        assert_eq!(result.unexpected_percent, Some(40.0));
    }

    #[test]
    fn test_truncated_sample_keeps_true_count() {
        let plan = in_set_plan(None);
        let cache = ResolutionCache::new();
        prime_counts(&cache, map_of(&plan), 1000, 2000, 0);
        let sample: Vec<Scalar> = (0..20).map(Scalar::Int).collect();
        prime_samples(&cache, map_of(&plan), sample);

        let outcome = evaluate(&plan, &cache);
        let result = outcome.result().unwrap();
        assert_eq!(result.unexpected_count, Some(1000));
        assert_eq!(result.unexpected_list.as_ref().map(Vec::len), Some(20));
    }

    #[test]
    fn test_missing_metric_aborts_the_outcome() {
        let plan = in_set_plan(None);
        let cache = ResolutionCache::new();
        // Only the unexpected count resolves; everything else never ran.
        prime(&cache, &map_of(&plan).unexpected_count, 0i64);

        let outcome = evaluate(&plan, &cache);
        assert!(outcome.is_failed());
        match outcome {
            ExpectationOutcome::Failed(failure) => {
                assert_eq!(failure.errors.len(), 4);
                assert!(failure
                    .errors
                    .iter()
                    .all(|f| matches!(f.error, MetricError::Aborted { .. })));
            }
            other => panic!("expected a failed outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_metric_propagates_its_cause() {
        let plan = in_set_plan(None);
        let cache = ResolutionCache::new();
        let map = map_of(&plan);
        cache
            .put(ResolvedMetric::failed(
                map.unexpected_count.clone(),
                MetricError::computation("sql", "aggregate query timed out"),
            ))
            .unwrap();
        prime(&cache, &map.element_count, 10i64);
        prime(&cache, &map.null_count, 0i64);
        prime_samples(&cache, map, Vec::new());

        match evaluate(&plan, &cache) {
            ExpectationOutcome::Failed(failure) => {
                assert_eq!(failure.errors.len(), 1);
                assert_eq!(
                    failure.errors[0].error,
                    MetricError::computation("sql", "aggregate query timed out")
                );
                assert!(failure.errors[0].metric.contains("unexpected_count"));
            }
            other => panic!("expected a failed outcome, got {other:?}"),
        }
    }

    fn mean_plan(min: Option<Scalar>, max: Option<Scalar>, strict_min: bool) -> ExpectationPlan {
        let spec = ExpectationSpec::new(types::MEAN_BETWEEN, MetricDomain::column("age"))
            .with_args(ExpectationArgs {
                min_value: min,
                max_value: max,
                strict_min,
                ..Default::default()
            });
        translate(&spec, &keyed_ctx()).unwrap()
    }

    fn observed_id(plan: &ExpectationPlan) -> &MetricId {
        match &plan.kind {
            PlanKind::Aggregate(aggregate) => &aggregate.observed,
            other => panic!("expected an aggregate plan, got {other:?}"),
        }
    }

    #[test]
    fn test_aggregate_within_bounds() {
        let plan = mean_plan(Some(Scalar::Int(20)), Some(Scalar::Int(60)), false);
        let cache = ResolutionCache::new();
        prime(&cache, observed_id(&plan), 41.5f64);

        let outcome = evaluate(&plan, &cache);
        let result = outcome.result().unwrap();
        assert!(result.success);
        assert_eq!(result.observed_value, Some(MetricValue::Double(41.5)));
        assert_eq!(result.unexpected_count, None);
        assert_eq!(result.element_count, None);
    }

    #[test]
    fn test_aggregate_strict_bound_excludes_the_boundary() {
        let strict = mean_plan(Some(Scalar::Int(20)), None, true);
        let cache = ResolutionCache::new();
        prime(&cache, observed_id(&strict), 20.0f64);
        assert!(!evaluate(&strict, &cache).is_success());

        let inclusive = mean_plan(Some(Scalar::Int(20)), None, false);
        let cache = ResolutionCache::new();
        prime(&cache, observed_id(&inclusive), 20.0f64);
        assert!(evaluate(&inclusive, &cache).is_success());
    }

    #[test]
    fn test_aggregate_over_no_rows_fails() {
        let plan = mean_plan(Some(Scalar::Int(0)), None, false);
        let cache = ResolutionCache::new();
        prime(&cache, observed_id(&plan), MetricValue::Null);

        let outcome = evaluate(&plan, &cache);
        let result = outcome.result().unwrap();
        assert!(!result.success);
        assert_eq!(result.observed_value, Some(MetricValue::Null));
    }

    #[test]
    fn test_aggregate_incomparable_observation_is_a_failure() {
        let plan = mean_plan(Some(Scalar::Int(0)), None, false);
        let cache = ResolutionCache::new();
        prime(
            &cache,
            observed_id(&plan),
            MetricValue::String("active".into()),
        );

        match evaluate(&plan, &cache) {
            ExpectationOutcome::Failed(failure) => {
                assert!(failure.errors[0]
                    .error
                    .to_string()
                    .contains("not comparable"));
            }
            other => panic!("expected a failed outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_row_count_bounds_judgement() {
        let spec = ExpectationSpec::new(types::ROW_COUNT_BETWEEN, MetricDomain::table())
            .with_args(ExpectationArgs {
                min_value: Some(Scalar::Int(1)),
                max_value: Some(Scalar::Int(100)),
                ..Default::default()
            });
        let plan = translate(&spec, &keyed_ctx()).unwrap();
        let cache = ResolutionCache::new();
        prime(&cache, observed_id(&plan), 42i64);
        assert!(evaluate(&plan, &cache).is_success());
    }
}

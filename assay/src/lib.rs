//! # Assay - Declarative Data Validation for Rust
//!
//! Assay is a data validation library inspired by Python's Great
//! Expectations. You describe what a table should look like as a list of
//! expectations, and assay checks them against your data, producing one
//! structured outcome per expectation with counts, percentages, and
//! samples of the offending values.
//!
//! ## Overview
//!
//! Underneath the declarative surface sits a metric engine. Every
//! expectation is translated into a handful of named metrics (row counts,
//! null counts, violation counts, samples, aggregates) with canonical
//! identities, the metrics from the whole suite are merged into one
//! dependency graph, and the graph is resolved against the backend in as
//! few round trips as the dependency layers allow. Two expectations that
//! need the same metric share one computation; the same suite run twice
//! against the same data produces the same outcomes.
//!
//! ## Quick Start
//!
//! ```rust
//! use assay::prelude::*;
//! use arrow::array::{ArrayRef, Int64Array, StringArray};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use std::sync::Arc;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! // A small table, in memory.
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("id", DataType::Int64, false),
//!     Field::new("email", DataType::Utf8, true),
//! ]));
//! let id: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
//! let email: ArrayRef = Arc::new(StringArray::from(vec![
//!     Some("ada@example.com"),
//!     None,
//!     Some("kay@example.com"),
//! ]));
//! let table = RecordBatch::try_new(schema, vec![id, email])?;
//!
//! // What the table should look like.
//! let specs = vec![
//!     ExpectationSpec::new(types::VALUES_NOT_NULL, MetricDomain::column("id")),
//!     ExpectationSpec::new(types::VALUES_NOT_NULL, MetricDomain::column("email"))
//!         .with_mostly(0.6),
//!     ExpectationSpec::new(types::ROW_COUNT_BETWEEN, MetricDomain::table()).with_args(
//!         ExpectationArgs {
//!             min_value: Some(Scalar::Int(1)),
//!             ..Default::default()
//!         },
//!     ),
//! ];
//!
//! // Run the suite.
//! let adapter = MemoryAdapter::new(table).with_name("users");
//! let outcomes = Validator::new().validate(&adapter, &specs).await?;
//!
//! for outcome in &outcomes {
//!     println!("{}", serde_json::to_string_pretty(outcome)?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Features
//!
//! ### Expectations
//!
//! - **Nullness**: require columns to be populated
//! - **Membership**: values drawn from an allowed set, or outside a banned one
//! - **Ranges**: values, row counts, and aggregates between bounds
//! - **Patterns**: values matching a regular expression
//! - **Uniqueness**: no duplicate values across one or several columns
//! - **Column pairs**: equality and ordering between two columns
//!
//! Row-level expectations take a `mostly` threshold, so "at least 95% of
//! emails match" is one spec, and an `ignore_nulls` policy controlling
//! whether missing values count against it.
//!
//! ### The Metric Engine
//!
//! - Canonical metric identities deduplicate work across a suite
//! - Dependency layering computes prerequisites exactly once per run
//! - Scan requests in a layer are folded into shared backend round trips
//! - A failed metric fails its dependents with the original cause, never
//!   a recomputation
//!
//! ### Backends
//!
//! Tables are reached through [`backend::BackendAdapter`]. Assay ships an
//! in-memory adapter over Arrow record batches and a SQL adapter over
//! DataFusion sessions; custom adapters implement one async trait.
//!
//! ## Architecture
//!
//! - **`metrics`**: metric identities, row predicates, the provider
//!   catalog, and resolved values
//! - **`graph`**: dependency expansion, cycle detection, and layering
//! - **`cache`**: the run-scoped resolution cache
//! - **`backend`**: adapters that execute batched scan requests
//! - **`expectations`**: specs, translation into metric plans, and
//!   outcome evaluation
//! - **`validator`**: the run loop tying the layers together
//! - **`telemetry`**: run summaries and sinks for them
//! - **`logging`**: optional `tracing` subscriber setup for binaries

pub mod backend;
pub mod cache;
pub mod error;
pub mod expectations;
pub mod graph;
pub mod logging;
pub mod metrics;
pub mod prelude;
pub mod telemetry;
pub mod validator;

//! Integration test suite for conductor.
//!
//! These tests exercise the full pipeline from natural-language request
//! to settled task graph, including parallel execution, enrichment
//! propagation, failure cascades, and cancellation.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Full orchestrator runs against a real git repo
//! - `parallel_tasks`: Parallel and adaptive scheduling correctness
//! - `failure_cascade`: Failure isolation and dependent cancellation
//! - `cancellation`: Mid-run cancellation and timeout containment
//!
//! # CI Compatibility
//!
//! All tests use a scripted mock worker backend and never spawn a real
//! worker process, making them safe to run in CI environments.

mod fixtures;

mod cancellation;
mod failure_cascade;
mod parallel_tasks;
mod workflow_e2e;

//! Property-based tests for the resilience components.
//!
//! Run with: cargo test --test property_tests
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for every component.

pub mod circuit_breaker;

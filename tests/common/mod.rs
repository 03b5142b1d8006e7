//! Common test utilities and fixtures for the stashkit-core test suite.
//!
//! Shared payloads, configurations, manager builders and a fault-injecting
//! backend used across the integration and property tests.

#![allow(dead_code)]

pub mod fixtures;

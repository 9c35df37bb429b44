//! Shared test utilities for bimingest integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against an on-disk database
//! - Builders for models, meshes and configurations

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{run_pipeline, run_pipeline_with, TestHarness};

#![deny(unsafe_code)]

//! Shared test utilities for the sonarbridge workspace.
//!
//! Provides a scripted in-process engine, a recording mock web server, config
//! builders, and tracing helpers so that individual crate tests stay concise
//! and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! sonarbridge-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod tracing_setup;
pub mod web;

pub use config::TestConfigBuilder;
pub use context::TestContext;
pub use engine::{Recorded, StubEngine};
pub use web::{MockResponse, MockWebServer, RecordedRequest};

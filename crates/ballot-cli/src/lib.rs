//! ballot-cli
//!
//! Process-level pieces shared by the `ballot-worker` and `ballot-loadgen`
//! binaries: environment configuration, the HTTP status surface and logging
//! setup.

pub mod config;
pub mod http;
pub mod telemetry;

//! Ambient runtime support shared by the proxy engine and the binary:
//! graceful drain/shutdown primitives and log initialization.

pub mod drain;
pub mod signal;
pub mod telemetry;

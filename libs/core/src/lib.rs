//! Runtime utilities shared by cellgraph binaries.

pub mod telemetry;

//! Process-level helpers shared by the binaries and pipelines.

pub mod bootstrap;
pub mod identity;

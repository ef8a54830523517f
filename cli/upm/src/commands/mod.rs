//! CLI command implementations.

pub mod check;
pub mod publish;
pub mod status;

//! The core of capture analysis.
//! Rebuild per-packet flow context from raw headers and run protocol heuristics over each payload.
pub mod capture;
pub mod containers;
pub mod core;
pub mod dns;
pub mod error;
pub mod scan;
pub mod smtp;
pub mod utils;

//! Foundation module - Core utilities shared by the engine
//!
//! - Logging setup
//! - Timing helpers for GPU wait measurements

pub mod logging;
pub mod time;

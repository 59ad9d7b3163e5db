//! Foundation module - Core utilities and types
//!
//! - Math types and projection helpers
//! - Frame timing
//! - Logging utilities

pub mod logging;
pub mod math;
pub mod time;

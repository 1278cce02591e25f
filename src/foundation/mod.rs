//! Shared primitives: frame/time/geometry types, the error taxonomy, and
//! the observer registry.

pub mod core;
pub mod error;
pub mod math;
pub mod observer;

//! Peak shape and width functions. All functions here are pure.

pub mod shape;
pub mod width;

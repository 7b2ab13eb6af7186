//! # Core Models Module
//!
//! Data entities the refinement engine operates on.
//!
//! ## Key Components
//!
//! - [`pattern`] - The measured curve with its immutable original snapshot and the
//!   windowed active view every computation fits against
//! - [`cell`] - Unit-cell parameters, Miller indices, the lattice metric and the
//!   lattice system deciding which lengths refine together
//! - [`reflection`] - A single peak with its read-only theoretical intensity and its
//!   re-estimated observed intensity
//! - [`phase`] - A candidate phase: cell, reflections, scale, zero shift and profile
//! - [`ids`] - Stable keys for phases held by a refinement session

pub mod cell;
pub mod ids;
pub mod pattern;
pub mod phase;
pub mod reflection;

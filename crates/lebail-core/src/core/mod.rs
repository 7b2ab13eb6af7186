//! # Core Module
//!
//! Stateless building blocks of the refinement engine.
//!
//! ## Architecture
//!
//! - **Data Model** ([`models`]) - Experimental pattern, phases, reflections and unit cells
//! - **Peak Shapes** ([`profile`]) - Pseudo-Voigt profile and Caglioti width, both pure
//! - **Geometry** ([`utils`]) - Bragg's law and wavelength conversion
//! - **File I/O** ([`io`]) - Pattern text files, TOML phase cards and profile export
//!
//! Nothing in this layer holds refinement state; the [`crate::engine`] layer mutates
//! phases through the narrow `pub(crate)` setters exposed here.

pub mod io;
pub mod models;
pub mod profile;
pub mod utils;

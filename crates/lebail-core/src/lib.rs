//! # Le Bail Refinement Library
//!
//! Whole-pattern fitting of powder X-ray diffraction data by the Le Bail method: unit
//! cells, zero shift, scale factors and peak-profile parameters of one or more candidate
//! phases are refined against a measured pattern, while reflection intensities are
//! re-extracted from the data instead of being taken from a structural model.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`ExperimentalPattern`, `Phase`,
//!   `Reflection`, `UnitCell`), pure numerical functions (pseudo-Voigt profile, Caglioti
//!   width, Bragg geometry) and file I/O for patterns and phase cards.
//!
//! - **[`engine`]: The Logic Core.** Configuration, the bounded Levenberg-Marquardt
//!   solver, the parameter vector and its bounds, intensity extraction, pattern synthesis,
//!   residual statistics, diagnostics and progress reporting.
//!
//! - **[`workflows`]: The Public API.** The staged refinement driver and the single-flight
//!   `RefinementSession` that owns a pattern and its candidate phases.

pub mod core;
pub mod engine;
pub mod workflows;

//! # Workflows Module
//!
//! High-level entry points that run a complete Le Bail refinement.
//!
//! ## Overview
//!
//! Workflows tie the `core` models and the `engine` together. A caller either drives a
//! single refinement over a pattern and a phase slice it owns ([`refine::run`]), or
//! attaches a pattern and phases to a [`session::RefinementSession`], which enforces
//! single-flight execution and keeps the refined phases between runs.
//!
//! - **Refinement** ([`refine`]) - The staged refinement driver
//! - **Session** ([`session`]) - Engine instance owning the pattern and phase collection
//! - **Report** ([`report`]) - Final parameters, statistics, history and diagnostics

pub mod refine;
pub mod report;
pub mod session;

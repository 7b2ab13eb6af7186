//! # Engine Module
//!
//! This module implements the refinement engine of the Le Bail whole-pattern fit: the
//! stateful machinery that turns a set of candidate phases and a measured pattern into
//! refined cell, zero-shift, scale and profile parameters.
//!
//! ## Overview
//!
//! One refinement iteration fits every phase's parameter slice with a bounded
//! Levenberg-Marquardt solver while the other phases are held fixed, re-extracts all
//! reflection intensities from the data, and evaluates the agreement statistics. The
//! engine tracks the staged state machine (position parameters first, profile parameters
//! afterwards), accumulates non-fatal diagnostics and reports progress to an observer.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Iteration budget, convergence threshold, bound policy
//!   and solver tolerances
//! - **Parameters** ([`parameters`]) - Flat parameter vector and its box constraints
//! - **Solver** ([`solver`]) - Bounded nonlinear least squares
//! - **State Tracking** ([`state`]) - Stage schedule and Rwp convergence tracking
//! - **Diagnostics** ([`diagnostics`]) - Quality warnings collected into the final report
//! - **Progress Monitoring** ([`progress`]) - Observer callbacks with read-only snapshots
//! - **Cancellation** ([`cancel`]) - Cooperative stop flag shared with the caller
//! - **Error Handling** ([`error`]) - Structural errors that abort a session

pub mod cancel;
pub mod config;
pub(crate) mod context;
pub mod diagnostics;
pub mod error;
pub mod parameters;
pub mod progress;
pub mod solver;
pub mod state;
pub mod tasks;

//! Computational steps of one refinement iteration.
//!
//! Each submodule implements a single step the driver composes: synthesizing the
//! calculated pattern, fitting one phase's parameter slice, refining a shared zero shift,
//! re-extracting reflection intensities, and evaluating the agreement statistics.

pub mod extraction;
pub(crate) mod phase_fit;
pub mod residuals;
pub mod synthesis;
pub(crate) mod zero_shift;

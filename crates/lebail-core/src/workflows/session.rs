use super::refine;
use super::report::RefinementReport;
use crate::core::models::ids::PhaseId;
use crate::core::models::pattern::ExperimentalPattern;
use crate::core::models::phase::Phase;
use crate::engine::cancel::CancelToken;
use crate::engine::config::RefinementConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::ProgressReporter;
use crate::engine::tasks::synthesis::estimate_scale;
use slotmap::SlotMap;
use std::sync::{Mutex, MutexGuard, TryLockError};
use tracing::{info, instrument};

struct SessionState {
    pattern: ExperimentalPattern,
    phases: SlotMap<PhaseId, Phase>,
    order: Vec<PhaseId>,
}

/// Owns one experimental pattern and its candidate phases, and runs refinements on them.
///
/// At most one refinement runs at a time. While it runs, every other call on the session
/// fails fast with [`EngineError::SessionActive`] instead of waiting or interleaving
/// updates. The session can be shared across threads; use [`Self::cancel_token`] to stop a
/// running refinement from another thread.
pub struct RefinementSession {
    inner: Mutex<SessionState>,
    cancel: CancelToken,
}

impl RefinementSession {
    pub fn new(pattern: ExperimentalPattern) -> Self {
        Self {
            inner: Mutex::new(SessionState {
                pattern,
                phases: SlotMap::with_key(),
                order: Vec::new(),
            }),
            cancel: CancelToken::new(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>, EngineError> {
        self.inner.try_lock().map_err(|e| match e {
            TryLockError::WouldBlock => EngineError::SessionActive,
            TryLockError::Poisoned(_) => {
                EngineError::Internal("session state poisoned by a panicked refinement".into())
            }
        })
    }

    pub fn add_phase(&self, phase: Phase) -> Result<PhaseId, EngineError> {
        let mut state = self.state()?;
        let id = state.phases.insert(phase);
        state.order.push(id);
        Ok(id)
    }

    /// Attaches `phase` with its scale estimated from the active pattern.
    pub fn add_phase_with_estimated_scale(
        &self,
        mut phase: Phase,
        wavelength: f64,
    ) -> Result<PhaseId, EngineError> {
        let mut state = self.state()?;
        let scale = estimate_scale(&phase, state.pattern.active(), wavelength);
        info!(phase = %phase.name, scale, "Estimated initial scale factor.");
        phase.rebase_scale(scale);
        let id = state.phases.insert(phase);
        state.order.push(id);
        Ok(id)
    }

    pub fn remove_phase(&self, id: PhaseId) -> Result<Phase, EngineError> {
        let mut state = self.state()?;
        let phase = state.phases.remove(id).ok_or(EngineError::PhaseNotFound)?;
        state.order.retain(|&other| other != id);
        Ok(phase)
    }

    pub fn phase(&self, id: PhaseId) -> Result<Phase, EngineError> {
        let state = self.state()?;
        state.phases.get(id).cloned().ok_or(EngineError::PhaseNotFound)
    }

    /// All attached phases in attachment order.
    pub fn phases(&self) -> Result<Vec<(PhaseId, Phase)>, EngineError> {
        let state = self.state()?;
        Ok(state
            .order
            .iter()
            .filter_map(|&id| state.phases.get(id).map(|p| (id, p.clone())))
            .collect())
    }

    /// Restricts fitting to `[min, max]` degrees, always derived from the original data.
    pub fn apply_window(&self, min: f64, max: f64) -> Result<usize, EngineError> {
        let mut state = self.state()?;
        state.pattern.apply_window(min, max)?;
        Ok(state.pattern.active().len())
    }

    pub fn clear_window(&self) -> Result<(), EngineError> {
        self.state()?.pattern.clear_window();
        Ok(())
    }

    pub fn pattern(&self) -> Result<ExperimentalPattern, EngineError> {
        Ok(self.state()?.pattern.clone())
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Refines every attached phase against the active pattern and stores the result.
    ///
    /// A window set in `config` replaces the session's current window. When the run is
    /// cancelled, the phases keep the best state reached before cancellation.
    #[instrument(skip_all, name = "refinement_session")]
    pub fn refine(
        &self,
        config: &RefinementConfig,
        reporter: &ProgressReporter,
    ) -> Result<RefinementReport, EngineError> {
        let mut state = self.state()?;
        if config.window.is_some() {
            state.pattern.set_window(config.window);
        }

        let mut phases: Vec<Phase> = state
            .order
            .iter()
            .filter_map(|&id| state.phases.get(id).cloned())
            .collect();

        let result = refine::run(
            state.pattern.active(),
            &mut phases,
            config,
            reporter,
            &self.cancel,
        );
        self.cancel.reset();
        let report = result?;

        let order = state.order.clone();
        for (id, phase) in order.into_iter().zip(phases) {
            if let Some(slot) = state.phases.get_mut(id) {
                *slot = phase;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::geometry::CU_KA1;
    use crate::engine::config::RefinementConfigBuilder;
    use crate::engine::progress::Progress;
    use crate::engine::tasks::synthesis::test_support::*;
    use std::sync::Arc;

    fn session_with_truth() -> RefinementSession {
        let truth = phase_at("alpha", &[(20.0, 100.0), (30.0, 60.0)])
            .with_profile(narrow_profile())
            .unwrap()
            .with_zero_shift(0.01);
        RefinementSession::new(synthetic_pattern(&[truth], sampling(15.0, 35.0, 0.01)))
    }

    #[test]
    fn phases_are_listed_in_attachment_order_and_can_be_removed() {
        let session = session_with_truth();
        let a = session.add_phase(phase_at("a", &[(20.0, 1.0)])).unwrap();
        let b = session.add_phase(phase_at("b", &[(30.0, 1.0)])).unwrap();

        let names: Vec<_> = session.phases().unwrap().into_iter().map(|(_, p)| p.name).collect();
        assert_eq!(names, ["a", "b"]);

        assert_eq!(session.remove_phase(a).unwrap().name, "a");
        assert!(matches!(session.remove_phase(a), Err(EngineError::PhaseNotFound)));
        assert_eq!(session.phases().unwrap().len(), 1);
        assert_eq!(session.phase(b).unwrap().name, "b");
    }

    #[test]
    fn estimated_scale_becomes_the_initial_scale() {
        let session = session_with_truth();
        let id = session
            .add_phase_with_estimated_scale(phase_at("alpha", &[(20.0, 50.0), (30.0, 30.0)]), CU_KA1)
            .unwrap();
        let phase = session.phase(id).unwrap();
        assert!(phase.scale > 1.0);
        assert_eq!(phase.initial_scale(), phase.scale);
    }

    #[test]
    fn inverted_window_is_rejected_without_touching_the_pattern() {
        let session = session_with_truth();
        let before = session.pattern().unwrap().active().len();
        assert!(matches!(
            session.apply_window(30.0, 20.0),
            Err(EngineError::InvalidRange { .. })
        ));
        assert_eq!(session.pattern().unwrap().active().len(), before);
        assert!(session.apply_window(18.0, 22.0).unwrap() < before);
        session.clear_window().unwrap();
        assert_eq!(session.pattern().unwrap().active().len(), before);
    }

    #[test]
    fn refinement_results_are_stored_in_the_session() {
        let session = session_with_truth();
        let id = session.add_phase(phase_at("alpha", &[(20.0, 100.0), (30.0, 60.0)])).unwrap();
        let config = RefinementConfigBuilder::new().max_iterations(6).build().unwrap();

        let report = session.refine(&config, &ProgressReporter::new()).unwrap();

        let phase = session.phase(id).unwrap();
        assert_eq!(report.phases[0].parameters.zero_shift, phase.zero_shift);
        assert_ne!(phase.zero_shift, 0.0);
    }

    #[test]
    fn second_call_during_a_refinement_fails_fast() {
        let session = Arc::new(session_with_truth());
        session.add_phase(phase_at("alpha", &[(20.0, 100.0), (30.0, 60.0)])).unwrap();
        let config = RefinementConfigBuilder::new().max_iterations(2).build().unwrap();

        let observed = Arc::new(Mutex::new(Vec::new()));
        let inner_session = Arc::clone(&session);
        let inner_observed = Arc::clone(&observed);
        let reporter = ProgressReporter::with_callback(Box::new(move |event| {
            if let Progress::Iteration(_) = event {
                let nested = inner_session.refine(&RefinementConfig::default(), &ProgressReporter::new());
                let add = inner_session.add_phase(phase_at("late", &[(25.0, 1.0)]));
                inner_observed.lock().unwrap().push(
                    matches!(nested, Err(EngineError::SessionActive))
                        && matches!(add, Err(EngineError::SessionActive)),
                );
            }
        }));

        session.refine(&config, &reporter).unwrap();

        assert_eq!(*observed.lock().unwrap(), vec![true, true]);
        assert_eq!(session.phases().unwrap().len(), 1);
    }

    #[test]
    fn cancellation_is_cleared_after_a_cancelled_run() {
        let session = session_with_truth();
        session.add_phase(phase_at("alpha", &[(20.0, 100.0), (30.0, 60.0)])).unwrap();
        let config = RefinementConfigBuilder::new().max_iterations(3).build().unwrap();

        session.cancel_token().cancel();
        let cancelled = session.refine(&config, &ProgressReporter::new()).unwrap();
        assert!(cancelled.cancelled);

        let resumed = session.refine(&config, &ProgressReporter::new()).unwrap();
        assert!(!resumed.cancelled);
        assert_eq!(resumed.iterations, 3);
    }
}

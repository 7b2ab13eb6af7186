use super::cancel::CancelToken;
use super::config::RefinementConfig;
use super::solver::BoundedLevenbergMarquardt;
use super::tasks::synthesis::IntensityModel;
use crate::core::models::pattern::PatternData;

/// Read-only inputs shared by every task of one refinement run.
#[derive(Clone, Copy)]
pub struct RefinementContext<'a> {
    pub pattern: &'a PatternData,
    pub config: &'a RefinementConfig,
    pub cancel: &'a CancelToken,
    pub model: IntensityModel,
}

impl<'a> RefinementContext<'a> {
    pub fn new(
        pattern: &'a PatternData,
        config: &'a RefinementConfig,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            pattern,
            config,
            cancel,
            model: IntensityModel::for_mode(config.independent_intensities),
        }
    }

    pub fn solver(&self) -> BoundedLevenbergMarquardt {
        BoundedLevenbergMarquardt::new(self.config.solver)
    }

    #[inline]
    pub fn two_theta(&self) -> &'a [f64] {
        self.pattern.two_theta()
    }

    #[inline]
    pub fn wavelength(&self) -> f64 {
        self.config.wavelength
    }
}

use super::state::Stage;
use super::tasks::residuals::RFactors;

/// Read-only view of the fit after one refinement iteration, over the active window.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSnapshot {
    pub iteration: usize,
    pub stage: Stage,
    pub two_theta: Vec<f64>,
    pub experimental: Vec<f64>,
    pub calculated: Vec<f64>,
    pub difference: Vec<f64>,
    pub r_factors: RFactors,
}

#[derive(Debug, Clone)]
pub enum Progress {
    StageStart { name: &'static str },
    StageFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    Iteration(Box<IterationSnapshot>),

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    pub fn is_observed(&self) -> bool {
        self.callback.is_some()
    }
}

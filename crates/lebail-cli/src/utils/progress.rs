use indicatif::{ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use lebail::engine::progress::{IterationSnapshot, Progress, ProgressCallback};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const SPINNER_TICK_MS: u64 = 80;

/// Terminal bar state: the bar itself plus the best Rwp seen in the current run.
struct BarState {
    bar: ProgressBar,
    best_rwp: f64,
}

impl BarState {
    fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            best_rwp: f64::INFINITY,
        }
    }

    fn apply(&mut self, progress: Progress) {
        match progress {
            Progress::StageStart { name } => {
                self.bar.reset();
                self.bar.set_length(0);
                self.bar.set_style(spinner_style());
                self.bar
                    .enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                self.bar.set_message(name);
            }
            Progress::StageFinish => {
                self.bar.disable_steady_tick();
                self.bar.finish_with_message("✓ Done");
            }
            Progress::TaskStart { total_steps } => {
                self.bar.disable_steady_tick();
                self.bar.reset();
                self.bar.set_length(total_steps);
                self.bar.set_style(iteration_style());
                self.bar.set_message("Refining");
                self.best_rwp = f64::INFINITY;
            }
            Progress::TaskIncrement => self.bar.inc(1),
            Progress::TaskFinish => {
                // Converged runs stop early; show the bar as complete.
                if let Some(length) = self.bar.length() {
                    self.bar.set_position(length);
                }
                self.bar.finish();
            }
            Progress::Iteration(snapshot) => self.record(&snapshot),
            Progress::Message(text) if self.bar.is_finished() => self.bar.set_message(text),
            Progress::Message(text) => self.bar.println(format!("  {text}")),
        }
    }

    fn record(&mut self, snapshot: &IterationSnapshot) {
        let rwp = snapshot.r_factors.rwp;
        if rwp < self.best_rwp {
            self.best_rwp = rwp;
        }
        self.bar.set_message(format!(
            "S{} Rwp {:.3} % (best {:.3} %)",
            snapshot.stage.number(),
            rwp,
            self.best_rwp
        ));
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn iteration_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:<32} [{bar:40.cyan/blue}] {pos}/{len} iter ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key(
            "elapsed",
            |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{:.1}s", state.elapsed().as_secs_f64());
            },
        )
        .progress_chars("=> ")
}

/// Renders refinement progress events on stderr.
#[derive(Clone)]
pub struct CliProgressHandler {
    state: Arc<Mutex<BarState>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr())
            .with_style(spinner_style());
        bar.finish_and_clear();
        Self {
            state: Arc::new(Mutex::new(BarState::new(bar))),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let state = Arc::clone(&self.state);
        Box::new(move |progress| match state.lock() {
            Ok(mut state) => state.apply(progress),
            Err(_) => warn!("Progress bar state was poisoned; dropping update."),
        })
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

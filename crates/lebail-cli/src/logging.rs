use crate::error::{CliError, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_subscriber::{Layer, filter::LevelFilter, fmt, prelude::*, registry::LookupSpan};

/// Quiet runs still surface errors; each `-v` lowers the threshold by one level.
fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(CliError::Io)?;
    }
    File::create(path).map_err(CliError::Io)
}

/// Plain-text records with targets and thread ids, so per-phase solver spans stay
/// attributable when the Jacobian runs in parallel.
fn file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_target(true)
}

pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let file = log_file.as_deref().map(open_log_file).transpose()?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(level_filter(verbosity, quiet))
        .with(stderr_layer)
        .with(file.map(file_layer))
        .try_init()
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;
    use tracing::{debug, info, info_span, trace, warn};

    static GLOBAL: Once = Once::new();

    #[test]
    fn quiet_wins_over_any_verbosity() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(1, false), LevelFilter::INFO);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(9, false), LevelFilter::TRACE);
        assert_eq!(level_filter(3, true), LevelFilter::ERROR);
    }

    #[test]
    #[serial]
    fn global_logger_accepts_refinement_events() {
        GLOBAL.call_once(|| {
            setup_logging(3, false, None).expect("global logger should install once");
        });
        let span = info_span!("phase_fit", phase = "alpha");
        let _entered = span.enter();
        warn!(parameter = "W", "Parameter settled on its upper bound");
        info!(iteration = 1, rwp = 4.2, "Iteration complete");
        trace!(lambda = 1e-3, "LM step accepted");
    }

    #[test]
    #[serial]
    fn installing_a_second_global_logger_is_an_error() {
        GLOBAL.call_once(|| {
            setup_logging(0, false, None).expect("global logger should install once");
        });
        assert!(matches!(setup_logging(0, false, None), Err(CliError::Other(_))));
    }

    #[test]
    fn log_file_records_carry_the_phase_span() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("refine.log");
        let file = open_log_file(&path).unwrap();
        let subscriber = tracing_subscriber::registry().with(file_layer(file));

        tracing::subscriber::with_default(subscriber, || {
            let span = info_span!("phase_fit", phase = "beta");
            let _entered = span.enter();
            debug!(iterations = 7, "Phase solve finished");
        });

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Phase solve finished"));
        assert!(content.contains("iterations=7"));
        assert!(content.contains("phase_fit"));
        assert!(content.contains("ThreadId"));
        assert!(!content.contains('\u{1b}'));
    }

    #[test]
    fn directory_as_log_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = setup_logging(0, false, Some(dir.path().to_path_buf()));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}

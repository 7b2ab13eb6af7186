use crate::cli::RefineArgs;
use crate::config::PartialRefinementConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use lebail::{
    core::io::{pattern::read_pattern, pattern::write_profile_csv, phases::read_phases},
    engine::progress::ProgressReporter,
    workflows::report::RefinementReport,
    workflows::session::RefinementSession,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(args: RefineArgs) -> Result<()> {
    let partial_config = match &args.config {
        Some(path) => PartialRefinementConfig::from_file(path)?,
        None => PartialRefinementConfig::default(),
    };
    info!("Merging configuration from file and CLI arguments...");
    let resolved = partial_config.merge_with_cli(&args)?;
    let config = resolved.refinement;

    info!("Loading measured pattern from {:?}", &args.pattern);
    let pattern = read_pattern(&args.pattern)?;
    info!("Loading phase cards from {:?}", &args.phases);
    let phases = read_phases(&args.phases)?;
    if phases.is_empty() {
        return Err(CliError::Argument(format!(
            "No [[phase]] entries found in {}",
            args.phases.display()
        )));
    }

    let session = Arc::new(RefinementSession::new(pattern));
    if let Some(window) = config.window {
        let points = session.apply_window(window.min, window.max)?;
        info!(points, "Applied angular window {}..{}", window.min, window.max);
    }
    for phase in phases {
        let name = phase.name.clone();
        if resolved.estimate_scale {
            session.add_phase_with_estimated_scale(phase, config.wavelength)?;
        } else {
            session.add_phase(phase)?;
        }
        info!("Attached phase '{}'.", name);
    }

    let cancel = session.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current step.");
            cancel.cancel();
        }
    });

    println!("Starting Le Bail refinement...");
    let progress_handler = CliProgressHandler::new();
    let worker = Arc::clone(&session);
    let report = tokio::task::spawn_blocking(move || {
        let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
        worker.refine(&config, &reporter)
    })
    .await
    .map_err(|e| CliError::Other(anyhow::anyhow!("Refinement worker failed: {}", e)))??;
    interrupt.abort();

    println!("{}", report.summary());
    write_report(&args.output, &report)?;
    println!("✓ Report written to: {}", args.output.display());

    if let Some(profile_path) = &args.profile {
        write_profile_csv(
            profile_path,
            &report.two_theta,
            &report.experimental,
            &report.calculated,
        )?;
        println!("✓ Profile written to: {}", profile_path.display());
    }

    if report.cancelled {
        warn!("Refinement was cancelled; the report holds the best state reached.");
    }
    Ok(())
}

fn write_report(path: &Path, report: &RefinementReport) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

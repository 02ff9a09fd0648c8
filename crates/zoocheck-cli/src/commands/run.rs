//! Run command - check every model of a zoo against the runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;
use tracing::{debug, error};

use zoocheck_core::{CaseOutcome, Harness, ModelCase, OrtLoader, RunSummary};

use super::{load_config, select_cases};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Model zoo root directory
    #[arg(required = true)]
    root: PathBuf,

    /// Number of models checked in parallel
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Only run models whose "opset/model" id contains this text
    #[arg(short, long)]
    filter: Option<String>,

    /// Write a JSON report to this file
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Stop starting new models after the first failure
    #[arg(long)]
    fail_fast: bool,
}

/// A case with its position in discovery order.
type Finished = (usize, ModelCase, CaseOutcome);

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = load_config(config_path)?;
    let cases = select_cases(&args.root, args.filter.as_deref())?;

    if cases.is_empty() {
        anyhow::bail!("No model directories found under {}", args.root.display());
    }

    println!(
        "{} Found {} model(s) to check",
        style("ℹ").blue(),
        cases.len()
    );

    let loader = OrtLoader::new()
        .with_intra_threads(config.runtime.intra_threads)
        .with_optimization(config.runtime.optimize);
    let harness = Arc::new(Harness::new(loader, config));

    let progress = ProgressBar::new(cases.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} models {msg}",
            )?
            .progress_chars("=>-"),
    );

    let mut summary = RunSummary::new();
    let mut results: Vec<Finished> = Vec::with_capacity(cases.len());
    let mut pending = cases.into_iter().enumerate();
    let mut tasks: JoinSet<Finished> = JoinSet::new();
    let mut stopped = false;

    let spawn = |tasks: &mut JoinSet<Finished>, (index, case): (usize, ModelCase)| {
        let harness = Arc::clone(&harness);
        tasks.spawn_blocking(move || {
            let outcome = harness.run_case(&case);
            (index, case, outcome)
        });
    };

    for next in pending.by_ref().take(args.jobs.max(1)) {
        spawn(&mut tasks, next);
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, case, outcome) = joined?;
        progress.inc(1);

        match &outcome {
            CaseOutcome::Failed { error } => {
                progress.set_message(format!("{} failed", case.id()));
                error!("{}: {}", case.id(), error);
                if args.fail_fast {
                    stopped = true;
                }
            }
            CaseOutcome::Skipped { reason } => debug!("{}: skipped ({})", case.id(), reason),
            CaseOutcome::Passed { .. } => {}
        }
        results.push((index, case, outcome));

        if !stopped {
            if let Some(next) = pending.next() {
                spawn(&mut tasks, next);
            }
        }
    }

    progress.finish_with_message("done");

    results.sort_by_key(|(index, _, _)| *index);
    for (_, case, outcome) in &results {
        summary.record(case, outcome);
    }

    if let Some(report) = &args.report {
        summary.save(report)?;
        println!(
            "{} Report written to {}",
            style("✓").green(),
            report.display()
        );
    }

    println!();
    println!(
        "{} Checked {} model(s) in {:?}",
        style("✓").green(),
        summary.total(),
        start.elapsed()
    );
    println!(
        "   {} passed, {} skipped, {} failed",
        style(summary.passed).green(),
        style(summary.skipped).yellow(),
        style(summary.failed).red()
    );

    if stopped {
        let remaining = pending.count();
        println!(
            "   {} model(s) not started after the first failure",
            style(remaining).yellow()
        );
    }

    if !summary.is_success() {
        println!();
        println!("{}", style("Failed models:").red());
        for case in summary.failures() {
            println!(
                "  - {}/{}: {}",
                case.opset,
                case.model,
                case.detail.as_deref().unwrap_or("unknown error")
            );
        }
        anyhow::bail!("{} model(s) failed", summary.failed);
    }

    Ok(())
}

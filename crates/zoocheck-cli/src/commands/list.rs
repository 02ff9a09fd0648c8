//! List command - show the models a run would check.

use std::path::PathBuf;

use clap::Args;
use console::style;

use zoocheck_core::ExclusionList;

use super::{load_config, select_cases};

/// Arguments for the list command.
#[derive(Args)]
pub struct ListArgs {
    /// Model zoo root directory
    #[arg(required = true)]
    root: PathBuf,

    /// Only list models whose "opset/model" id contains this text
    #[arg(short, long)]
    filter: Option<String>,

    /// List excluded models and the reason they are skipped
    #[arg(long)]
    skipped: bool,
}

pub async fn run(args: ListArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let exclusions = ExclusionList::from_config(&config.exclusions);
    let cases = select_cases(&args.root, args.filter.as_deref())?;

    let mut shown = 0;
    for case in &cases {
        match (exclusions.reason(&case.model), args.skipped) {
            (Some(reason), true) => {
                println!("{}  {}", case.id(), style(reason).dim());
                shown += 1;
            }
            (None, false) => {
                println!("{}", case.id());
                shown += 1;
            }
            _ => {}
        }
    }

    eprintln!(
        "{} {} of {} model(s) {}",
        style("ℹ").blue(),
        shown,
        cases.len(),
        if args.skipped { "excluded" } else { "runnable" }
    );

    Ok(())
}

use super::{open_session, paint_status};
use crate::core::util::SERVER_NAME;
use anyhow::{Context, Result};
use colored::Colorize;

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let name = matches
        .get_one::<String>("name")
        .context("Task name argument is required")?;
    let (_session, handler) = open_session()?;

    let targets: Vec<_> = handler
        .list(SERVER_NAME.as_str())
        .into_iter()
        .filter(|run| &run.task.name == name && run.is_running())
        .collect();
    if targets.is_empty() {
        println!("{}", format!("No running task named '{}'.", name).yellow());
        return Ok(());
    }

    for run in &targets {
        match handler.abort(run) {
            Ok(updated) => println!(
                "{} {} (pid {}): {}",
                "Abort".cyan(),
                updated.task.name,
                updated.process.pid(),
                paint_status(updated.status)
            ),
            Err(e) => println!("{}", format!("Error aborting '{}': {}", run.task.name, e).red()),
        }
    }
    Ok(())
}

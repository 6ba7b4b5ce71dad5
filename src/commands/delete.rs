use super::open_session;
use crate::core::util::SERVER_NAME;
use anyhow::{Context, Result};
use colored::Colorize;

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let name = matches
        .get_one::<String>("name")
        .context("Task name argument is required")?;
    let (_session, handler) = open_session()?;

    let mut deleted = 0usize;
    let mut skipped = 0usize;
    for run in handler
        .list(SERVER_NAME.as_str())
        .into_iter()
        .filter(|run| &run.task.name == name)
    {
        match handler.delete(&run) {
            Ok(true) => deleted += 1,
            Ok(false) => skipped += 1,
            Err(e) => println!("{}", format!("Error deleting run of '{}': {}", name, e).red()),
        }
    }

    if deleted == 0 && skipped == 0 {
        println!("{}", format!("No runs of '{}' found.", name).yellow());
        return Ok(());
    }
    println!(
        "{} {}",
        "Deleted".green().bold(),
        format!("{} run(s)", deleted).yellow().bold()
    );
    if skipped > 0 {
        println!("{}", format!("{} run(s) still in progress were kept.", skipped).dimmed());
    }
    Ok(())
}

use super::{archive_size, open_session, paint_status, read_input, with_task_defaults};
use anyhow::{Context, Result};
use colored::Colorize;

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let file = matches
        .get_one::<String>("file")
        .context("Task file argument is required")?;
    let json = with_task_defaults(&read_input(file)?)?;

    let (session, handler) = open_session()?;
    println!("{}", "Starting diagnostic task...".cyan());
    let run = handler
        .create(&session, &json)
        .context("Task could not be run")?;

    println!();
    println!("{} {}", "Task:".white().bold(), run.task.name.yellow());
    println!("{} {}", "Status:".white().bold(), paint_status(run.status));
    println!("{} {}s", "Duration:".white().bold(), run.duration());
    if let Some(size) = archive_size(&run) {
        println!(
            "{} {} ({})",
            "Output:".white().bold(),
            run.archive_path().display().to_string().green(),
            size
        );
    }
    Ok(())
}

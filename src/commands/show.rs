use super::{read_input, with_task_defaults};
use crate::core::Task;
use anyhow::{Context, Result};

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let file = matches
        .get_one::<String>("file")
        .context("Task file argument is required")?;
    let task = Task::from_json(&with_task_defaults(&read_input(file)?)?).context("Invalid task")?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print!("{}", task.render_tree()?);
    }
    Ok(())
}

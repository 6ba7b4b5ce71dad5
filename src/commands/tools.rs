use super::open_session;
use crate::core::tools::ToolStatus;
use anyhow::Result;
use colored::Colorize;

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let (session, _handler) = open_session()?;
    let tools = session.tools();

    if let Some(programs) = matches.get_many::<String>("check") {
        for program in programs {
            let status = match tools.find(program) {
                Ok(path) => {
                    println!("{} {} -> {}", "✓".green(), program, path.display());
                    ToolStatus::Flag(true)
                }
                Err(message) => {
                    println!("{} {}: {}", "✗".red(), program, message);
                    ToolStatus::Message(message)
                }
            };
            tools.set_available(program, status);
        }
        return Ok(());
    }

    let snapshot = tools.snapshot();
    if snapshot.is_empty() {
        println!("{}", "No tools have been checked yet.".yellow());
        return Ok(());
    }
    println!("{} {}", "Cache:".dimmed(), tools.cache_path().display());
    for (tool, status) in &snapshot {
        match status.message() {
            None if status.is_available() => println!("  {:<16} {}", tool, "available".green()),
            None => println!("  {:<16} {}", tool, "unavailable".red()),
            Some(message) => println!("  {:<16} {}", tool, message.red()),
        }
    }
    Ok(())
}

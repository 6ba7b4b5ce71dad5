use anyhow::{Context, Result};
use clap::{ArgMatches, Command};
use clap_complete::{generate, Shell};
use std::io;

/// Write completions for the requested shell to stdout
pub fn execute(matches: &ArgMatches, cli: &mut Command) -> Result<()> {
    let shell = *matches
        .get_one::<Shell>("shell")
        .context("Shell argument is required")?;
    generate(shell, cli, "rdiag", &mut io::stdout());
    Ok(())
}

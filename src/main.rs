use anyhow::Result;
use clap::{Arg, ArgAction, Command};

use rdiag::commands;

fn cli() -> Command {
    Command::new("rdiag")
        .about("Diagnostic collection orchestrator")
        .disable_version_flag(true)
        .arg(
            Arg::new("version")
                .short('v')
                .short_alias('V')
                .long("version")
                .help("Print version information")
                .action(ArgAction::SetTrue)
        )
        .subcommand(
            Command::new("run")
                .about("Run a diagnostic task described by a JSON file")
                .arg(
                    Arg::new("file")
                        .help("Task descriptor file, or '-' for stdin")
                        .required(true)
                        .index(1)
                )
        )
        .subcommand(
            Command::new("show")
                .about("Validate a task descriptor and print its collector tree")
                .arg(
                    Arg::new("file")
                        .help("Task descriptor file, or '-' for stdin")
                        .required(true)
                        .index(1)
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the normalized descriptor instead of the tree")
                        .action(ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("list")
                .about("List running and finished diagnostic runs")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Host whose running records are checked against live processes")
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the run records as JSON")
                        .action(ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("abort")
                .about("Abort the running task(s) with the given name")
                .arg(
                    Arg::new("name")
                        .help("Task name")
                        .required(true)
                        .index(1)
                )
        )
        .subcommand(
            Command::new("delete")
                .about("Delete the output of finished runs of a task")
                .arg(
                    Arg::new("name")
                        .help("Task name")
                        .required(true)
                        .index(1)
                )
        )
        .subcommand(
            Command::new("processes")
                .about("Show the classified process table")
                .arg(
                    Arg::new("type")
                        .short('t')
                        .long("type")
                        .value_name("TYPE")
                        .help("Only show processes of this type (e.g. 'splunk search')")
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the listing as JSON")
                        .action(ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .help("Target shell")
                        .required(true)
                        .value_parser(clap::value_parser!(clap_complete::Shell))
                        .index(1)
                )
        )
        .subcommand(
            Command::new("tools")
                .about("Show or refresh the tool availability cache")
                .arg(
                    Arg::new("check")
                        .long("check")
                        .value_name("TOOL")
                        .help("Resolve these tools and record the outcome")
                        .num_args(1..)
                        .action(ArgAction::Append)
                )
        )
}

fn main() -> Result<()> {
    rdiag::init_logging();
    let matches = cli().get_matches();

    if matches.get_flag("version") {
        println!("rdiag version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match matches.subcommand() {
        Some(("run", sub_matches)) => commands::run(sub_matches)?,
        Some(("show", sub_matches)) => commands::show(sub_matches)?,
        Some(("list", sub_matches)) => commands::list(sub_matches)?,
        Some(("abort", sub_matches)) => commands::abort(sub_matches)?,
        Some(("delete", sub_matches)) => commands::delete(sub_matches)?,
        Some(("processes", sub_matches)) => commands::processes(sub_matches)?,
        Some(("tools", sub_matches)) => commands::tools(sub_matches)?,
        Some(("completions", sub_matches)) => commands::completions(sub_matches, &mut cli())?,
        _ => {
            println!("Welcome to rdiag!");
            println!("Use 'rdiag --help' for more information.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_tools_check_takes_several_names() {
        let matches = cli()
            .try_get_matches_from(["rdiag", "tools", "--check", "ps", "lsof"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let names: Vec<&String> = sub.get_many::<String>("check").unwrap().collect();
        assert_eq!(names, ["ps", "lsof"]);
    }

    #[test]
    fn test_completions_rejects_unknown_shell() {
        assert!(cli().try_get_matches_from(["rdiag", "completions", "tcsh"]).is_err());
        assert!(cli().try_get_matches_from(["rdiag", "completions", "bash"]).is_ok());
    }
}

use super::open_session;
use anyhow::Result;
use colored::Colorize;

const ARGS_WIDTH: usize = 80;

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let filter = matches.get_one::<String>("type");
    let (session, _handler) = open_session()?;

    let mut listing: Vec<_> = session
        .process_lister()
        .get_process_listing(true)
        .into_iter()
        .filter(|p| filter.map_or(true, |t| p.process_type() == t.as_str()))
        .collect();
    listing.sort_by_key(|p| p.pid());

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("{:>8} {:>8} {:<24} {:<20} ARGS", "PID", "PPID", "TYPE", "NAME")
            .white()
            .bold()
    );
    for process in &listing {
        let args: String = process.args().chars().take(ARGS_WIDTH).collect();
        println!(
            "{:>8} {:>8} {:<24} {:<20} {}",
            process.pid(),
            process.process().ppid,
            process.process_type().cyan(),
            process.name(),
            args.dimmed()
        );
    }
    Ok(())
}

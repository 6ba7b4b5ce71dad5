use super::{archive_size, open_session, paint_status};
use crate::core::util::{timestamp_from_epoch, SERVER_NAME};
use anyhow::Result;
use colored::Colorize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const NAME_WIDTH: usize = 24;
const STATUS_WIDTH: usize = 18;

/// Cut `name` to `width` display columns, marking the cut with "..."
fn fit_name(name: &str, width: usize) -> String {
    if name.width() <= width {
        return format!("{}{}", name, " ".repeat(width - name.width()));
    }
    let mut out = String::new();
    let mut used = 0usize;
    for ch in name.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width.saturating_sub(3) {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push_str("...");
    let pad = width.saturating_sub(used + 3);
    format!("{}{}", out, " ".repeat(pad))
}

pub fn execute(matches: &clap::ArgMatches) -> Result<()> {
    let host = matches
        .get_one::<String>("host")
        .cloned()
        .unwrap_or_else(|| SERVER_NAME.to_string());
    let (_session, handler) = open_session()?;
    let runs = handler.list(&host);

    if matches.get_flag("json") {
        let records = runs
            .iter()
            .map(|run| run.to_json())
            .collect::<crate::Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}", "No diagnostic runs found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{} {:<18} {:<30} {:>9} {:>8} {:>10}",
            fit_name("TASK", NAME_WIDTH),
            "STATUS",
            "CREATED",
            "DURATION",
            "PID",
            "SIZE"
        )
        .white()
        .bold()
    );
    for run in &runs {
        let created = run
            .created_at
            .map(timestamp_from_epoch)
            .unwrap_or_else(|| "-".to_string());
        let pad = STATUS_WIDTH.saturating_sub(run.status.as_str().len());
        println!(
            "{} {}{} {:<30} {:>8}s {:>8} {:>10}",
            fit_name(&run.task.name, NAME_WIDTH),
            paint_status(run.status),
            " ".repeat(pad),
            created,
            run.duration(),
            run.process.pid(),
            archive_size(run).unwrap_or_else(|| "-".to_string())
        );
    }
    println!();
    println!("{} {}", "Total:".dimmed(), runs.len());
    Ok(())
}

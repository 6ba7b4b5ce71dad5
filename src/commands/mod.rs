// Command handlers module
pub mod abort;
pub mod completions;
pub mod delete;
pub mod list;
pub mod processes;
pub mod run;
pub mod show;
pub mod tools;

// Re-exports for cleaner imports
pub use abort::execute as abort;
pub use completions::execute as completions;
pub use delete::execute as delete;
pub use list::execute as list;
pub use processes::execute as processes;
pub use run::execute as run;
pub use show::execute as show;
pub use tools::execute as tools;

use crate::core::task::TaskHandler;
use crate::core::util::SERVER_NAME;
use crate::core::{Config, RunStatus, Session};
use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use std::io::Read;
use std::sync::Arc;

/// Session and run handler over the user's configuration
pub(crate) fn open_session() -> Result<(Arc<Session>, TaskHandler)> {
    let config = Config::load()?;
    let session = Session::new(config.clone());
    let handler = TaskHandler::new(config, session.process_lister().clone());
    Ok((session, handler))
}

/// Contents of `path`, or of stdin when `path` is `-`
pub(crate) fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read task from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read task file: {}", path))
}

/// Fill in `host` and `task_id` when the descriptor leaves them out
pub(crate) fn with_task_defaults(text: &str) -> Result<String> {
    let mut value: serde_json::Value = serde_json::from_str(text).context("Task file is not valid JSON")?;
    if let Some(object) = value.as_object_mut() {
        let blank = |v: Option<&serde_json::Value>| v.and_then(|v| v.as_str()).map_or(true, |s| s.trim().is_empty());
        if blank(object.get("host")) {
            object.insert("host".into(), SERVER_NAME.as_str().into());
        }
        if blank(object.get("task_id")) {
            let name = object.get("name").and_then(|v| v.as_str()).unwrap_or_default().trim().to_string();
            let host = object.get("host").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            object.insert("task_id".into(), TaskHandler::build_task_id(&name, &host).into());
        }
    }
    Ok(value.to_string())
}

/// Human readable size of a finished run's archive, if there is one
pub(crate) fn archive_size(run: &crate::core::RunInfo) -> Option<String> {
    let size = std::fs::metadata(run.archive_path()).ok()?.len();
    Some(humansize::format_size(size, humansize::DECIMAL))
}

pub(crate) fn paint_status(status: RunStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        RunStatus::Success => text.green().bold(),
        RunStatus::Failure => text.red().bold(),
        RunStatus::PartialSuccess => text.yellow().bold(),
        RunStatus::Aborted | RunStatus::Aborting => text.magenta(),
        RunStatus::Finished => text.white(),
        _ => text.cyan(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_ids_only() {
        let filled: serde_json::Value =
            serde_json::from_str(&with_task_defaults(r#"{"__class__":"Task","name":"n"}"#).unwrap()).unwrap();
        assert_eq!(filled["host"], SERVER_NAME.as_str());
        assert!(filled["task_id"].as_str().unwrap().starts_with(&format!("n_{}_", SERVER_NAME.as_str())));

        let kept: serde_json::Value = serde_json::from_str(
            &with_task_defaults(r#"{"__class__":"Task","name":"n","host":"h","task_id":"t"}"#).unwrap(),
        )
        .unwrap();
        assert_eq!(kept["host"], "h");
        assert_eq!(kept["task_id"], "t");
    }
}

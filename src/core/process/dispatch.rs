//! Reading search job metadata from a dispatch directory.

use super::{Process, SearchProcess};
use crate::error::{DiagError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// First data row of a job's `info.csv`, keyed by header name
pub type SearchInfo = HashMap<String, String>;

/// Split CSV text into records, honouring quoted fields with doubled quotes
/// and line breaks inside quotes.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

/// Read the header and first row of `<job_dir>/info.csv`
pub fn read_search_info(job_dir: &Path) -> Result<SearchInfo> {
    let path = job_dir.join("info.csv");
    let text = fs::read_to_string(&path)?;
    let mut records = parse_csv(&text).into_iter();
    let header = records
        .next()
        .ok_or_else(|| DiagError::other(format!("{:?} is empty", path)))?;
    let row = records
        .next()
        .ok_or_else(|| DiagError::other(format!("{:?} has no data row", path)))?;
    Ok(header.into_iter().zip(row).collect())
}

fn required<'a>(info: &'a SearchInfo, key: &str) -> Result<&'a str> {
    info.get(key)
        .map(String::as_str)
        .ok_or_else(|| DiagError::other(format!("search info is missing '{}'", key)))
}

/// Build a [`SearchProcess`] for `process` from the dispatch entry of `sid`
pub fn load_search_process(process: Process, dispatch_dir: &Path, sid: &str) -> Result<SearchProcess> {
    let info = read_search_info(&dispatch_dir.join(sid))?;

    let (owning_user, owning_app) = info
        .get("savedsearch_label")
        .and_then(|label| serde_json::from_str::<serde_json::Value>(label).ok())
        .map(|label| {
            (
                label.get("owner").and_then(|v| v.as_str()).map(String::from),
                label.get("app").and_then(|v| v.as_str()).map(String::from),
            )
        })
        .unwrap_or((None, None));

    Ok(SearchProcess {
        root_sid: required(&info, "_root_sid")?.to_string(),
        savedsearch_name: required(&info, "label")?.to_string(),
        running_app: required(&info, "_ppc.app")?.to_string(),
        running_user: required(&info, "_ppc.user")?.to_string(),
        search: required(&info, "_search")?.to_string(),
        owning_user,
        owning_app,
        process,
    })
}

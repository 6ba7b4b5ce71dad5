//! External tool discovery and the persisted availability cache.

pub mod runner;

pub use runner::{ExitCode, ToolRunner};

use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Cached availability of one tool: `true`, or the reason it cannot be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolStatus {
    Flag(bool),
    Message(String),
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ToolStatus::Flag(true))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ToolStatus::Message(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Remembers which tools worked on this host.
///
/// The cache file is rewritten on every change. The lock is process local;
/// concurrent writers in separate processes may overwrite each other.
pub struct ToolAvailabilityManager {
    cache_path: PathBuf,
    tool_dirs: Vec<PathBuf>,
    tools: Mutex<BTreeMap<String, ToolStatus>>,
}

impl ToolAvailabilityManager {
    /// Load the cache at `cache_path`; `tool_dirs` are searched before `PATH`
    pub fn new(cache_path: impl Into<PathBuf>, tool_dirs: Vec<PathBuf>) -> Self {
        let cache_path = cache_path.into();
        let tools = match fs::read(&cache_path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                log::error!("Error loading '{}': {}", cache_path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            cache_path,
            tool_dirs,
            tools: Mutex::new(tools),
        }
    }

    /// Record a tool's status, persisting only when it changed
    pub fn set_available(&self, tool: &str, status: ToolStatus) {
        let mut tools = self.tools.lock();
        if tools.get(tool) == Some(&status) {
            return;
        }
        tools.insert(tool.to_string(), status);
        if let Err(e) = self.persist(&tools) {
            log::error!("Error saving '{}': {}", self.cache_path.display(), e);
        }
    }

    fn persist(&self, tools: &BTreeMap<String, ToolStatus>) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.cache_path, serde_json::to_vec(tools)?)?;
        Ok(())
    }

    pub fn is_available(&self, tool: &str) -> bool {
        self.tools
            .lock()
            .get(tool)
            .map(ToolStatus::is_available)
            .unwrap_or(false)
    }

    pub fn status(&self, tool: &str) -> Option<ToolStatus> {
        self.tools.lock().get(tool).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, ToolStatus> {
        self.tools.lock().clone()
    }

    fn search_path(&self) -> OsString {
        let mut dirs: Vec<PathBuf> = self.tool_dirs.clone();
        if let Some(path) = env::var_os("PATH") {
            dirs.extend(env::split_paths(&path));
        }
        env::join_paths(dirs).unwrap_or_default()
    }

    /// Resolve `program` to an executable path.
    ///
    /// The error message distinguishes a file without execute permission from
    /// a tool that is not installed at all.
    pub fn find(&self, program: &str) -> std::result::Result<PathBuf, String> {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        if let Ok(path) = which::which_in(program, Some(self.search_path()), cwd) {
            return Ok(path);
        }

        let search_path = self.search_path();
        let exists_somewhere = env::split_paths(&search_path)
            .map(|dir| dir.join(program))
            .any(|candidate| candidate.is_file());
        if exists_somewhere {
            Err(format!("{} doesn't have execute permission for the current user.", program))
        } else {
            Err(format!("Could not detect `{}`", program))
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }
}

//! Built-in runtime tools.
//!
//! These are the tools the loop itself depends on: turn control
//! (`end_turn`), output recording (`set_output`), recursive spawning
//! (`spawn_agents`), client-delegated file reads (`read_files`), and the
//! proposed-edit pair (`propose_write_file` / `propose_str_replace`).
//! Workspace tool implementations beyond these live with the embedding
//! application.

pub mod end_turn;
pub mod propose;
pub mod read_files;
pub mod set_output;
pub mod spawn_agents;

pub use end_turn::EndTurnTool;
pub use propose::{ProposeStrReplaceTool, ProposeWriteFileTool};
pub use read_files::ReadFilesTool;
pub use set_output::SetOutputTool;
pub use spawn_agents::SpawnAgentsTool;

use crate::tool::ToolRegistry;

/// Paths skipped by default when file-tree tools consume a workspace.
pub const DEFAULT_IGNORED_PATHS: &[&str] = &[
    ".git",
    ".env",
    ".env.*",
    "*.min.*",
    "node_modules",
    "venv",
    ".venv",
    "__pycache__",
    "*.egg-info",
    "*.pyc",
    ".DS_Store",
    "target",
    "dist",
    ".cache",
    "*.lock",
    "package-lock.json",
];

/// Returns `true` if any path component matches a default-ignored pattern.
#[must_use]
pub fn is_default_ignored(path: &str) -> bool {
    path.split('/')
        .filter(|component| !component.is_empty())
        .any(|component| {
            DEFAULT_IGNORED_PATHS
                .iter()
                .any(|pattern| matches_pattern(pattern, component))
        })
}

/// Single-`*` glob match against one path component.
fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

/// The registry of every built-in tool.
#[must_use]
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EndTurnTool);
    registry.register(SetOutputTool);
    registry.register(SpawnAgentsTool);
    registry.register(ReadFilesTool);
    registry.register(ProposeWriteFileTool);
    registry.register(ProposeStrReplaceTool);
    registry
}

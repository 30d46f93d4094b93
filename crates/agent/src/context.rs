//! Context builder for the fixed system prompt
//!
//! Runs once at startup. The resulting [`SystemContext`] is immutable for the
//! rest of the process.

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use autoloop_config::Config;

use crate::{AgentError, Result};

/// Instructions text, workspace inventory, and the prompt rendered from them
#[derive(Debug, Clone)]
pub struct SystemContext {
    instructions: String,
    files: Vec<String>,
    prompt: String,
}

impl SystemContext {
    pub fn new(instructions: impl Into<String>, files: Vec<String>) -> Self {
        let instructions = instructions.into();
        let prompt = ContextBuilder::render_prompt(&instructions, &files);
        Self {
            instructions,
            files,
            prompt,
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Builds the [`SystemContext`] for a workspace
pub struct ContextBuilder {
    workspace: PathBuf,
}

impl ContextBuilder {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
        }
    }

    /// Build using the paths and limits in `config`
    pub async fn from_config(config: &Config) -> Result<SystemContext> {
        let builder = Self::new(config.workspace_root());
        let fallback = config.fallback_path();
        builder
            .build(
                &config.instructions_path(),
                fallback.as_deref(),
                config.instructions.max_bytes,
                config.workspace.max_files,
            )
            .await
    }

    /// Load the instructions and snapshot the workspace.
    ///
    /// Fails only when no instructions can be read, even after copying the
    /// alternate file over the primary path.
    pub async fn build(
        &self,
        instructions_path: &Path,
        alternate_path: Option<&Path>,
        max_doc_bytes: u64,
        max_files: usize,
    ) -> Result<SystemContext> {
        let instructions =
            Self::load_instructions(instructions_path, alternate_path, max_doc_bytes).await?;
        let files = self.snapshot_workspace(max_files);
        info!(
            "◆ CONTEXT READY: {} BYTES OF INSTRUCTIONS, {} FILES",
            instructions.len(),
            files.len()
        );
        Ok(SystemContext::new(instructions, files))
    }

    /// Read the instructions, falling back to copying `alternate_path` into place
    pub async fn load_instructions(
        path: &Path,
        alternate_path: Option<&Path>,
        max_bytes: u64,
    ) -> Result<String> {
        if let Some(text) = read_capped(path, max_bytes).await {
            return Ok(text);
        }

        if let Some(alternate) = alternate_path.filter(|p| p.is_file()) {
            info!("◆ {:?} UNAVAILABLE, COPYING FROM {:?}", path, alternate);
            match copy_lossy(alternate, path).await {
                Ok(()) => {
                    if let Some(text) = read_capped(path, max_bytes).await {
                        return Ok(text);
                    }
                }
                Err(e) => warn!("◆ COPY FROM {:?} FAILED: {}", alternate, e),
            }
        }

        Err(AgentError::InstructionsUnavailable(path.to_path_buf()))
    }

    /// Relative file paths under the workspace, in traversal order
    pub fn snapshot_workspace(&self, max_files: usize) -> Vec<String> {
        WalkDir::new(&self.workspace)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.workspace)
                    .ok()
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .take(max_files)
            .collect()
    }

    /// Render the system prompt
    pub fn render_prompt(instructions: &str, files: &[String]) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");

        format!(
            r#"You are a fully autonomous software agent. Do not ask the user for approval.
Read the instructions and the workspace below, then repeat plan -> implement -> execute -> observe -> self-correct until the acceptance criteria and completion conditions are met. Destructive commands are forbidden and will be skipped.

Session started: {now}

--- INSTRUCTIONS ---
{instructions}
--- END INSTRUCTIONS ---

--- WORKSPACE FILES ({count}) ---
{file_list}
--- END WORKSPACE FILES ---

Always reply with a single JSON object:
{{
  "reason": "summary of your decision",
  "commands": [
    {{"shell": "a concrete shell command", "allowFail": false}}
  ],
  "successCriteria": ["how to confirm the step worked"],
  "next": "done | continue"
}}

Never ask questions. Make every command concrete and produce verifiable results.
Set "next" to "done" only when every acceptance criterion is met."#,
            now = now,
            instructions = instructions,
            count = files.len(),
            file_list = files.join("\n"),
        )
    }
}

/// `None` for missing, unreadable, or empty files. Oversized files yield a
/// sentinel instead of their content.
async fn read_capped(path: &Path, max_bytes: u64) -> Option<String> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() {
        return None;
    }

    if meta.len() > max_bytes {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        warn!("◆ {} EXCEEDS {} BYTES, SKIPPING CONTENT", name, max_bytes);
        return Some(too_large_marker(&name));
    }

    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Err(e) => {
            debug!("Failed to read {:?}: {}", path, e);
            None
        }
    }
}

/// Stand-in text for an instructions file over the size cap
pub fn too_large_marker(name: &str) -> String {
    format!("[[SKIP: {} too large]]", name)
}

async fn copy_lossy(from: &Path, to: &Path) -> std::io::Result<()> {
    let bytes = tokio::fs::read(from).await?;
    let text = String::from_utf8_lossy(&bytes);
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(to, text.as_bytes()).await
}

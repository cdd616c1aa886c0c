pub mod decrypt;
pub mod mux;

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("required tool not found: {0}")]
    Missing(String),
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("{tool} exited with {status:?}: {stderr}")]
    Failed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("invalid key format: {0}")]
    InvalidKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program).args(args).output().await
    }
}

/// External binaries the pipeline shells out to.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub mp4decrypt: PathBuf,
    pub packager: PathBuf,
    pub mkvmerge: PathBuf,
    pub ffmpeg: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            mp4decrypt: PathBuf::from("mp4decrypt"),
            packager: PathBuf::from("packager"),
            mkvmerge: PathBuf::from("mkvmerge"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl ToolPaths {
    /// Startup probe: every tool the configured run needs must resolve, so
    /// a missing binary fails fast instead of mid-job.
    pub async fn ensure_available(&self, tools: &[&PathBuf]) -> ToolResult<()> {
        for tool in tools {
            if !resolvable(tool).await {
                return Err(ToolError::Missing(tool.display().to_string()));
            }
        }
        Ok(())
    }
}

async fn resolvable(tool: &Path) -> bool {
    if tool.is_absolute() || tool.components().count() > 1 {
        return tool.exists();
    }
    Command::new(tool.as_os_str())
        .arg("--help")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok()
}

pub(crate) fn check_output(tool: &Path, output: Output) -> ToolResult<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(ToolError::Failed {
        tool: tool.display().to_string(),
        status: output.status.code(),
        stderr,
    })
}

pub(crate) async fn run_tool(
    executor: &Arc<dyn CommandExecutor>,
    tool: &Path,
    args: &[String],
) -> ToolResult<()> {
    let output = executor
        .run(tool, args)
        .await
        .map_err(|source| ToolError::Spawn {
            tool: tool.display().to_string(),
            source,
        })?;
    check_output(tool, output)
}

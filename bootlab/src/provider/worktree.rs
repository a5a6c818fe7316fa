//! Per-board git worktrees.
//!
//! Building a specific commit happens in an isolated worktree keyed by board
//! name, so several boards can sit at different commits of one repository.
//! A worktree is created once and reset on every reuse; it is never removed
//! here.

use super::layout::BuildLayout;
use super::runner::{ToolCommand, ToolOutput, ToolRunner};
use bootlab_shared::errors::{BootlabError, BootlabResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A patch to apply on top of the selected commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchSource {
    /// Patch file on the lab host.
    File(PathBuf),
    /// Patch text, written to a temporary file before applying.
    Inline(String),
}

impl PatchSource {
    pub fn describe(&self) -> String {
        match self {
            PatchSource::File(path) => path.display().to_string(),
            PatchSource::Inline(text) => format!("<inline patch, {} bytes>", text.len()),
        }
    }
}

/// A checked-out worktree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Worktree {
    pub board: String,
    pub path: PathBuf,
}

/// Creates, resets and patches per-board worktrees.
pub struct Worktrees {
    layout: BuildLayout,
    runner: Arc<dyn ToolRunner>,
    /// One lock per board; held across worktree setup and the build using it.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Worktrees {
    pub fn new(layout: BuildLayout, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            layout,
            runner,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Take the per-board lock.
    pub async fn lock(&self, board: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(board.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Check if a worktree exists for `board`.
    pub fn exists(&self, board: &str) -> bool {
        self.layout.worktree_path(board).exists()
    }

    /// Make sure there is a clean worktree for `board` at `commit`.
    ///
    /// Creates the worktree if absent, otherwise hard-resets it, then checks
    /// out `commit` (hash or branch name).
    pub async fn setup(&self, board: &str, commit: &str) -> BootlabResult<Worktree> {
        let workdirs = self.layout.workdirs();
        let path = self.layout.worktree_path(board);

        if !path.exists() {
            std::fs::create_dir_all(workdirs).map_err(|e| {
                BootlabError::Config(format!(
                    "failed to create workdirs {}: {}",
                    workdirs.display(),
                    e
                ))
            })?;
            tracing::info!(workdir = %path.display(), "Setting up worktree");
            let cmd = ToolCommand::new("git")
                .arg("-C")
                .path_arg(self.layout.repository())
                .args(["worktree", "add", "--detach"])
                .path_arg(&path)
                .current_dir(workdirs);
            self.git(board, cmd).await?;
        } else {
            tracing::info!(workdir = %path.display(), "Resetting worktree");
            let cmd = ToolCommand::new("git")
                .arg("-C")
                .path_arg(&path)
                .args(["reset", "--hard"])
                .current_dir(workdirs);
            self.git(board, cmd).await?;
        }

        self.select_commit(board, commit).await?;

        Ok(Worktree {
            board: board.to_string(),
            path,
        })
    }

    /// Check out `commit` in the board's worktree.
    pub async fn select_commit(&self, board: &str, commit: &str) -> BootlabResult<()> {
        let path = self.layout.worktree_path(board);
        tracing::info!(board, commit, "Checking out commit");
        let cmd = ToolCommand::new("git")
            .arg("-C")
            .path_arg(&path)
            .args(["checkout", commit]);
        self.git(board, cmd).await?;
        Ok(())
    }

    /// Apply `patch` inside `worktree`.
    ///
    /// On failure any in-progress patch application is aborted and the
    /// worktree is hard-reset before the error is returned, so it is never
    /// left half-patched.
    pub async fn apply_patch(&self, worktree: &Worktree, patch: &PatchSource) -> BootlabResult<()> {
        let board = worktree.board.as_str();
        tracing::info!(board, patch = %patch.describe(), "Applying patch");

        // Inline patches need a file for git; keep it alive until applied.
        let (patch_path, _inline_file) = match patch {
            PatchSource::File(path) => (path.clone(), None),
            PatchSource::Inline(text) => {
                let file = write_patch_file(text).map_err(|e| BootlabError::PatchApplyFailed {
                    board: board.to_string(),
                    patch: patch.describe(),
                    output: format!("failed to write patch file: {}", e),
                })?;
                (file.path().to_path_buf(), Some(file))
            }
        };

        let cmd = ToolCommand::new("git")
            .arg("-C")
            .path_arg(&worktree.path)
            .arg("apply")
            .path_arg(&patch_path);

        let failure = match self.runner.run(&cmd).await {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => output.combined(),
            Err(e) => format!("failed to run {}: {}", cmd, e),
        };

        self.abort_patch(&worktree.path).await;

        Err(BootlabError::PatchApplyFailed {
            board: board.to_string(),
            patch: patch.describe(),
            output: failure,
        })
    }

    /// Abort and clean after a failed patch. Failures are logged, not raised,
    /// so the original patch error reaches the caller.
    async fn abort_patch(&self, path: &Path) {
        let abort = ToolCommand::new("git")
            .arg("-C")
            .path_arg(path)
            .args(["am", "--abort"]);
        match self.runner.run(&abort).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                tracing::debug!(output = %output.combined().trim(), "No patch session to abort")
            }
            Err(e) => tracing::warn!("Failed to run {}: {}", abort, e),
        }

        let reset = ToolCommand::new("git")
            .arg("-C")
            .path_arg(path)
            .args(["reset", "--hard"]);
        match self.runner.run(&reset).await {
            Ok(output) if output.success() => {
                tracing::warn!(workdir = %path.display(), "Patch failed; worktree reset")
            }
            Ok(output) => tracing::warn!(
                workdir = %path.display(),
                output = %output.combined().trim(),
                "Failed to reset worktree after patch failure"
            ),
            Err(e) => tracing::warn!("Failed to run {}: {}", reset, e),
        }
    }

    async fn git(&self, board: &str, cmd: ToolCommand) -> BootlabResult<ToolOutput> {
        run_checked(self.runner.as_ref(), board, &cmd).await
    }
}

/// Run `cmd`, mapping spawn failures and non-zero exit to `ToolInvocationFailed`.
pub(crate) async fn run_checked(
    runner: &dyn ToolRunner,
    board: &str,
    cmd: &ToolCommand,
) -> BootlabResult<ToolOutput> {
    let output = runner
        .run(cmd)
        .await
        .map_err(|e| BootlabError::ToolInvocationFailed {
            board: board.to_string(),
            command: cmd.to_string(),
            status: "not started".to_string(),
            output: e.to_string(),
        })?;

    if !output.success() {
        return Err(BootlabError::ToolInvocationFailed {
            board: board.to_string(),
            command: cmd.to_string(),
            status: output.status(),
            output: output.combined(),
        });
    }
    Ok(output)
}

fn write_patch_file(text: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("bootlab-")
        .suffix(".patch")
        .tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}

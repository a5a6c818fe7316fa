//! U-Boot build provider.
//!
//! Produces (or locates) the directory of build artifacts for a board.
//! Builds are incremental and run through an external build tool
//! (buildman by default); a specific commit is built in a per-board worktree,
//! optionally with a patch applied on top.

mod layout;
mod runner;
mod worktree;

pub use layout::{BuildLayout, SourceOrigin};
pub use runner::{HostRunner, ToolCommand, ToolOutput, ToolRunner};
pub use worktree::{PatchSource, Worktree, Worktrees};

use crate::options::ProviderOptions;
use bootlab_shared::constants::{build, envs};
use bootlab_shared::errors::{BootlabError, BootlabResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use worktree::run_checked;

/// What to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRequest {
    /// U-Boot board name, e.g. "gurnard".
    pub board: String,
    /// Commit (hash or branch) to build in the board's worktree.
    pub commit: Option<String>,
    /// Patch applied on top of `commit`.
    pub patch: Option<PatchSource>,
    /// Only generate the configuration.
    pub config_only: bool,
}

impl BuildRequest {
    pub fn new(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            commit: None,
            patch: None,
            config_only: false,
        }
    }

    pub fn commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn patch(mut self, patch: PatchSource) -> Self {
        self.patch = Some(patch);
        self
    }

    pub fn config_only(mut self) -> Self {
        self.config_only = true;
        self
    }
}

/// Artifacts of a successful build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildResult {
    /// Build output directory, e.g. `/tmp/b/orangepi_pc`.
    pub build_path: PathBuf,
    /// Secondary blob directory (e.g. secure firmware) the image was built from.
    pub blob_dir: Option<PathBuf>,
}

impl BuildResult {
    /// All directories making up this result.
    pub fn dirs(&self) -> Vec<&Path> {
        let mut dirs = vec![self.build_path.as_path()];
        if let Some(blob_dir) = &self.blob_dir {
            dirs.push(blob_dir);
        }
        dirs
    }
}

/// Information a test harness may query about the build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildInfo {
    Board,
    BuildDir,
    SourceDir,
    /// Path of the generated `.config` (runs a config-only build).
    ConfigFile,
    SplBannerTimes,
}

impl FromStr for BuildInfo {
    type Err = BootlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "board" => Ok(BuildInfo::Board),
            "build_dir" => Ok(BuildInfo::BuildDir),
            "source_dir" => Ok(BuildInfo::SourceDir),
            "config_file" => Ok(BuildInfo::ConfigFile),
            "spl_banner_times" => Ok(BuildInfo::SplBannerTimes),
            _ => Err(BootlabError::Config(format!("unknown build info '{}'", s))),
        }
    }
}

/// Builds U-Boot for boards.
pub struct BuildProvider {
    options: ProviderOptions,
    layout: BuildLayout,
    runner: Arc<dyn ToolRunner>,
    worktrees: Worktrees,
}

impl BuildProvider {
    /// Create a provider that runs tools on the lab host.
    pub fn new(options: ProviderOptions) -> Self {
        Self::with_runner(options, Arc::new(HostRunner))
    }

    /// Create a provider with a custom tool runner.
    pub fn with_runner(options: ProviderOptions, runner: Arc<dyn ToolRunner>) -> Self {
        let layout = BuildLayout::new(&options);
        let worktrees = Worktrees::new(layout.clone(), runner.clone());
        Self {
            options,
            layout,
            runner,
            worktrees,
        }
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    pub fn worktrees(&self) -> &Worktrees {
        &self.worktrees
    }

    /// Board actually built for a request naming `board`.
    pub fn board(&self, board: &str) -> String {
        self.options
            .board_override
            .clone()
            .unwrap_or_else(|| board.to_string())
    }

    /// Path of the build output for `board`, without building.
    pub fn get_build_path(&self, board: &str) -> PathBuf {
        self.layout.build_path(&self.board(board))
    }

    /// Build U-Boot.
    ///
    /// Performs an incremental build for the requested board and returns the
    /// directory holding the build output. Only one build per board runs at
    /// a time within this provider.
    pub async fn build(&self, request: &BuildRequest) -> BootlabResult<BuildResult> {
        if request.board.is_empty() {
            return Err(BootlabError::Config("board name must not be empty".into()));
        }
        let board = self.board(&request.board);
        let build_path = self.layout.build_path(&board);

        let _guard = self.worktrees.lock(&board).await;

        let (mut cwd, origin) = self.layout.source_path();
        let mut detail = origin.describe().to_string();

        if let Some(commit) = &request.commit {
            let worktree = self.worktrees.setup(&board, commit).await?;
            cwd = worktree.path.clone();
            detail = SourceOrigin::Worktree.describe().to_string();
            if let Some(patch) = &request.patch {
                self.worktrees.apply_patch(&worktree, patch).await?;
                detail.push_str(" with patch");
            }
        } else if request.patch.is_some() {
            tracing::warn!(board = %board, "Ignoring patch: no commit requested");
        }

        tracing::info!("Building U-Boot {} for {}", detail, board);
        let command = self.build_command(&board, &build_path, request.config_only, &cwd);
        let output = self.run_build(&board, command).await?;
        self.check_output(&board, &output)?;
        self.collect_result(&board, build_path)
    }

    /// Answer a build information query for `board`.
    pub async fn query_info(&self, board: &str, info: BuildInfo) -> BootlabResult<Option<String>> {
        let board = self.board(board);
        let value = match info {
            BuildInfo::Board => Some(board),
            BuildInfo::BuildDir => Some(self.layout.build_path(&board).display().to_string()),
            BuildInfo::SourceDir => Some(self.layout.source_path().0.display().to_string()),
            BuildInfo::ConfigFile => {
                let result = self.build(&BuildRequest::new(board).config_only()).await?;
                Some(
                    result
                        .build_path
                        .join(build::CONFIG_FILE)
                        .display()
                        .to_string(),
                )
            }
            BuildInfo::SplBannerTimes => self.options.spl_banner_times.map(|n| n.to_string()),
        };
        Ok(value)
    }

    fn build_command(
        &self,
        board: &str,
        build_path: &Path,
        config_only: bool,
        cwd: &Path,
    ) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.options.tool)
            .arg("-o")
            .path_arg(build_path)
            .arg("-w")
            .args(["--board", board])
            .args(["-W", "-ve"])
            .current_dir(cwd);
        if config_only {
            cmd = cmd.arg("--config-only");
        }
        if self.options.do_clean {
            cmd = cmd.arg(&self.options.fallback_flag);
        }
        if let Some(bl31) = &self.options.bl31 {
            cmd = cmd.env(envs::BL31, bl31.display().to_string());
        }
        if let Some(indir) = &self.options.binman_indir {
            cmd = cmd.env(envs::BINMAN_INDIRS, indir.display().to_string());
        }
        cmd
    }

    /// Run the build, retrying once with the fallback flag if the tool does
    /// not understand the primary one.
    async fn run_build(&self, board: &str, command: ToolCommand) -> BootlabResult<ToolOutput> {
        let primary = command.clone().arg(&self.options.primary_flag);
        tracing::debug!(cwd = ?primary.cwd, cmd = %primary, "Invoking build tool");

        let output = self.runner.run(&primary).await.map_err(|e| {
            BootlabError::ToolInvocationFailed {
                board: board.to_string(),
                command: primary.to_string(),
                status: "not started".to_string(),
                output: e.to_string(),
            }
        })?;
        if output.success() {
            return Ok(output);
        }

        let text = output.combined();
        if !text.contains(&self.options.unsupported_flag_pattern) {
            return Err(BootlabError::ToolInvocationFailed {
                board: board.to_string(),
                command: primary.to_string(),
                status: output.status(),
                output: text,
            });
        }

        tracing::info!(
            "{} does not support {}; retrying with {}",
            self.options.tool,
            self.options.primary_flag,
            self.options.fallback_flag
        );
        let fallback = command.arg(&self.options.fallback_flag);
        run_checked(self.runner.as_ref(), board, &fallback).await
    }

    /// Scan build output for the non-functional marker.
    fn check_output(&self, board: &str, output: &ToolOutput) -> BootlabResult<()> {
        let marker = self.options.non_functional_marker.as_str();
        let mut fail = None;
        for line in output.combined().lines() {
            if !marker.is_empty() && line.contains(marker) {
                fail = Some(line.to_string());
            }
            tracing::debug!(target: "bootlab::build", "{}", line);
        }
        match fail {
            Some(line) => Err(BootlabError::NonFunctionalArtifact {
                board: board.to_string(),
                line,
            }),
            None => Ok(()),
        }
    }

    fn collect_result(&self, board: &str, build_path: PathBuf) -> BootlabResult<BuildResult> {
        if !is_populated(&build_path) {
            return Err(BootlabError::MissingArtifacts {
                board: board.to_string(),
                path: build_path,
            });
        }
        let blob_dir = self.options.binman_indir.clone();
        if let Some(dir) = &blob_dir
            && !dir.is_dir()
        {
            return Err(BootlabError::MissingArtifacts {
                board: board.to_string(),
                path: dir.clone(),
            });
        }
        Ok(BuildResult {
            build_path,
            blob_dir,
        })
    }
}

fn is_populated(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(build_base: &Path) -> BuildProvider {
        BuildProvider::new(ProviderOptions {
            build_base: build_base.to_path_buf(),
            bl31: Some(PathBuf::from("/fw/bl31.elf")),
            ..Default::default()
        })
    }

    #[test]
    fn test_build_command_shape() {
        let provider = provider(Path::new("/tmp/b"));
        let cmd = provider.build_command("gurnard", Path::new("/tmp/b/gurnard"), true, Path::new("/src"));
        assert_eq!(
            cmd.to_string(),
            "buildman -o /tmp/b/gurnard -w --board gurnard -W -ve --config-only"
        );
        assert_eq!(cmd.cwd.as_deref(), Some(Path::new("/src")));
        assert_eq!(cmd.envs, vec![("BL31".to_string(), "/fw/bl31.elf".to_string())]);
    }

    #[test]
    fn test_board_override() {
        let mut options = ProviderOptions {
            build_base: PathBuf::from("/tmp/b"),
            ..Default::default()
        };
        options.board_override = Some("rpi_4".into());
        let provider = BuildProvider::new(options);
        assert_eq!(provider.board("rpi_3"), "rpi_4");
        assert_eq!(provider.get_build_path("rpi_3"), PathBuf::from("/tmp/b/rpi_4"));
    }

    #[test]
    fn test_check_output_detects_marker() {
        let provider = provider(Path::new("/tmp/b"));
        let output = ToolOutput {
            code: Some(0),
            stdout: "Building\nImage 'u-boot' is non-functional\nDone\n".into(),
            stderr: String::new(),
        };
        let err = provider.check_output("sandbox", &output).unwrap_err();
        assert!(matches!(
            err,
            BootlabError::NonFunctionalArtifact { ref line, .. } if line == "Image 'u-boot' is non-functional"
        ));
    }

    #[test]
    fn test_collect_result_requires_populated_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider = provider(dir.path());
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert!(matches!(
            provider.collect_result("x", empty.clone()),
            Err(BootlabError::MissingArtifacts { .. })
        ));

        std::fs::write(empty.join("u-boot.bin"), b"\0").unwrap();
        let result = provider.collect_result("x", empty.clone()).unwrap();
        assert_eq!(result.dirs(), vec![empty.as_path()]);
    }

    #[test]
    fn test_build_info_from_str() {
        assert_eq!("config-file".parse::<BuildInfo>().unwrap(), BuildInfo::ConfigFile);
        assert_eq!("build_dir".parse::<BuildInfo>().unwrap(), BuildInfo::BuildDir);
        assert!("kernel".parse::<BuildInfo>().is_err());
    }
}

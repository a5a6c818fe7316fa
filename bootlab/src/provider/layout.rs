//! Path resolution for builds and worktrees.

use crate::options::ProviderOptions;
use std::path::{Path, PathBuf};

/// Where a source tree came from, for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    /// `U_BOOT_SOURCE_DIR` (the test system's own checkout).
    Environment,
    /// The configured source repository.
    SourceDir,
    /// A per-board worktree.
    Worktree,
}

impl SourceOrigin {
    pub fn describe(&self) -> &'static str {
        match self {
            SourceOrigin::Environment => "in pytest-source dir",
            SourceOrigin::SourceDir => "in sourcedir",
            SourceOrigin::Worktree => "in workdir",
        }
    }
}

/// Build directory layout.
///
/// ```text
/// <build_base>/
/// └── <board>/          # build output (unless overridden)
/// <workdirs>/
/// └── <board>/          # git worktree, one per board
/// ```
#[derive(Clone, Debug)]
pub struct BuildLayout {
    build_dir: Option<PathBuf>,
    env_build_dir: Option<PathBuf>,
    build_base: PathBuf,
    env_source_dir: Option<PathBuf>,
    source_dir: PathBuf,
    workdirs: PathBuf,
}

impl BuildLayout {
    pub fn new(options: &ProviderOptions) -> Self {
        Self {
            build_dir: options.build_dir.clone(),
            env_build_dir: options.env_build_dir.clone(),
            build_base: options.build_base.clone(),
            env_source_dir: options.env_source_dir.clone(),
            source_dir: options.source_dir.clone(),
            workdirs: options.workdirs.clone(),
        }
    }

    /// Build output directory for `board`.
    ///
    /// Precedence: explicit override, then environment override, then
    /// `<build_base>/<board>`.
    pub fn build_path(&self, board: &str) -> PathBuf {
        self.build_dir
            .clone()
            .or_else(|| self.env_build_dir.clone())
            .unwrap_or_else(|| self.build_base.join(board))
    }

    /// Source tree to build from when no commit is requested.
    pub fn source_path(&self) -> (PathBuf, SourceOrigin) {
        match &self.env_source_dir {
            Some(dir) => (dir.clone(), SourceOrigin::Environment),
            None => (self.source_dir.clone(), SourceOrigin::SourceDir),
        }
    }

    /// Repository that worktrees are created from.
    pub fn repository(&self) -> &Path {
        &self.source_dir
    }

    /// Directory holding all worktrees.
    pub fn workdirs(&self) -> &Path {
        &self.workdirs
    }

    /// Worktree directory for `board`.
    pub fn worktree_path(&self, board: &str) -> PathBuf {
        self.workdirs.join(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ProviderOptions {
        ProviderOptions {
            build_base: PathBuf::from("/tmp/b"),
            workdirs: PathBuf::from("/tmp/w"),
            source_dir: PathBuf::from("/src/u-boot"),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_path_defaults_to_base_and_board() {
        let layout = BuildLayout::new(&options());
        assert_eq!(layout.build_path("gurnard"), PathBuf::from("/tmp/b/gurnard"));
    }

    #[test]
    fn test_env_override_beats_default() {
        let mut opts = options();
        opts.env_build_dir = Some(PathBuf::from("/env/build"));
        let layout = BuildLayout::new(&opts);
        assert_eq!(layout.build_path("gurnard"), PathBuf::from("/env/build"));
    }

    #[test]
    fn test_explicit_override_beats_env() {
        let mut opts = options();
        opts.env_build_dir = Some(PathBuf::from("/env/build"));
        opts.build_dir = Some(PathBuf::from("/explicit"));
        let layout = BuildLayout::new(&opts);
        assert_eq!(layout.build_path("gurnard"), PathBuf::from("/explicit"));
    }

    #[test]
    fn test_source_path_precedence() {
        let layout = BuildLayout::new(&options());
        assert_eq!(
            layout.source_path(),
            (PathBuf::from("/src/u-boot"), SourceOrigin::SourceDir)
        );

        let mut opts = options();
        opts.env_source_dir = Some(PathBuf::from("/pytest/src"));
        let layout = BuildLayout::new(&opts);
        assert_eq!(
            layout.source_path(),
            (PathBuf::from("/pytest/src"), SourceOrigin::Environment)
        );
        // Worktrees are always created from the configured repository
        assert_eq!(layout.repository(), Path::new("/src/u-boot"));
    }

    #[test]
    fn test_worktree_path_is_keyed_by_board() {
        let layout = BuildLayout::new(&options());
        assert_eq!(layout.worktree_path("rpi_4"), PathBuf::from("/tmp/w/rpi_4"));
    }
}

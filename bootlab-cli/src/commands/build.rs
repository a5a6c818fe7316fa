use bootlab::{BuildProvider, BuildRequest, PatchSource};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Build this commit in the board's worktree
    #[arg(short, long)]
    pub commit: Option<String>,

    /// Patch to apply on top of --commit
    #[arg(short, long, requires = "commit")]
    pub patch: Option<PathBuf>,

    /// Only generate the configuration
    #[arg(long)]
    pub config_only: bool,

    /// Start from a clean build directory
    #[arg(long)]
    pub clean: bool,
}

pub async fn execute(args: BuildArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let mut options = global.load_options()?;
    let board = global.board(&options)?;
    if args.clean {
        options.provider.do_clean = true;
    }
    let provider = BuildProvider::new(options.provider);

    let mut request = BuildRequest::new(board);
    if let Some(commit) = args.commit {
        request = request.commit(commit);
    }
    if let Some(patch) = args.patch {
        request = request.patch(PatchSource::File(patch));
    }
    if args.config_only {
        request = request.config_only();
    }

    let result = provider.build(&request).await?;
    for dir in result.dirs() {
        println!("{}", dir.display());
    }
    Ok(())
}

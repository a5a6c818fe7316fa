use bootlab::BuildInfo;
use clap::Args;

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// One of: board, build-dir, source-dir, config-file, spl-banner-times
    pub what: String,
}

pub async fn execute(args: InfoArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let info: BuildInfo = args.what.parse()?;
    let (provider, board) = global.create_provider()?;

    match provider.query_info(&board, info).await? {
        Some(value) => println!("{}", value),
        None => tracing::debug!("{} is not configured", args.what),
    }
    Ok(())
}

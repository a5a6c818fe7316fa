use clap::Args;

#[derive(Args, Debug)]
pub struct BuildPathArgs {}

pub async fn execute(_args: BuildPathArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let (provider, board) = global.create_provider()?;
    println!("{}", provider.get_build_path(&board).display());
    Ok(())
}

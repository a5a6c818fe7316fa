mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = bootlab::util::init_logging(cli.global.log_dir.as_deref(), cli.global.debug)?;

    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &cli.global).await,
        Commands::BuildPath(args) => commands::build_path::execute(args, &cli.global).await,
        Commands::Info(args) => commands::info::execute(args, &cli.global).await,
        Commands::Methods(args) => commands::methods::execute(args, &cli.global).await,
        Commands::Resolve(args) => commands::resolve::execute(args, &cli.global).await,
        Commands::Console(args) => commands::console::execute(args, &cli.global).await,
        Commands::Completion(args) => commands::completion::execute(args),
    }
}

use crate::commands;
use anyhow::Context;
use bootlab::{BootlabOptions, BuildProvider};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bootlab", version, about = "Build, flash and talk to U-Boot boards")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build U-Boot for the board and print the output directory
    Build(commands::build::BuildArgs),
    /// Print the build output directory without building
    BuildPath(commands::build_path::BuildPathArgs),
    /// Print one piece of build information
    Info(commands::info::InfoArgs),
    /// List the registered write methods
    Methods(commands::methods::MethodsArgs),
    /// Show what a write method would write (or send) from a build directory
    Resolve(commands::resolve::ResolveArgs),
    /// Attach the terminal to a serial console bridge
    Console(commands::console::ConsoleArgs),
    /// Generate shell completions
    Completion(commands::completion::CompletionArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// YAML configuration file
    #[arg(long, global = true, env = "BOOTLAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Write logs to daily files in this directory instead of stderr
    #[arg(long, global = true, env = "BOOTLAB_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// U-Boot board name
    #[arg(short, long, global = true, env = "BOOTLAB_BOARD")]
    pub board: Option<String>,

    /// Build output directory, overriding every other setting
    #[arg(long, global = true)]
    pub build_dir: Option<PathBuf>,
}

impl GlobalFlags {
    /// Load the configuration file (if any), then apply the environment and
    /// command-line overrides.
    pub fn load_options(&self) -> anyhow::Result<BootlabOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_yaml::from_str::<BootlabOptions>(&text)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            None => BootlabOptions::default(),
        };

        options.provider = options.provider.with_env();
        if let Some(board) = &self.board {
            options.strategy.board = board.clone();
        }
        if let Some(dir) = &self.build_dir {
            options.provider.build_dir = Some(dir.clone());
        }
        Ok(options)
    }

    /// Board from `--board` or the configuration file.
    pub fn board(&self, options: &BootlabOptions) -> anyhow::Result<String> {
        if options.strategy.board.is_empty() {
            anyhow::bail!("no board given; pass --board or set strategy.board in the config file");
        }
        Ok(options.strategy.board.clone())
    }

    pub fn create_provider(&self) -> anyhow::Result<(BuildProvider, String)> {
        let options = self.load_options()?;
        let board = self.board(&options)?;
        Ok((BuildProvider::new(options.provider), board))
    }
}

/// Output format for listings.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Print `rows` as JSON or YAML. Returns `false` for table output, which
    /// each command renders itself.
    pub fn print_structured<T: serde::Serialize>(self, rows: &T) -> anyhow::Result<bool> {
        match self {
            OutputFormat::Table => Ok(false),
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(rows)?);
                Ok(true)
            }
            OutputFormat::Yaml => {
                print!("{}", serde_yaml::to_string(rows)?);
                Ok(true)
            }
        }
    }
}

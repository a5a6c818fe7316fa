use crate::cli::OutputFormat;
use bootlab::writer::WriteTarget;
use bootlab::{BuildProvider, ImageWriter, WriterOptions};
use clap::Args;
use comfy_table::{Table, presets};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Write method, e.g. "sunxi"
    pub method: String,

    /// Build directory; defaults to the board's build path
    pub dir: Option<PathBuf>,

    /// Show the USB send sequence instead of the storage write
    #[arg(long)]
    pub send: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct StageRow {
    role: &'static str,
    source: String,
    target: String,
}

pub async fn execute(args: ResolveArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = global.load_options()?;
    let dir = match args.dir {
        Some(dir) => dir,
        None => {
            let board = global.board(&options)?;
            BuildProvider::new(options.provider.clone()).get_build_path(&board)
        }
    };

    let writer = ImageWriter::new(WriterOptions {
        method: args.method,
        ..options.writer
    })?;

    let rows = if args.send {
        send_rows(&writer, &dir)?
    } else {
        write_rows(&writer, &dir)?
    };

    if args.format.print_structured(&rows)? {
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_header(vec!["ROLE", "SOURCE", "TARGET"]);
    for row in &rows {
        table.add_row(vec![row.role, row.source.as_str(), row.target.as_str()]);
    }
    println!("{table}");
    Ok(())
}

fn write_rows(writer: &ImageWriter, dir: &std::path::Path) -> anyhow::Result<Vec<StageRow>> {
    let spec = writer.resolve_write(dir)?;
    Ok(spec
        .stages
        .into_iter()
        .map(|stage| StageRow {
            role: stage.role,
            source: stage.source.display().to_string(),
            target: describe_target(&stage.target),
        })
        .collect())
}

fn send_rows(writer: &ImageWriter, dir: &std::path::Path) -> anyhow::Result<Vec<StageRow>> {
    let plan = writer.resolve_send(dir)?;
    Ok(plan
        .into_iter()
        .map(|step| StageRow {
            role: step.role,
            source: step
                .source
                .map(|s| s.display().to_string())
                .unwrap_or_else(|| "(built-in)".to_string()),
            target: match step.phase {
                Some(phase) => format!("usb ({})", phase),
                None => "usb".to_string(),
            },
        })
        .collect())
}

fn describe_target(target: &WriteTarget) -> String {
    match target {
        WriteTarget::Image(image) => {
            let count = image
                .count
                .map(|c| format!(" count {}", c))
                .unwrap_or_default();
            format!(
                "raw @{} (seek {} bs {}{})",
                image.byte_offset(),
                image.seek,
                image.block_size,
                count
            )
        }
        WriteTarget::Files(files) => {
            format!("partition {}:{}", files.partition, files.dest.display())
        }
        WriteTarget::Emulator => "spi flash emulator".to_string(),
    }
}

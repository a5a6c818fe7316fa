use crate::cli::OutputFormat;
use bootlab::writer;
use clap::Args;
use comfy_table::{Table, presets};
use serde::Serialize;

#[derive(Args, Debug)]
pub struct MethodsArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct MethodRow {
    name: &'static str,
    write: bool,
    send: bool,
    description: &'static str,
}

pub async fn execute(args: MethodsArgs, _global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let rows: Vec<MethodRow> = writer::available_methods()
        .into_iter()
        .map(|m| MethodRow {
            name: m.name,
            write: m.can_write(),
            send: m.can_send(),
            description: m.description,
        })
        .collect();

    if args.format.print_structured(&rows)? {
        return Ok(());
    }

    let yes_no = |b: bool| if b { "yes" } else { "-" };
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_header(vec!["METHOD", "WRITE", "SEND", "DESCRIPTION"]);
    for row in &rows {
        table.add_row(vec![
            row.name,
            yes_no(row.write),
            yes_no(row.send),
            row.description,
        ]);
    }
    println!("{table}");
    Ok(())
}

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

use assembler::{
    assemble_urls, Assembly, AssemblerFailure, Fail, FileLoader, IoFailed, Options,
};
use base::prelude::split_halves;
use debugger::Debugger;

/// Assemble MACRO-10 diagnostic sources into a 36-bit word image.
#[derive(Parser, Debug)]
#[command(name = "macro10")]
struct Cli {
    /// Source files or URLs; several names, or one `;`-separated list
    #[arg(required = true)]
    sources: Vec<String>,

    /// Address the image is loaded at (octal)
    #[arg(long, default_value = "0")]
    load_address: String,

    /// Option letters; `p` preprocesses only
    #[arg(long, default_value = "")]
    options: String,

    /// File the listing is written to (stdout when absent)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_octal(text: &str) -> Result<u64, String> {
    u64::from_str_radix(text, 8).map_err(|_| format!("'{text}' is not an octal number"))
}

fn write_listing(assembly: &Assembly, out: &mut dyn Write) -> std::io::Result<()> {
    for (index, word) in assembly.words.iter().enumerate() {
        let (left, right) = split_halves(*word);
        writeln!(
            out,
            "{:06o}\t{left:06o},,{right:06o}",
            assembly.load_address + index as u64,
        )?;
    }
    if let Some(start) = assembly.start {
        writeln!(out, "start\t{start:06o}")?;
    }
    Ok(())
}

fn output_failure(path: &PathBuf, error: std::io::Error) -> Fail {
    Fail::AsmFail(AssemblerFailure::Io(IoFailed {
        target: path.display().to_string(),
        error,
    }))
}

fn run_assembler() -> Result<(), Fail> {
    // See the tracing-subscriber documentation for how to select
    // which trace messages get printed (RUST_LOG and friends).
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Fail::InitialisationFailure(format!(
                "failed to initialise tracing filter (perhaps there is a problem with environment variables): {e}"
            )));
        }
        Ok(layer) => layer,
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let cli = Cli::parse();
    let load_address = parse_octal(&cli.load_address).map_err(Fail::InitialisationFailure)?;
    let options = Options::from_letters(&cli.options);
    let url_list = cli.sources.join(";");

    let span = span!(Level::ERROR, "assemble", sources = %url_list);
    let _enter = span.enter();

    let mut host = Debugger::new();
    let assembly = assemble_urls(
        &url_list,
        Some(load_address),
        &options,
        &mut host,
        &FileLoader,
    )
    .map_err(Fail::AsmFail)?;
    event!(
        Level::INFO,
        "assembled {} words at {:o}",
        assembly.words.len(),
        assembly.load_address
    );

    match &cli.output {
        Some(path) => {
            let file = File::create(path).map_err(|e| output_failure(path, e))?;
            let mut writer = BufWriter::new(file);
            write_listing(&assembly, &mut writer)
                .and_then(|()| writer.flush())
                .map_err(|e| output_failure(path, e))?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            write_listing(&assembly, &mut lock).map_err(|e| {
                Fail::AsmFail(AssemblerFailure::Io(IoFailed {
                    target: "stdout".to_string(),
                    error: e,
                }))
            })?;
        }
    }
    Ok(())
}

fn main() {
    match run_assembler() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tacjit::backend::elf::write_executable;
use tacjit::backend::OutputFormat;
use tacjit::config::BuildConfig;
use tacjit::diagnostic::Diagnostic;
use tacjit::{CompileError, CompileOptions, Compiled};

const USAGE: &str = "usage: tacjit <ast-file> <output-file> [--format elf|raw] [--ir PATH] [--asm PATH]\n       tacjit <ast-file> --run|--interpret [--input N...]";

#[derive(Parser)]
#[command(
    name = "tacjit",
    version,
    about = "Compile a serialized AST to x86-64 machine code"
)]
struct Cli {
    /// Serialized AST (JSON)
    input: Option<PathBuf>,
    /// Output file (ELF executable or raw code)
    output: Option<PathBuf>,
    /// Output format: elf or raw
    #[arg(long, default_value = "elf")]
    format: String,
    /// Write the IR dump to PATH
    #[arg(long, value_name = "PATH")]
    ir: Option<PathBuf>,
    /// Write the assembly listing to PATH
    #[arg(long, value_name = "PATH")]
    asm: Option<PathBuf>,
    /// Build configuration (default: nearest tacjit.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Entry function
    #[arg(long)]
    entry: Option<String>,
    /// Bytes reserved for frames
    #[arg(long, value_name = "BYTES")]
    data_stack: Option<u64>,
    /// Skip the control-flow verifier
    #[arg(long)]
    no_verify: bool,
    /// Compile and run the entry function in this process
    #[arg(long, conflicts_with = "interpret")]
    run: bool,
    /// Run the entry function with the reference interpreter
    #[arg(long)]
    interpret: bool,
    /// Values read by IN when running
    #[arg(long = "input", value_name = "N", num_args = 1.., allow_negative_numbers = true)]
    input_values: Vec<i64>,
    /// More logging (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "tacjit=debug",
        _ => "tacjit=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(input) = cli.input.clone() else {
        println!("{}", USAGE);
        return;
    };
    if cli.output.is_none() && !cli.run && !cli.interpret {
        println!("{}", USAGE);
        return;
    }

    let source = std::fs::read_to_string(&input).unwrap_or_default();
    let filename = input.display().to_string();
    if let Err(err) = run(&cli, &input) {
        Diagnostic::from(&err).render(&filename, &source);
        process::exit(1);
    }
}

fn options(cli: &Cli, input: &Path) -> Result<CompileOptions, CompileError> {
    let config = match &cli.config {
        Some(path) => Some(BuildConfig::load(path)?),
        None => input
            .parent()
            .and_then(BuildConfig::find)
            .map(|p| BuildConfig::load(&p))
            .transpose()?,
    };
    let mut options = config.unwrap_or_default().apply(CompileOptions::default());
    if let Some(entry) = &cli.entry {
        options.entry = entry.clone();
    }
    if let Some(bytes) = cli.data_stack {
        options.data_stack_bytes = bytes;
    }
    if cli.no_verify {
        options.verify_cfg = false;
    }
    Ok(options)
}

fn run(cli: &Cli, input: &Path) -> Result<(), CompileError> {
    let options = options(cli, input)?;

    if cli.interpret {
        let (_, ast) = tacjit::ast::reader::read_ast(input)?;
        let (value, output) =
            tacjit::interpret(&ast, &options.entry, &[], cli.input_values.iter().copied())?;
        for v in output {
            println!("{}", v);
        }
        println!("=> {}", value);
        return Ok(());
    }

    let (_, compiled) = tacjit::compile_file(input, &options)?;
    if let Some(path) = &cli.ir {
        std::fs::write(path, compiled.ir_dump())?;
        info!(path = %path.display(), "wrote IR dump");
    }

    if cli.run {
        return run_in_process(&compiled, cli);
    }

    let Some(output) = &cli.output else {
        return Ok(());
    };
    let format: OutputFormat = cli.format.parse()?;
    let trace = cli.asm.is_some();
    let image = match format {
        OutputFormat::Elf => {
            let (elf, image) = compiled.executable(trace)?;
            write_executable(output, &elf)?;
            image
        }
        OutputFormat::Raw => {
            let image = compiled.raw(trace)?;
            std::fs::write(output, &image.bytes)?;
            info!(path = %output.display(), bytes = image.bytes.len(), "wrote raw code");
            image
        }
    };
    if let Some(path) = &cli.asm {
        std::fs::write(path, image.trace_text())?;
        info!(path = %path.display(), "wrote assembly listing");
    }
    Ok(())
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
fn run_in_process(compiled: &Compiled, cli: &Cli) -> Result<(), CompileError> {
    let mut session = compiled.jit(cli.input_values.iter().copied())?;
    let value = session.call(&compiled.options.entry, &[])?;
    for v in session.output() {
        println!("{}", v);
    }
    println!("=> {}", value);
    Ok(())
}

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
fn run_in_process(_compiled: &Compiled, _cli: &Cli) -> Result<(), CompileError> {
    Err(CompileError::Config(
        "--run needs an x86-64 Linux host".to_string(),
    ))
}

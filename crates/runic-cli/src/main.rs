use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

mod error;
use error::CliError;

use runic_codegen::CodegenOptions;
use runic_interp::Interpreter;
use runic_rules::{ParseContext, Spellbook};
use runic_runtime::{merge_descriptions, SliceReader};

#[derive(Parser, Debug)]
#[command(name = "runic")]
#[command(about = "Identify files with magic rules, or compile the rules away", long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Identify a target file against a rule corpus
    Identify {
        /// Rule file or directory of rule files
        rules: PathBuf,
        /// The file to identify
        target: PathBuf,
        /// Treat the first malformed rule line as an error
        #[arg(long)]
        strict: bool,
    },

    /// Compile a rule corpus into a standalone Rust evaluator
    Compile {
        /// Rule file or directory of rule files
        rules: PathBuf,
        /// Where the generated source goes
        #[arg(short, long, value_name = "OUT")]
        output: PathBuf,
        /// Generated rules print their source line as they match
        #[arg(long)]
        chatty: bool,
        /// Keep rule source lines as comments in the output
        #[arg(long)]
        comments: bool,
        /// Crate path the generated code imports its runtime from
        #[arg(long, default_value = "runic_runtime")]
        runtime: String,
        /// Treat the first malformed rule line as an error
        #[arg(long)]
        strict: bool,
    },
}

fn load_book(rules: &PathBuf, strict: bool) -> Result<Spellbook, CliError> {
    let ctx = if strict {
        ParseContext::strict()
    } else {
        ParseContext::new()
    };
    let mut book = Spellbook::new();
    ctx.parse_path(rules, &mut book)?;
    log::debug!("parsed {} rules", book.rule_count());
    Ok(book)
}

fn run_identify(rules: PathBuf, target: PathBuf, strict: bool) -> Result<(), CliError> {
    let book = load_book(&rules, strict)?;

    let data = fs::read(&target).map_err(|source| CliError::Io {
        path: target.clone(),
        source,
    })?;
    let reader = SliceReader::new(&data);

    let out = Interpreter::new(&book).identify(&reader);
    let merged = merge_descriptions(&out);
    if merged.is_empty() {
        println!("{}: (unknown)", target.display());
    } else {
        println!("{}: {}", target.display(), merged);
    }
    Ok(())
}

fn run_compile(
    rules: PathBuf,
    output: PathBuf,
    chatty: bool,
    comments: bool,
    runtime: String,
    strict: bool,
) -> Result<(), CliError> {
    let start = Instant::now();
    let book = load_book(&rules, strict)?;

    let opts = CodegenOptions {
        chatty,
        comments,
        runtime_path: runtime,
    };
    let size = runic_codegen::compile(&book, &output, &opts)?;

    println!("Generated into: {}", output.display());
    println!(
        "Generated code is {:.2} KiB, compiled in {:?}",
        size as f64 / 1024.0,
        start.elapsed()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("RUNIC_LOG", "warn")).init();

    let args = Args::parse();
    let result = match args.command {
        Command::Identify {
            rules,
            target,
            strict,
        } => run_identify(rules, target, strict),
        Command::Compile {
            rules,
            output,
            chatty,
            comments,
            runtime,
            strict,
        } => run_compile(rules, output, chatty, comments, runtime, strict),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("runic: {error}");
            ExitCode::FAILURE
        }
    }
}

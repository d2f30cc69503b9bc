use std::{io::Write, path::PathBuf, process::exit};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use dango::{
    bytecode::{self, cache::Cache, Code},
    lexer, parser,
    source::File,
    vm::{self, Vm},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// More logging on stderr; repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile (or load from the cache) and run a script.
    Run {
        file: PathBuf,
        #[arg(long, env = "DANGO_CACHE_DIR")]
        cache_dir: Option<PathBuf>,
        #[arg(long)]
        no_cache: bool,
        #[arg(long, default_value_t = vm::DEFAULT_MAX_CALL_DEPTH)]
        max_call_depth: usize,
        #[arg(
            long,
            default_value_t = vm::DEFAULT_PRECISION,
            value_parser = clap::value_parser!(u64).range(1..=vm::MAX_PRECISION)
        )]
        precision: u64,
    },
    /// Write the cache entry for a script.
    Compile {
        file: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the instruction stream.
    Disasm { file: PathBuf },
    /// Print the token sequence.
    Tokens { file: PathBuf },
    /// Print the syntax tree.
    Ast { file: PathBuf },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Front-end failures end the process here; they are reported without a
/// stack dump.
fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", e);
    exit(1);
}

fn compile_file(file: &File) -> Code {
    debug!(file = %file.name(), "compiling");
    dango::build(&file.source).unwrap_or_else(|e| fail(e))
}

fn load(path: PathBuf) -> anyhow::Result<File> {
    File::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn run(path: PathBuf, cache: Option<Cache>, config: vm::Config) -> anyhow::Result<()> {
    let file = load(path)?;

    let cached = match &cache {
        Some(cache) => cache.load(&file)?,
        None => None,
    };
    let code = match cached {
        Some(code) => code,
        None => {
            let code = compile_file(&file);
            if let Some(cache) = &cache {
                let path = cache.store(&file, &code)?;
                info!(?path, "cached bytecode");
            }
            code
        }
    };

    let mut vm = Vm::new(config);
    let res = vm.execute(&code);
    vm.stdout.flush().context("flushing stdout")?;
    if let Err(e) = res {
        eprintln!("Error: {}\n", e);
        eprintln!("Stack:");
        for v in vm.stack.iter() {
            eprintln!("  {:?}", v)
        }
        exit(1);
    }
    Ok(())
}

fn compile(path: PathBuf, out: Option<PathBuf>) -> anyhow::Result<()> {
    let file = load(path)?;
    let code = compile_file(&file);
    let text = bytecode::cache::encode(&file, &code)?;
    match out {
        Some(out) => std::fs::write(&out, text)
            .with_context(|| format!("writing {}", out.display()))?,
        None => println!("{}", text),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Run {
            file,
            cache_dir,
            no_cache,
            max_call_depth,
            precision,
        } => {
            let cache =
                (!no_cache).then(|| Cache::new(cache_dir.unwrap_or_else(Cache::default_dir)));
            let config = vm::Config {
                max_call_depth,
                precision,
            };
            run(file, cache, config)
        }
        Commands::Compile { file, out } => compile(file, out),
        Commands::Disasm { file } => {
            let code = compile_file(&load(file)?);
            print!("{}", code);
            Ok(())
        }
        Commands::Tokens { file } => {
            let file = load(file)?;
            for token in lexer::tokenize(&file.source) {
                println!("{token}");
            }
            Ok(())
        }
        Commands::Ast { file } => {
            let file = load(file)?;
            let tokens = lexer::tokenize(&file.source);
            let program = parser::parse(&tokens).unwrap_or_else(|e| fail(e));
            println!("{:#?}", program);
            Ok(())
        }
    }
}

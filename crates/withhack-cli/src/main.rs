use std::{fs, path::PathBuf, process::ExitCode, time::Instant};

use clap::Parser;
use withhack::{
    DEFAULT_MAX_RECURSION_DEPTH, NoopTracer, RunResult, Runner, Scope, StderrTracer, StdPrint, Value, VmConfig,
};

/// Run a script with the with-hack recipes available as builtins.
#[derive(Debug, Parser)]
#[command(name = "withhack", version, about)]
struct Cli {
    /// Script to run.
    #[arg(default_value = "example.py")]
    script: PathBuf,

    /// Log every executed instruction to stderr.
    #[arg(long)]
    trace: bool,

    /// Maximum call depth before RecursionError is raised.
    #[arg(long, default_value_t = DEFAULT_MAX_RECURSION_DEPTH)]
    max_depth: usize,

    /// Do not register the recipe constructors (CaptureFunction, namespace, ...).
    #[arg(long)]
    no_recipes: bool,

    /// Print the disassembled module code before running it.
    #[arg(long)]
    dump_code: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.script) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", cli.script.display());
            return ExitCode::FAILURE;
        }
    };
    let script_name = cli.script.display().to_string();
    let runner = match Runner::new(source, &script_name) {
        Ok(runner) => runner.with_recipes(!cli.no_recipes),
        Err(err) => {
            eprintln!("error:\n{}", err.into_exception());
            return ExitCode::FAILURE;
        }
    };
    if cli.dump_code {
        print!("{}", runner.code().disassemble());
    }

    let config = VmConfig::new().max_recursion_depth(cli.max_depth);
    let globals = Scope::new();
    let start = Instant::now();
    let result = if cli.trace {
        runner.run_with(&globals, config, StderrTracer::new(), &mut StdPrint).0
    } else {
        runner.run_with(&globals, config, NoopTracer, &mut StdPrint).0
    };
    report(result, start)
}

fn report(result: RunResult<Value>, start: Instant) -> ExitCode {
    let elapsed = start.elapsed();
    match result {
        Ok(Value::None) => {
            log::info!("finished after {elapsed:?}");
            ExitCode::SUCCESS
        }
        Ok(value) => {
            log::info!("finished after {elapsed:?}");
            println!("{}", value.repr());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}

//! The `rego` command line.
//!
//! `rego -q <query> [-d FILE]... [-i INPUT] [-l LEVEL] [-w] [-a DIR]
//! [--strict-builtin-errors]`
//!
//! `.json` data files load as base-document data; everything else loads
//! as a policy module. Results print to stdout as JSON; compile and
//! evaluation errors print to stderr and exit non-zero.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use regolith::{Interpreter, RegoError};

struct Args {
    query: String,
    data_paths: Vec<PathBuf>,
    input_path: Option<PathBuf>,
    log_level: Option<String>,
    wf_checks: bool,
    ast_dir: Option<PathBuf>,
    strict_builtin_errors: bool,
}

const USAGE: &str = "usage: rego -q <query> [-d FILE]... [-i INPUT] [-l LEVEL] [-w] [-a DIR] [--strict-builtin-errors]";

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        query: String::new(),
        data_paths: Vec::new(),
        input_path: None,
        log_level: None,
        wf_checks: false,
        ast_dir: None,
        strict_builtin_errors: false,
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-q" | "--query" => {
                args.query = iter.next().ok_or("missing query after -q")?;
            }
            "-d" | "--data" => {
                args.data_paths.push(PathBuf::from(iter.next().ok_or("missing path after -d")?));
            }
            "-i" | "--input" => {
                args.input_path = Some(PathBuf::from(iter.next().ok_or("missing path after -i")?));
            }
            "-l" | "--log-level" => {
                args.log_level = Some(iter.next().ok_or("missing level after -l")?);
            }
            "-w" | "--wf" => args.wf_checks = true,
            "-a" | "--ast" => {
                args.ast_dir = Some(PathBuf::from(iter.next().ok_or("missing directory after -a")?));
            }
            "--strict-builtin-errors" => args.strict_builtin_errors = true,
            "-h" | "--help" => return Err(USAGE.to_owned()),
            other => {
                // a bare first positional is the query, as a convenience
                if args.query.is_empty() && !other.starts_with('-') {
                    args.query = other.to_owned();
                } else {
                    return Err(format!("unknown argument `{other}`\n{USAGE}"));
                }
            }
        }
    }

    if args.query.is_empty() {
        return Err(USAGE.to_owned());
    }
    Ok(args)
}

fn init_logging(level: Option<&str>) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        let filter = match level.to_ascii_lowercase().as_str() {
            "none" | "off" => log::LevelFilter::Off,
            "error" => log::LevelFilter::Error,
            "warn" | "warning" => log::LevelFilter::Warn,
            "info" | "output" => log::LevelFilter::Info,
            "debug" => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        builder.filter_level(filter);
    }
    let _ = builder.try_init();
}

fn run(args: &Args) -> Result<String, RegoError> {
    let mut interpreter = Interpreter::new();
    interpreter.set_wf_checks_enabled(args.wf_checks);
    interpreter.set_strict_builtin_errors(args.strict_builtin_errors);
    if let Some(dir) = &args.ast_dir {
        interpreter.set_debug_dir(dir);
    }

    if let Some(path) = &args.input_path {
        interpreter.set_input_json_file(path)?;
    }
    for path in &args.data_paths {
        if path.extension().is_some_and(|ext| ext == "json") {
            interpreter.add_data_json_file(path)?;
        } else {
            interpreter.add_module_file(path)?;
        }
    }

    interpreter.query(&args.query)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(args.log_level.as_deref());

    match run(&args) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(RegoError::Eval(errors)) => {
            eprintln!("{}", errors.to_json());
            ExitCode::FAILURE
        }
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

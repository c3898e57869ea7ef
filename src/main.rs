//! nealisp CLI entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nealisp::environment::Sink;
use nealisp::testing::{TestSelection, TestStatus};
use nealisp::{Config, Evaluator, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nealisp")]
#[command(about = "Run s-expression scripts and their test suites")]
struct Cli {
    /// Maximum form nesting during evaluation (0 disables the check)
    #[arg(long, global = true, default_value_t = nealisp::DEFAULT_MAX_EVAL_DEPTH)]
    max_depth: usize,

    /// Maximum number of evaluated forms
    #[arg(long, global = true)]
    step_limit: Option<u64>,

    /// Write diagnostics and debuglog output to stderr instead of stdout
    #[arg(long, global = true)]
    stderr: bool,

    /// Register a module from a file, as NAME=PATH (repeatable)
    #[arg(short, long = "module", global = true, value_parser = parse_module_arg)]
    modules: Vec<(String, PathBuf)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script and print its final value
    Run {
        /// Script file
        file: PathBuf,

        /// JSON object whose entries are bound as variables
        #[cfg(feature = "json")]
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Run the tests defined in a script
    Test {
        /// Script file
        file: PathBuf,

        /// Only run these tests (repeatable)
        #[arg(long, conflicts_with = "except")]
        only: Vec<String>,

        /// Skip these tests (repeatable)
        #[arg(long)]
        except: Vec<String>,
    },

    /// Parse a script and report syntax errors without running it
    Check {
        /// Script file
        file: PathBuf,
    },
}

fn parse_module_arg(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_owned(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got '{arg}'")),
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn load_program(path: &Path) -> Result<nealisp::Program, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(nealisp::parser::parse(&source_name(path), &text)?)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("nealisp=warn".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config {
        max_depth: (cli.max_depth > 0).then_some(cli.max_depth),
        step_limit: cli.step_limit,
        default_sink: if cli.stderr { Sink::Stderr } else { Sink::Stdout },
    };
    let mut evaluator = Evaluator::with_standard_bindings(config);
    for (name, path) in &cli.modules {
        info!(module = %name, path = %path.display(), "loading module");
        evaluator.register_module(name, load_program(path)?)?;
    }

    match cli.command {
        Commands::Run {
            file,
            #[cfg(feature = "json")]
            input,
        } => {
            let program = load_program(&file)?;
            let frame = evaluator.gen_bindings();

            #[cfg(feature = "json")]
            if let Some(input) = input {
                let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&input)?)?;
                let Some(object) = json.as_object() else {
                    return Err(format!("{} must contain a JSON object", input.display()).into());
                };
                nealisp::host::bind_json(&frame, object);
            }

            let result = evaluator.execute_program(&frame, &program);
            if !matches!(result, Value::Nil) {
                println!("{result}");
            }
        }

        Commands::Test { file, only, except } => {
            let program = load_program(&file)?;
            let selection = if !only.is_empty() {
                TestSelection::Only(only)
            } else if !except.is_empty() {
                TestSelection::Except(except)
            } else {
                TestSelection::All
            };

            let suite = evaluator.run_tests(&program, &source_name(&file), selection);
            for result in &suite.results {
                println!("test {} ... {}", result.name, result.status);
                if result.status == TestStatus::Failed {
                    for failure in &result.failures {
                        println!("    {failure}");
                    }
                    for line in result.output.lines() {
                        println!("    | {line}");
                    }
                }
            }
            println!(
                "\n{}: {} passed; {} failed; {} skipped; finished in {:.2?}",
                suite.name,
                suite.passed(),
                suite.failed(),
                suite.skipped(),
                suite.duration
            );
            if !suite.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Check { file } => {
            let program = load_program(&file)?;
            println!("{}: {} top-level forms", program.source_name(), program.nodes.len());
        }
    }

    Ok(ExitCode::SUCCESS)
}

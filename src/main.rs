//! ATE CLI
//!
//! Command-line interface for running data-driven API test suites.

use clap::{Parser, Subcommand};
use colored::*;
use ate::{
    env, template, AteError, FunctionRegistry, Map, ProjectConfig, ReqwestClient, Runner, Summary,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ate")]
#[command(version)]
#[command(about = "ATE - run API test suites described as YAML/JSON", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level: error, warn, info, debug or trace
    #[arg(long = "log-level", global = true, default_value = "warn", env = "ATE_LOG")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the testsets in a file or directory
    ///
    /// Examples:
    ///   ate run tests/testcases
    ///   ate run tests/testcases/login.yml --var user_agent=ios/10.3
    ///   ate run tests --base-url http://127.0.0.1:5000 --json
    Run {
        /// Test file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Project root holding ate.toml (default: current directory)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,

        /// .env file to load instead of the configured one
        #[arg(long = "dot-env", value_name = "FILE")]
        dot_env: Option<PathBuf>,

        /// Override a config variable in every testset
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Prefix for relative request urls
        #[arg(long = "base-url", value_name = "URL")]
        base_url: Option<String>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load and expand testsets without sending requests
    Check {
        /// Test file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Project root holding ate.toml (default: current directory)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            path,
            project,
            dot_env,
            vars,
            base_url,
            json,
        } => run_tests(&path, project, dot_env, &vars, base_url, json),
        Commands::Check {
            path,
            project,
            json,
        } => check_tests(&path, project, json),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str) {
    let level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::WARN);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_project(project: Option<PathBuf>) -> anyhow::Result<ProjectConfig> {
    let root = project.unwrap_or_else(|| PathBuf::from("."));
    Ok(ProjectConfig::discover(&root)?)
}

/// `KEY=VALUE` pairs, values coerced like template literals.
fn parse_overrides(vars: &[String]) -> anyhow::Result<Map> {
    let mut overrides = Map::new();
    for var in vars {
        let Some((key, value)) = var.split_once('=') else {
            anyhow::bail!("--var expects KEY=VALUE, got '{}'", var);
        };
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("--var has an empty key: '{}'", var);
        }
        overrides.insert(key.to_string(), template::coerce(value));
    }
    Ok(overrides)
}

fn run_tests(
    path: &Path,
    project: Option<PathBuf>,
    dot_env: Option<PathBuf>,
    vars: &[String],
    base_url: Option<String>,
    json: bool,
) -> anyhow::Result<bool> {
    let config = load_project(project)?;

    match dot_env {
        Some(file) => {
            env::load_dot_env(&file)?;
        }
        None if config.dot_env.is_file() => {
            env::load_dot_env(&config.dot_env)?;
        }
        None => {}
    }

    let overrides = parse_overrides(vars)?;
    let client = ReqwestClient::new()?;
    let mut runner =
        Runner::new(client, &config, FunctionRegistry::with_builtins()).with_base_url(base_url);

    let summary = runner.run_path(path, &overrides)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(summary.success)
}

fn print_summary(summary: &Summary) {
    for testset in &summary.testsets {
        println!("{} {}", testset.name.bold(), format!("({})", testset.path).dimmed());

        if let Some(error) = &testset.error {
            println!("  {} {}", "✗".red(), error.red());
        }
        for step in &testset.steps {
            let label = if step.iteration > 1 {
                format!("{} #{}", step.name, step.iteration)
            } else {
                step.name.clone()
            };
            if step.passed {
                println!("  {} {}", "✓".green(), label);
            } else {
                println!("  {} {}", "✗".red(), label);
                if let Some(error) = &step.error {
                    println!("    {}", error.red());
                }
            }
        }
        if !testset.output.is_empty() {
            for (name, value) in &testset.output {
                println!("  {} {} = {}", "→".cyan(), name, value.to_text());
            }
        }
        println!();
    }

    let stats = &summary.stats;
    let line = format!(
        "{} testsets, {} steps: {} passed, {} failed",
        stats.testsets, stats.steps, stats.passed, stats.failed
    );
    if summary.success {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.red().bold());
    }
}

fn check_tests(path: &Path, project: Option<PathBuf>, json: bool) -> anyhow::Result<bool> {
    let config = load_project(project)?;
    let client = ReqwestClient::new()?;
    let runner = Runner::new(client, &config, FunctionRegistry::with_builtins());

    let definitions = runner.catalog().populate()?;
    let reports = runner.check_path(path)?;
    let clean = reports.iter().all(|r| r.errors.is_empty());

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(clean);
    }

    println!("{} definitions loaded", definitions);
    for report in &reports {
        if report.errors.is_empty() {
            println!(
                "{} {} ({} steps)",
                "✓".green(),
                report.path,
                report.steps
            );
        } else {
            println!("{} {}", "✗".red(), report.path);
            for error in &report.errors {
                println!("    {}", error.red());
            }
        }
    }
    if reports.is_empty() {
        return Err(AteError::params(format!("no testsets found in {}", path.display())).into());
    }
    Ok(clean)
}

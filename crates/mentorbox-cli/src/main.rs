//! Mentorbox CLI
//!
//! A command-line tool for running learner submissions in the mentorbox sandbox.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mentorbox::capability::SAFE_MODULES;
use mentorbox::{Config, EXAMPLE_CONFIG, ExecutionRequest, Language, Sandbox};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mentorbox")]
#[command(about = "A tool for running learner code in a restricted interpreter")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: mentorbox.toml)
        #[arg(short, long, default_value = "mentorbox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a submission and report the result
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Declared language of the submission
        #[arg(short, long, default_value = "python")]
        language: String,

        /// Wall clock budget in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Module the submission may import (repeatable; replaces the
        /// configured set)
        #[arg(short, long = "allow", value_name = "MODULE")]
        allow: Vec<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a submission for syntax errors without running it
    Check {
        /// Source file to check
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },

    /// List importable modules
    Modules,

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run {
            source,
            language,
            timeout,
            allow,
            json,
        } => run_submission(config, &source, language, timeout, allow, json).await,
        Commands::Check { source } => check_submission(&source).await,
        Commands::Modules => {
            list_modules(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_submission(
    config: Config,
    source: &Path,
    language: String,
    timeout: Option<f64>,
    allow: Vec<String>,
    json: bool,
) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let mut request = ExecutionRequest::python(code).with_language(language);
    if let Some(seconds) = timeout {
        request = request.with_timeout(seconds);
    }
    if !allow.is_empty() {
        request = request.with_allowed_modules(allow);
    }

    let sandbox = Sandbox::new(config).context("invalid configuration")?;
    info!(language = %request.language, "running submission");
    let result = sandbox
        .execute(&request)
        .await
        .context("execution failed")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&result).context("failed to serialize result")?;
        println!("{rendered}");
    } else {
        print!("{}", result.stdout());
        if !result.stderr().is_empty() {
            eprint!("{}", result.stderr());
        } else if let Some(detail) = result.error_detail() {
            eprintln!("{detail}");
        }
    }

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(
        status = result.status().label(),
        elapsed = format_args!("{:.3}s", result.elapsed_seconds()),
        return_value = result.return_value(),
        "execution result"
    );

    if result.succeeded() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn check_submission(source: &Path) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let check = mentorbox::validate_syntax(&code);
    match check.error {
        None => {
            println!("Syntax OK");
            Ok(())
        }
        Some(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}

fn list_modules(config: &Config) {
    println!("Importable modules:\n");

    let enabled = config.effective_modules(None);
    for name in SAFE_MODULES {
        let state = if enabled.contains(name) {
            "enabled"
        } else {
            "available"
        };
        println!("  {name:<15} ({state})");
    }

    let language = Language::Python;
    println!();
    println!(
        "Language: {} (aliases: {})",
        language,
        language.aliases().join(", ")
    );
}

fn show_config(config: &Config) {
    let limits = config.effective_limits(None);
    println!("Resource limits:");
    println!("  Timeout: {:.3}s", limits.timeout().as_secs_f64());
    println!("  Max output: {} bytes", limits.output_limit());
    println!("  Max recursion depth: {}", limits.recursion_limit());
    println!("  Max collection length: {}", limits.collection_limit());
    println!("  Cancel grace: {} ms", limits.cancel_grace().as_millis());
    println!();
    println!(
        "Default modules: {}",
        config.effective_modules(None).join(", ")
    );
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}

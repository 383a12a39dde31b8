// kubenlp Gateway - Main Entry Point
//
// This binary wraps the gateway library:
// - HTTP service (serve)
// - One-shot translate and execute (run)
// - Raw command execution (exec)
// - Policy checks (check)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kubenlp_gateway::config::Config;
use kubenlp_gateway::error::GatewayError;
use kubenlp_gateway::server;
use kubenlp_gateway::tools::{CommandGateway, ExecutionResult};
use kubenlp_gateway::translator::translate_command;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// kubenlp: natural-language Kubernetes command gateway
#[derive(Parser, Debug)]
#[command(name = "kubenlp")]
#[command(version)]
#[command(about = "Translate plain-English requests into allow-listed kubectl commands", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a config file (default: ~/.config/kubenlp/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Translate a request, then validate and execute it once
    Run {
        /// Plain-English request
        nlp: String,
    },
    /// Validate and execute a command without translation
    Exec {
        /// Command text, without the leading binary name
        command: String,
    },
    /// Check a command against the verb policy without running it
    Check {
        /// Command text, without the leading binary name
        command: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command-line arguments
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::load().context("Failed to load config")?,
    };

    init_tracing(&config, args.verbose)?;

    match args.command {
        Some(Commands::Serve { host, port }) => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            info!("kubenlp gateway v{} starting...", env!("CARGO_PKG_VERSION"));
            server::start_server(&config).await?;
        }
        Some(Commands::Run { nlp }) => {
            let translator = config.translator.build()?;
            let command = translate_command(translator.as_ref(), &nlp).await?;
            info!("Translated {:?} -> {:?}", nlp, command);

            let gateway = CommandGateway::new(config.gateway.to_gateway_config());
            print_result(&gateway.execute(&command).await?)?;
        }
        Some(Commands::Exec { command }) => {
            let gateway = CommandGateway::new(config.gateway.to_gateway_config());
            print_result(&gateway.execute(&command).await?)?;
        }
        Some(Commands::Check { command }) => {
            let gateway = CommandGateway::new(config.gateway.to_gateway_config());
            return Ok(check_command(&gateway, &command));
        }
        None => {
            println!("No command specified. Use \"kubenlp --help\" for usage.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Initialize tracing on stderr so stdout stays clean for results
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}

fn print_result(result: &ExecutionResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

fn check_command(gateway: &CommandGateway, command: &str) -> ExitCode {
    match gateway.check(command) {
        Ok(validated) => {
            println!("allowed: {}", validated.verb());
            ExitCode::SUCCESS
        }
        Err(GatewayError::PolicyViolation { verb, allowed, .. }) => {
            println!("rejected: {} (allowed: {})", verb, allowed.join(", "));
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

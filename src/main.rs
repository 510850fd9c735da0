//! orc - Object Remote Call command-line client
//!
//! Connects to an application server, runs one call or a session probe, and
//! prints the outcome.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orc_client::config::{self, Config};
use orc_client::{CallRequest, Endpoint, EndpointError, TypeRegistry, TypedValue};

/// orc - Object Remote Call client
#[derive(Parser, Debug)]
#[command(name = "orc")]
#[command(version = "0.1.0")]
#[command(about = "Invoke methods on objects hosted by an ORC application server", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Server host, overrides the configuration
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port, overrides the configuration
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Establish a session and end it again
    Ping,

    /// Invoke a method on a remote object
    Call {
        /// Object identifier
        #[arg(short, long)]
        object: String,

        /// Method name
        #[arg(short, long)]
        method: String,

        /// Parameter as kind:value (int32, int64, double, bool, string, bytes, void)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<TypedValue>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };
    if let Some(host) = cli.host {
        config.endpoint.host = host;
    }
    if let Some(port) = cli.port {
        config.endpoint.port = port;
    }

    match cli.command {
        Commands::Ping => run_ping(&config).await?,
        Commands::Call { object, method, params } => {
            let request = CallRequest::new(object, method).with_params(params);
            run_call(&config, request).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

async fn run_ping(config: &Config) -> anyhow::Result<()> {
    let endpoint = Endpoint::from_config(config, TypeRegistry::new());
    let session_id = endpoint
        .connect()
        .await
        .with_context(|| format!("No session with {}", endpoint.remote()))?;

    println!("Session {} established with {}", session_id, endpoint.remote());
    endpoint.disconnect().await?;
    Ok(())
}

async fn run_call(config: &Config, request: CallRequest) -> anyhow::Result<()> {
    let endpoint = Endpoint::from_config(config, TypeRegistry::new());
    endpoint
        .connect()
        .await
        .with_context(|| format!("No session with {}", endpoint.remote()))?;

    let outcome = endpoint.perform_call(request).await;
    if let Err(e) = endpoint.disconnect().await {
        tracing::debug!("Disconnect failed: {}", e);
    }

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&result_json(&value))?);
            Ok(())
        }
        Err(EndpointError::Application(failure)) => {
            let fields: serde_json::Map<String, serde_json::Value> = failure
                .fields
                .iter()
                .map(|(id, value)| (id.to_string(), result_json(value)))
                .collect();
            let report = serde_json::json!({
                "error": failure.code,
                "description": failure.description,
                "fields": fields,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            anyhow::bail!("Call failed with code {}", failure.code)
        }
        Err(e) => Err(e.into()),
    }
}

fn result_json(typed: &TypedValue) -> serde_json::Value {
    serde_json::json!({
        "type": typed.data_type.to_string(),
        "value": typed.value.as_ref().map_or(serde_json::Value::Null, |v| v.to_json()),
    })
}

/// Parse `kind:value` into a typed parameter
fn parse_param(arg: &str) -> Result<TypedValue, String> {
    let (kind, raw) = arg.split_once(':').unwrap_or((arg, ""));
    let invalid = |e: String| format!("invalid {} parameter '{}': {}", kind, raw, e);

    match kind {
        "int32" | "i32" => raw.parse().map(TypedValue::int32).map_err(|e| invalid(e.to_string())),
        "int64" | "i64" => raw.parse().map(TypedValue::int64).map_err(|e| invalid(e.to_string())),
        "double" | "f64" => raw.parse().map(TypedValue::double).map_err(|e| invalid(e.to_string())),
        "bool" => raw.parse().map(TypedValue::bool).map_err(|e| invalid(e.to_string())),
        "string" | "str" => Ok(TypedValue::string(raw)),
        "bytes" => parse_hex(raw).map(TypedValue::byte_array).map_err(invalid),
        "void" => Ok(TypedValue::void()),
        other => Err(format!("unknown parameter kind '{}'", other)),
    }
}

fn parse_hex(raw: &str) -> Result<Vec<u8>, String> {
    if raw.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| {
            raw.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("bad hex at offset {}", i))
        })
        .collect()
}

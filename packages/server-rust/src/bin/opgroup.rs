//! `opgroup` command-line front end over the built-in group catalog.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use opgroup_core::{load_config, Arguments, ConfigError, ErrorKind, ExecutionRequest};
use opgroup_server::builtin_catalog;
use opgroup_server::service::{bootstrap, BootstrapError, Bootstrapped, Dispatcher};
use opgroup_server::telemetry::{self, LogFormat, TelemetryConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "OPGROUP_LOG", default_value = "info", global = true)]
    log_filter: String,
    #[arg(long, value_enum, env = "OPGROUP_LOG_FORMAT", default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every operation the configuration exposes, as JSON
    List { config: PathBuf },
    /// Dispatch one operation and print the response as JSON
    Call {
        config: PathBuf,
        /// Full operation name, `group.operation`
        operation: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Deadline in milliseconds; defaults to 30 seconds
        #[arg(long, env = "OPGROUP_TIMEOUT_MS")]
        timeout_ms: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry_config = TelemetryConfig {
        filter: cli.log_filter.clone(),
        format: cli.log_format,
    };
    if let Err(e) = telemetry::init(&telemetry_config) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::List { config } => {
            let booted = boot(&config)?;
            let listing = booted.registry.list_operations();
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Call {
            config,
            operation,
            args,
            timeout_ms,
        } => {
            let arguments: Arguments =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let booted = boot(&config)?;
            let registry = Arc::new(booted.registry);
            let dispatcher = Dispatcher::new(registry.clone());
            let deadline = timeout_ms.map_or(dispatcher.config().default_deadline, Duration::from_millis);

            let response = dispatcher
                .dispatch(ExecutionRequest::new(operation, Some(arguments)), deadline)
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);

            if let Err(e) = registry.shutdown_all().await {
                tracing::warn!(error = %e, "group shutdown failed");
            }
            Ok(if response.is_error() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

fn boot(path: &std::path::Path) -> anyhow::Result<Bootstrapped> {
    let config = load_config(path)?;
    let booted = bootstrap(&config, &builtin_catalog())?;
    for failed in &booted.report.failed_groups {
        eprintln!("warning: group {} ({}) skipped: {}", failed.name, failed.locator, failed.error);
    }
    Ok(booted)
}

/// Startup failures get their kind's exit code; anything else exits with 1.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    let kind = if let Some(e) = err.downcast_ref::<ConfigError>() {
        Some(e.kind())
    } else {
        err.downcast_ref::<BootstrapError>().map(BootstrapError::kind)
    };
    kind.filter(|kind| kind.is_startup())
        .map_or(1, |kind: ErrorKind| u8::try_from(kind.exit_code()).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use opgroup_server::service::BuildError;

    use super::*;

    #[test]
    fn startup_failures_map_to_distinct_exit_codes() {
        let missing = anyhow::Error::new(ConfigError::NotFound {
            path: PathBuf::from("missing.yaml"),
        });
        assert_eq!(exit_code_for(&missing), 2);

        let unloadable = anyhow::Error::new(BootstrapError::Build(BuildError::SchemaParameterMismatch {
            group: "math".to_string(),
            operation: "add".to_string(),
        }));
        assert_eq!(exit_code_for(&unloadable), 3);

        let other = anyhow::anyhow!("--args must be a JSON object");
        assert_eq!(exit_code_for(&other), 1);
    }
}

//! Autoship Agent - Entry Point
//!
//! Watches the deploy request queue written by the control plane and turns
//! each new request into a live nginx route with DNS and TLS.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use autoshipd::app::options::AppOptions;
use autoshipd::app::run::{run, run_once};
use autoshipd::logs::{init_logging, LogOptions};
use autoshipd::storage::settings::Settings;
use autoshipd::utils::version_info;

use colored::Colorize;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Load .env from the working directory (or --env-file), if present
    let env_loaded = match cli_args.get("env-file") {
        Some(path) => dotenvy::from_path(path).map(|_| ()),
        None => dotenvy::dotenv().map(|_| ()),
    };
    if let Err(e) = &env_loaded {
        if !e.not_found() {
            eprintln!("{} failed to load env file: {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // Print the effective configuration and exit
    if cli_args.contains_key("check-config") {
        println!("{}", "Configuration OK".green().bold());
        for (key, value) in settings.summary() {
            println!("  {:<18} {}", key.cyan(), value);
        }
        return ExitCode::SUCCESS;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings);

    // Single pass mode
    if cli_args.contains_key("once") {
        return match run_once(&settings, options).await {
            Ok(summary) => {
                info!("Single pass finished: {:?}", summary);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Dispatch pass failed: {e}");
                ExitCode::FAILURE
            }
        };
    }

    info!(
        "Running autoship agent {} ({}) with options: {:?}",
        version.version, version.git_hash, options
    );
    match run(&settings, options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the agent: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}

//! Helmsman - Entry Point
//!
//! Runs the release lifecycle controller as a daemon, or performs a one-shot
//! command against the same storage directory.

use std::collections::HashMap;
use std::env;

use colored::Colorize;
use tracing::{error, info};

use helmsman::app::options::AppOptions;
use helmsman::app::run::run;
use helmsman::app::state::AppState;
use helmsman::errors::ControllerError;
use helmsman::filesys::file::File;
use helmsman::logs::{init_logging, LogOptions};
use helmsman::manifest::Package;
use helmsman::models::machine::OperationRequest;
use helmsman::models::release::{Release, StatusCode};
use helmsman::storage::layout::StorageLayout;
use helmsman::storage::settings::Settings;
use helmsman::utils::version_info;

#[tokio::main]
async fn main() {
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
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to print version: {e}"),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, defaults when absent
    let settings = match layout.settings_file().read_json_opt::<Settings>().await {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            return;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, layout);

    // One-shot commands
    let one_shot = if let Some(path) = cli_args.get("upload") {
        Some(upload(&options, path).await)
    } else if let Some(path) = cli_args.get("submit") {
        Some(submit(&options, path).await)
    } else if let Some(release_name) = cli_args.get("status") {
        Some(status(&options, release_name).await)
    } else {
        None
    };
    if let Some(result) = one_shot {
        if let Err(e) = result {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
        return;
    }

    // Run the controller
    info!("Running helmsman with options: {:?}", options);
    if let Err(e) = run(version.version, options, await_shutdown_signal()).await {
        error!("Failed to run the controller: {e}");
    }
}

async fn upload(options: &AppOptions, path: &str) -> Result<(), ControllerError> {
    let package: Package = File::new(path).read_json().await?;
    let state = AppState::init(options).await?;
    state.stores.packages.upload(&package).await?;
    println!(
        "Uploaded package {}:{}",
        package.metadata.name.bold(),
        package.metadata.version
    );
    Ok(())
}

async fn submit(options: &AppOptions, path: &str) -> Result<(), ControllerError> {
    let request: OperationRequest = File::new(path).read_json().await?;
    let release_name = request.release_name().to_string();

    let state = AppState::init(options).await?;
    let result = state.controller.submit(request).await;
    if let Ok(release) = &result {
        print_release(release);

        // Upgrades reply early, stay until the outcome is known
        let budget = options.machine.default_upgrade_timeout + options.accept_timeout;
        state.controller.await_idle(&release_name, budget).await?;
        print_release(&state.controller.status(&release_name).await?);
    }

    state.shutdown().await?;
    result.map(|_| ())
}

async fn status(options: &AppOptions, release_name: &str) -> Result<(), ControllerError> {
    let state = AppState::init(options).await?;
    print_release(&state.controller.status(release_name).await?);

    for release in state.controller.history(release_name).await? {
        println!(
            "  v{:<4} {:<10} {}",
            release.version,
            release.status_code().to_string(),
            release.description()
        );
    }
    state.shutdown().await
}

fn print_release(release: &Release) {
    let code = release.status_code().to_string();
    let code = match release.status_code() {
        StatusCode::Deployed => code.green(),
        StatusCode::Failed => code.red(),
        StatusCode::Deleted => code.yellow(),
        StatusCode::Unknown => code.blue(),
    };
    println!(
        "{} {} ({}:{}) {}",
        release.label().bold(),
        code.bold(),
        release.pkg.name,
        release.pkg.version,
        release.description()
    );
    for app in &release.info.status.platform_status {
        println!("  {:<40} {:?} x{}", app.deployment_id, app.state, app.instances);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
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
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
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

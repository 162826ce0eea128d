//! Config validation CLI tool
//!
//! Validates a habitledger-sync configuration file and reports any errors.

use habitledger_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a habitledger-sync configuration file.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match habitledger_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", habitledger_config::CURRENT_CONFIG_VERSION);
            println!("  API: {}", settings.api.base_url);
            println!("  Health probe: {}", settings.api.health_path);
            println!(
                "  Probe every {}s while offline",
                settings.connectivity.probe_interval.as_secs()
            );
            println!(
                "  Max retries: {}, retention: {} days",
                settings.sync.max_retries,
                settings.sync.retention.as_secs() / 86_400
            );
            println!(
                "  Backoff: {}ms .. {}ms",
                settings.sync.backoff_base.as_millis(),
                settings.sync.backoff_max.as_millis()
            );
            println!("  Data dir: {}", settings.storage.data_dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                habitledger_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                habitledger_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                habitledger_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                habitledger_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        habitledger_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

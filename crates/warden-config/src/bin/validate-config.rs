//! Config validation CLI tool
//!
//! Validates a warden configuration file and reports any errors.

use warden_util::default_config_path;
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
            eprintln!("Validates a warden configuration file.");
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

    match warden_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", warden_config::CURRENT_CONFIG_VERSION);
            println!("  Timezone: {}", policy.service.timezone);
            println!(
                "  Downtime: {}",
                if policy.downtime.is_enabled() { "enabled" } else { "disabled" }
            );

            if !policy.children.is_empty() {
                println!();
                println!("Children:");
                for child in &policy.children {
                    let breaks = match child.break_rule {
                        Some(rule) => format!(
                            ", break {}m after {}m",
                            rule.break_minutes, rule.after_minutes
                        ),
                        None => String::new(),
                    };
                    println!(
                        "  - {} ({}): {}m weekdays, {}m weekends{}",
                        child.id, child.name, child.weekday_minutes, child.weekend_minutes, breaks
                    );
                }
            }

            if !policy.devices.is_empty() {
                println!();
                println!("Devices:");
                for device in &policy.devices {
                    println!(
                        "  - {} [{} via {}]: {}",
                        device.id, device.kind, device.driver, device.label
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                warden_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                warden_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                warden_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                warden_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        warden_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

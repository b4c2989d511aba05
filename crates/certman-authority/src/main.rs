//! Certman Binary
//!
//! Runs one certman command against the configured certificate store.

use std::env;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use certman_authority::{cli, CertificateAuthorityService, CertmanConfig};

fn main() -> ExitCode {
    let config = match CertmanConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Logs go to stderr so command output stays clean
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {}", e);
    }

    info!(
        store = %config.store_path.display(),
        scheme = %config.scheme,
        kem = %config.kem,
        operator = ?config.operator_serial,
        "Opening certificate store"
    );

    let service = match CertificateAuthorityService::from_config(&config) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "Failed to open certificate store");
            println!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let args: Vec<String> = env::args().skip(1).collect();
    match cli::run(&service, config.operator_serial, &args) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

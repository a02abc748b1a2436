use std::path::PathBuf;
use std::process::ExitCode;

use backup::{BackupError, BackupOrchestrator};
use clap::Parser;
use common::config::{Configuration, DEFAULT_CONFIG_FILE};
use common::{Redactor, logging};

/// Back up one CMS dataset to object storage.
///
/// Every setting can also come from the environment.
#[derive(Debug, Parser)]
#[command(name = "cms-backup", version, about)]
struct Cli {
    /// TOML configuration file, layered under the environment.
    #[arg(long, env = "CMS_BACKUP_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Configuration::load_from_path(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            // No secrets or webhook are known yet; only the pattern rules apply.
            let redactor = Redactor::default();
            logging::init(Default::default(), redactor.clone());
            backup::log_failure(&redactor, &BackupError::Config(error));
            return ExitCode::FAILURE;
        }
    };

    let redactor = Redactor::new(config.secrets());
    logging::init(config.log_level, redactor.clone());

    let orchestrator = match BackupOrchestrator::from_config(&config, redactor.clone()) {
        Ok(orchestrator) => orchestrator,
        Err(error) => {
            backup::report_setup_failure(&config, redactor, &error).await;
            return ExitCode::FAILURE;
        }
    };

    match orchestrator.run().await {
        Ok(run) => {
            println!("{}", run.output_lines());
            ExitCode::SUCCESS
        }
        Err(error) => {
            backup::log_failure(&redactor, &error);
            ExitCode::FAILURE
        }
    }
}

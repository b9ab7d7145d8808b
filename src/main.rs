use chatflow::cli::{self, Cli, Command, ConfigCommand};
use chatflow::config;
use chatflow::logging::init_logging;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let explicit = cli.config.as_deref();

    let result = match cli.command {
        Command::Validate { path } => cli::handle_validate(&path).await.map(|clean| {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }),
        Command::Simulate {
            path,
            contact,
            channel,
        } => {
            let loaded = config::load_config(&config::get_config_path(explicit)).await;
            match loaded {
                Ok(cfg) => {
                    if let Err(e) = init_logging(&cfg.logging) {
                        eprintln!("Error: {}", e);
                        return ExitCode::FAILURE;
                    }
                    cli::handle_simulate(&path, &contact, &channel, cfg)
                        .await
                        .map(|()| ExitCode::SUCCESS)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(explicit)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path(explicit);
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => {
            cli::handle_version();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

use clap::Parser;
use papertrade::cli::{self, Cli, Commands};
use papertrade::config::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Demo(args) => {
            let config = load_config(&cli)?;
            let _guard = papertrade::logging::init_logging(&config.logging);

            let report = tokio::select! {
                report = cli::run_demo(&config, args) => report?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    return Ok(());
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::CheckConfig => match cli::check_config(&cli.config) {
            Ok(config) => {
                println!("Configuration OK");
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            Err(e) => {
                eprintln!("Configuration invalid: {}", e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_from(&cli.config)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config: {}", e);
        }
        anyhow::bail!("invalid configuration: {}", errors.join("; "));
    }
    Ok(config)
}

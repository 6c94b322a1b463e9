use api::AppState;
use api::rate_limit::ClientRateLimiter;
use api::users::InMemoryUserStore;
use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use gateway::breaker::CircuitState;
use gateway::{Gateway, GithubClient};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::path::PathBuf;
use std::sync::Arc;
use vault::{CredentialVault, VaultError};

mod config;
mod telemetry;

#[derive(Parser)]
#[command(name = "prpulse", about = "Pull request metrics for GitHub developers")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the API and the admin endpoints
    Run {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Load and validate a config file, then exit
    CheckConfig {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Print a new random encryption key for the credential vault
    GenerateKey,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),
    #[error("credential vault: {0}")]
    Vault(#[from] VaultError),
    #[error("upstream transport: {0}")]
    Transport(#[from] gateway::transport::TransportError),
    #[error("api server: {0}")]
    Api(#[from] api::ApiServerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run { config } => {
            let config = Config::from_file(&config)?;
            config.validate()?;

            let _telemetry = telemetry::init_logging(config.logging.as_ref())?;
            if let Some(metrics) = &config.metrics {
                telemetry::init_metrics(metrics)?;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run(config))
        }
        CliCommand::CheckConfig { config } => {
            let config = Config::from_file(&config)?;
            config.validate()?;
            println!("config ok");
            Ok(())
        }
        CliCommand::GenerateKey => {
            println!("{}", CredentialVault::generate_key_hex());
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<(), CliError> {
    let vault = CredentialVault::from_env(&config.vault.key_env)?;
    let gateway = Arc::new(Gateway::from_config(&config.gateway)?);
    tracing::info!(target_host = gateway.target(), "upstream gateway ready");

    let state = AppState {
        github: GithubClient::new(gateway.clone(), &config.gateway.upstream),
        users: Arc::new(InMemoryUserStore::new()),
        vault: Arc::new(vault),
        rate_limiter: Arc::new(
            ClientRateLimiter::new(&config.rate_limit).map_err(ConfigError::from)?,
        ),
    };

    let ready_gateway = gateway.clone();
    let admin = AdminService::<_, _, std::io::Error>::new(
        move || ready_gateway.circuit_state() != CircuitState::Open,
        move || serde_json::to_value(gateway.circuits()).unwrap_or_default(),
    );

    tokio::try_join!(
        async {
            api::serve(&config.listener, state)
                .await
                .map_err(CliError::from)
        },
        async {
            run_http_service(&config.admin_listener.host, config.admin_listener.port, admin)
                .await
                .map_err(CliError::from)
        },
    )?;
    Ok(())
}

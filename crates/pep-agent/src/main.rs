//! Detection Agent entry point — spec.md §4.1/§6.
//!
//! Exit codes follow spec.md §6's operator contract: `0` clean shutdown,
//! `1` invalid config, `2` EHR database unreachable at startup, `3` central
//! unreachable at startup. Codes above 10 are reserved for future use.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pep_agent::{client::CentralClient, health, poll::PollLoop};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pep-agent")]
#[command(about = "Hospital-side Detection Agent for corneal-donation alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling loop until terminated.
    Run {
        #[arg(long, default_value = "/etc/pep-agent/config.yaml")]
        config: String,
    },
    /// Validate config and database connectivity, then exit.
    Healthcheck {
        #[arg(long, default_value = "/etc/pep-agent/config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Run { config } => run(config).await,
        Commands::Healthcheck { config } => healthcheck(config).await,
    }
}

async fn run(config_path: String) -> ExitCode {
    let config = match pep_config::agent::load_agent_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            // tracing isn't initialized yet if the config (which carries
            // log_level) failed to load, so this goes straight to stderr.
            eprintln!("invalid agent config: {e:#}");
            return ExitCode::from(1);
        }
    };
    init_tracing(&config.log_level);

    let pool = match connect_ehr_db(&config).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "EHR database unreachable at startup");
            return ExitCode::from(2);
        }
    };

    let client = match CentralClient::new(
        config.central_url.clone(),
        config.central_api_key.clone(),
        config.central_timeout,
        config.central_insecure,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build central HTTP client");
            return ExitCode::from(3);
        }
    };

    let health = health::new_shared(config.alert_threshold);
    let poll_loop = match PollLoop::new(pool, config, client, health.clone()) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "invalid agent config");
            return ExitCode::from(1);
        }
    };

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let health_shutdown = shutdown.clone();

    let health_server = tokio::spawn(async move {
        let app = health::router(health);
        let addr: std::net::SocketAddr = ([127, 0, 0, 1], 8081).into();
        info!("pep-agent health endpoint listening on http://{addr}");
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to bind health listener");
                return;
            }
        };
        let serve = axum::serve(listener, app);
        tokio::select! {
            res = serve => { if let Err(e) = res { error!(error = %e, "health server crashed"); } }
            _ = health_shutdown.notified() => {}
        }
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.notify_waiters();
        }
    });

    let result = poll_loop.run(shutdown.clone()).await;
    shutdown.notify_waiters();
    health_server.abort();

    match result {
        Ok(()) => {
            info!("pep-agent shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "pep-agent exited with error");
            ExitCode::from(1)
        }
    }
}

async fn healthcheck(config_path: String) -> ExitCode {
    let config = match pep_config::agent::load_agent_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("invalid agent config: {e:#}");
            return ExitCode::from(1);
        }
    };
    init_tracing(&config.log_level);

    if let Err(e) = connect_ehr_db(&config).await {
        error!(error = %e, "EHR database unreachable");
        return ExitCode::from(2);
    }

    let client = match CentralClient::new(
        config.central_url.clone(),
        config.central_api_key.clone(),
        config.central_timeout,
        config.central_insecure,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build central HTTP client");
            return ExitCode::from(3);
        }
    };
    drop(client);

    println!("ok");
    ExitCode::SUCCESS
}

async fn connect_ehr_db(config: &pep_config::AgentConfig) -> anyhow::Result<sqlx::PgPool> {
    let url = format!(
        "postgres://{}:{}@{}:{}/{}?sslmode={}",
        config.database.user,
        config.database_password.expose(),
        config.database.host,
        config.database.port,
        config.database.db,
        config.database.ssl_mode,
    );
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .context("connect to EHR database")
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .init();
}

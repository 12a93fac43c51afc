mod config;

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use palaver_server::ServerConfig;
use palaver_store::{Database, UserRepo};
use palaver_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "palaver")]
#[command(about = "Single-room chat server", long_about = None)]
struct Args {
    /// Path to the configuration file.
    /// If the file doesn't exist, it will be created with default values.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Bind port (overrides config file).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = config::load_or_create(&args.config)?;
    if let Some(port) = args.port {
        cfg.port = port;
    }

    let _telemetry = init_telemetry(TelemetryConfig {
        log_db_path: cfg.database_path.with_extension("logs.db"),
        ..TelemetryConfig::default()
    });

    tracing::info!(config = %args.config.display(), "starting palaver");

    let db = Database::open(&cfg.database_path)?;
    ensure_admin(&db, &cfg.init_admin_username)?;

    let server_config = ServerConfig {
        host: cfg.host.clone(),
        port: cfg.port,
        history_limit: cfg.history_limit,
        ..ServerConfig::default()
    };
    let handle = palaver_server::start(server_config, db).await?;
    tracing::info!(port = handle.port, "palaver ready");

    tokio::signal::ctrl_c().await.context("listen for ctrl+c")?;
    tracing::info!("shutting down");
    Ok(())
}

/// First run: create the configured admin account, prompting for its
/// password on the terminal. No-op once the account exists.
fn ensure_admin(db: &Database, username: &str) -> anyhow::Result<()> {
    let username = username.trim();
    if username.is_empty() {
        return Ok(());
    }

    let users = UserRepo::new(db.clone());
    if users.get_by_username(username)?.is_some() {
        return Ok(());
    }

    eprintln!("First run: creating admin '{username}'");
    eprint!("Set password for '{username}': ");
    std::io::stderr().flush().ok();

    let mut password = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("read admin password")?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("empty admin password");
    }

    users.create(username, password, true)?;
    eprintln!("Admin created.");
    Ok(())
}

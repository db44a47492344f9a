use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use session_context::{
    ConfigError, Credentials, FileTokenStore, HttpLoginClient, LoginError, SessionConfig, SessionContext,
    SessionError, SessionSettings,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing password; pass --password or set SESSION_PASSWORD")]
    MissingPassword,
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("login client setup failed: {0}")]
    Client(#[from] LoginError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "sessionctl", about = "Inspect and manage the stored login session")]
struct Cli {
    #[arg(long, env = "SESSION_STORE_DIR", default_value = ".session")]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the returned token.
    Login {
        #[arg(long)]
        username: String,

        #[arg(long, env = "SESSION_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored token.
    Logout,
    /// Report whether the stored token is usable.
    Status,
    /// Print the identity derived from the stored token.
    Whoami,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SessionConfig::from_env()?;
    let login = HttpLoginClient::from_config(&config)?;
    let store = FileTokenStore::new(&cli.store_dir);
    tracing::debug!(dir = %store.dir().display(), url = %login.url(), "session store opened");

    let session = SessionContext::new(Arc::new(store), Arc::new(login), SessionSettings::from(&config));

    match cli.command {
        Command::Login { username, password } => {
            let password = password.ok_or(CliError::MissingPassword)?;
            run_login(&session, Credentials::new(username, password)).await
        }
        Command::Logout => {
            session.log_out();
            println!("signed out");
            Ok(())
        }
        Command::Status => run_status(&session),
        Command::Whoami => {
            println!("{}\t{}", session.current_username(), session.current_user_id());
            Ok(())
        }
    }
}

async fn run_login(session: &SessionContext, credentials: Credentials) -> Result<(), CliError> {
    let response = session.log_in(&credentials).await?;
    print_json(&serde_json::to_value(&response)?)?;
    if response.bearer_token().is_none() {
        eprintln!("login accepted without a token; session unchanged");
    }
    print_json(&serde_json::to_value(session.user())?)
}

fn run_status(session: &SessionContext) -> Result<(), CliError> {
    let authenticated = session.is_authenticated();
    print_json(&serde_json::json!({
        "authenticated": authenticated,
        "user": session.user(),
    }))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use goose::auth::AuthOutcome;
use goose::http::HttpChatClient;
use goose::{DEFAULT_API_BASE, DEFAULT_MAX_HISTORY};
use tracing_subscriber::EnvFilter;

mod repl;

use repl::Session;

#[derive(Parser, Debug)]
#[command(version, about = "Terminal client for the Goose financial-advisory chat backend")]
struct Args {
    /// Base URL of the chat backend
    #[arg(long, env = "GOOSE_API_URL", default_value = DEFAULT_API_BASE, global = true)]
    api_url: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat (default)
    Chat {
        /// Number of previous turns sent with each message
        #[arg(long, default_value_t = DEFAULT_MAX_HISTORY)]
        history: usize,
    },
    /// Send a single message and print the reply
    Ask { message: String },
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "GOOSE_PASSWORD")]
        password: String,
    },
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "GOOSE_PASSWORD")]
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    tracing::debug!(api_url = %args.api_url, "starting");
    let client = Arc::new(HttpChatClient::new(Some(&args.api_url)));

    match args.command.unwrap_or(Command::Chat {
        history: DEFAULT_MAX_HISTORY,
    }) {
        Command::Chat { history } => {
            let mut session = Session::new(client, history);
            repl::run(&mut session).await
        }
        Command::Ask { message } => {
            let mut session = Session::new(client, DEFAULT_MAX_HISTORY);
            session.send(&message).await
        }
        Command::Login { username, password } => {
            let outcome = client
                .login(&username, &password)
                .await
                .map_err(|err| anyhow!(err))
                .context("login request failed")?;
            report("login", outcome)
        }
        Command::Register { email, password } => {
            let outcome = client
                .register(&email, &password)
                .await
                .map_err(|err| anyhow!(err))
                .context("registration request failed")?;
            report("registration", outcome)
        }
    }
}

fn report(action: &str, outcome: AuthOutcome) -> Result<()> {
    match outcome {
        AuthOutcome::Accepted => {
            println!("{action} succeeded");
            Ok(())
        }
        AuthOutcome::Rejected(status) => bail!("{action} failed: {status}"),
    }
}

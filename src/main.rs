use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_feed::cli::{Cli, Commands};
use a3s_feed::{ActionOutcome, ChannelNotifier, FeedClient, FeedConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = FeedConfig::load(&cli.config)?;

    init_tracing(&config, cli.log_file.as_deref())?;

    // Single-threaded: handlers and actions interleave cooperatively
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(run(cli.command, config))
}

fn init_tracing(config: &FeedConfig, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

async fn run(command: Commands, config: FeedConfig) -> anyhow::Result<()> {
    match command {
        Commands::Listen {
            login,
            password,
            scopes,
        } => {
            let (notifier, mut notices) = ChannelNotifier::channel();
            let client = FeedClient::builder(config)
                .notifier(Arc::new(notifier))
                .build()?;

            let identity = match client.login(&login, &password).await {
                Ok(ActionOutcome::Completed(identity)) => identity,
                Ok(_) => {
                    client.shutdown().await;
                    anyhow::bail!("login failed");
                }
                Err(e) => {
                    client.shutdown().await;
                    return Err(e.into());
                }
            };
            println!("Logged in as {} ({})", identity.nickname, identity.user_id);

            for scope in scopes {
                client.subscribe(scope)?;
            }

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let terminated = async {
                match client.next_termination().await {
                    Some(scope) => scope,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(terminated);
            let ended = loop {
                tokio::select! {
                    _ = &mut ctrl_c => break None,
                    scope = &mut terminated => break Some(scope),
                    Some(notice) = notices.recv() => {
                        println!("[{}] {}", notice.at.format("%H:%M:%S"), notice);
                    }
                }
            };

            client.shutdown().await;
            if let Some(scope) = ended {
                anyhow::bail!("subscription to '{}' stopped; see the log for the cause", scope);
            }
        }
        Commands::Games => {
            let client = FeedClient::new(config)?;
            let games = client.list_games().await;
            client.shutdown().await;

            for game in games? {
                println!("{:>4}  {}", game.id, game.name);
            }
        }
        Commands::Register {
            username,
            email,
            password,
        } => {
            let client = FeedClient::new(config)?;
            let user_id = client.api().register(&username, &email, &password).await;
            client.shutdown().await;

            println!("Registered {} with id {}", username, user_id?);
        }
    }

    Ok(())
}

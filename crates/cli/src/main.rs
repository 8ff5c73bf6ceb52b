//! Knock CLI
//!
//! Signs in through the browser-based OAuth handshake and sends coalesced
//! knocks to the knock service.

mod cli;
mod logging;
mod paths;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use knock_client::store;
use knock_client::{
    App, Browser, CheckOutcome, ClientConfig, HttpService, PrintBrowser, RealtimeChannel,
    SqliteSessionStore, SystemBrowser, UiEvent,
};
use knock_protocol::new_id;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::info;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let logging = logging::init_logging(&paths::log_dir(&data_dir))?;

    let config = ClientConfig {
        debounce: Duration::from_millis(cli.debounce_ms),
        settle: Duration::from_millis(cli.settle_ms),
        ..ClientConfig::default()
    }
    .with_api_url(cli.api_url.as_str());

    info!(
        component = "cli",
        event = "cli.started",
        run_id = %logging.run_id,
        api_url = %config.api_url,
        data_dir = %data_dir.display(),
        "Knock CLI starting"
    );

    let store = Arc::new(SqliteSessionStore::open(paths::db_path(&data_dir)).await?);

    match cli.command {
        Commands::Status => status(store.as_ref()).await,
        Commands::Logout => {
            store::clear_session(store.as_ref()).await?;
            println!("Signed out.");
            Ok(())
        }
        command if cli.no_browser => run(command, &config, store, PrintBrowser).await,
        command => run(command, &config, store, SystemBrowser).await,
    }
}

async fn status(store: &SqliteSessionStore) -> anyhow::Result<()> {
    let session = store::load_session(store).await?;
    println!();
    println!("  Database:  {}", store.path().display());
    if session.is_authenticated() {
        println!("  Signed in: yes");
        if let Some(user_id) = &session.user_id {
            println!("  User ID:   {user_id}");
        }
        match &session.profile {
            Some(profile) => {
                println!("  Name:      {}", profile.display_name);
                println!("  Avatar:    {}", profile.avatar_url);
            }
            None => println!("  Profile:   not loaded"),
        }
    } else {
        println!("  Signed in: no");
        println!("  Sign in with: knock sign-in");
    }
    println!();
    Ok(())
}

async fn run<B: Browser>(
    command: Commands,
    config: &ClientConfig,
    store: Arc<SqliteSessionStore>,
    browser: B,
) -> anyhow::Result<()> {
    let service = Arc::new(HttpService::new(config.api_url.clone()));

    // Knocking needs no realtime connection; only the handshake does.
    let channel = match command {
        Commands::SignIn | Commands::Check => RealtimeChannel::connect(&config.realtime_url())
            .await
            .with_context(|| format!("failed to connect to {}", config.realtime_url()))?,
        _ => RealtimeChannel::new(new_id()),
    };

    let app = App::new(config, store, service, Arc::new(browser), channel.clone());
    app.restore().await?;

    let result = match command {
        Commands::SignIn => sign_in(&app).await,
        Commands::Check => check(&app).await,
        Commands::Send => send(app).await,
        Commands::Status | Commands::Logout => Ok(()),
    };
    channel.shutdown();
    result
}

async fn sign_in<B: Browser>(
    app: &App<SqliteSessionStore, HttpService, B>,
) -> anyhow::Result<()> {
    println!("Waiting for sign-in to complete in the browser...");
    let profile = app.sign_in().await?;
    println!("Signed in as {}.", profile.display_name);
    Ok(())
}

async fn check<B: Browser>(app: &App<SqliteSessionStore, HttpService, B>) -> anyhow::Result<()> {
    match app.check_user().await? {
        CheckOutcome::Probed { ok: true } => println!("Session is valid."),
        CheckOutcome::Probed { ok: false } => {
            println!("Service reports the session as invalid. Run: knock sign-in")
        }
        CheckOutcome::Reauthenticated(profile) => {
            println!("Signed in again as {}.", profile.display_name)
        }
    }
    Ok(())
}

async fn send<B: Browser>(app: App<SqliteSessionStore, HttpService, B>) -> anyhow::Result<()> {
    if !app.is_authenticated() {
        anyhow::bail!("not signed in. Run: knock sign-in");
    }

    let printer = tokio::spawn(print_events(app.events()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while lines.next_line().await?.is_some() {
        app.knock()?;
    }

    app.shutdown().await;
    let _ = printer.await;
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<UiEvent>) {
    loop {
        match events.recv().await {
            Ok(UiEvent::KnockSent { .. }) => println!("Sent"),
            Ok(UiEvent::KnockFailed { reason }) => eprintln!("Knock failed: {reason}"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

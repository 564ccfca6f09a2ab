use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span};

use smtp_to_telegram::channels::{DeliveryClient, SmtpServer, TelegramClient};
use smtp_to_telegram::config::{Cli, RelayConfig};
use smtp_to_telegram::error::{Error, Result, SmtpError};
use smtp_to_telegram::pipeline::{Dispatcher, NotificationSink, Notifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Cli::parse().into_config().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📨 smtp-to-telegram v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   SMTP: {} ({})", config.smtp.listen, config.smtp.primary_host);
    eprintln!("   Chats: {}", config.destinations.len());

    match run(config).await {
        Ok(()) => {
            info!("Shut down cleanly");
            Ok(())
        }
        Err(Error::Smtp(SmtpError::ShutdownTimedOut(deadline))) => {
            error!(?deadline, "In-flight emails did not finish before the shutdown deadline");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::Error::from(e).context("relay stopped")),
    }
}

/// Wire the pipeline together and serve until a shutdown signal.
async fn run(config: RelayConfig) -> Result<()> {
    let root = info_span!("relay");

    // ── Telegram ────────────────────────────────────────────────────────
    let client: Arc<dyn DeliveryClient> = Arc::new(TelegramClient::new(
        config.api_prefix,
        config.bot_token.clone(),
        config.api_timeout,
    )?);
    let dispatcher = Dispatcher::new(
        client,
        config.destinations,
        config.respect_attachment_errors,
        config.bot_token,
        root.clone(),
    );
    let notifier: Arc<dyn NotificationSink> =
        Arc::new(Notifier::new(config.notifier, dispatcher, root.clone()));

    // ── SMTP ────────────────────────────────────────────────────────────
    let server = SmtpServer::bind(config.smtp, notifier, root).await?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    server.serve(cancel).await?;
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}

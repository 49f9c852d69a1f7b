use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use feedwatch::RESTART_EXIT_CODE;
use feedwatch::channels::{CommandSource, Notifier, TelegramChannel, escape_html};
use feedwatch::commands::{self, CommandHandler};
use feedwatch::config::AppConfig;
use feedwatch::dispatcher::{Dispatcher, DispatcherConfig, DispatcherDeps};
use feedwatch::feed::HttpFeed;
use feedwatch::restart::{MemoryProbe, ProcMemoryProbe, RestartController};
use feedwatch::stats::RuntimeStats;
use feedwatch::store::{NotifiedStore, TenantStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration (is TG_BOT_TOKEN set?)")?;

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data dir {}", config.data_dir.display()))?;

    // Initialize tracing: stderr plus a daily-rolling file in the data dir
    let file_appender = tracing_appender::rolling::daily(&config.data_dir, "monitor.log");
    let (file_writer, log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    eprintln!("📡 Feedwatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Feed: {}", config.feed_url);
    eprintln!("   Data: {}", config.data_dir.display());
    match &config.admin_chat {
        Some(admin) => eprintln!("   Admin chat: {admin}"),
        None => eprintln!("   Admin chat: none (interval fixed at defaults)"),
    }

    // ── State ───────────────────────────────────────────────────────────
    let store = Arc::new(TenantStore::open(config.tenants_path()).await?);
    if let Some(admin) = &config.admin_chat {
        store.ensure_tenant(admin).await?;
    }
    let notified = NotifiedStore::open(config.notified_path()).await?;
    eprintln!("   Tenants: {}", store.tenant_count().await);

    let memory: Arc<dyn MemoryProbe> = Arc::new(ProcMemoryProbe);
    let restart = RestartController::new(config.restart.clone(), memory.total_bytes().await);
    eprintln!("   Restart policy: {}\n", restart.describe());
    let stats = Arc::new(RuntimeStats::new());

    // ── Channels ────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(
        config.bot_token.clone(),
        config.allowed_chats.clone(),
        config.send_timeout,
    ));

    let handler = Arc::new(CommandHandler::new(
        Arc::clone(&store),
        Arc::clone(&stats),
        Arc::clone(&memory),
        config.admin_chat.clone(),
        restart.describe(),
    ));
    let source: Arc<dyn CommandSource> = telegram.clone();
    tokio::spawn(async move {
        if let Err(e) = commands::serve(source, handler).await {
            error!("Command listener stopped: {e}");
        }
    });

    // ── Poll loop ───────────────────────────────────────────────────────
    let mut dispatcher = Dispatcher::new(
        DispatcherConfig {
            fetch_timeout: config.fetch_timeout,
            send_timeout: config.send_timeout,
            admin: config.admin_chat.clone(),
        },
        DispatcherDeps {
            store,
            feed: Arc::new(HttpFeed::new(&config.feed_url, config.fetch_timeout)),
            notifier: telegram.clone(),
            memory,
            stats,
        },
        notified,
        restart,
    );

    tokio::select! {
        signal = dispatcher.run() => {
            warn!(reason = %signal.reason, "Restarting: {signal}");
            dispatcher.flush().await;
            if config.announce_restart
                && let Some(admin) = &config.admin_chat
            {
                let text = format!("🔄 Restarting: {}", escape_html(&signal.to_string()));
                if let Err(e) = telegram.send_message(admin, &text).await {
                    warn!("Failed to announce restart: {e}");
                }
            }
            drop(log_guard);
            std::process::exit(RESTART_EXIT_CODE);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            dispatcher.flush().await;
        }
    }

    Ok(())
}

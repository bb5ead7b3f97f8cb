mod settings;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sanad_collab::{
    Compactor, DocumentStore, HttpCorrector, LogNotifier, Services, StaticTokens, SyncServer,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "sanad", about = "Sanad - real-time document sync server")]
struct Cli {
    /// Settings file (defaults to ./sanad.toml when present)
    #[arg(long, env = "SANAD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept WebSocket clients and run periodic compaction (default)
    Serve,
    /// Run one compaction pass over the store and exit
    Compact,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = settings::load(cli.config.as_deref()).context("failed to load settings")?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log_level))
        .init();

    let store = Arc::new(
        DocumentStore::open(settings.store_config())
            .with_context(|| format!("failed to open store at {}", settings.storage_path.display()))?,
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings, store).await,
        Commands::Compact => compact(settings, store).await,
    }
}

async fn serve(settings: Settings, store: Arc<DocumentStore>) -> anyhow::Result<()> {
    let tokens = StaticTokens::new(settings.auth.tokens.clone());
    if tokens.is_empty() {
        log::warn!("No auth tokens configured; every handshake will be refused");
    }

    let mut services = Services::new(Arc::new(tokens)).with_notifier(Arc::new(LogNotifier));
    if let Some(url) = &settings.session.correction_url {
        let corrector = HttpCorrector::new(url.clone(), settings.correction_timeout())
            .context("failed to build correction client")?;
        services = services.with_corrector(Arc::new(corrector));
        log::info!("Text correction via {url}");
    }

    let compaction = Arc::new(Compactor::new(store.clone(), settings.compaction_config())).spawn();

    let server = Arc::new(SyncServer::new(settings.server_config(), store.clone(), services));
    let outcome = tokio::select! {
        result = server.run() => result.context("sync server stopped"),
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
            Ok(())
        }
    };

    compaction.abort();
    store.sync().context("failed to flush store")?;
    outcome
}

async fn compact(settings: Settings, store: Arc<DocumentStore>) -> anyhow::Result<()> {
    let compactor = Compactor::new(store.clone(), settings.compaction_config());
    let report = tokio::task::spawn_blocking(move || compactor.run_once(chrono::Utc::now()))
        .await
        .context("compaction task panicked")??;

    println!(
        "Compacted {} session(s) from {} record(s); {} fresh, {} failed",
        report.sessions, report.consumed, report.fresh, report.failed
    );
    store.sync().context("failed to flush store")?;
    Ok(())
}

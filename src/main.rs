mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use callsync_lib::config::load_config;
use callsync_lib::db::CallDb;
use callsync_lib::elevenlabs::ElevenLabsClient;
use callsync_lib::poller::Poller;
use callsync_lib::source::CallSource;

use cli::Mode;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::parse_args();
    let config = load_config(args.config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    let options = config
        .normalize_options()
        .map_err(|e| anyhow::anyhow!("Invalid normalizer config: {e}"))?;

    let db_path = config.database_path();
    let db = CallDb::open_at(db_path.clone())
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let client =
        ElevenLabsClient::new(&config.elevenlabs).context("failed to build ElevenLabs client")?;

    if args.mode == Mode::Check {
        let version = db.check_connection().context("database check failed")?;
        log::info!("Database OK at {} (SQLite {})", db_path.display(), version);
        let listed = client
            .test_connection()
            .await
            .context("ElevenLabs connection check failed")?;
        log::info!("ElevenLabs OK ({} conversation(s) visible)", listed);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let source: Arc<dyn CallSource> = Arc::new(client);
    let poll_interval = config.poller.poll_interval();
    let mut poller = Poller::new(source, db, options, config.poller.clone())
        .with_cancellation(cancel.clone());

    match args.mode {
        Mode::Once => {
            let outcome = poller.run_one_sync_cycle().await;
            if let Some(error) = outcome.sync_error {
                anyhow::bail!("sync failed: {error}");
            }
        }
        Mode::Force => {
            let report = poller.force_sync().await.context("forced sync failed")?;
            log::info!(
                "Forced sync: {} synced, {} errors, {} skipped",
                report.synced_count,
                report.error_count,
                report.skipped_count
            );
        }
        Mode::Loop => {
            poller.run_forever(poll_interval, cancel).await;
        }
        Mode::Check => {}
    }

    Ok(())
}

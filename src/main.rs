use anyhow::Result;
use log::info;

#[cfg(feature = "gst")]
async fn run_app() -> Result<()> {
    use std::path::PathBuf;
    use std::sync::Arc;

    use log::{error, warn};
    use tokio_util::sync::CancellationToken;

    use sitewatch::config;
    use sitewatch::db::repositories::{ChannelsRepository, ViolationsRepository};
    use sitewatch::db::DatabaseService;
    use sitewatch::detect::{GuardedDetector, NullDetector};
    use sitewatch::gateway::PgViolationGateway;
    use sitewatch::snapshot::SnapshotCleanupService;
    use sitewatch::stream::connector::ConnectorTimeouts;
    use sitewatch::stream::gst_connector::GstConnector;
    use sitewatch::stream::ChannelManager;

    info!("Starting site PPE monitoring engine");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;
    info!("Configuration loaded");

    let db = DatabaseService::new(&config.database).await?;
    let channels_repo = ChannelsRepository::new(db.pool.clone());
    let violations_repo = ViolationsRepository::new(db.pool.clone());

    let shutdown = CancellationToken::new();

    let cleanup = Arc::new(SnapshotCleanupService::new(
        config.snapshots.clone(),
        shutdown.child_token(),
    ));
    cleanup.start();

    let connector = Arc::new(GstConnector::new(ConnectorTimeouts::from_config(
        &config.streaming,
    ))?);
    // The detection model is wired in per deployment; without one the
    // engine ingests streams but reports no violations.
    let detector = Arc::new(GuardedDetector::new(Arc::new(NullDetector), &config.detection));
    let gateway = Arc::new(PgViolationGateway::new(violations_repo));

    let brand_repo = channels_repo.clone();
    let manager = Arc::new(
        ChannelManager::new(connector, detector, gateway, config, shutdown.clone())
            .with_brand_observer(Arc::new(move |channel_id, brand| {
                let repo = brand_repo.clone();
                tokio::spawn(async move {
                    if let Err(e) = repo.set_brand(channel_id, brand).await {
                        warn!("persisting probed brand for {}: {}", channel_id, e);
                    }
                });
            })),
    );

    let records = channels_repo.get_enabled().await?;
    info!("Starting {} enabled channels", records.len());
    for record in records {
        let target = record.to_target();
        if let Err(e) = manager.start_channel(target).await {
            error!("starting channel {}: {}", record.id, e);
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.cancel();
    manager.stop_all().await;
    info!("All channels stopped");

    Ok(())
}

#[cfg(not(feature = "gst"))]
async fn run_app() -> Result<()> {
    info!("Starting site PPE monitoring engine");
    anyhow::bail!("this build has no stream backend; rebuild with --features gst")
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    run_app().await
}

//! Channel lifecycle management.
//!
//! Owns the arena of running channels: starting one spins up its supervisor
//! and processing pipeline as isolated tasks, stopping one cancels and
//! drains them. A monitor task restarts a supervisor that panics; a
//! supervisor that ends on its own (stopped or failed) stays down until an
//! operator intervenes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::detect::GuardedDetector;
use crate::error::Error;
use crate::gateway::{EventWriter, ViolationGateway};
use crate::pipeline::ChannelPipeline;
use crate::stream::connector::Connector;
use crate::stream::prober::BrandProber;
use crate::stream::supervisor::{ChannelHealth, ChannelStatus, StreamSupervisor, SupervisorSettings};
use crate::stream::url_candidates::BrandTable;
use crate::stream::{Brand, StreamTarget};

pub type SessionId = Uuid;

const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Called when the initial probe identifies a concrete brand, so the
/// caller can persist it and skip probing on future starts.
pub type BrandObserver = Arc<dyn Fn(Uuid, Brand) + Send + Sync>;

struct ChannelEntry {
    channel_id: Uuid,
    name: String,
    health: Arc<StdRwLock<ChannelHealth>>,
    cancel: CancellationToken,
    pipeline: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

#[derive(Debug, Clone)]
pub struct ChannelSummary {
    pub channel_id: Uuid,
    pub session: SessionId,
    pub name: String,
    pub health: ChannelHealth,
}

pub struct ChannelManager<C: Connector> {
    connector: Arc<C>,
    brand_table: Arc<BrandTable>,
    detector: Arc<GuardedDetector>,
    gateway: Arc<dyn ViolationGateway>,
    config: Config,
    channels: RwLock<HashMap<SessionId, ChannelEntry>>,
    shutdown: CancellationToken,
    brand_observer: Option<BrandObserver>,
}

impl<C: Connector> ChannelManager<C> {
    pub fn new(
        connector: Arc<C>,
        detector: Arc<GuardedDetector>,
        gateway: Arc<dyn ViolationGateway>,
        config: Config,
        shutdown: CancellationToken,
    ) -> Self {
        let brand_table = Arc::new(BrandTable::with_overrides(&config.brands));
        Self {
            connector,
            brand_table,
            detector,
            gateway,
            config,
            channels: RwLock::new(HashMap::new()),
            shutdown,
            brand_observer: None,
        }
    }

    pub fn with_brand_observer(mut self, observer: BrandObserver) -> Self {
        self.brand_observer = Some(observer);
        self
    }

    /// Start supervising one channel. Fails when it is already running.
    pub async fn start_channel(&self, mut target: StreamTarget) -> Result<SessionId, Error> {
        {
            let channels = self.channels.read().await;
            if channels.values().any(|e| e.channel_id == target.channel_id) {
                return Err(Error::AlreadyExists(format!(
                    "channel {} is already running",
                    target.channel_id
                )));
            }
        }

        if target.brand_hint.is_none() && target.candidate_urls.is_empty() {
            self.resolve_brand(&mut target).await;
        }

        let session = Uuid::new_v4();
        let channel_id = target.channel_id;
        let name = target.name.clone();
        let health = Arc::new(StdRwLock::new(ChannelHealth::default()));
        let cancel = self.shutdown.child_token();

        let (frames_tx, frames_rx) = mpsc::channel(self.config.streaming.frame_queue_capacity);

        let writer = EventWriter::spawn(self.gateway.clone(), health.clone());
        let pipeline = ChannelPipeline::new(
            &target,
            self.detector.clone(),
            &self.config.tracker,
            &self.config.snapshots,
            writer,
        );
        let pipeline_handle = tokio::spawn(pipeline.run(frames_rx));

        let monitor = tokio::spawn(supervise_with_restart(
            target,
            self.connector.clone(),
            self.brand_table.clone(),
            SupervisorSettings::from_config(&self.config.streaming),
            health.clone(),
            cancel.clone(),
            frames_tx,
        ));

        info!("channel {} ({}) started, session {}", channel_id, name, session);
        self.channels.write().await.insert(
            session,
            ChannelEntry {
                channel_id,
                name,
                health,
                cancel,
                pipeline: pipeline_handle,
                monitor,
            },
        );
        Ok(session)
    }

    /// Stop one session and wait (bounded) for its pipeline to flush
    /// pending persistence operations.
    pub async fn stop_channel(&self, session: SessionId) -> Result<(), Error> {
        let entry = self
            .channels
            .write()
            .await
            .remove(&session)
            .ok_or_else(|| Error::NotFound(format!("session {} is not running", session)))?;

        entry.cancel.cancel();
        let _ = entry.monitor.await;
        if tokio::time::timeout(STOP_DRAIN_TIMEOUT, entry.pipeline)
            .await
            .is_err()
        {
            warn!(
                "channel {} pipeline did not drain within timeout",
                entry.channel_id
            );
        }
        info!("channel {} stopped", entry.channel_id);
        Ok(())
    }

    pub async fn get_channel_health(&self, session: SessionId) -> Option<ChannelHealth> {
        let channels = self.channels.read().await;
        let entry = channels.get(&session)?;
        entry.health.read().ok().map(|h| h.clone())
    }

    pub async fn list_channels(&self) -> Vec<ChannelSummary> {
        let channels = self.channels.read().await;
        let mut summaries: Vec<ChannelSummary> = channels
            .iter()
            .filter_map(|(session, entry)| {
                let health = entry.health.read().ok()?.clone();
                Some(ChannelSummary {
                    channel_id: entry.channel_id,
                    session: *session,
                    name: entry.name.clone(),
                    health,
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Stop every running session, draining each pipeline.
    pub async fn stop_all(&self) {
        let sessions: Vec<SessionId> = self.channels.read().await.keys().copied().collect();
        for session in sessions {
            if let Err(e) = self.stop_channel(session).await {
                warn!("stopping session {}: {}", session, e);
            }
        }
    }

    /// Probe the device once and pin the brand when the probe is
    /// conclusive. A generic result leaves the hint unset so the
    /// supervisor rotates through every brand's path set.
    async fn resolve_brand(&self, target: &mut StreamTarget) {
        let prober = BrandProber::new(Duration::from_secs(self.config.streaming.probe_timeout_secs));
        let brand = prober
            .probe(&target.host, target.http_port, target.rtsp_port)
            .await;
        if brand == Brand::Generic {
            return;
        }
        info!("channel {} probed as {}", target.channel_id, brand);
        target.brand_hint = Some(brand);
        if let Some(observer) = &self.brand_observer {
            observer(target.channel_id, brand);
        }
    }
}

/// Run the supervisor, restarting it if it panics. A normal exit (stopped
/// or failed) ends supervision; the frame sender is dropped on return so
/// the pipeline drains.
async fn supervise_with_restart<C: Connector>(
    target: StreamTarget,
    connector: Arc<C>,
    brand_table: Arc<BrandTable>,
    settings: SupervisorSettings,
    health: Arc<StdRwLock<ChannelHealth>>,
    cancel: CancellationToken,
    frames: mpsc::Sender<crate::stream::Frame>,
) {
    loop {
        let supervisor = StreamSupervisor::new(
            target.clone(),
            connector.clone(),
            brand_table.clone(),
            settings.clone(),
            health.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(supervisor.run(frames.clone()));
        match handle.await {
            Ok(()) => return,
            Err(e) if e.is_panic() && !cancel.is_cancelled() => {
                warn!("channel {} supervisor panicked, restarting", target.channel_id);
                if let Ok(mut h) = health.write() {
                    h.status = ChannelStatus::Connecting;
                    h.consecutive_failures = 0;
                }
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::detect::NullDetector;
    use crate::error::{ConnectError, ReadError};
    use crate::gateway::MemoryViolationGateway;
    use crate::stream::{Credentials, Frame, Transport};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Streams indefinitely on one known URL; counts opens. The first
    /// `panic_opens` open calls panic, to exercise the restart monitor.
    struct TestConnector {
        url: String,
        opens: AtomicU32,
        panic_opens: u32,
    }

    impl TestConnector {
        fn new(url: &str) -> Self {
            Self {
                url: url.to_string(),
                opens: AtomicU32::new(0),
                panic_opens: 0,
            }
        }

        fn panicking_first(url: &str) -> Self {
            Self {
                url: url.to_string(),
                opens: AtomicU32::new(0),
                panic_opens: 1,
            }
        }
    }

    #[async_trait]
    impl Connector for TestConnector {
        type Handle = ();

        async fn open(&self, url: &str) -> Result<Self::Handle, ConnectError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            if n < self.panic_opens {
                panic!("scripted panic on open {}", n);
            }
            if url == self.url {
                Ok(())
            } else {
                Err(ConnectError::ProtocolOpenFailed {
                    url: url.to_string(),
                    reason: "scripted rejection".to_string(),
                })
            }
        }

        async fn read_frame(&self, _handle: &mut Self::Handle) -> Result<Frame, ReadError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Frame {
                jpeg: vec![0xff, 0xd8],
                width: 640,
                height: 480,
                captured_at: Utc::now(),
            })
        }

        async fn close(&self, _handle: Self::Handle) {}
    }

    fn target(url: &str) -> StreamTarget {
        StreamTarget {
            owner_id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            name: "gate-cam".to_string(),
            host: "127.0.0.1".to_string(),
            rtsp_port: 554,
            http_port: 80,
            channel: 1,
            transport: Transport::Rtsp,
            credentials: Credentials {
                username: "u".to_string(),
                password: "p".to_string(),
            },
            brand_hint: None,
            candidate_urls: vec![url.to_string()],
        }
    }

    fn manager(connector: TestConnector) -> ChannelManager<TestConnector> {
        let mut config = Config::default();
        config.streaming.initial_backoff_secs = 0;
        config.streaming.max_backoff_secs = 0;
        let detector = Arc::new(GuardedDetector::new(
            Arc::new(NullDetector),
            &DetectionConfig::default(),
        ));
        ChannelManager::new(
            Arc::new(connector),
            detector,
            Arc::new(MemoryViolationGateway::new()),
            config,
            CancellationToken::new(),
        )
    }

    async fn wait_for_status(
        manager: &ChannelManager<TestConnector>,
        session: SessionId,
        status: ChannelStatus,
    ) -> bool {
        for _ in 0..200 {
            if manager
                .get_channel_health(session)
                .await
                .map_or(false, |h| h.status == status)
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn start_stream_stop_lifecycle() {
        let url = "rtsp://u:p@h/live";
        let manager = manager(TestConnector::new(url));
        let t = target(url);
        let channel_id = t.channel_id;

        let session = manager.start_channel(t).await.unwrap();
        assert!(wait_for_status(&manager, session, ChannelStatus::Streaming).await);

        let summaries = manager.list_channels().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].channel_id, channel_id);
        assert_eq!(summaries[0].session, session);

        manager.stop_channel(session).await.unwrap();
        assert!(manager.get_channel_health(session).await.is_none());
        assert!(manager.list_channels().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected() {
        let url = "rtsp://u:p@h/live";
        let manager = manager(TestConnector::new(url));
        let t = target(url);

        let session = manager.start_channel(t.clone()).await.unwrap();
        assert!(matches!(
            manager.start_channel(t).await,
            Err(Error::AlreadyExists(_))
        ));
        manager.stop_channel(session).await.unwrap();
    }

    #[tokio::test]
    async fn stopping_unknown_session_is_not_found() {
        let manager = manager(TestConnector::new("rtsp://u:p@h/live"));
        assert!(matches!(
            manager.stop_channel(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn panicking_supervisor_is_restarted() {
        let url = "rtsp://u:p@h/live";
        let manager = manager(TestConnector::panicking_first(url));
        let t = target(url);

        let session = manager.start_channel(t).await.unwrap();
        // First open panics the supervisor task; the monitor restarts it
        // and the second attempt streams.
        assert!(wait_for_status(&manager, session, ChannelStatus::Streaming).await);
        manager.stop_channel(session).await.unwrap();
    }

    #[tokio::test]
    async fn stop_all_drains_every_channel() {
        let url = "rtsp://u:p@h/live";
        let manager = manager(TestConnector::new(url));
        let a = target(url);
        let b = target(url);
        manager.start_channel(a).await.unwrap();
        manager.start_channel(b).await.unwrap();
        assert_eq!(manager.list_channels().await.len(), 2);

        manager.stop_all().await;
        assert!(manager.list_channels().await.is_empty());
    }
}

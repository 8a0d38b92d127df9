use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Process-wide online/offline signal.
///
/// Subscribers receive transitions only; setting the current value again is
/// not an event. Dropping a receiver unsubscribes it.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current status. Returns `true` on a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("Network connection restored");
            } else {
                tracing::warn!("Network connection lost");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Reachability probe settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` to open a TCP connection to
    pub address: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// One TCP connect attempt bounded by `timeout`
pub async fn probe_once(address: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// Periodically probe `config.address` and feed the result into `monitor`
pub fn spawn_probe(monitor: ConnectivityMonitor, config: ProbeConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let online = probe_once(&config.address, config.timeout).await;
            tracing::trace!(address = %config.address, online, "Connectivity probe");
            monitor.set_online(online);
        }
    })
}

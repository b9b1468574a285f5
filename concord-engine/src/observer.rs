//! Async session observer
//!
//! Feeds broadcast notifications into the session tracker so sync conflicts
//! show up as conflict/resolution events in the affected session.

use concord_events::Notification;
use concord_session::CollaborationSessionTracker;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters reported when the observer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStats {
    pub notifications: u64,
    pub events_recorded: u64,
    /// Notifications dropped because the observer fell behind
    pub lagged: u64,
}

/// Handle to a running observer task. Dropping it stops the observer.
pub struct ObserverHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<ObserverStats>,
}

impl ObserverHandle {
    /// Stop the observer once every notification already published has been
    /// handled.
    pub async fn shutdown(self) -> ObserverStats {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Session observer task failed");
                ObserverStats::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the observer on the current tokio runtime.
pub fn spawn_session_observer(
    rx: broadcast::Receiver<Notification>,
    tracker: Arc<CollaborationSessionTracker>,
) -> ObserverHandle {
    let (shutdown, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(rx, tracker, shutdown_rx));
    ObserverHandle { shutdown, task }
}

async fn run(
    mut rx: broadcast::Receiver<Notification>,
    tracker: Arc<CollaborationSessionTracker>,
    mut shutdown: oneshot::Receiver<()>,
) -> ObserverStats {
    let mut stats = ObserverStats::default();
    info!("Session observer started");

    loop {
        tokio::select! {
            biased;

            result = rx.recv() => {
                match result {
                    Ok(notification) => {
                        stats.notifications += 1;
                        match tracker.observe(&notification) {
                            Ok(events) => {
                                if !events.is_empty() {
                                    debug!(
                                        topic = notification.topic.as_str(),
                                        recorded = events.len(),
                                        "Session events recorded from notification"
                                    );
                                }
                                stats.events_recorded += events.len() as u64;
                            }
                            Err(e) => {
                                warn!(
                                    topic = notification.topic.as_str(),
                                    error = %e,
                                    "Failed to record session event"
                                );
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Session observer lagged, some notifications were dropped");
                        stats.lagged += skipped;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Notification channel closed");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    info!(
        notifications = stats.notifications,
        events_recorded = stats.events_recorded,
        lagged = stats.lagged,
        "Session observer stopped"
    );
    stats
}

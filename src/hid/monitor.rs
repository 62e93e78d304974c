//! Background health sweep
//!
//! A live session normally keeps its registry status and its handle slot in
//! agreement through the reader and write paths. The monitor is the safety
//! net for the window where they diverge (a missed disconnection, a handle
//! lost without an error event): a periodic sweep finds devices whose status
//! says live but whose slot is empty and drives a full reconnect.

use super::identity;
use super::session::TransportSessions;
use crate::core::events::{DeviceEvent, EventSender};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct HealthMonitor {
    sessions: Arc<TransportSessions>,
    events: EventSender,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(sessions: Arc<TransportSessions>, events: EventSender) -> Self {
        Self {
            sessions,
            events,
            task: Mutex::new(None),
        }
    }

    /// Start the sweep loop if it is not already running. Called after every
    /// successful connect; the loop parks itself once no session is live, so
    /// the process is quiet while no device is attached.
    pub fn ensure_started(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }

        let sessions = self.sessions.clone();
        let events = self.events.clone();
        let interval = self.sessions.timing().health_interval();
        *task = Some(tokio::spawn(async move {
            debug!("health monitor started");
            loop {
                tokio::time::sleep(interval).await;
                if sessions.registry().connected_ids().is_empty() {
                    debug!("no live sessions, health monitor parking");
                    break;
                }
                Self::sweep(&sessions, &events).await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// One reconciliation pass. A failure for one device never stops the
    /// sweep from reaching the rest.
    async fn sweep(sessions: &Arc<TransportSessions>, events: &EventSender) {
        for id in sessions.registry().tracked_ids() {
            if !sessions.registry().is_connected(&id) {
                continue;
            }
            if sessions.registry().has_handle(&id) {
                continue;
            }

            info!(device = %id, "status live but transport missing, reconnecting");
            let Some(descriptor) = identity::parse(id.as_str()) else {
                warn!(device = %id, "id does not parse back to a descriptor, dropping session");
                sessions.registry().detach(&id);
                let _ = events.send(DeviceEvent::Disconnected { device: id });
                continue;
            };

            if let Err(err) = sessions.connect(&descriptor).await {
                warn!(device = %id, error = %err, "health reconnect failed");
                let _ = events.send(DeviceEvent::Disconnected { device: id });
            }
        }
    }
}

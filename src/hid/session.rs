//! Per-device transport sessions
//!
//! Owns the connect state machine, the per-device reader thread, and the
//! write path with its reconnect-and-retry budget. All device mutation of
//! the registry happens here or in the health monitor.
//!
//! Every per-device operation serializes on a per-id async gate, so a
//! connect, a user save, and a retry-triggered reconnect can never interleave
//! on the same device. Operations on different devices run concurrently.

use super::codec::{self, GetAction, Opcode, PACKET_PADDING};
use super::identity::{DeviceDescriptor, DeviceId};
use super::registry::{ConnectionRegistry, SessionState};
use super::transport::{is_recoverable_write_error, HidBackend, HidHandle};
use crate::core::config::TimingConfig;
use crate::core::events::{DeviceEvent, EventSender};
use crate::error::{DeviceError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Receives every frame the reader threads pull off the wire.
///
/// Implemented by the report dispatcher; injected here so the session layer
/// never depends on what the reports mean.
pub trait ReportSink: Send + Sync {
    fn handle_report(&self, descriptor: &DeviceDescriptor, frame: &[u8]);
}

#[derive(Clone)]
struct SessionMeta {
    gate: Arc<AsyncMutex<()>>,
    generation: Arc<AtomicU64>,
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self {
            gate: Arc::new(AsyncMutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

enum WriteOnce {
    NoHandle,
    Driver(String),
}

/// Connection lifecycle and write path for all devices.
pub struct TransportSessions {
    registry: Arc<ConnectionRegistry>,
    backend: Arc<dyn HidBackend>,
    timing: TimingConfig,
    events: EventSender,
    sink: Arc<dyn ReportSink>,
    metas: Mutex<HashMap<DeviceId, SessionMeta>>,
}

impl TransportSessions {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        backend: Arc<dyn HidBackend>,
        timing: TimingConfig,
        events: EventSender,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            registry,
            backend,
            timing,
            events,
            sink,
            metas: Mutex::new(HashMap::new()),
        }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Connection generation for a device: 0 before the first connect,
    /// bumped on every successful open. Callers caching device-side state
    /// key it by generation so a replugged (rebooted) device reads as fresh.
    pub fn generation(&self, id: &DeviceId) -> u64 {
        self.metas
            .lock()
            .get(id)
            .map(|meta| meta.generation.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Devices currently exposing the raw channel, whether connected or not.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        if let Err(err) = self.backend.refresh() {
            debug!(error = %err, "device table refresh failed");
        }
        self.backend.enumerate()
    }

    /// Open a session for a device. No-op when one is already live. On
    /// success the device sits in INITIALIZING until it answers the deferred
    /// info probe (or the watchdog gives up waiting and degrades it).
    pub async fn connect(self: &Arc<Self>, descriptor: &DeviceDescriptor) -> Result<()> {
        let id = descriptor.id();
        let gate = self.meta(&id).gate;
        let _guard = gate.lock().await;

        if self.registry.is_connected(&id) && self.registry.has_handle(&id) {
            debug!(device = %id, "connect requested but session already live");
            return Ok(());
        }

        self.registry.set_state(&id, SessionState::Connecting);
        let handle = match self.open_with_retries(descriptor).await {
            Ok(handle) => handle,
            Err(err) => {
                self.registry.set_state(&id, SessionState::Disconnected);
                return Err(err);
            }
        };

        let generation = self.install_handle(descriptor, handle);
        self.registry.set_state(&id, SessionState::Initializing);
        let _ = self.events.send(DeviceEvent::Connected { device: id.clone() });
        info!(device = %id, generation, "session opened");

        self.schedule_probe(descriptor.clone());
        self.schedule_init_watchdog(id, generation);
        Ok(())
    }

    /// Explicitly stop a device: halt its reader, forget all registry state,
    /// and notify. Safe to call for devices that were never connected.
    pub async fn stop(&self, descriptor: &DeviceDescriptor) {
        self.stop_by_id(&descriptor.id()).await;
    }

    /// Stop every tracked device.
    pub async fn stop_all(&self) {
        for id in self.registry.tracked_ids() {
            self.stop_by_id(&id).await;
        }
    }

    async fn stop_by_id(&self, id: &DeviceId) {
        let gate = self.meta(id).gate;
        let _guard = gate.lock().await;

        let was_tracked = self.registry.is_tracked(id) || self.registry.has_handle(id);
        self.halt_reader(id);
        self.registry.remove(id);
        if was_tracked {
            info!(device = %id, "session stopped");
            let _ = self.events.send(DeviceEvent::Disconnected { device: id.clone() });
        }
    }

    /// Deliver one already-encoded frame to a device.
    ///
    /// Failures whose driver text marks the device as gone trigger a
    /// reconnect and a bounded retry with linear backoff. Anything else, or
    /// exhausting the budget, detaches the device and surfaces the failure.
    pub async fn write_command(&self, descriptor: &DeviceDescriptor, frame: &[u8]) -> Result<()> {
        let id = descriptor.id();
        let gate = self.meta(&id).gate;
        let _guard = gate.lock().await;

        if !self.registry.is_connected(&id) {
            return Err(DeviceError::NotConnected { id });
        }

        let attempts = self.timing.write_retries + 1;
        let mut last_reason = String::new();
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.timing.write_backoff(attempt - 1)).await;
                if let Err(err) = self.reopen(descriptor).await {
                    warn!(device = %id, attempt, error = %err, "reconnect before retry failed");
                    last_reason = err.to_string();
                    continue;
                }
            }

            match self.write_once(&id, frame) {
                Ok(written) => {
                    if attempt > 0 {
                        info!(device = %id, attempt, "write recovered after reconnect");
                    }
                    debug!(device = %id, written, "frame delivered");
                    return Ok(());
                }
                Err(WriteOnce::NoHandle) => {
                    // The reader detached the device under us.
                    return if self.registry.is_connected(&id) {
                        Err(DeviceError::Stale { id })
                    } else {
                        Err(DeviceError::NotConnected { id })
                    };
                }
                Err(WriteOnce::Driver(reason)) => {
                    if !is_recoverable_write_error(&reason) {
                        warn!(device = %id, reason, "write failed with non-recoverable error");
                        self.halt_reader(&id);
                        self.registry.detach(&id);
                        let _ = self.events.send(DeviceEvent::Disconnected { device: id.clone() });
                        return Err(DeviceError::WriteFailed {
                            id,
                            attempts: attempt + 1,
                            reason,
                        });
                    }
                    warn!(device = %id, attempt, reason, "write failed, will reconnect");
                    last_reason = reason;
                }
            }
        }

        self.halt_reader(&id);
        self.registry.detach(&id);
        let _ = self.events.send(DeviceEvent::Disconnected { device: id.clone() });
        Err(DeviceError::WriteFailed {
            id,
            attempts,
            reason: last_reason,
        })
    }

    fn write_once(&self, id: &DeviceId, frame: &[u8]) -> std::result::Result<usize, WriteOnce> {
        let slot = self.registry.handle_slot(id);
        let mut guard = slot.lock();
        match guard.as_mut() {
            Some(handle) => handle.write(frame).map_err(|err| match err {
                DeviceError::Backend(reason) => WriteOnce::Driver(reason),
                other => WriteOnce::Driver(other.to_string()),
            }),
            None => Err(WriteOnce::NoHandle),
        }
    }

    async fn open_with_retries(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn HidHandle>> {
        let id = descriptor.id();
        let attempts = self.timing.enumeration_attempts.max(1);
        let mut last_open_err = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.timing.enumeration_backoff(attempt - 1)).await;
            }
            if let Err(err) = self.backend.refresh() {
                debug!(error = %err, "device table refresh failed");
            }

            let present = match self.backend.enumerate() {
                Ok(devices) => devices.iter().any(|d| d.id() == id),
                Err(err) => {
                    warn!(error = %err, "enumeration failed");
                    false
                }
            };
            if !present {
                debug!(device = %id, attempt, "device not enumerated");
                continue;
            }

            match self.backend.open(descriptor) {
                Ok(handle) => {
                    if attempt > 0 {
                        info!(device = %id, attempt, "device found after retry");
                    }
                    return Ok(handle);
                }
                Err(err) => {
                    warn!(device = %id, attempt, error = %err, "open failed");
                    last_open_err = Some(err);
                }
            }
        }

        Err(last_open_err.unwrap_or(DeviceError::NotFound { id, attempts }))
    }

    /// Install a fresh handle, advance the generation, and start its reader.
    /// The old reader notices the generation change and exits on its own.
    fn install_handle(&self, descriptor: &DeviceDescriptor, handle: Box<dyn HidHandle>) -> u64 {
        let id = descriptor.id();
        let slot = self.registry.handle_slot(&id);
        *slot.lock() = Some(handle);

        let meta = self.meta(&id);
        let generation = meta.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_reader(descriptor.clone(), meta.generation.clone(), generation);
        generation
    }

    /// Replace a dead handle in place during the write retry path. Keeps the
    /// lifecycle state; from the frontend's view the connection never dropped.
    async fn reopen(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        let id = descriptor.id();
        info!(device = %id, "reopening transport");
        self.registry.handle_slot(&id).lock().take();

        let handle = self.open_with_retries(descriptor).await?;
        let generation = self.install_handle(descriptor, handle);
        // The generation bump orphans a watchdog armed for the old handle,
        // so a device still initializing needs a replacement.
        if self.registry.state(&id) == SessionState::Initializing {
            self.schedule_init_watchdog(id, generation);
        }
        Ok(())
    }

    fn halt_reader(&self, id: &DeviceId) {
        if let Some(meta) = self.metas.lock().get(id) {
            meta.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spawn_reader(&self, descriptor: DeviceDescriptor, current: Arc<AtomicU64>, my_generation: u64) {
        let id = descriptor.id();
        let slot = self.registry.handle_slot(&id);
        let sink = self.sink.clone();
        let registry = self.registry.clone();
        let events = self.events.clone();
        let poll_ms = self.timing.reader_poll_ms.min(i32::MAX as u64) as i32;

        thread::spawn(move || {
            debug!(device = %id, generation = my_generation, "reader started");
            let mut buf = [0u8; PACKET_PADDING];
            loop {
                if current.load(Ordering::SeqCst) != my_generation {
                    break;
                }

                // try_lock keeps the write path from stalling behind a
                // blocked read; a miss just means a writer has the handle.
                let outcome = match slot.try_lock() {
                    Some(mut guard) => match guard.as_mut() {
                        Some(handle) => handle.read_timeout(&mut buf, poll_ms),
                        None => break,
                    },
                    None => {
                        thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                };

                match outcome {
                    Ok(0) => continue,
                    Ok(n) => {
                        let frame = buf[..n].to_vec();
                        sink.handle_report(&descriptor, &frame);
                    }
                    Err(err) => {
                        if current.load(Ordering::SeqCst) != my_generation {
                            break;
                        }
                        warn!(device = %id, error = %err, "read failed, detaching device");
                        registry.detach(&id);
                        let _ = events.send(DeviceEvent::Disconnected { device: id.clone() });
                        break;
                    }
                }
            }
            debug!(device = %id, generation = my_generation, "reader stopped");
        });
    }

    /// Fire the device-info probe after the post-open settle delay. The
    /// answer flows back through the reader; failure here is only logged,
    /// since the init watchdog covers a device that never identifies itself.
    fn schedule_probe(self: &Arc<Self>, descriptor: DeviceDescriptor) {
        let sessions = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(sessions.timing.probe_delay()).await;
            let frame = codec::encode_command(
                Opcode::CustomGetValue,
                GetAction::DeviceGetValue.as_byte(),
                &[],
            );
            if let Err(err) = sessions.write_command(&descriptor, &frame).await {
                debug!(device = %descriptor.id(), error = %err, "device info probe failed");
            }
        });
    }

    /// Degrade an unidentified device to CONNECTED after the init timeout,
    /// rather than leaving it stuck in INITIALIZING forever. Armed per
    /// handle generation, on connect and on every reopen that happens
    /// before the device has identified itself; a stale one does nothing.
    fn schedule_init_watchdog(&self, id: DeviceId, generation: u64) {
        let current = self.meta(&id).generation;
        let registry = self.registry.clone();
        let events = self.events.clone();
        let timeout = self.timing.init_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            if registry.transition(&id, SessionState::Initializing, SessionState::Connected) {
                warn!(device = %id, "device never identified itself, continuing without identity");
                let status = registry.status(&id);
                let _ = events.send(DeviceEvent::Ready {
                    device: id,
                    device_type: status.device_type,
                    firmware_version: status.firmware_version,
                });
            }
        });
    }

    fn meta(&self, id: &DeviceId) -> SessionMeta {
        self.metas.lock().entry(id.clone()).or_default().clone()
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Arc<TransportSessions> {
        use super::transport::MockBackend;

        struct NullSink;
        impl ReportSink for NullSink {
            fn handle_report(&self, _descriptor: &DeviceDescriptor, _frame: &[u8]) {}
        }

        let (events, _) = crate::core::events::channel();
        Arc::new(TransportSessions::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(MockBackend::new()),
            test_timing(),
            events,
            Arc::new(NullSink),
        ))
    }
}

impl Drop for TransportSessions {
    fn drop(&mut self) {
        // Invalidate every generation so reader threads wind down.
        for meta in self.metas.lock().values() {
            meta.generation.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
pub(crate) fn test_timing() -> TimingConfig {
    TimingConfig {
        enumeration_attempts: 3,
        enumeration_backoff_ms: 1,
        write_retries: 2,
        write_backoff_ms: 1,
        probe_delay_ms: 1,
        save_settle_ms: 1,
        init_timeout_ms: 40,
        health_interval_ms: 15,
        reader_poll_ms: 1,
    }
}

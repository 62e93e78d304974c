//! Transport backends
//!
//! `HidBackend`/`HidHandle` put a seam between the session logic and
//! `hidapi` so tests can script enumeration, writes, and inbound reports
//! without hardware. The real backend filters the OS device table by the
//! QMK raw usage pair and opens interfaces through one shared `HidApi`.

use super::identity::DeviceDescriptor;
use crate::core::config::HidFilterConfig;
use crate::error::{DeviceError, Result};
use hidapi::{DeviceInfo, HidApi};
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, info};

/// Driver error fragments that indicate the device went away, or the
/// transport is momentarily busy, and a reconnect is worth attempting.
/// Matched case-insensitively against the failure text.
const RECOVERABLE_WRITE_ERRORS: &[&str] = &[
    "busy",
    "cannot write",
    "could not read",
    "device disconnected",
    "device is not connected",
    "no such device",
    "input/output error",
    "broken pipe",
];

/// Whether a failed write should trigger the reconnect-and-retry path.
pub fn is_recoverable_write_error(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    RECOVERABLE_WRITE_ERRORS.iter().any(|needle| lower.contains(needle))
}

/// An open raw HID interface.
pub trait HidHandle: Send {
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read with a millisecond timeout; `Ok(0)` means the timeout elapsed.
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;
}

/// Enumerates and opens raw HID interfaces.
pub trait HidBackend: Send + Sync {
    /// Re-scan the OS device table so enumeration sees recent plug events.
    fn refresh(&self) -> Result<()>;

    /// Devices currently exposing the configured usage pair, deduplicated
    /// by identity.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open the interface for a previously enumerated device.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn HidHandle>>;
}

/// Production backend over `hidapi`.
pub struct HidApiBackend {
    api: Mutex<HidApi>,
    filter: HidFilterConfig,
}

impl HidApiBackend {
    pub fn new(filter: HidFilterConfig) -> Result<Self> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Mutex::new(api),
            filter,
        })
    }

    fn matches_filter(&self, info: &DeviceInfo) -> bool {
        info.usage_page() == self.filter.usage_page && info.usage() == self.filter.usage_id
    }
}

fn descriptor_from_info(info: &DeviceInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        manufacturer: info.manufacturer_string().unwrap_or_default().to_string(),
        product: info.product_string().unwrap_or_default().to_string(),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        path: info.path().to_str().ok().map(str::to_string),
        serial_number: info.serial_number().map(str::to_string),
        usage_page: Some(info.usage_page()),
        usage: Some(info.usage()),
    }
}

impl HidBackend for HidApiBackend {
    fn refresh(&self) -> Result<()> {
        self.api.lock().refresh_devices()?;
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
        let api = self.api.lock();
        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        for info in api.device_list().filter(|info| self.matches_filter(info)) {
            let descriptor = descriptor_from_info(info);
            if seen.insert(descriptor.id()) {
                devices.push(descriptor);
            }
        }
        debug!("enumerated {} raw hid device(s)", devices.len());
        Ok(devices)
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn HidHandle>> {
        let id = descriptor.id();
        let api = self.api.lock();
        let info = api
            .device_list()
            .find(|info| self.matches_filter(info) && descriptor_from_info(info).id() == id)
            .ok_or_else(|| DeviceError::OpenFailed {
                id: id.clone(),
                reason: "device no longer present".to_string(),
            })?;

        let device = info.open_device(&api).map_err(|err| DeviceError::OpenFailed {
            id: id.clone(),
            reason: err.to_string(),
        })?;
        device
            .set_blocking_mode(false)
            .map_err(|err| DeviceError::OpenFailed {
                id: id.clone(),
                reason: err.to_string(),
            })?;

        info!(device = %id, "opened hid interface");
        Ok(Box::new(HidApiHandle { device }))
    }
}

struct HidApiHandle {
    device: hidapi::HidDevice,
}

impl HidHandle for HidApiHandle {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.device
            .write(data)
            .map_err(|err| DeviceError::Backend(err.to_string()))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        self.device
            .read_timeout(buf, timeout_ms)
            .map_err(|err| DeviceError::Backend(err.to_string()))
    }
}

#[cfg(any(test, feature = "mock-hid"))]
pub use mock::MockBackend;

#[cfg(any(test, feature = "mock-hid"))]
mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct MockDeviceState {
        written: Mutex<Vec<Vec<u8>>>,
        write_failures: Mutex<VecDeque<String>>,
        inbound: Mutex<VecDeque<Vec<u8>>>,
    }

    /// Scriptable in-memory backend for tests and hardware-free runs.
    ///
    /// Scripted write failures are consumed one per write and survive
    /// reconnects, so retry scenarios can be laid out as a queue.
    #[derive(Default)]
    pub struct MockBackend {
        devices: Mutex<Vec<(DeviceDescriptor, Arc<MockDeviceState>)>>,
        open_failures: Mutex<VecDeque<String>>,
        open_count: AtomicU32,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_device(&self, descriptor: DeviceDescriptor) {
            self.devices
                .lock()
                .push((descriptor, Arc::new(MockDeviceState::default())));
        }

        /// Drop a device from enumeration, as if unplugged. The state of an
        /// already open handle is kept so captured writes remain readable.
        pub fn remove_device(&self, descriptor: &DeviceDescriptor) {
            let id = descriptor.id();
            self.devices.lock().retain(|(d, _)| d.id() != id);
        }

        /// Frames written to the device, leading report id byte included.
        pub fn written(&self, descriptor: &DeviceDescriptor) -> Vec<Vec<u8>> {
            self.state(descriptor)
                .map(|state| state.written.lock().clone())
                .unwrap_or_default()
        }

        /// Fail the next write to this device with the given driver text.
        pub fn push_write_failure(&self, descriptor: &DeviceDescriptor, reason: &str) {
            if let Some(state) = self.state(descriptor) {
                state.write_failures.lock().push_back(reason.to_string());
            }
        }

        /// Queue an inbound frame for the reader to pick up.
        pub fn push_report(&self, descriptor: &DeviceDescriptor, frame: &[u8]) {
            if let Some(state) = self.state(descriptor) {
                state.inbound.lock().push_back(frame.to_vec());
            }
        }

        /// Fail the next open with the given reason.
        pub fn fail_next_open(&self, reason: &str) {
            self.open_failures.lock().push_back(reason.to_string());
        }

        /// How many opens succeeded, reconnects included.
        pub fn open_count(&self) -> u32 {
            self.open_count.load(Ordering::Relaxed)
        }

        fn state(&self, descriptor: &DeviceDescriptor) -> Option<Arc<MockDeviceState>> {
            let id = descriptor.id();
            self.devices
                .lock()
                .iter()
                .find(|(d, _)| d.id() == id)
                .map(|(_, state)| state.clone())
        }
    }

    impl HidBackend for MockBackend {
        fn refresh(&self) -> Result<()> {
            Ok(())
        }

        fn enumerate(&self) -> Result<Vec<DeviceDescriptor>> {
            Ok(self.devices.lock().iter().map(|(d, _)| d.clone()).collect())
        }

        fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn HidHandle>> {
            if let Some(reason) = self.open_failures.lock().pop_front() {
                return Err(DeviceError::OpenFailed {
                    id: descriptor.id(),
                    reason,
                });
            }
            let state = self.state(descriptor).ok_or_else(|| DeviceError::OpenFailed {
                id: descriptor.id(),
                reason: "device no longer present".to_string(),
            })?;
            self.open_count.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MockHandle { state }))
        }
    }

    struct MockHandle {
        state: Arc<MockDeviceState>,
    }

    impl HidHandle for MockHandle {
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            if let Some(reason) = self.state.write_failures.lock().pop_front() {
                return Err(DeviceError::Backend(reason));
            }
            self.state.written.lock().push(data.to_vec());
            Ok(data.len())
        }

        fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
            if let Some(frame) = self.state.inbound.lock().pop_front() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                return Ok(n);
            }
            std::thread::sleep(Duration::from_millis(timeout_ms.max(0) as u64));
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_write_errors() {
        assert!(is_recoverable_write_error("Cannot write to hid device"));
        assert!(is_recoverable_write_error("could not read from HID device"));
        assert!(is_recoverable_write_error("No such device"));
        assert!(is_recoverable_write_error("Input/Output Error while writing"));
        assert!(is_recoverable_write_error("Broken pipe (os error 32)"));
        assert!(is_recoverable_write_error("Device or resource busy"));
        assert!(is_recoverable_write_error("transport busy"));
    }

    #[test]
    fn test_fatal_write_errors() {
        assert!(!is_recoverable_write_error("payload exceeds report size"));
        assert!(!is_recoverable_write_error("permission denied"));
        assert!(!is_recoverable_write_error(""));
    }

    #[test]
    fn test_mock_backend_enumeration_and_writes() {
        let backend = MockBackend::new();
        let descriptor = DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678);
        backend.add_device(descriptor.clone());

        assert_eq!(backend.enumerate().unwrap().len(), 1);

        let mut handle = backend.open(&descriptor).unwrap();
        handle.write(&[1, 2, 3]).unwrap();
        assert_eq!(backend.written(&descriptor), vec![vec![1, 2, 3]]);
        assert_eq!(backend.open_count(), 1);
    }

    #[test]
    fn test_mock_backend_scripted_failures() {
        let backend = MockBackend::new();
        let descriptor = DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678);
        backend.add_device(descriptor.clone());
        backend.push_write_failure(&descriptor, "no such device");

        let mut handle = backend.open(&descriptor).unwrap();
        assert!(handle.write(&[0]).is_err());
        handle.write(&[1]).unwrap();
        assert_eq!(backend.written(&descriptor), vec![vec![1]]);
    }

    #[test]
    fn test_mock_backend_open_failure_consumed_once() {
        let backend = MockBackend::new();
        let descriptor = DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678);
        backend.add_device(descriptor.clone());
        backend.fail_next_open("resource busy");

        assert!(backend.open(&descriptor).is_err());
        assert!(backend.open(&descriptor).is_ok());
    }

    #[test]
    fn test_mock_backend_inbound_frames() {
        let backend = MockBackend::new();
        let descriptor = DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678);
        backend.add_device(descriptor.clone());
        backend.push_report(&descriptor, &[0xFA, 0x02, 0x01, 3, 9]);

        let mut handle = backend.open(&descriptor).unwrap();
        let mut buf = [0u8; 64];
        let n = handle.read_timeout(&mut buf, 1).unwrap();
        assert_eq!(&buf[..n], &[0xFA, 0x02, 0x01, 3, 9]);
        assert_eq!(handle.read_timeout(&mut buf, 1).unwrap(), 0);
    }

    #[test]
    fn test_removed_device_cannot_be_opened() {
        let backend = MockBackend::new();
        let descriptor = DeviceDescriptor::new("ACME", "GPK60", 0x1234, 0x5678);
        backend.add_device(descriptor.clone());
        backend.remove_device(&descriptor);

        assert!(backend.enumerate().unwrap().is_empty());
        assert!(matches!(
            backend.open(&descriptor),
            Err(DeviceError::OpenFailed { .. })
        ));
    }
}

//! Stable identity keys for physical devices
//!
//! A device is keyed by `manufacturer::product::vendorId::productId` so that
//! the same physical unit maps to the same key across replug/reconnect cycles,
//! regardless of which OS path it enumerates under this time.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Field separator inside an encoded device id.
pub const ID_SEPARATOR: &str = "::";

/// Id produced for descriptors missing a required field. Degraded but usable
/// as a map key; callers must not route control flow through it.
pub const SENTINEL_ID: &str = "unknown::device::0::0";

/// Identity tuple of a physical HID device as the OS enumerates it.
///
/// `manufacturer`/`product`/`vendor_id`/`product_id` identify the unit;
/// the optional fields describe the concrete interface seen during one
/// enumeration and are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub product: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: Option<String>,
    pub serial_number: Option<String>,
    pub usage_page: Option<u16>,
    pub usage: Option<u16>,
}

impl DeviceDescriptor {
    /// Shorthand for the identity tuple alone.
    pub fn new(manufacturer: &str, product: &str, vendor_id: u16, product_id: u16) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            product: product.to_string(),
            vendor_id,
            product_id,
            ..Default::default()
        }
    }

    /// Derived registry key for this descriptor.
    pub fn id(&self) -> DeviceId {
        encode(self)
    }
}

/// The string key joining the registry, health monitor, and all per-device
/// caches. Deterministically derived from a [`DeviceDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Re-keying guard for stringly-typed inputs (settings keys, exported
    /// state): an input that already parses as an encoded id is reused
    /// unchanged, anything else degrades to the sentinel. Both cases log;
    /// neither should happen on the normal descriptor-driven paths.
    pub fn normalize(raw: &str) -> DeviceId {
        if parse(raw).is_some() {
            warn!("device id already encoded, reusing as-is: {}", raw);
            DeviceId(raw.to_string())
        } else {
            warn!("unparseable device key {:?}, degrading to sentinel id", raw);
            DeviceId(SENTINEL_ID.to_string())
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&DeviceDescriptor> for DeviceId {
    fn from(descriptor: &DeviceDescriptor) -> Self {
        encode(descriptor)
    }
}

/// Encode a descriptor into its device id.
///
/// A descriptor with an empty manufacturer or product cannot produce a
/// faithful key; it degrades to [`SENTINEL_ID`] with a warning instead of
/// failing, so enumeration quirks never abort a connect flow.
pub fn encode(descriptor: &DeviceDescriptor) -> DeviceId {
    if descriptor.manufacturer.is_empty() || descriptor.product.is_empty() {
        warn!(
            "descriptor missing manufacturer/product (vid={} pid={}), using sentinel id",
            descriptor.vendor_id, descriptor.product_id
        );
        return DeviceId(SENTINEL_ID.to_string());
    }
    DeviceId(format!(
        "{}{sep}{}{sep}{}{sep}{}",
        descriptor.manufacturer,
        descriptor.product,
        descriptor.vendor_id,
        descriptor.product_id,
        sep = ID_SEPARATOR,
    ))
}

/// Recover the identity tuple from an encoded id.
///
/// Returns `None` for anything with fewer than four segments. Numeric
/// segments that fail to parse become 0 rather than an error — ids are
/// degraded data by then and the caller only needs a best-effort descriptor.
pub fn parse(id: &str) -> Option<DeviceDescriptor> {
    let segments: Vec<&str> = id.split(ID_SEPARATOR).collect();
    if segments.len() < 4 {
        return None;
    }
    Some(DeviceDescriptor::new(
        segments[0],
        segments[1],
        segments[2].parse().unwrap_or(0),
        segments[3].parse().unwrap_or(0),
    ))
}

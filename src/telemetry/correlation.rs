//! Request-scoped correlation data.
//!
//! A [`Carrier`] travels alongside one unit of work (typically one inbound
//! request) and holds the operation id and service name that every telemetry
//! record emitted for that unit of work is stamped with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute name used for the operation id in emitted records.
pub const OPERATION_ID_KEY: &str = "OperationID";

/// Attribute name used for the service name in emitted records.
pub const SERVICE_NAME_KEY: &str = "ServiceName";

/// Counter for unique IDs within a process
static COUNTER: AtomicU64 = AtomicU64::new(0);

/// An operation identifier grouping the telemetry of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(String);

impl OperationId {
    /// Generate a new process-unique operation ID.
    ///
    /// Format: `{timestamp_ms}-{counter}`
    pub fn new() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{timestamp}-{counter}"))
    }

    /// Create an operation ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The well-known entries a [`Carrier`] can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarrierKey {
    OperationId,
    ServiceName,
}

impl CarrierKey {
    /// Attribute name under which this entry appears in emitted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            CarrierKey::OperationId => OPERATION_ID_KEY,
            CarrierKey::ServiceName => SERVICE_NAME_KEY,
        }
    }
}

/// Request-scoped correlation values.
///
/// Carriers are plain values: every setter returns a new carrier and never
/// mutates one that another unit of work may be reading. Clones are cheap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Carrier {
    operation_id: Option<Arc<str>>,
    service_name: Option<Arc<str>>,
}

impl Carrier {
    /// An empty carrier with no operation id and no service name.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this carrier with `value` stored at `key`.
    #[must_use]
    pub fn set(mut self, key: CarrierKey, value: impl AsRef<str>) -> Self {
        let value: Arc<str> = Arc::from(value.as_ref());
        match key {
            CarrierKey::OperationId => self.operation_id = Some(value),
            CarrierKey::ServiceName => self.service_name = Some(value),
        }
        self
    }

    /// Look up the raw entry stored at `key`.
    pub fn get(&self, key: CarrierKey) -> Option<&str> {
        match key {
            CarrierKey::OperationId => self.operation_id.as_deref(),
            CarrierKey::ServiceName => self.service_name.as_deref(),
        }
    }

    #[must_use]
    pub fn with_operation_id(self, id: impl AsRef<str>) -> Self {
        self.set(CarrierKey::OperationId, id)
    }

    #[must_use]
    pub fn with_service_name(self, name: impl AsRef<str>) -> Self {
        self.set(CarrierKey::ServiceName, name)
    }

    /// The operation id, or `""` when the operation has no parent.
    pub fn operation_id(&self) -> &str {
        self.get(CarrierKey::OperationId).unwrap_or_default()
    }

    /// The service name.
    ///
    /// # Panics
    ///
    /// Panics when no service name was stored, or the stored one is empty.
    #[track_caller]
    pub fn service_name(&self) -> &str {
        match self.get(CarrierKey::ServiceName) {
            Some(name) if !name.is_empty() => name,
            _ => panic!(
                "telemetry carrier has no {SERVICE_NAME_KEY}; configure one and derive request carriers from Telemetry::carrier()"
            ),
        }
    }
}

/// Derive a carrier holding `id` as its operation id, leaving `carrier` as is.
pub fn with_operation_id(carrier: &Carrier, id: impl AsRef<str>) -> Carrier {
    carrier.clone().with_operation_id(id)
}

/// Derive a carrier holding `name` as its service name, leaving `carrier` as is.
pub fn with_service_name(carrier: &Carrier, name: impl AsRef<str>) -> Carrier {
    carrier.clone().with_service_name(name)
}

/// Correlation values resolved from a carrier for a single emit call.
#[derive(Debug, Clone, Copy)]
pub struct Correlation<'a> {
    pub operation_id: &'a str,
    pub service_name: &'a str,
}

impl<'a> Correlation<'a> {
    /// Resolve correlation values, panicking if the service name is missing.
    #[track_caller]
    pub fn resolve(carrier: &'a Carrier) -> Self {
        Self {
            operation_id: carrier.operation_id(),
            service_name: carrier.service_name(),
        }
    }

    /// The operation id, if the operation has a parent.
    pub fn parent_id(&self) -> Option<&'a str> {
        (!self.operation_id.is_empty()).then_some(self.operation_id)
    }
}

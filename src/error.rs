//! Error types for configuration operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::driver::DriverError;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Every way a configuration operation can be refused or fail.
///
/// All preconditions are checked before any mutation; a returned error
/// always leaves the document in its prior state.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The driver system could not be reached during discovery. Fatal to
    /// the discovery pass.
    #[error("ME driver system is not available: {0}")]
    DriverUnavailable(#[from] DriverError),

    #[error("an extension is already registered on device {device}, subdevice {subdevice}")]
    AlreadyRegistered { device: u32, subdevice: u32 },

    #[error("no extension is registered on device {device}, subdevice {subdevice}")]
    NotRegistered { device: u32, subdevice: u32 },

    #[error("there are no digital I/O subdevices available")]
    NoDioAvailable,

    /// The selected digital I/O subdevice exists but is not an eligible,
    /// unlocked DIO/DO resource.
    #[error("device {device}, subdevice {subdevice} is not an available digital I/O subdevice")]
    DioTargetUnavailable { device: u32, subdevice: u32 },

    #[error("timed operation requires a digital I/O subdevice on the same device")]
    CrossDeviceTimingNotSupported,

    #[error("channel {channel} is out of range; the subdevice has {channels} channels")]
    ChannelOutOfRange { channel: u32, channels: u32 },

    #[error("there are already 7 ME-MUX32-S present")]
    SlaveLimitReached,

    #[error("there is no ME-MUX32-S entry {0}")]
    NoSuchSlave(u32),

    #[error("device {0} is still plugged in; remove it from the system before deleting it")]
    DeviceStillPluggedIn(u32),

    #[error("a subdevice of device {0} is used by another device")]
    DeviceLocked(u32),

    #[error("device {0} has no neighbor in that direction")]
    NoSuchNeighbor(u32),

    #[error("operation not supported for the selected entry")]
    UnsupportedForNodeType,

    #[error("device {0} is not eligible for this ME-1001 operation")]
    Me1001NotApplicable(u32),

    #[error("there is no device entry {0}")]
    NoSuchDevice(u32),

    #[error("device {device} has no subdevice {subdevice}")]
    NoSuchSubdevice { device: u32, subdevice: u32 },

    /// The configuration file could not be read. Fatal to the session.
    #[error("failed to read configuration from '{path}': {source}")]
    PersistenceReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written. The document stays
    /// dirty; the caller may retry.
    #[error("failed to write configuration to '{path}': {source}")]
    PersistenceWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file violates the document structure. Fatal to
    /// the session; no partial document is produced.
    #[error("malformed configuration document: {0}")]
    MalformedDocument(String),
}

//! In-memory model of the driver configuration document.
//!
//! The document is a tree of device entries, each owning its subdevice
//! entries, with extension nodes hanging off analog subdevices. Lock
//! relationships cross the tree: a borrowed DIO or timer subdevice points
//! back at the analog subdevice whose extension holds it.
//!
//! Devices carry two identities. `device_number` is the dense display and
//! file number the user sees; it changes when entries are deleted or
//! reordered. [`DeviceId`] is a stable per-document key that never changes
//! and is never reused, and every cross-reference is stored in terms of it.
//! The display numbers are substituted in only at the XML boundary, so
//! renumbering can never leave a reference pointing at the wrong device.

use crate::defines::{
    AccessKind, BusKind, ExtensionKind, PhysicalUnit, Plugged, SubdeviceSubtype, SubdeviceType,
    MAX_MUX32S_ENTRIES, TIMING_CAPABLE_DEVICE_IDS,
};
use crate::driver::BusLocation;
use crate::error::{ConfigError, Result};

/// Stable key of a device entry within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

/// Stable address of a subdevice entry. Subdevice numbers are immutable,
/// so the pair (device id, subdevice number) survives renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubdeviceRef {
    pub device: DeviceId,
    pub subdevice: u32,
}

/// Identity block of a device entry, discovery-derived.
///
/// `hw_bus` is the bus the hardware actually reports; the entry-level
/// `bus` attribute of a registered remote device is invalid while its
/// info block keeps the real value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub description: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub serial_no: u32,
    pub hw_bus: BusKind,
    pub location: BusLocation,
}

/// Registration data of a device reached through a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    pub host: String,
    pub remote_device_number: u32,
}

/// How a device entry is reached.
///
/// A LAN-attached board discovered through the local driver is remote
/// without registration data; only explicitly registered remote devices
/// carry a [`RemoteInfo`] block (the `tcpip` node in the file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAccess {
    Local,
    Remote(Option<RemoteInfo>),
}

impl DeviceAccess {
    pub fn kind(&self) -> AccessKind {
        match self {
            Self::Local => AccessKind::Local,
            Self::Remote(_) => AccessKind::Remote,
        }
    }
}

/// One conversion range of an analog subdevice, read-only after discovery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeEntry {
    pub range_number: u32,
    pub unit: PhysicalUnit,
    pub min: f64,
    pub max: f64,
    pub max_data: u32,
}

/// Descriptive slave multiplexer stage behind a ME-MUX32-M.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mux32sEntry {
    pub number: u32,
}

/// Extension module attached to an analog subdevice.
///
/// `timer` is present exactly when the extension runs in timed mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub kind: ExtensionKind,
    pub channel: u32,
    pub dio: SubdeviceRef,
    pub timer: Option<SubdeviceRef>,
    pub slaves: Vec<Mux32sEntry>,
}

impl Extension {
    pub fn timed(&self) -> bool {
        self.timer.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubdeviceEntry {
    pub subdevice_number: u32,
    pub kind: SubdeviceType,
    pub subtype: SubdeviceSubtype,
    pub channels: u32,
    /// Analog subdevice holding the extension that borrows this entry.
    pub locked_by: Option<SubdeviceRef>,
    pub extension: Option<Extension>,
    pub ranges: Vec<RangeEntry>,
}

impl SubdeviceEntry {
    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEntry {
    pub id: DeviceId,
    pub device_number: u32,
    pub plugged: Plugged,
    pub bus: BusKind,
    pub access: DeviceAccess,
    pub info: DeviceInfo,
    /// `None` until the device has been seen plugged in once; the
    /// subdevice list is created at that point and never removed.
    pub subdevices: Option<Vec<SubdeviceEntry>>,
}

impl DeviceEntry {
    pub fn is_plugged(&self) -> bool {
        self.plugged == Plugged::In
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.access, DeviceAccess::Remote(_))
    }

    /// Whether this board family can clock an extension from its fourth
    /// analog output subdevice.
    pub fn is_timing_capable(&self) -> bool {
        TIMING_CAPABLE_DEVICE_IDS.contains(&self.info.device_id)
    }

    pub fn subdevice(&self, number: u32) -> Option<&SubdeviceEntry> {
        self.subdevices
            .as_ref()?
            .iter()
            .find(|s| s.subdevice_number == number)
    }

    pub fn subdevice_mut(&mut self, number: u32) -> Option<&mut SubdeviceEntry> {
        self.subdevices
            .as_mut()?
            .iter_mut()
            .find(|s| s.subdevice_number == number)
    }

    /// The timer resource of the ME-4680 family: its fourth AO subdevice,
    /// counted over the AO entries in subdevice order.
    pub fn fourth_ao_subdevice(&self) -> Option<&SubdeviceEntry> {
        self.subdevices
            .as_ref()?
            .iter()
            .filter(|s| s.kind == SubdeviceType::Ao)
            .nth(3)
    }
}

/// The configuration document: single source of truth for the topology.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    /// Timestamp of the last save, kept in the root `date` node.
    pub date: String,
    pub devices: Vec<DeviceEntry>,
    next_id: u32,
}

impl ConfigDocument {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            devices: Vec::new(),
            next_id: 0,
        }
    }

    /// Hands out a fresh, never-reused device id.
    pub fn allocate_id(&mut self) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn device(&self, number: u32) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.device_number == number)
    }

    pub fn device_mut(&mut self, number: u32) -> Option<&mut DeviceEntry> {
        self.devices.iter_mut().find(|d| d.device_number == number)
    }

    pub fn device_by_id(&self, id: DeviceId) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn device_by_id_mut(&mut self, id: DeviceId) -> Option<&mut DeviceEntry> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    /// Current display number of a device, by stable id.
    pub fn number_of(&self, id: DeviceId) -> Option<u32> {
        self.device_by_id(id).map(|d| d.device_number)
    }

    pub fn subdevice(&self, r: SubdeviceRef) -> Option<&SubdeviceEntry> {
        self.device_by_id(r.device)?.subdevice(r.subdevice)
    }

    pub fn subdevice_mut(&mut self, r: SubdeviceRef) -> Option<&mut SubdeviceEntry> {
        self.device_by_id_mut(r.device)?.subdevice_mut(r.subdevice)
    }

    /// Maps user-facing numbers to a stable reference.
    pub fn resolve(&self, device_number: u32, subdevice_number: u32) -> Result<SubdeviceRef> {
        let device = self
            .device(device_number)
            .ok_or(ConfigError::NoSuchDevice(device_number))?;
        device
            .subdevice(subdevice_number)
            .ok_or(ConfigError::NoSuchSubdevice {
                device: device_number,
                subdevice: subdevice_number,
            })?;
        Ok(SubdeviceRef {
            device: device.id,
            subdevice: subdevice_number,
        })
    }

    /// Reassigns dense display numbers following list order.
    pub fn renumber(&mut self) {
        for (i, device) in self.devices.iter_mut().enumerate() {
            device.device_number = i as u32;
        }
    }

    /// Checks the referential-integrity invariants of the document:
    /// dense numbering, lock symmetry, extension host and resource types,
    /// timed-mode constraints and slave numbering. Returns a description
    /// of the first violation found.
    pub fn verify_consistency(&self) -> std::result::Result<(), String> {
        for (i, device) in self.devices.iter().enumerate() {
            if device.device_number != i as u32 {
                return Err(format!(
                    "device at position {i} carries number {}",
                    device.device_number
                ));
            }
            let Some(subdevices) = device.subdevices.as_ref() else {
                continue;
            };
            for (j, sub) in subdevices.iter().enumerate() {
                if sub.subdevice_number != j as u32 {
                    return Err(format!(
                        "device {i}: subdevice at position {j} carries number {}",
                        sub.subdevice_number
                    ));
                }
                if let Some(holder) = sub.locked_by {
                    let held = self.extension_resources(holder);
                    let me = SubdeviceRef {
                        device: device.id,
                        subdevice: sub.subdevice_number,
                    };
                    if !held.contains(&me) {
                        return Err(format!(
                            "device {i} subdevice {j} is locked but its holder does not reference it"
                        ));
                    }
                }
                if let Some(ext) = sub.extension.as_ref() {
                    self.verify_extension(device, sub, ext)
                        .map_err(|e| format!("device {i} subdevice {j}: {e}"))?;
                }
            }
        }
        Ok(())
    }

    fn verify_extension(
        &self,
        device: &DeviceEntry,
        sub: &SubdeviceEntry,
        ext: &Extension,
    ) -> std::result::Result<(), String> {
        if sub.kind != ext.kind.host_type() {
            return Err(format!(
                "{} registered on a {} subdevice",
                ext.kind.label(),
                sub.kind.label()
            ));
        }
        let host = SubdeviceRef {
            device: device.id,
            subdevice: sub.subdevice_number,
        };
        let dio = self
            .subdevice(ext.dio)
            .ok_or("extension references a missing DIO subdevice")?;
        if !dio.kind.is_dio_resource() {
            return Err(format!(
                "extension borrows a {} subdevice as DIO",
                dio.kind.label()
            ));
        }
        if dio.locked_by != Some(host) {
            return Err("borrowed DIO subdevice does not point back at its holder".into());
        }
        if let Some(timer_ref) = ext.timer {
            if timer_ref.device != device.id {
                return Err("timer subdevice resides on a foreign device".into());
            }
            if !device.is_timing_capable() {
                return Err("timed extension on a device without timing support".into());
            }
            let timer = self
                .subdevice(timer_ref)
                .ok_or("extension references a missing timer subdevice")?;
            if timer.locked_by != Some(host) {
                return Err("borrowed timer subdevice does not point back at its holder".into());
            }
        }
        if ext.kind == ExtensionKind::Demux32 && !ext.slaves.is_empty() {
            return Err("ME-DEMUX32 cannot carry slave stages".into());
        }
        if ext.slaves.len() > MAX_MUX32S_ENTRIES {
            return Err("more than 7 ME-MUX32-S stages".into());
        }
        for (k, slave) in ext.slaves.iter().enumerate() {
            if slave.number != k as u32 {
                return Err(format!(
                    "slave stage at position {k} carries number {}",
                    slave.number
                ));
            }
        }
        Ok(())
    }

    /// The resources (DIO and, if timed, timer) held by the extension
    /// hosted at `holder`. Empty when no extension is registered there.
    fn extension_resources(&self, holder: SubdeviceRef) -> Vec<SubdeviceRef> {
        let Some(sub) = self.subdevice(holder) else {
            return Vec::new();
        };
        let Some(ext) = sub.extension.as_ref() else {
            return Vec::new();
        };
        let mut held = vec![ext.dio];
        held.extend(ext.timer);
        held
    }
}

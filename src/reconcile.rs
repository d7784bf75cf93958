//! Merging a fresh hardware snapshot into the configuration document.
//!
//! Reconciliation matches devices positionally: entry *i* of the document
//! is compared against snapshot index *i*. The driver enumerates devices
//! densely and the document keeps entries in number order, so positions
//! line up as long as boards are only added or removed at the end of the
//! enumeration. Removing a board from the middle between runs misattributes
//! state to its successors; there is no serial-number matching fallback.
//! This mirrors the driver system's own configuration semantics.

use log::{info, warn};

use crate::defines::{BusKind, Plugged};
use crate::document::{
    ConfigDocument, DeviceAccess, DeviceEntry, DeviceInfo, RangeEntry, RemoteInfo, SubdeviceEntry,
};
use crate::inventory::{DeviceDescriptor, SubdeviceDescriptor};

/// Materializes a fresh document from a strict snapshot. Every subdevice
/// starts unlocked and extension-free.
pub fn build_from_inventory(snapshot: &[DeviceDescriptor], date: &str) -> ConfigDocument {
    let mut doc = ConfigDocument::new(date);
    for descriptor in snapshot {
        append_device(&mut doc, descriptor, DeviceAccess::Local);
    }
    doc
}

/// Merges a probed snapshot into an existing document, preserving user
/// configuration. Returns `true` when the hardware setup changed since the
/// document was written; the caller surfaces this as an advisory.
pub fn reconcile(doc: &mut ConfigDocument, probes: &[Option<DeviceDescriptor>]) -> bool {
    let mut changed = false;

    for i in 0..doc.devices.len() {
        let probe = probes.get(i).and_then(|p| p.as_ref());
        let entry = &mut doc.devices[i];
        match probe {
            None => {
                if entry.plugged == Plugged::In {
                    warn!("device {i} is no longer reachable; marking it unplugged");
                    entry.plugged = Plugged::Out;
                    changed = true;
                }
            }
            Some(descriptor) => {
                if entry.plugged == Plugged::In && descriptor.info.plugged == Plugged::Out {
                    entry.plugged = Plugged::Out;
                    changed = true;
                } else if entry.plugged == Plugged::Out && descriptor.info.plugged == Plugged::In {
                    entry.plugged = Plugged::In;
                    entry.info.serial_no = descriptor.info.serial_no;
                    entry.info.location = descriptor.info.location;
                    if entry.subdevices.is_none() {
                        entry.subdevices = descriptor
                            .subdevices
                            .as_deref()
                            .map(subdevice_entries);
                    }
                    changed = true;
                }
            }
        }
    }

    for probe in probes.iter().skip(doc.devices.len()) {
        let Some(descriptor) = probe else { continue };
        // Boards the local driver reaches over the network count as remote
        // entries, without registration data.
        let access = match descriptor.info.bus {
            BusKind::Pci | BusKind::Usb => DeviceAccess::Local,
            _ => DeviceAccess::Remote(None),
        };
        let number = append_device(doc, descriptor, access);
        info!("new device {number} ({}) appended", descriptor.name);
        changed = true;
    }

    changed
}

/// Appends one device of a remote host as a registered remote entry. The
/// entry-level bus attribute of a registered remote device is invalid;
/// its info block keeps the bus the remote hardware reports.
pub fn append_remote_device(
    doc: &mut ConfigDocument,
    descriptor: &DeviceDescriptor,
    host: &str,
    remote_device_number: u32,
) -> u32 {
    let number = append_device(
        doc,
        descriptor,
        DeviceAccess::Remote(Some(RemoteInfo {
            host: host.to_string(),
            remote_device_number,
        })),
    );
    doc.devices.last_mut().expect("just appended").bus = BusKind::Invalid;
    number
}

/// Appends every device of a remote host snapshot. Returns the count of
/// appended entries.
pub fn append_remote_devices(
    doc: &mut ConfigDocument,
    snapshot: &[DeviceDescriptor],
    host: &str,
) -> usize {
    for (i, descriptor) in snapshot.iter().enumerate() {
        append_remote_device(doc, descriptor, host, i as u32);
    }
    snapshot.len()
}

/// Single construction path for device entries; both fresh builds and
/// reconciliation appends go through here.
fn append_device(
    doc: &mut ConfigDocument,
    descriptor: &DeviceDescriptor,
    access: DeviceAccess,
) -> u32 {
    let id = doc.allocate_id();
    let device_number = doc.devices.len() as u32;
    doc.devices.push(DeviceEntry {
        id,
        device_number,
        plugged: descriptor.info.plugged,
        bus: descriptor.info.bus,
        access,
        info: DeviceInfo {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            vendor_id: descriptor.info.vendor_id,
            device_id: descriptor.info.device_id,
            serial_no: descriptor.info.serial_no,
            hw_bus: descriptor.info.bus,
            location: descriptor.info.location,
        },
        subdevices: descriptor.subdevices.as_deref().map(subdevice_entries),
    });
    device_number
}

fn subdevice_entries(descriptors: &[SubdeviceDescriptor]) -> Vec<SubdeviceEntry> {
    descriptors
        .iter()
        .enumerate()
        .map(|(j, d)| SubdeviceEntry {
            subdevice_number: j as u32,
            kind: d.kind,
            subtype: d.subtype,
            channels: d.channels,
            locked_by: None,
            extension: None,
            ranges: d
                .ranges
                .iter()
                .enumerate()
                .map(|(k, r)| RangeEntry {
                    range_number: k as u32,
                    unit: r.unit,
                    min: r.min,
                    max: r.max,
                    max_data: r.max_data,
                })
                .collect(),
        })
        .collect()
}

//! Flattened, render-ready view of the configuration document.
//!
//! The UI shell never inspects document nodes directly; it renders
//! [`OutlineRow`]s, each carrying a closed node kind plus the status flags
//! the original tool expressed through its icons (plugged, locked, timed,
//! remote).

use crate::defines::ExtensionKind;
use crate::document::{ConfigDocument, DeviceAccess, DeviceEntry, Extension, SubdeviceEntry};
use crate::driver::BusLocation;

/// Kind of a rendered tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Date,
    DeviceList,
    DeviceEntry,
    Tcpip,
    DeviceInfo,
    InfoField,
    SubdeviceList,
    SubdeviceEntry,
    SubdeviceInfo,
    RangeList,
    RangeEntry,
    Mux32m,
    Demux32,
    Mux32sList,
    Mux32sEntry,
    ExtensionField,
}

/// One row of the rendered tree.
#[derive(Debug, Clone)]
pub struct OutlineRow {
    pub depth: usize,
    pub kind: NodeKind,
    pub label: String,
    pub value: String,
    /// Set on device entry rows; lets the shell route operations.
    pub device_number: Option<u32>,
    pub plugged: bool,
    pub locked: bool,
    pub timed: bool,
    pub remote: bool,
}

impl OutlineRow {
    fn new(depth: usize, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            depth,
            kind,
            label: label.into(),
            value: String::new(),
            device_number: None,
            plugged: false,
            locked: false,
            timed: false,
            remote: false,
        }
    }

    fn value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }
}

/// Flattens the document into display rows, depth-first in file order.
pub fn outline(doc: &ConfigDocument) -> Vec<OutlineRow> {
    let mut rows = Vec::new();
    rows.push(OutlineRow::new(0, NodeKind::Root, "Driver configuration"));
    rows.push(OutlineRow::new(1, NodeKind::Date, "Date last modified").value(&doc.date));
    rows.push(OutlineRow::new(1, NodeKind::DeviceList, "Device list"));
    for device in &doc.devices {
        push_device(&mut rows, doc, device);
    }
    rows
}

fn push_device(rows: &mut Vec<OutlineRow>, doc: &ConfigDocument, device: &DeviceEntry) {
    let mut row = OutlineRow::new(
        2,
        NodeKind::DeviceEntry,
        format!("Device {}", device.device_number),
    );
    row.device_number = Some(device.device_number);
    row.plugged = device.is_plugged();
    row.remote = device.is_remote();
    rows.push(row);

    if let DeviceAccess::Remote(Some(remote)) = &device.access {
        rows.push(OutlineRow::new(3, NodeKind::Tcpip, "Network information"));
        rows.push(OutlineRow::new(4, NodeKind::InfoField, "Hostname").value(&remote.host));
        rows.push(
            OutlineRow::new(4, NodeKind::InfoField, "Remote device number")
                .value(remote.remote_device_number.to_string()),
        );
    }

    rows.push(OutlineRow::new(3, NodeKind::DeviceInfo, "Device info"));
    let info = &device.info;
    rows.push(OutlineRow::new(4, NodeKind::InfoField, "Device name").value(&info.name));
    rows.push(
        OutlineRow::new(4, NodeKind::InfoField, "Device description").value(&info.description),
    );
    rows.push(
        OutlineRow::new(4, NodeKind::InfoField, "Vendor ID")
            .value(format!("0x{:X}", info.vendor_id)),
    );
    rows.push(
        OutlineRow::new(4, NodeKind::InfoField, "Device ID")
            .value(format!("0x{:X}", info.device_id)),
    );
    rows.push(
        OutlineRow::new(4, NodeKind::InfoField, "Serial number")
            .value(format!("0x{:08X}", info.serial_no)),
    );
    match info.location {
        BusLocation::Pci {
            bus,
            device: dev,
            function,
        } => {
            rows.push(
                OutlineRow::new(4, NodeKind::InfoField, "PCI bus number").value(bus.to_string()),
            );
            rows.push(
                OutlineRow::new(4, NodeKind::InfoField, "PCI device number")
                    .value(dev.to_string()),
            );
            rows.push(
                OutlineRow::new(4, NodeKind::InfoField, "PCI function number")
                    .value(function.to_string()),
            );
        }
        BusLocation::Usb { root_hub } => {
            rows.push(
                OutlineRow::new(4, NodeKind::InfoField, "USB root hub number")
                    .value(root_hub.to_string()),
            );
        }
        BusLocation::Network => {
            rows.push(
                OutlineRow::new(4, NodeKind::InfoField, "Plug&Play remote device")
                    .value("LOCAL NETWORK"),
            );
        }
    }

    if let Some(subdevices) = device.subdevices.as_ref() {
        rows.push(OutlineRow::new(3, NodeKind::SubdeviceList, "Subdevice list"));
        for sub in subdevices {
            push_subdevice(rows, doc, sub);
        }
    }
}

fn push_subdevice(rows: &mut Vec<OutlineRow>, doc: &ConfigDocument, sub: &SubdeviceEntry) {
    let mut row = OutlineRow::new(
        4,
        NodeKind::SubdeviceEntry,
        format!("Subdevice {}", sub.subdevice_number),
    );
    row.locked = sub.is_locked();
    row.value = sub.kind.label().to_string();
    rows.push(row);

    rows.push(OutlineRow::new(5, NodeKind::SubdeviceInfo, "Subdevice info"));
    rows.push(
        OutlineRow::new(6, NodeKind::InfoField, "Subdevice type").value(sub.kind.label()),
    );
    rows.push(
        OutlineRow::new(6, NodeKind::InfoField, "Subdevice subtype").value(sub.subtype.label()),
    );
    rows.push(
        OutlineRow::new(6, NodeKind::InfoField, "Number of channels")
            .value(sub.channels.to_string()),
    );

    if sub.kind.is_analog() {
        rows.push(OutlineRow::new(5, NodeKind::RangeList, "Range list"));
        for range in &sub.ranges {
            rows.push(
                OutlineRow::new(6, NodeKind::RangeEntry, format!("Range {}", range.range_number))
                    .value(format!(
                        "{} .. {} {} ({})",
                        range.min,
                        range.max,
                        range.unit.label(),
                        range.max_data
                    )),
            );
        }
    }

    if let Some(ext) = sub.extension.as_ref() {
        push_extension(rows, doc, ext);
    }
}

fn push_extension(rows: &mut Vec<OutlineRow>, doc: &ConfigDocument, ext: &Extension) {
    let kind = match ext.kind {
        ExtensionKind::Mux32m => NodeKind::Mux32m,
        ExtensionKind::Demux32 => NodeKind::Demux32,
    };
    let mut row = OutlineRow::new(5, kind, ext.kind.label());
    row.timed = ext.timed();
    rows.push(row);

    let channel_label = match ext.kind {
        ExtensionKind::Mux32m => "Analog input channel",
        ExtensionKind::Demux32 => "Analog output channel",
    };
    rows.push(
        OutlineRow::new(6, NodeKind::ExtensionField, channel_label)
            .value(ext.channel.to_string()),
    );
    let dio_device = doc.number_of(ext.dio.device).unwrap_or(u32::MAX);
    rows.push(
        OutlineRow::new(6, NodeKind::ExtensionField, "Digital I/O device")
            .value(dio_device.to_string()),
    );
    rows.push(
        OutlineRow::new(6, NodeKind::ExtensionField, "Digital I/O subdevice")
            .value(ext.dio.subdevice.to_string()),
    );
    if let Some(timer) = ext.timer {
        let timer_device = doc.number_of(timer.device).unwrap_or(u32::MAX);
        rows.push(
            OutlineRow::new(6, NodeKind::ExtensionField, "Timer device")
                .value(timer_device.to_string()),
        );
        rows.push(
            OutlineRow::new(6, NodeKind::ExtensionField, "Timer subdevice")
                .value(timer.subdevice.to_string()),
        );
    }
    if ext.kind == ExtensionKind::Mux32m {
        rows.push(OutlineRow::new(6, NodeKind::Mux32sList, "ME-MUX32-S list"));
        for slave in &ext.slaves {
            rows.push(OutlineRow::new(
                7,
                NodeKind::Mux32sEntry,
                format!("ME-MUX32-S {}", slave.number),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::inventory::snapshot;
    use crate::reconcile::build_from_inventory;

    #[test]
    fn outline_flags_follow_the_document() {
        let mut drv = MockDriver::sample();
        let snap = snapshot(&mut drv).unwrap();
        let mut doc = build_from_inventory(&snap, "now");

        let cmd = crate::allocator::RegisterExtension::validate(
            &doc,
            (0, 0),
            ExtensionKind::Mux32m,
            3,
            (0, 5),
            true,
        )
        .unwrap();
        cmd.apply(&mut doc).unwrap();

        let rows = outline(&doc);
        let mux = rows.iter().find(|r| r.kind == NodeKind::Mux32m).unwrap();
        assert!(mux.timed);
        let locked = rows
            .iter()
            .filter(|r| r.kind == NodeKind::SubdeviceEntry && r.locked)
            .count();
        // DIO and the timer AO are both locked.
        assert_eq!(locked, 2);
        assert!(rows
            .iter()
            .any(|r| r.kind == NodeKind::DeviceEntry && r.device_number == Some(2)));
    }
}
